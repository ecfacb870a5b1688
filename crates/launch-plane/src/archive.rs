//! Typed, streaming access to uploaded project archives.
//!
//! Callers see entries as `(path, is_dir, reader)` through [`ArchiveSource`];
//! only [`ZipSource`] knows about the zip format.

use std::{collections::HashMap, io::{Cursor, Read}};
use thiserror::Error;
use tracing::{debug, warn};

/// Directories never pushed to the repository. Matched as substrings of the entry path.
pub const DEFAULT_SKIP_PATHS: &[&str] = &["node_modules", ".git", ".next", "dist", "build"];
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive is not a readable zip file: {0}")]
    Unreadable(#[from] zip::result::ZipError),
    #[error("failed to read archive entry {path}: {message}")]
    Entry { path: String, message: String },
}

pub struct ArchiveEntry<'a> {
    pub path: String,
    pub is_dir: bool,
    pub reader: &'a mut dyn Read,
}

impl ArchiveEntry<'_> {
    pub fn read_all(&mut self) -> Result<Vec<u8>, ArchiveError> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf).map_err(|e| ArchiveError::Entry { path: self.path.clone(), message: e.to_string() })?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit { Continue, Stop }

pub trait ArchiveSource {
    /// Visit entries in archive order. Content is only decompressed if the visitor reads it.
    fn visit(&mut self, visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<Visit, ArchiveError>) -> Result<(), ArchiveError>;
}

pub struct ZipSource { zip: zip::ZipArchive<Cursor<Vec<u8>>> }

impl ZipSource {
    pub fn open(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        Ok(Self { zip: zip::ZipArchive::new(Cursor::new(bytes))? })
    }
    pub fn len(&self) -> usize { self.zip.len() }
    pub fn is_empty(&self) -> bool { self.zip.len() == 0 }
}

impl ArchiveSource for ZipSource {
    fn visit(&mut self, visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<Visit, ArchiveError>) -> Result<(), ArchiveError> {
        for i in 0..self.zip.len() {
            let mut file = self.zip.by_index(i)?;
            let path = file.name().to_string();
            let is_dir = file.is_dir();
            if visitor(ArchiveEntry { path, is_dir, reader: &mut file })? == Visit::Stop { break; }
        }
        Ok(())
    }
}

/// A file destined for the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile { pub path: String, pub contents: Vec<u8> }

#[derive(Debug, Clone)]
pub struct UnpackOptions {
    pub skip_paths: Vec<String>,
    pub strip_root_folder: bool,
    /// Only this many files are decompressed; `None` takes all.
    pub max_files: Option<usize>,
}

impl UnpackOptions {
    /// Default skip list plus the staging directory name.
    pub fn new(staging_dir_name: &str, strip_root_folder: bool) -> Self {
        let mut skip_paths: Vec<String> = DEFAULT_SKIP_PATHS.iter().map(|s| s.to_string()).collect();
        if !staging_dir_name.is_empty() && !skip_paths.iter().any(|s| s == staging_dir_name) { skip_paths.push(staging_dir_name.to_string()); }
        Self { skip_paths, strip_root_folder, max_files: None }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self { self.max_files = Some(max_files); self }

    pub fn should_skip(&self, path: &str) -> bool { self.skip_paths.iter().any(|p| path.contains(p.as_str())) }
}

impl Default for UnpackOptions {
    fn default() -> Self { Self::new("", true) }
}

fn segments(path: &str) -> Vec<&str> { path.split('/').filter(|s| !s.is_empty()).collect() }

/// Locate `package.json` at the root or one folder down (folder-picker uploads).
/// The shallowest match wins; anything under `node_modules` is ignored.
pub fn find_manifest(source: &mut dyn ArchiveSource) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut nested: Option<Vec<u8>> = None;
    let mut root: Option<Vec<u8>> = None;
    source.visit(&mut |mut entry| {
        if entry.is_dir || entry.path.contains("node_modules") { return Ok(Visit::Continue); }
        let segs = segments(&entry.path);
        if segs.last() != Some(&MANIFEST_FILE) { return Ok(Visit::Continue); }
        match segs.len() {
            1 => { root = Some(entry.read_all()?); Ok(Visit::Stop) }
            2 if nested.is_none() => { nested = Some(entry.read_all()?); Ok(Visit::Continue) }
            _ => Ok(Visit::Continue),
        }
    })?;
    Ok(root.or(nested))
}

/// Files selected from an archive, plus how many pushable files it held in total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unpacked {
    pub files: Vec<ProjectFile>,
    pub total: usize,
}

/// Unpack pushable files in archive order.
///
/// The first pass only reads entry names: skips, traversal checks, root
/// stripping and the file cap are decided there. The second pass decompresses
/// the selected entries and nothing else.
///
/// When all files share one top-level folder it is stripped. A root is only
/// reported if every file has a non-empty remainder below it, so stripping
/// never leaves the list empty and there is no unstripped fallback to take.
pub fn collect_files(source: &mut dyn ArchiveSource, opts: &UnpackOptions) -> Result<Unpacked, ArchiveError> {
    // (entry ordinal, normalized path)
    let mut selected: Vec<(usize, String)> = Vec::new();
    let mut ordinal = 0usize;
    source.visit(&mut |entry| {
        let at = ordinal;
        ordinal += 1;
        if entry.is_dir || opts.should_skip(&entry.path) { return Ok(Visit::Continue); }
        let segs = segments(&entry.path);
        if segs.is_empty() { return Ok(Visit::Continue); }
        if segs.iter().any(|s| *s == "..") {
            warn!(event = "archive.entry_rejected", path = %entry.path, "path traversal segment");
            return Ok(Visit::Continue);
        }
        selected.push((at, segs.join("/")));
        Ok(Visit::Continue)
    })?;
    let total = selected.len();

    if opts.strip_root_folder {
        if let Some(root) = common_root(selected.iter().map(|(_, p)| p.as_str())) {
            debug!(event = "archive.root_stripped", root = %root, files = total);
            for (_, path) in selected.iter_mut() { *path = path[root.len()..].to_string(); }
        }
    }
    if let Some(max) = opts.max_files { selected.truncate(max); }
    if selected.is_empty() { return Ok(Unpacked { files: Vec::new(), total }); }

    let slots: HashMap<usize, usize> = selected.iter().enumerate().map(|(slot, (at, _))| (*at, slot)).collect();
    let mut contents: Vec<Option<Vec<u8>>> = vec![None; selected.len()];
    let mut remaining = slots.len();
    let mut ordinal = 0usize;
    source.visit(&mut |mut entry| {
        let at = ordinal;
        ordinal += 1;
        if let Some(&slot) = slots.get(&at) {
            contents[slot] = Some(entry.read_all()?);
            remaining -= 1;
            if remaining == 0 { return Ok(Visit::Stop); }
        }
        Ok(Visit::Continue)
    })?;

    let files = selected.into_iter().zip(contents)
        .filter_map(|((_, path), contents)| contents.map(|contents| ProjectFile { path, contents }))
        .collect();
    Ok(Unpacked { files, total })
}

/// The single first segment (with trailing `/`) shared by every path, if each
/// path continues below it.
fn common_root<'a>(paths: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut root: Option<&str> = None;
    for path in paths {
        let (first, rest) = path.split_once('/')?;
        if rest.is_empty() { return None; }
        match root {
            None => root = Some(first),
            Some(r) if r == first => {}
            Some(_) => return None,
        }
    }
    root.map(|r| format!("{r}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::zip_fixture;

    fn open(entries: &[(&str, &str)]) -> ZipSource { ZipSource::open(zip_fixture(entries)).unwrap() }

    #[test]
    fn strips_common_root_and_skips_build_dirs() {
        let mut src = open(&[
            ("my-app/package.json", "{}"),
            ("my-app/src/index.js", "x"),
            ("my-app/node_modules/react/index.js", "y"),
            ("my-app/.git/HEAD", "ref"),
            ("my-app/dist/bundle.js", "z"),
        ]);
        let files = collect_files(&mut src, &UnpackOptions::default()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["package.json", "src/index.js"]);
    }

    #[test]
    fn flat_archive_is_left_alone() {
        let mut src = open(&[("index.html", "<h1>"), ("css/site.css", "body{}")]);
        let files = collect_files(&mut src, &UnpackOptions::default()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.html", "css/site.css"]);
    }

    #[test]
    fn mixed_roots_are_not_stripped() {
        let mut src = open(&[("a/one.txt", "1"), ("b/two.txt", "2")]);
        let files = collect_files(&mut src, &UnpackOptions::default()).unwrap().files;
        assert_eq!(files[0].path, "a/one.txt");
        assert_eq!(files[1].path, "b/two.txt");
    }

    #[test]
    fn strip_can_be_disabled() {
        let mut src = open(&[("root/one.txt", "1")]);
        let files = collect_files(&mut src, &UnpackOptions::new("", false)).unwrap().files;
        assert_eq!(files[0].path, "root/one.txt");
    }

    #[test]
    fn staging_dir_name_is_skipped() {
        let mut src = open(&[(".launch-uploads/old.zip", "zz"), ("app.js", "1")]);
        let files = collect_files(&mut src, &UnpackOptions::new(".launch-uploads", true)).unwrap().files;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "app.js");
    }

    #[test]
    fn single_nested_file_is_stripped_and_kept() {
        let mut src = open(&[("site/", ""), ("site/index.html", "<h1>")]);
        let files = collect_files(&mut src, &UnpackOptions::default()).unwrap().files;
        assert_eq!(files, vec![ProjectFile { path: "index.html".into(), contents: b"<h1>".to_vec() }]);
    }

    #[test]
    fn file_at_the_root_blocks_stripping() {
        let mut src = open(&[("app/index.js", "1"), ("README", "r")]);
        let files = collect_files(&mut src, &UnpackOptions::default()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app/index.js", "README"]);
    }

    /// Counts decompressed bytes handed to the visitor.
    struct CountingSource { inner: ZipSource, bytes_read: usize }

    struct Counted<'a, R: ?Sized> { inner: &'a mut R, n: &'a mut usize }

    impl<R: Read + ?Sized> Read for Counted<'_, R> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let k = self.inner.read(buf)?;
            *self.n += k;
            Ok(k)
        }
    }

    impl ArchiveSource for CountingSource {
        fn visit(&mut self, visitor: &mut dyn FnMut(ArchiveEntry<'_>) -> Result<Visit, ArchiveError>) -> Result<(), ArchiveError> {
            let n = &mut self.bytes_read;
            self.inner.visit(&mut |entry| {
                let mut counted = Counted { inner: &mut *entry.reader, n: &mut *n };
                visitor(ArchiveEntry { path: entry.path, is_dir: entry.is_dir, reader: &mut counted })
            })
        }
    }

    #[test]
    fn only_capped_files_are_decompressed() {
        let body = "x".repeat(1000);
        let entries: Vec<(String, String)> = (0..5).map(|i| (format!("f{i}.txt"), body.clone())).collect();
        let refs: Vec<(&str, &str)> = entries.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let mut src = CountingSource { inner: ZipSource::open(zip_fixture(&refs)).unwrap(), bytes_read: 0 };

        let unpacked = collect_files(&mut src, &UnpackOptions::default().with_max_files(2)).unwrap();
        assert_eq!(unpacked.total, 5);
        let paths: Vec<_> = unpacked.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["f0.txt", "f1.txt"]);
        assert_eq!(unpacked.files[1].contents.len(), 1000);
        assert_eq!(src.bytes_read, 2000);
    }

    #[test]
    fn manifest_prefers_root_over_nested() {
        let mut src = open(&[("nested/package.json", "{\"n\":1}"), ("package.json", "{\"n\":0}")]);
        assert_eq!(find_manifest(&mut src).unwrap().unwrap(), b"{\"n\":0}");
    }

    #[test]
    fn manifest_one_level_down_and_not_deeper() {
        let mut src = open(&[("proj/package.json", "{}"), ("proj/node_modules/x/package.json", "{\"bad\":1}")]);
        assert_eq!(find_manifest(&mut src).unwrap().unwrap(), b"{}");
        let mut deep = open(&[("a/b/package.json", "{}")]);
        assert!(find_manifest(&mut deep).unwrap().is_none());
    }

    #[test]
    fn garbage_is_unreadable() {
        assert!(matches!(ZipSource::open(b"definitely not a zip".to_vec()), Err(ArchiveError::Unreadable(_))));
    }
}
