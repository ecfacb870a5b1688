use async_trait::async_trait;
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use crate::error::StoreError;

pub const DEFAULT_STAGING_DIR: &str = ".launch-uploads";

/// Holds uploaded archives between intake and run, addressed by deployment id.
#[async_trait]
pub trait StagingBackend: Send + Sync + 'static {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), StoreError>;
    /// `None` when the archive was never staged or has since been evicted.
    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError>;
    /// Directory name to keep out of pushed repositories, if the backend writes next to the project.
    fn dir_name(&self) -> Option<String> { None }
}

#[derive(Debug, Clone)]
pub struct FsStaging { dir: PathBuf }

impl FsStaging {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
    fn path_for(&self, id: Uuid) -> PathBuf { self.dir.join(format!("{id}.zip")) }
}

#[async_trait]
impl StagingBackend for FsStaging {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(id), bytes).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn dir_name(&self) -> Option<String> {
        self.dir.file_name().map(|n| n.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStaging { inner: Arc<Mutex<HashMap<Uuid, Vec<u8>>>> }

impl MemoryStaging {
    pub fn new() -> Self { Self::default() }
    /// Drop a staged archive, simulating eviction.
    pub async fn evict(&self, id: Uuid) { self.inner.lock().await.remove(&id); }
    pub async fn len(&self) -> usize { self.inner.lock().await.len() }
}

#[async_trait]
impl StagingBackend for MemoryStaging {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.inner.lock().await.insert(id, bytes);
        Ok(())
    }
    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().await.get(&id).cloned())
    }
}

#[cfg(feature = "s3")]
#[derive(Clone)]
pub struct S3Staging { client: aws_sdk_s3::Client, bucket: String, prefix: String }

#[cfg(feature = "s3")]
impl std::fmt::Debug for S3Staging {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("S3Staging").field("bucket", &self.bucket).finish() }
}

#[cfg(feature = "s3")]
impl S3Staging {
    pub async fn connect(bucket: String, endpoint: Option<String>) -> Self {
        use aws_config::BehaviorVersion;
        let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(ep) = endpoint {
            builder = builder.endpoint_url(ep).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());
        Self { client, bucket, prefix: "uploads".into() }
    }
    fn key(&self, id: Uuid) -> String { format!("{}/{id}.zip", self.prefix) }
}

#[cfg(feature = "s3")]
#[async_trait]
impl StagingBackend for S3Staging {
    async fn put(&self, id: Uuid, bytes: Vec<u8>) -> Result<(), StoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        self.client.put_object().bucket(&self.bucket).key(self.key(id)).body(ByteStream::from(bytes)).send().await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        match self.client.get_object().bucket(&self.bucket).key(self.key(id)).send().await {
            Ok(obj) => {
                let data = obj.body.collect().await.map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some(data.into_bytes().to_vec()))
            }
            Err(e) => {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) { return Ok(None); }
                warn!(error=%e, key=%self.key(id), "staging.s3_get_failed");
                Err(StoreError::Backend(e.to_string()))
            }
        }
    }
}

/// Pick the staging backend for the configured mode.
pub async fn staging_from_settings(settings: &crate::config::StagingSettings) -> Arc<dyn StagingBackend> {
    match settings.mode.as_str() {
        "memory" => {
            info!(event = "staging.init", mode = "memory");
            Arc::new(MemoryStaging::new())
        }
        "s3" => {
            #[cfg(feature = "s3")]
            {
                if let Some(bucket) = settings.bucket.clone() {
                    info!(event = "staging.init", mode = "s3", bucket = %bucket);
                    return Arc::new(S3Staging::connect(bucket, settings.endpoint.clone()).await);
                }
                warn!("s3 staging selected without a bucket, falling back to filesystem");
            }
            #[cfg(not(feature = "s3"))]
            warn!("s3 feature not enabled, falling back to filesystem staging");
            info!(event = "staging.init", mode = "fs", dir = %settings.dir.display());
            Arc::new(FsStaging::new(settings.dir.clone()))
        }
        _ => {
            info!(event = "staging.init", mode = "fs", dir = %settings.dir.display());
            Arc::new(FsStaging::new(settings.dir.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_round_trip_and_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = FsStaging::new(tmp.path().join(DEFAULT_STAGING_DIR));
        let id = Uuid::new_v4();
        assert!(staging.get(id).await.unwrap().is_none());
        staging.put(id, b"PK\x03\x04".to_vec()).await.unwrap();
        assert_eq!(staging.get(id).await.unwrap().unwrap(), b"PK\x03\x04");
        assert!(tmp.path().join(DEFAULT_STAGING_DIR).join(format!("{id}.zip")).exists());
        assert_eq!(staging.dir_name().as_deref(), Some(DEFAULT_STAGING_DIR));
    }

    #[tokio::test]
    async fn memory_eviction() {
        let staging = MemoryStaging::new();
        let id = Uuid::new_v4();
        staging.put(id, vec![1, 2, 3]).await.unwrap();
        assert_eq!(staging.len().await, 1);
        staging.evict(id).await;
        assert!(staging.get(id).await.unwrap().is_none());
    }
}
