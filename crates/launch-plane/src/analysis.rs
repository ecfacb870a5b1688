//! Project classification from a `package.json` manifest.
//!
//! Everything here is pure: no I/O, never fails. Unknown or malformed input
//! collapses to the static / no-database defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use utoipa::ToSchema;

pub const DEFAULT_BUILD_COMMAND: &str = "npm run build";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framework { Nextjs, React, Vue, Svelte, Astro, Nuxt, #[default] Static }

impl Framework {
    pub fn as_str(self) -> &'static str {
        match self {
            Framework::Nextjs => "nextjs",
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
            Framework::Astro => "astro",
            Framework::Nuxt => "nuxt",
            Framework::Static => "static",
        }
    }

    /// Lenient parse for values read back from storage; unknown tags are `Static`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "nextjs" => Framework::Nextjs,
            "react" => Framework::React,
            "vue" => Framework::Vue,
            "svelte" => Framework::Svelte,
            "astro" => Framework::Astro,
            "nuxt" => Framework::Nuxt,
            _ => Framework::Static,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind { Mongodb, Postgresql, Mysql, Supabase, #[default] None }

impl DatabaseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseKind::Mongodb => "mongodb",
            DatabaseKind::Postgresql => "postgresql",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Supabase => "supabase",
            DatabaseKind::None => "none",
        }
    }
    pub fn is_none(self) -> bool { self == DatabaseKind::None }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
pub struct DatabaseNeed {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    #[serde(rename = "envVars", default)]
    pub env_vars: Vec<String>,
}

impl DatabaseNeed {
    fn detected(kind: DatabaseKind, env_vars: &[&str]) -> Self {
        Self { kind, env_vars: env_vars.iter().map(|v| v.to_string()).collect() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentGateway { Razorpay, Stripe, Paypal, Lemonsqueezy }

/// Dependency name → tag tables. Order matters: first match wins.
const FRAMEWORK_TABLE: &[(&[&str], Framework)] = &[
    (&["next"], Framework::Nextjs),
    (&["react-scripts", "react"], Framework::React),
    (&["vue"], Framework::Vue),
    (&["svelte", "@sveltejs/kit"], Framework::Svelte),
    (&["astro"], Framework::Astro),
    (&["nuxt", "nuxt3"], Framework::Nuxt),
];

const DATABASE_TABLE: &[(&[&str], DatabaseKind, &[&str])] = &[
    (&["mongoose", "mongodb"], DatabaseKind::Mongodb, &["MONGODB_URI", "DATABASE_URL", "MONGO_URI"]),
    (&["prisma", "drizzle-orm", "drizzle"], DatabaseKind::Postgresql, &["DATABASE_URL"]),
    (&["@supabase/supabase-js"], DatabaseKind::Supabase, &["NEXT_PUBLIC_SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_ANON_KEY"]),
    (&["mysql", "mysql2"], DatabaseKind::Mysql, &["DATABASE_URL"]),
];

const PAYMENT_TABLE: &[(&[&str], PaymentGateway)] = &[
    (&["razorpay"], PaymentGateway::Razorpay),
    (&["stripe", "@stripe/stripe-js"], PaymentGateway::Stripe),
    (&["@paypal/react-paypal-js", "paypal-rest-sdk"], PaymentGateway::Paypal),
    (&["@lemonsqueezy/lemonsqueezy.js"], PaymentGateway::Lemonsqueezy),
];

/// The subset of `package.json` the analyzer looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageManifest {
    /// `dependencies` and `devDependencies` merged.
    pub dependencies: BTreeSet<String>,
    pub build_script: Option<String>,
}

impl PackageManifest {
    /// Parse raw manifest bytes. `None` when the bytes are not a JSON object.
    /// Wrongly-typed sections are ignored rather than rejected.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(bytes).ok()?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut dependencies = BTreeSet::new();
        for section in ["dependencies", "devDependencies"] {
            if let Some(deps) = obj.get(section).and_then(Value::as_object) {
                dependencies.extend(deps.keys().cloned());
            }
        }
        let build_script = obj.get("scripts")
            .and_then(Value::as_object)
            .and_then(|s| s.get("build"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Some(Self { dependencies, build_script })
    }

    fn has_any(&self, names: &[&str]) -> bool { names.iter().any(|n| self.dependencies.contains(*n)) }
}

/// Full analysis result for one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAnalysis {
    pub framework: Framework,
    pub database: DatabaseNeed,
    pub payment_gateways: Vec<PaymentGateway>,
    pub build_command: String,
    pub output_dir: String,
}

impl Default for ProjectAnalysis {
    fn default() -> Self {
        Self {
            framework: Framework::Static,
            database: DatabaseNeed::default(),
            payment_gateways: Vec::new(),
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            output_dir: "out".to_string(),
        }
    }
}

impl ProjectAnalysis {
    /// Split into the framework tag (own column) and the metadata persisted alongside it.
    pub fn metadata(&self) -> AnalysisMetadata {
        AnalysisMetadata {
            database: self.database.clone(),
            payment_gateways: self.payment_gateways.clone(),
            build_command: self.build_command.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn summary(&self) -> AnalysisSummary {
        AnalysisSummary { framework: self.framework, database: self.database.clone(), payment_gateways: self.payment_gateways.clone() }
    }
}

/// Persisted analysis metadata. Serialized only at the storage boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    #[serde(default)]
    pub database: DatabaseNeed,
    #[serde(default)]
    pub payment_gateways: Vec<PaymentGateway>,
    #[serde(default = "default_build_command")]
    pub build_command: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for AnalysisMetadata {
    fn default() -> Self { ProjectAnalysis::default().metadata() }
}

fn default_build_command() -> String { DEFAULT_BUILD_COMMAND.to_string() }
fn default_output_dir() -> String { "out".to_string() }

/// What intake returns to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSummary {
    pub framework: Framework,
    pub database: DatabaseNeed,
    pub payment_gateways: Vec<PaymentGateway>,
}

pub fn detect_framework(manifest: &PackageManifest) -> Framework {
    FRAMEWORK_TABLE.iter()
        .find(|(names, _)| manifest.has_any(names))
        .map(|(_, tag)| *tag)
        .unwrap_or(Framework::Static)
}

pub fn detect_database(manifest: &PackageManifest) -> DatabaseNeed {
    DATABASE_TABLE.iter()
        .find(|(names, _, _)| manifest.has_any(names))
        .map(|(_, kind, vars)| DatabaseNeed::detected(*kind, vars))
        .unwrap_or_default()
}

pub fn detect_payment_gateways(manifest: &PackageManifest) -> Vec<PaymentGateway> {
    PAYMENT_TABLE.iter().filter(|(names, _)| manifest.has_any(names)).map(|(_, g)| *g).collect()
}

pub fn build_command(manifest: &PackageManifest) -> String {
    manifest.build_script.clone().unwrap_or_else(default_build_command)
}

pub fn output_dir(manifest: &PackageManifest) -> String {
    let dir = match manifest.build_script.as_deref() {
        Some(s) if s.contains("next") => ".next",
        Some(s) if s.contains("react-scripts") => "build",
        Some(s) if s.contains("vite") => "dist",
        _ => "out",
    };
    dir.to_string()
}

/// Classify a project. `None` (no manifest) yields the defaults.
pub fn analyze(manifest: Option<&PackageManifest>) -> ProjectAnalysis {
    let Some(m) = manifest else { return ProjectAnalysis::default() };
    ProjectAnalysis {
        framework: detect_framework(m),
        database: detect_database(m),
        payment_gateways: detect_payment_gateways(m),
        build_command: build_command(m),
        output_dir: output_dir(m),
    }
}

/// Convenience over raw bytes; unparsable manifests behave like a missing one.
pub fn analyze_bytes(bytes: Option<&[u8]>) -> ProjectAnalysis {
    let manifest = bytes.and_then(PackageManifest::parse);
    if bytes.is_some() && manifest.is_none() { tracing::debug!(event = "analysis.manifest_unparsable"); }
    analyze(manifest.as_ref())
}

/// Lowercase and map every char outside `[a-z0-9-]` to `-`.
pub fn sanitize_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| { let c = c.to_ascii_lowercase(); if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' } })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(v: Value) -> PackageManifest { PackageManifest::from_value(&v).unwrap() }

    #[test]
    fn next_wins_over_react() {
        let m = manifest(json!({"dependencies": {"react": "18", "next": "14", "vue": "3"}}));
        assert_eq!(detect_framework(&m), Framework::Nextjs);
    }

    #[test]
    fn dev_dependencies_are_consulted() {
        let m = manifest(json!({"devDependencies": {"@sveltejs/kit": "2"}}));
        assert_eq!(detect_framework(&m), Framework::Svelte);
    }

    #[test]
    fn empty_manifest_defaults() {
        let a = analyze(Some(&manifest(json!({}))));
        assert_eq!(a.framework, Framework::Static);
        assert_eq!(a.database, DatabaseNeed { kind: DatabaseKind::None, env_vars: vec![] });
        assert!(a.payment_gateways.is_empty());
        assert_eq!(a.build_command, "npm run build");
    }

    #[test]
    fn mongo_before_prisma() {
        let m = manifest(json!({"dependencies": {"prisma": "5", "mongoose": "8"}}));
        let db = detect_database(&m);
        assert_eq!(db.kind, DatabaseKind::Mongodb);
        assert_eq!(db.env_vars, vec!["MONGODB_URI", "DATABASE_URL", "MONGO_URI"]);
    }

    #[test]
    fn payment_gateways_keep_table_order() {
        let m = manifest(json!({"dependencies": {"@lemonsqueezy/lemonsqueezy.js": "1", "stripe": "1", "razorpay": "2"}}));
        assert_eq!(detect_payment_gateways(&m), vec![PaymentGateway::Razorpay, PaymentGateway::Stripe, PaymentGateway::Lemonsqueezy]);
    }

    #[test]
    fn build_script_and_output_dir() {
        let m = manifest(json!({"scripts": {"build": "vite build"}}));
        assert_eq!(build_command(&m), "vite build");
        assert_eq!(output_dir(&m), "dist");
    }

    #[test]
    fn malformed_sections_are_ignored() {
        let m = manifest(json!({"dependencies": ["next"], "scripts": {"build": 42}}));
        assert!(m.dependencies.is_empty());
        assert_eq!(build_command(&m), DEFAULT_BUILD_COMMAND);
    }

    #[test]
    fn garbage_bytes_yield_defaults() {
        assert_eq!(analyze_bytes(Some(b"{not json")), ProjectAnalysis::default());
        assert_eq!(analyze_bytes(Some(b"[1,2]")), ProjectAnalysis::default());
        assert_eq!(analyze_bytes(None), ProjectAnalysis::default());
    }

    #[test]
    fn sanitize_examples() {
        assert_eq!(sanitize_name("  My App!  "), "my-app-");
        assert_eq!(sanitize_name("Ünïcode_Name"), "-n-code-name");
        assert_eq!(sanitize_name("ok-name-2"), "ok-name-2");
    }

    #[test]
    fn metadata_serializes_camel_case() {
        let meta = analyze(Some(&manifest(json!({"dependencies": {"prisma": "5", "stripe": "1"}})))).metadata();
        let v = serde_json::to_value(&meta).unwrap();
        assert_eq!(v["database"]["type"], "postgresql");
        assert_eq!(v["database"]["envVars"], json!(["DATABASE_URL"]));
        assert_eq!(v["paymentGateways"], json!(["stripe"]));
        assert_eq!(v["buildCommand"], "npm run build");
    }
}
