//! Managed database provisioning through the hosting platform's marketplace
//! integrations, inside the user's own account.

use std::sync::Arc;
use chrono::Utc;
use tracing::{info, warn, instrument};
use crate::{analysis::DatabaseKind, clients::{HostingPlatform, IntegrationProduct, StoreConnection}, config::PipelineSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Store created and wired to the project. The platform injects the env vars itself,
    /// so the list is empty.
    Provisioned { env_vars: Vec<(String, String)> },
    /// The matching integration is not installed; the user has to install it.
    NeedsIntegration { integration_slug: String, install_url: String, message: String },
}

struct Family {
    needle: &'static str,
    integration_slug: &'static str,
    install_url: &'static str,
    message: &'static str,
    env_var_keys: &'static [&'static str],
    product_matches: fn(&IntegrationProduct) -> bool,
}

const POSTGRES: Family = Family {
    needle: "neon",
    integration_slug: "neon",
    install_url: "https://vercel.com/integrations/neon",
    message: "Your project uses a PostgreSQL database. Install the Neon integration on Vercel (free) to continue.",
    env_var_keys: &["DATABASE_URL"],
    product_matches: |p| p.slug.as_deref().is_some_and(|s| s.contains("postgres")) || p.id.contains("postgres"),
};

const MONGO: Family = Family {
    needle: "mongodb",
    integration_slug: "mongodb-atlas",
    install_url: "https://vercel.com/integrations/mongodbatlas",
    message: "Your project uses MongoDB. Install the MongoDB Atlas integration on Vercel (free) to continue.",
    env_var_keys: &["MONGODB_URI", "DATABASE_URL"],
    product_matches: |p| p.slug.as_deref().is_some_and(|s| s.contains("mongo")) || p.name.as_deref().is_some_and(|n| n.to_lowercase().contains("mongo")),
};

fn family(kind: DatabaseKind) -> Option<&'static Family> {
    match kind {
        DatabaseKind::Mongodb => Some(&MONGO),
        // Supabase projects get a managed Postgres too.
        DatabaseKind::Postgresql | DatabaseKind::Supabase => Some(&POSTGRES),
        DatabaseKind::Mysql | DatabaseKind::None => None,
    }
}

#[derive(Clone)]
pub struct DatabaseProvisioner {
    hosting: Arc<dyn HostingPlatform>,
    store_prefix: String,
    store_name_max_len: usize,
}

impl DatabaseProvisioner {
    pub fn new(hosting: Arc<dyn HostingPlatform>, pipeline: &PipelineSettings) -> Self {
        Self { hosting, store_prefix: pipeline.store_prefix.clone(), store_name_max_len: pipeline.store_name_max_len }
    }

    pub fn store_name(&self, project_name: &str, epoch_millis: i64) -> String {
        format!("{}-{}-{}", self.store_prefix, project_name, epoch_millis).chars().take(self.store_name_max_len).collect()
    }

    /// `None` means "could not tell": unsupported kind or any API failure. Callers proceed without a database.
    #[instrument(skip(self, token), fields(kind = kind.as_str()))]
    pub async fn provision(&self, kind: DatabaseKind, token: &str, project_name: &str, project_id: &str) -> Option<ProvisionOutcome> {
        let family = family(kind)?;
        let integrations = match self.hosting.list_integrations(token).await {
            Ok(v) => v,
            Err(e) => { warn!(event = "provision.list_integrations_failed", error = %e); return None; }
        };
        let Some(config) = integrations.iter().find(|c| c.matches(family.needle)) else {
            info!(event = "provision.integration_missing", integration = family.integration_slug);
            return Some(ProvisionOutcome::NeedsIntegration {
                integration_slug: family.integration_slug.to_string(),
                install_url: family.install_url.to_string(),
                message: family.message.to_string(),
            });
        };
        let products = match self.hosting.list_integration_products(token, &config.id).await {
            Ok(v) => v,
            Err(e) => { warn!(event = "provision.list_products_failed", configuration_id = %config.id, error = %e); return None; }
        };
        let Some(product) = products.iter().find(|p| (family.product_matches)(p)).or_else(|| products.first()) else {
            warn!(event = "provision.no_products", configuration_id = %config.id);
            return None;
        };
        let name = self.store_name(project_name, Utc::now().timestamp_millis());
        let store = match self.hosting.create_store(token, &name, &config.id, product.key()).await {
            Ok(s) => s,
            Err(e) => { warn!(event = "provision.create_store_failed", store = %name, error = %e); return None; }
        };
        let connection = StoreConnection {
            project_id: project_id.to_string(),
            env_var_keys: family.env_var_keys.iter().map(|k| k.to_string()).collect(),
        };
        if let Err(e) = self.hosting.connect_store(token, &config.id, store.resource_id(), &connection).await {
            warn!(event = "provision.connect_store_failed", store_id = %store.id, error = %e);
            return None;
        }
        info!(event = "provision.store_connected", store_id = %store.id, project_id = %project_id);
        Some(ProvisionOutcome::Provisioned { env_vars: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeHosting;

    #[test]
    fn store_name_is_truncated() {
        let p = DatabaseProvisioner::new(Arc::new(FakeHosting::default()), &PipelineSettings::default());
        assert_eq!(p.store_name("app", 1700000000000), "launchplane-app-1700000000000");
        let long = "x".repeat(300);
        assert_eq!(p.store_name(&long, 1).chars().count(), 128);
    }

    #[test]
    fn family_dispatch() {
        assert_eq!(family(DatabaseKind::Supabase).map(|f| f.needle), Some("neon"));
        assert_eq!(family(DatabaseKind::Mongodb).map(|f| f.integration_slug), Some("mongodb-atlas"));
        assert!(family(DatabaseKind::Mysql).is_none());
        assert!(family(DatabaseKind::None).is_none());
    }
}
