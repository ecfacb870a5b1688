use async_trait::async_trait;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use uuid::Uuid;
use crate::{error::StoreError, models::{Credential, Deployment, DeploymentPatch, DeploymentStatus, NewDeployment, Provider}};
use super::{credentials::CredentialStore, deployments::DeploymentStore};

#[derive(Debug, Default)]
struct Inner {
    // Insertion order doubles as creation order.
    deployments: Vec<Deployment>,
    credentials: HashMap<(String, Provider), Credential>,
    linked: HashMap<(String, Provider), String>,
}

/// Process-local store backing both traits. Used by tests and `LAUNCH_STORE_MODE=memory`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore { inner: Arc<Mutex<Inner>> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn link_identity(&self, user_id: &str, provider: Provider, token: &str) {
        self.inner.lock().await.linked.insert((user_id.to_string(), provider), token.to_string());
    }

    /// Unscoped lookup for assertions.
    pub async fn deployment(&self, id: Uuid) -> Option<Deployment> {
        self.inner.lock().await.deployments.iter().find(|d| d.id == id).cloned()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create(&self, new: NewDeployment) -> Result<Deployment, StoreError> {
        let d = new.into_deployment(Uuid::new_v4(), Utc::now());
        self.inner.lock().await.deployments.push(d.clone());
        Ok(d)
    }

    async fn find_owned(&self, id: Uuid, user_id: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.inner.lock().await.deployments.iter().find(|d| d.id == id && d.user_id == user_id).cloned())
    }

    async fn update(&self, id: Uuid, patch: &DeploymentPatch) -> Result<(), StoreError> {
        let mut g = self.inner.lock().await;
        if let Some(d) = g.deployments.iter_mut().find(|d| d.id == id) { patch.apply(d); }
        Ok(())
    }

    async fn transition(&self, id: Uuid, from: &[DeploymentStatus], patch: &DeploymentPatch) -> Result<bool, StoreError> {
        let mut g = self.inner.lock().await;
        match g.deployments.iter_mut().find(|d| d.id == id) {
            Some(d) if from.contains(&d.status) => { patch.apply(d); Ok(true) }
            _ => Ok(false),
        }
    }

    async fn count(&self, user_id: &str, status: DeploymentStatus) -> Result<i64, StoreError> {
        Ok(self.inner.lock().await.deployments.iter().filter(|d| d.user_id == user_id && d.status == status).count() as i64)
    }

    async fn list_owned(&self, user_id: &str) -> Result<Vec<Deployment>, StoreError> {
        Ok(self.inner.lock().await.deployments.iter().rev().filter(|d| d.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert(&self, credential: Credential) -> Result<(), StoreError> {
        let key = (credential.user_id.clone(), credential.provider);
        self.inner.lock().await.credentials.insert(key, credential);
        Ok(())
    }

    async fn get(&self, user_id: &str, provider: Provider) -> Result<Option<Credential>, StoreError> {
        Ok(self.inner.lock().await.credentials.get(&(user_id.to_string(), provider)).cloned())
    }

    async fn linked_identity_token(&self, user_id: &str, provider: Provider) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.linked.get(&(user_id.to_string(), provider)).cloned())
    }
}
