//! Test harness utilities for integration & unit tests.
//! In-memory stores plus scripted provider fakes, so pipeline tests never
//! touch a database or the network.
use async_trait::async_trait;
use std::{collections::HashSet, io::{Cursor, Write}, sync::{Arc, Mutex}};
use crate::{
    clients::{
        HostingPlatform, HostingProject, IntegrationConfiguration, IntegrationProduct, ManagedStore, ProjectDeployment,
        ProviderError, Repository, SourceControl, StoreConnection,
    },
    config::Settings,
    models::{Credential, Provider},
    services::{credentials::CredentialStore, intake::IntakeReceipt, memory::MemoryStore},
    storage::MemoryStaging,
    AppState, Collaborators,
};

pub const TEST_OWNER: &str = "octo";

/// Build a zip archive in memory. Paths ending in `/` become directory entries.
pub fn zip_fixture(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut w = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    for (path, body) in entries {
        if path.ends_with('/') {
            w.add_directory(*path, opts).expect("zip dir");
        } else {
            w.start_file(*path, opts).expect("zip entry");
            w.write_all(body.as_bytes()).expect("zip write");
        }
    }
    w.finish().expect("zip finish").into_inner()
}

/// Minimal `package.json` declaring the given dependencies.
pub fn manifest_with(deps: &[&str]) -> String {
    let deps: serde_json::Map<String, serde_json::Value> = deps.iter().map(|d| (d.to_string(), serde_json::json!("latest"))).collect();
    serde_json::json!({ "dependencies": deps, "scripts": { "build": "next build" } }).to_string()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> { m.lock().unwrap_or_else(|p| p.into_inner()) }

#[derive(Debug, Default)]
struct SourceState {
    repos: Vec<String>,
    pushed: Vec<(String, String)>,
    failing_paths: HashSet<String>,
    create_failure: Option<String>,
}

/// Records created repositories and pushed files. Repositories land under [`TEST_OWNER`].
#[derive(Debug, Clone, Default)]
pub struct FakeSourceControl { inner: Arc<Mutex<SourceState>> }

impl FakeSourceControl {
    pub fn failing_repository(self, message: &str) -> Self { lock(&self.inner).create_failure = Some(message.to_string()); self }
    pub fn failing_path(self, path: &str) -> Self { lock(&self.inner).failing_paths.insert(path.to_string()); self }
    pub fn repos(&self) -> Vec<String> { lock(&self.inner).repos.clone() }
    /// Paths pushed successfully, in push order.
    pub fn pushed_paths(&self) -> Vec<String> { lock(&self.inner).pushed.iter().map(|(_, p)| p.clone()).collect() }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn create_repository(&self, _token: &str, name: &str, _description: &str) -> Result<Repository, ProviderError> {
        let mut g = lock(&self.inner);
        if let Some(msg) = &g.create_failure { return Err(ProviderError::new(Some(422), msg.clone())); }
        let full_name = format!("{TEST_OWNER}/{name}");
        g.repos.push(full_name.clone());
        Ok(Repository { full_name })
    }

    async fn put_file(&self, _token: &str, repo: &Repository, path: &str, _contents: &[u8], _branch: &str) -> Result<(), ProviderError> {
        let mut g = lock(&self.inner);
        if g.failing_paths.contains(path) { return Err(ProviderError::new(Some(409), format!("sha mismatch for {path}"))); }
        g.pushed.push((repo.full_name.clone(), path.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
struct HostingState {
    integrations: Vec<IntegrationConfiguration>,
    products: Vec<IntegrationProduct>,
    deployment: ProjectDeployment,
    project_failure: Option<String>,
    deployment_failure: Option<String>,
    integrations_failure: bool,
    connect_failure: bool,
    projects: Vec<(String, Option<String>)>,
    stores: Vec<(String, String)>,
    connections: Vec<StoreConnection>,
    triggered: Vec<String>,
}

impl Default for HostingState {
    fn default() -> Self {
        Self {
            integrations: Vec::new(),
            products: Vec::new(),
            deployment: ProjectDeployment { id: Some("dpl_1".into()), url: Some("app-abc123.vercel.app".into()), alias: Vec::new() },
            project_failure: None,
            deployment_failure: None,
            integrations_failure: false,
            connect_failure: false,
            projects: Vec::new(),
            stores: Vec::new(),
            connections: Vec::new(),
            triggered: Vec::new(),
        }
    }
}

/// Scripted hosting platform. No integrations are installed unless added.
#[derive(Debug, Clone, Default)]
pub struct FakeHosting { inner: Arc<Mutex<HostingState>> }

impl FakeHosting {
    /// Install an integration; its configuration id is `icfg_<slug>`.
    pub fn with_integration(self, slug: &str) -> Self {
        lock(&self.inner).integrations.push(IntegrationConfiguration { id: format!("icfg_{slug}"), slug: Some(slug.to_string()), integration_id: None });
        self
    }
    pub fn with_product(self, id: &str, slug: Option<&str>, name: Option<&str>) -> Self {
        lock(&self.inner).products.push(IntegrationProduct { id: id.to_string(), slug: slug.map(str::to_string), name: name.map(str::to_string) });
        self
    }
    pub fn with_deployment(self, deployment: ProjectDeployment) -> Self { lock(&self.inner).deployment = deployment; self }
    pub fn failing_project(self, message: &str) -> Self { lock(&self.inner).project_failure = Some(message.to_string()); self }
    pub fn failing_deployment(self, message: &str) -> Self { lock(&self.inner).deployment_failure = Some(message.to_string()); self }
    pub fn failing_integrations(self) -> Self { lock(&self.inner).integrations_failure = true; self }
    pub fn failing_connect(self) -> Self { lock(&self.inner).connect_failure = true; self }
    pub fn clear_project_failure(&self) { lock(&self.inner).project_failure = None; }

    /// `(name, framework hint)` per created project.
    pub fn projects(&self) -> Vec<(String, Option<String>)> { lock(&self.inner).projects.clone() }
    /// `(store name, product key)` per created store.
    pub fn stores(&self) -> Vec<(String, String)> { lock(&self.inner).stores.clone() }
    pub fn connections(&self) -> Vec<StoreConnection> { lock(&self.inner).connections.clone() }
    pub fn triggered(&self) -> Vec<String> { lock(&self.inner).triggered.clone() }
}

#[async_trait]
impl HostingPlatform for FakeHosting {
    async fn create_project(&self, _token: &str, name: &str, framework: Option<&str>, _repo_full_name: &str) -> Result<HostingProject, ProviderError> {
        let mut g = lock(&self.inner);
        if let Some(msg) = &g.project_failure { return Err(ProviderError::new(Some(400), msg.clone())); }
        g.projects.push((name.to_string(), framework.map(str::to_string)));
        Ok(HostingProject::new(format!("prj_{}", g.projects.len())))
    }

    async fn create_deployment(&self, _token: &str, name: &str, _project: &HostingProject, _git_ref: &str) -> Result<ProjectDeployment, ProviderError> {
        let mut g = lock(&self.inner);
        if let Some(msg) = &g.deployment_failure { return Err(ProviderError::new(Some(400), msg.clone())); }
        g.triggered.push(name.to_string());
        Ok(g.deployment.clone())
    }

    async fn list_integrations(&self, _token: &str) -> Result<Vec<IntegrationConfiguration>, ProviderError> {
        let g = lock(&self.inner);
        if g.integrations_failure { return Err(ProviderError::new(Some(500), "integrations unavailable")); }
        Ok(g.integrations.clone())
    }

    async fn list_integration_products(&self, _token: &str, _configuration_id: &str) -> Result<Vec<IntegrationProduct>, ProviderError> {
        Ok(lock(&self.inner).products.clone())
    }

    async fn create_store(&self, _token: &str, name: &str, _configuration_id: &str, product: &str) -> Result<ManagedStore, ProviderError> {
        let mut g = lock(&self.inner);
        g.stores.push((name.to_string(), product.to_string()));
        Ok(ManagedStore { id: format!("store_{}", g.stores.len()), external_resource_id: None })
    }

    async fn connect_store(&self, _token: &str, _configuration_id: &str, _resource_id: &str, connection: &StoreConnection) -> Result<(), ProviderError> {
        let mut g = lock(&self.inner);
        if g.connect_failure { return Err(ProviderError::new(Some(500), "connection refused")); }
        g.connections.push(connection.clone());
        Ok(())
    }
}

/// A fully in-memory [`AppState`] with handles on every collaborator.
#[derive(Clone)]
pub struct MemoryHarness {
    pub state: AppState,
    pub store: MemoryStore,
    pub staging: MemoryStaging,
    pub source_control: FakeSourceControl,
    pub hosting: FakeHosting,
}

pub fn memory_state() -> MemoryHarness {
    memory_state_with(FakeSourceControl::default(), FakeHosting::default(), Settings::default())
}

pub fn memory_state_with(source_control: FakeSourceControl, hosting: FakeHosting, settings: Settings) -> MemoryHarness {
    let store = MemoryStore::new();
    let staging = MemoryStaging::new();
    let state = AppState::new(
        Collaborators {
            deployments: Arc::new(store.clone()),
            credentials: Arc::new(store.clone()),
            staging: Arc::new(staging.clone()),
            source_control: Arc::new(source_control.clone()),
            hosting: Arc::new(hosting.clone()),
        },
        &settings,
        None,
    );
    MemoryHarness { state, store, staging, source_control, hosting }
}

impl MemoryHarness {
    /// Store GitHub and Vercel tokens for `user_id`.
    pub async fn connect_all(&self, user_id: &str) {
        for (provider, token) in [(Provider::Github, "gh-token"), (Provider::Vercel, "vc-token")] {
            self.store.upsert(Credential::bearer(user_id, provider, token)).await.expect("store credential");
        }
    }

    /// Run intake on a zip built from `entries`.
    pub async fn upload(&self, user_id: &str, name: &str, entries: &[(&str, &str)]) -> IntakeReceipt {
        self.state.intake.accept(zip_fixture(entries), name, user_id).await.expect("intake")
    }
}
