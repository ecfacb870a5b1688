//! The reqwest clients against local axum servers standing in for the providers.
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Form, Json, Router,
};
use launch_plane::{
    clients::{http_client, GithubClient, HostingPlatform, HostingProject, OAuthExchange, RepoId, Repository, SourceControl, StoreConnection, VercelClient},
    services::credentials::VercelOAuth,
};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::{Arc, Mutex}, time::Duration};

#[derive(Clone, Default)]
struct Seen { bodies: Arc<Mutex<Vec<(String, Value)>>> }

impl Seen {
    fn record(&self, route: &str, body: Value) { self.bodies.lock().unwrap().push((route.to_string(), body)); }
    fn get(&self, route: &str) -> Vec<Value> {
        self.bodies.lock().unwrap().iter().filter(|(r, _)| r == route).map(|(_, b)| b.clone()).collect()
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn bearer(headers: &HeaderMap) -> String {
    headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string()
}

fn github_fake(seen: Seen) -> Router {
    Router::new()
        .route("/user/repos", post(|State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
            assert_eq!(bearer(&headers), "Bearer gh-token");
            seen.record("create_repo", body.clone());
            if body["name"] == "taken" {
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": "Repository creation failed.", "errors": []})));
            }
            (StatusCode::CREATED, Json(json!({"full_name": format!("octo/{}", body["name"].as_str().unwrap_or_default()), "id": 1})))
        }))
        .route("/repos/:owner/:repo/contents/*path", put(|State(seen): State<Seen>, Path((owner, repo, path)): Path<(String, String, String)>, Json(body): Json<Value>| async move {
            seen.record("put_file", json!({"owner": owner, "repo": repo, "path": path, "body": body}));
            if path.ends_with("locked.js") {
                return (StatusCode::CONFLICT, Json(json!({"message": "sha wasn't supplied"})));
            }
            (StatusCode::CREATED, Json(json!({"content": {"path": path}})))
        }))
        .with_state(seen)
}

fn vercel_fake(seen: Seen) -> Router {
    Router::new()
        .route("/v11/projects", post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
            seen.record("create_project", body.clone());
            if body["name"] == "taken" {
                return (StatusCode::CONFLICT, Json(json!({"error": {"code": "conflict", "message": "Project already exists"}})));
            }
            (StatusCode::OK, Json(json!({"id": "prj_1", "name": body["name"], "link": {"type": "github", "repoId": 987}})))
        }))
        .route("/v13/deployments", post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
            seen.record("create_deployment", body);
            Json(json!({"id": "dpl_1", "url": "app-xyz.vercel.app", "alias": ["app.vercel.app"]}))
        }))
        .route("/v1/integrations/configurations", get(|headers: HeaderMap| async move {
            assert_eq!(bearer(&headers), "Bearer vc-token");
            Json(json!({"configurations": [{"id": "icfg_1", "slug": "neon", "integrationId": "oac_neon"}]}))
        }))
        .route("/v1/integrations/configuration/:id/products", get(|Path(id): Path<String>| async move {
            Json(json!({"products": [{"id": format!("{id}-pg"), "slug": "neon-postgres", "name": "Postgres"}]}))
        }))
        .route("/v1/storage/stores/integration/direct", post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
            seen.record("create_store", body);
            Json(json!({"store": {"id": "store_1", "externalResourceId": "res_1"}}))
        }))
        .route("/v1/integrations/installations/:cfg/resources/:rid/connections", post(|State(seen): State<Seen>, Path((cfg, rid)): Path<(String, String)>, Json(body): Json<Value>| async move {
            seen.record("connect_store", json!({"cfg": cfg, "rid": rid, "body": body}));
            StatusCode::CREATED
        }))
        .route("/login/oauth/token", post(|State(seen): State<Seen>, Form(form): Form<HashMap<String, String>>| async move {
            seen.record("oauth", json!(form));
            if form.get("code").map(String::as_str) == Some("bad") {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"})));
            }
            (StatusCode::OK, Json(json!({"access_token": "at_1", "refresh_token": "rt_1", "expires_in": 3600, "token_type": "Bearer"})))
        }))
        .route("/slow/v1/integrations/configurations", get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"configurations": []}))
        }))
        .with_state(seen)
}

fn client() -> reqwest::Client { http_client(Duration::from_secs(5)).unwrap() }

#[tokio::test]
async fn github_creates_repo_and_pushes_base64_files() {
    let seen = Seen::default();
    let base = serve(github_fake(seen.clone())).await;
    let gh = GithubClient::new(client(), base);

    let repo = gh.create_repository("gh-token", "app", "Deployed with LaunchPlane").await.unwrap();
    assert_eq!(repo, Repository { full_name: "octo/app".into() });
    let created = &seen.get("create_repo")[0];
    assert_eq!(created["private"], false);
    assert_eq!(created["auto_init"], true);

    gh.put_file("gh-token", &repo, "src/index.js", b"hello", "main").await.unwrap();
    let pushed = &seen.get("put_file")[0];
    assert_eq!(pushed["path"], "src/index.js");
    assert_eq!(pushed["body"]["content"], "aGVsbG8=");
    assert_eq!(pushed["body"]["branch"], "main");
    assert_eq!(pushed["body"]["message"], "Add src/index.js");
}

#[tokio::test]
async fn github_errors_carry_provider_message() {
    let base = serve(github_fake(Seen::default())).await;
    let gh = GithubClient::new(client(), base);
    let err = gh.create_repository("gh-token", "taken", "d").await.unwrap_err();
    assert_eq!(err.status, Some(422));
    assert_eq!(err.message, "Repository creation failed.");

    let repo = Repository { full_name: "octo/app".into() };
    let err = gh.put_file("gh-token", &repo, "locked.js", b"x", "main").await.unwrap_err();
    assert_eq!(err.message, "sha wasn't supplied");
}

#[tokio::test]
async fn vercel_project_and_deployment_round() {
    let seen = Seen::default();
    let base = serve(vercel_fake(seen.clone())).await;
    let vc = VercelClient::new(client(), base);

    let project = vc.create_project("vc-token", "app", Some("nextjs"), "octo/app").await.unwrap();
    assert_eq!(project.id, "prj_1");
    assert_eq!(project.repo_id(), RepoId::Number(987));
    let body = &seen.get("create_project")[0];
    assert_eq!(body["framework"], "nextjs");
    assert_eq!(body["gitRepository"], json!({"type": "github", "repo": "octo/app"}));

    vc.create_project("vc-token", "static-site", None, "octo/static-site").await.unwrap();
    assert!(seen.get("create_project")[1]["framework"].is_null());

    let dep = vc.create_deployment("vc-token", "app", &project, "main").await.unwrap();
    assert_eq!(dep.id.as_deref(), Some("dpl_1"));
    assert_eq!(dep.live_url("app", "vercel.app"), "https://app-xyz.vercel.app");
    let body = &seen.get("create_deployment")[0];
    assert_eq!(body["target"], "production");
    assert_eq!(body["gitSource"]["repoId"], 987);
    assert_eq!(body["gitSource"]["ref"], "main");
}

#[tokio::test]
async fn vercel_nested_error_message_is_extracted() {
    let base = serve(vercel_fake(Seen::default())).await;
    let vc = VercelClient::new(client(), base);
    let err = vc.create_project("vc-token", "taken", None, "octo/taken").await.unwrap_err();
    assert_eq!(err.status, Some(409));
    assert_eq!(err.message, "Project already exists");
}

#[tokio::test]
async fn vercel_marketplace_calls() {
    let seen = Seen::default();
    let base = serve(vercel_fake(seen.clone())).await;
    let vc = VercelClient::new(client(), base);

    let configs = vc.list_integrations("vc-token").await.unwrap();
    assert!(configs[0].matches("neon"));
    let products = vc.list_integration_products("vc-token", "icfg_1").await.unwrap();
    assert_eq!(products[0].key(), "neon-postgres");

    let store = vc.create_store("vc-token", "launchplane-app-1", "icfg_1", products[0].key()).await.unwrap();
    assert_eq!(store.resource_id(), "res_1");
    assert_eq!(seen.get("create_store")[0]["integrationProductIdOrSlug"], "neon-postgres");

    let conn = StoreConnection { project_id: "prj_1".into(), env_var_keys: vec!["DATABASE_URL".into()] };
    vc.connect_store("vc-token", "icfg_1", store.resource_id(), &conn).await.unwrap();
    let sent = &seen.get("connect_store")[0];
    assert_eq!(sent["rid"], "res_1");
    assert_eq!(sent["body"]["projectId"], "prj_1");
    assert_eq!(sent["body"]["environments"], json!(["production", "preview", "development"]));
    assert_eq!(sent["body"]["envVarKeys"], json!(["DATABASE_URL"]));
}

#[tokio::test]
async fn oauth_code_exchange_stores_refresh_and_expiry() {
    let seen = Seen::default();
    let base = serve(vercel_fake(seen.clone())).await;
    let oauth = VercelOAuth::new(VercelClient::new(client(), base), "client-1", "secret-1");

    let before = chrono::Utc::now();
    let cred = oauth.exchange("u1", "code-1", "verifier-1", "https://app.example/callback").await.unwrap();
    assert_eq!(cred.access_token, "at_1");
    assert_eq!(cred.refresh_token.as_deref(), Some("rt_1"));
    let expires = cred.expires_at.unwrap();
    assert!(expires >= before + chrono::Duration::seconds(3600));

    let form = &seen.get("oauth")[0];
    assert_eq!(form["grant_type"], "authorization_code");
    assert_eq!(form["client_secret"], "secret-1");
    assert_eq!(form["code_verifier"], "verifier-1");
    assert_eq!(form["redirect_uri"], "https://app.example/callback");

    let err = oauth.exchange("u1", "bad", "v", "r").await.unwrap_err();
    assert_eq!(err.to_string(), "invalid_grant");
}

#[tokio::test]
async fn raw_exchange_decodes_token() {
    let base = serve(vercel_fake(Seen::default())).await;
    let vc = VercelClient::new(client(), base);
    let token = vc.exchange_code(&OAuthExchange { client_id: "c", client_secret: "s", code: "ok", code_verifier: "v", redirect_uri: "r" }).await.unwrap();
    assert_eq!(token.expires_in, Some(3600));
}

#[tokio::test]
async fn slow_provider_times_out() {
    let base = serve(vercel_fake(Seen::default())).await;
    let vc = VercelClient::new(http_client(Duration::from_millis(200)).unwrap(), format!("{base}/slow"));
    let started = std::time::Instant::now();
    let err = vc.list_integrations("vc-token").await.unwrap_err();
    assert_eq!(err.message, "Failed to list integrations: request timed out");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn empty_error_body_falls_back_to_step_message() {
    let base = serve(vercel_fake(Seen::default())).await;
    let vc = VercelClient::new(client(), format!("{base}/nowhere"));
    let err = vc.list_integrations("vc-token").await.unwrap_err();
    assert_eq!(err.status, Some(404));
    assert_eq!(err.message, "Failed to list integrations");
}

#[tokio::test]
async fn project_repo_id_defaults_without_link() {
    let p = HostingProject::new("prj_x");
    assert_eq!(p.repo_id(), RepoId::Text("prj_x".into()));
}
