use prometheus::{TextEncoder, Encoder, Registry, IntCounter, IntCounterVec, opts};
use once_cell::sync::Lazy;
use axum::{extract::Request, middleware::Next, response::{IntoResponse, Response}, http::StatusCode};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("http_requests_total", "HTTP request count"), &["method", "path", "status"]).expect("metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Orchestrator runs by outcome tag (`ready`, `failed`, `rejected`, `install_integration`).
pub static PIPELINE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("pipeline_runs_total", "Pipeline runs by outcome"), &["outcome"]).expect("metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static FILE_PUSH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("pipeline_file_push_failures_total", "Files skipped after a failed repository upload").expect("metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static INTAKE_ARCHIVES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("intake_archives_total", "Archives accepted at intake").expect("metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static INTAKE_ARCHIVE_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("intake_archive_bytes_total", "Bytes of archives accepted at intake").expect("metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

/// Collapse ids in paths so label cardinality stays bounded.
pub fn normalize_path(path: &str) -> String {
    let segs: Vec<&str> = path.split('/').collect();
    let mut out: Vec<&str> = Vec::with_capacity(segs.len());
    for (i, seg) in segs.iter().enumerate() {
        let is_id = i == 2 && segs.get(1) == Some(&"deployments") && !seg.is_empty() && *seg != "upload";
        out.push(if is_id { ":id" } else { seg });
    }
    out.join("/")
}

pub async fn track_metrics(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path_label = normalize_path(req.uri().path());
    let resp = next.run(req).await;
    let status = resp.status().as_u16().to_string();
    HTTP_REQUESTS.with_label_values(&[method.as_str(), path_label.as_str(), status.as_str()]).inc();
    resp
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&metric_families, &mut buf).is_err() { return StatusCode::INTERNAL_SERVER_ERROR.into_response(); }
    ([("Content-Type", "text/plain; version=0.0.4")], buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_ids_are_collapsed() {
        assert_eq!(normalize_path("/deployments/550e8400-e29b-41d4-a716-446655440000"), "/deployments/:id");
        assert_eq!(normalize_path("/deployments/550e8400-e29b-41d4-a716-446655440000/run"), "/deployments/:id/run");
        assert_eq!(normalize_path("/deployments/upload"), "/deployments/upload");
        assert_eq!(normalize_path("/deployments"), "/deployments");
        assert_eq!(normalize_path("/connect/github"), "/connect/github");
    }
}
