use launch_plane::{
    analysis::{DatabaseKind, Framework, PaymentGateway},
    error::PipelineError,
    models::{DeploymentPatch, DeploymentStatus},
    services::{deployments::DeploymentStore, intake::{MISSING_INPUT, QUOTA_AT_INTAKE}},
    storage::StagingBackend,
    test_support::{manifest_with, memory_state, zip_fixture},
};

#[tokio::test]
async fn nextjs_upload_is_analyzed_and_staged() {
    let h = memory_state();
    let manifest = manifest_with(&["next", "react", "mongoose", "stripe"]);
    let receipt = h.upload("u1", "My Shop", &[("shop/package.json", &manifest), ("shop/pages/index.js", "export default 1")]).await;

    assert_eq!(receipt.analysis.framework, Framework::Nextjs);
    assert_eq!(receipt.analysis.database.kind, DatabaseKind::Mongodb);
    assert_eq!(receipt.analysis.payment_gateways, vec![PaymentGateway::Stripe]);

    let d = h.store.deployment(receipt.deployment_id).await.unwrap();
    assert_eq!(d.name, "my-shop");
    assert_eq!(d.status, DeploymentStatus::Pending);
    assert_eq!(d.user_id, "u1");
    assert_eq!(d.analysis.build_command, "next build");
    assert_eq!(d.analysis.output_dir, ".next");
    assert!(h.staging.get(receipt.deployment_id).await.unwrap().is_some());
}

#[tokio::test]
async fn archive_without_manifest_is_static() {
    let h = memory_state();
    let receipt = h.upload("u1", "site", &[("index.html", "<h1>hi</h1>")]).await;
    assert_eq!(receipt.analysis.framework, Framework::Static);
    assert_eq!(receipt.analysis.database.kind, DatabaseKind::None);
    assert!(receipt.analysis.payment_gateways.is_empty());
}

#[tokio::test]
async fn unparsable_manifest_falls_back_to_defaults() {
    let h = memory_state();
    let receipt = h.upload("u1", "site", &[("package.json", "{ not json")]).await;
    assert_eq!(receipt.analysis.framework, Framework::Static);
}

#[tokio::test]
async fn missing_name_or_file_is_rejected() {
    let h = memory_state();
    let err = h.state.intake.accept(zip_fixture(&[("a.txt", "a")]), "   ", "u1").await.unwrap_err();
    assert_eq!(err, PipelineError::Validation(MISSING_INPUT.into()));
    let err = h.state.intake.accept(Vec::new(), "name", "u1").await.unwrap_err();
    assert_eq!(err, PipelineError::Validation(MISSING_INPUT.into()));
    assert!(h.store.list_owned("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn corrupt_archive_is_a_validation_error() {
    let h = memory_state();
    let err = h.state.intake.accept(b"PK not really".to_vec(), "app", "u1").await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
    assert_eq!(h.staging.len().await, 0);
}

#[tokio::test]
async fn quota_counts_only_ready_deployments() {
    let h = memory_state();
    let first = h.upload("u1", "one", &[("index.html", "1")]).await;
    // A pending deployment does not count.
    h.upload("u1", "two", &[("index.html", "2")]).await;

    h.store.update(first.deployment_id, &DeploymentPatch::ready("https://one.vercel.app".into(), "prj".into(), None)).await.unwrap();
    let err = h.state.intake.accept(zip_fixture(&[("index.html", "3")]), "three", "u1").await.unwrap_err();
    assert_eq!(err, PipelineError::QuotaExceeded(QUOTA_AT_INTAKE.into()));

    // Other users are unaffected.
    h.upload("u2", "three", &[("index.html", "3")]).await;
}

#[tokio::test]
async fn repeated_uploads_get_distinct_ids_and_archives() {
    let h = memory_state();
    let first = zip_fixture(&[("index.html", "<h1>one</h1>")]);
    let second = zip_fixture(&[("index.html", "<h1>two</h1>"), ("about.html", "about")]);
    let a = h.state.intake.accept(first.clone(), "same", "u1").await.unwrap();
    let b = h.state.intake.accept(second.clone(), "same", "u1").await.unwrap();
    assert_ne!(a.deployment_id, b.deployment_id);
    assert_eq!(h.staging.len().await, 2);

    let staged_a = h.staging.get(a.deployment_id).await.unwrap().unwrap();
    let staged_b = h.staging.get(b.deployment_id).await.unwrap().unwrap();
    assert_ne!(staged_a, staged_b);
    assert_eq!(staged_a, first);
    assert_eq!(staged_b, second);
}
