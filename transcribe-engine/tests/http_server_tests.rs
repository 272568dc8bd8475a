//! Drives the Axum router directly (no bound socket) to exercise the
//! HTTP surface: submission, status lookup, artifact download, and
//! the health check.

use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

use transcribe_engine::{
    db,
    jobs::JobStore,
    pipeline::orchestrator::OrchestratorDeps,
    worker, AppState,
};

async fn test_state(workspace_root: &std::path::Path) -> AppState {
    let db_path = workspace_root.join("jobs.db");
    let db_pool = db::init_database_pool(&db_path).await.unwrap();
    let event_bus = Arc::new(transcribe_common::EventBus::new(32));
    let job_store = JobStore::new(event_bus);
    let deps = Arc::new(OrchestratorDeps {
        job_store: job_store.clone(),
        db_pool: db_pool.clone(),
        workspace_root: workspace_root.to_path_buf(),
        engine_config: transcribe_common::config::EngineConfig::default(),
    });
    let job_queue = worker::spawn(deps.clone());
    AppState::new(job_store, db_pool, deps, job_queue)
}

#[tokio::test]
async fn health_check_reports_ok_and_queue_depth() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let app = transcribe_engine::build_router(state);

    let request = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["queue_depth"], 0);
}

#[tokio::test]
async fn submit_job_rejects_requests_with_no_recognized_instrument_tags() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let app = transcribe_engine::build_router(state);

    let body = serde_json::json!({
        "source": {"kind": "upload", "path": "a.wav"},
        "instruments": ["kazoo"],
    });
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/transcribe")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_then_get_job_round_trips_through_the_router() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let app = transcribe_engine::build_router(state);

    let body = serde_json::json!({
        "source": {"kind": "upload", "path": "missing.wav"},
        "instruments": ["piano"],
    });
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/transcribe")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::CREATED);

    let submitted = response.into_body().collect().await.unwrap().to_bytes();
    let submitted: serde_json::Value = serde_json::from_slice(&submitted).unwrap();
    let job_id = submitted["job_id"].as_str().unwrap();
    assert_eq!(submitted["status"], "queued");
    assert!(submitted["websocket_url"].as_str().unwrap().contains(job_id));

    let request = axum::http::Request::builder()
        .uri(format!("/jobs/{job_id}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn get_job_for_unknown_id_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(dir.path()).await;
    let app = transcribe_engine::build_router(state);

    let request = axum::http::Request::builder()
        .uri(format!("/jobs/{}", uuid::Uuid::new_v4()))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}
