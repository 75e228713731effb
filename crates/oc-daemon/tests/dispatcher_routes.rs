use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use oc_daemon::{routes, state::AppState};
use oc_sync::{AppConfig, SyncService};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;

fn test_router() -> axum::Router {
    // connect_lazy never opens a socket until a query runs, so routes that
    // don't touch the database are exercisable without a live Postgres.
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://oc:oc@127.0.0.1/oc_test")
        .expect("lazy pool construction never fails");
    let dispatcher = oc_dispatcher::spawn(reqwest::Client::new());
    let sync_service = SyncService::new(AppConfig::from_env().bitmart, pool);
    let state = Arc::new(AppState::new(dispatcher, sync_service));
    routes::build_router(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_router();
    let response = app
        .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn submit_accepts_envelope_without_url_callback() {
    // url_callback defaults to "" at construction time; it only becomes a
    // problem when the dispatcher actually tries to reach it.
    let app = test_router();
    let request = Request::post("/v1/dispatcher/submit")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"bucket": "regular", "payload": {}}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn submit_rejects_unknown_bucket() {
    let app = test_router();
    let request = Request::post("/v1/dispatcher/submit")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"bucket": "not-a-bucket", "payload": {"url_callback": "/a"}}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_then_queue_size_reflects_it() {
    let app = test_router();

    let submit = Request::post("/v1/dispatcher/submit")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"bucket": "regular", "payload": {"url_callback": "/a"}}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(submit).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let queue = app
        .oneshot(Request::get("/v1/dispatcher/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(queue.status(), StatusCode::OK);
    let body = body_json(queue).await;
    assert_eq!(body["regular"], json!(1));
}
