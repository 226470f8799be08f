//! Status endpoint tests against a local axum server

mod common;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use common::MockPlatform;
use compita_voice::StatusClient;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use url::Url;

async fn spawn_server(app: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/api/compita/status")).unwrap()
}

#[tokio::test]
async fn test_fetch_status() {
    let app = Router::new().route(
        "/api/compita/status",
        get(|| async {
            axum::Json(serde_json::json!({
                "enabled": true,
                "running": false,
                "has_api_key": true,
                "voice_mode": "browser",
                "robot_voice_available": false,
                "robot_voice_debug": { "reason": "no robot attached" },
            }))
        }),
    );
    let client = StatusClient::new(spawn_server(app).await);

    let status = assert_ok!(client.fetch().await);
    assert!(status.enabled);
    assert!(!status.running);
    assert!(status.has_api_key);
    assert_eq!(status.voice_mode.as_deref(), Some("browser"));
    assert!(status.client_mode());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let app = Router::new().route(
        "/api/compita/status",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let client = StatusClient::new(spawn_server(app).await);
    assert_err!(client.fetch().await);
}

#[tokio::test]
async fn test_fetched_status_gates_enable() {
    let app = Router::new().route(
        "/api/compita/status",
        get(|| async { axum::Json(serde_json::json!({ "enabled": false })) }),
    );
    let client = StatusClient::new(spawn_server(app).await);
    let status = assert_ok!(client.fetch().await);

    let platform = MockPlatform::default();
    let mut controller = platform.controller();
    assert!(!assert_ok!(controller.enable_if_available(&status)));
    assert!(!controller.is_enabled());
    assert_eq!(platform.mic.opened(), 0);
}
