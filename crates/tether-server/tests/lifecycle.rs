//! Integration tests for per-request connection handling.
//!
//! Tests:
//! - connections are opened before the handler and closed afterwards
//! - failing handlers still release their connection
//! - in-memory databases force manual mode
//! - manual `connect` / `close`

use axum::{
    body::Body,
    extract::Extension,
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tether_db::ConnectionParams;
use tether_server::{app, DatabaseConfig, RequestConnection, Tether, TetherError};
use tower::ServiceExt;

type Slot = Arc<Mutex<Option<RequestConnection>>>;

fn file_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        uri: format!("sqlite:///{}", dir.path().join("app.db").display()),
        connection_params: ConnectionParams {
            pool_max_size: 1,
            busy_timeout_ms: 1_000,
            ..ConnectionParams::default()
        },
        migrations: dir.path().join("migrations").display().to_string(),
        ..DatabaseConfig::default()
    }
}

async fn select_one(
    Extension(conn): Extension<RequestConnection>,
    Extension(slot): Extension<Slot>,
) -> Result<String, StatusCode> {
    *slot.lock().unwrap() = Some(conn.clone());
    let value = tokio::task::spawn_blocking(move || {
        conn.with(|c| c.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(value.to_string())
}

async fn fail(
    Extension(conn): Extension<RequestConnection>,
    Extension(slot): Extension<Slot>,
) -> StatusCode {
    *slot.lock().unwrap() = Some(conn);
    StatusCode::INTERNAL_SERVER_ERROR
}

fn router(tether: &Tether, slot: &Slot) -> Router {
    tether
        .bind(
            Router::new()
                .route("/one", get(select_one))
                .route("/fail", get(fail)),
        )
        .layer(Extension(Arc::clone(slot)))
}

async fn send(router: &Router, uri: &str) -> StatusCode {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn connection_is_closed_after_each_request() {
    let dir = tempfile::tempdir().unwrap();
    let tether = Tether::init(file_config(&dir)).unwrap();
    assert!(!tether.is_manual());

    let slot: Slot = Arc::default();
    let router = router(&tether, &slot);

    // The pool holds a single connection, so later requests only succeed
    // if earlier ones gave it back.
    for _ in 0..3 {
        assert_eq!(send(&router, "/one").await, StatusCode::OK);
        let conn = slot.lock().unwrap().take().expect("handler saw a connection");
        assert!(conn.is_closed());
    }
}

#[tokio::test]
async fn failing_handler_still_releases_connection() {
    let dir = tempfile::tempdir().unwrap();
    let tether = Tether::init(file_config(&dir)).unwrap();
    let slot: Slot = Arc::default();
    let router = router(&tether, &slot);

    assert_eq!(send(&router, "/fail").await, StatusCode::INTERNAL_SERVER_ERROR);
    let conn = slot.lock().unwrap().take().unwrap();
    assert!(conn.is_closed());

    assert_eq!(send(&router, "/one").await, StatusCode::OK);
}

#[tokio::test]
async fn memory_database_forces_manual_mode() {
    let config = DatabaseConfig {
        uri: "sqlite:///:memory:".to_string(),
        manual: false,
        ..DatabaseConfig::default()
    };
    let tether = Tether::init(config).unwrap();
    assert!(tether.is_manual());
    assert!(!tether.config().manual, "configuration is left untouched");

    // No connection is injected, so handlers that need one are rejected.
    let slot: Slot = Arc::default();
    let router = router(&tether, &slot);
    assert_eq!(send(&router, "/one").await, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(slot.lock().unwrap().is_none());
}

#[test]
fn manual_connect_and_close() {
    let tether = Tether::init(DatabaseConfig {
        uri: "memory://".to_string(),
        ..DatabaseConfig::default()
    })
    .unwrap();

    let conn = tether.connect().unwrap();
    assert!(!conn.is_closed());
    let value = conn
        .with(|c| c.query_row("SELECT 41 + 1", [], |row| row.get::<_, i64>(0)))
        .unwrap()
        .unwrap();
    assert_eq!(value, 42);

    tether.close(&conn);
    assert!(conn.is_closed());
    tether.close(&conn);
    assert!(matches!(
        conn.with(|_| ()),
        Err(TetherError::ConnectionClosed)
    ));

    // The single in-memory connection went back to the pool.
    let again = tether.connect().unwrap();
    tether.close(&again);
}

#[test]
fn explicit_manual_mode_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    let tether = Tether::init(DatabaseConfig {
        manual: true,
        ..file_config(&dir)
    })
    .unwrap();
    assert!(tether.is_manual());
}

#[tokio::test]
async fn health_route_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let tether = Tether::init(file_config(&dir)).unwrap();

    let response = app(&tether, None)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn debug_panel_is_mounted_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let tether = Tether::init(file_config(&dir)).unwrap();
    let debug = tether_debug::DebugState::new(tether.database().clone(), "secret");
    let app = app(&tether, Some(debug));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(tether_debug::QUERY_COUNT_HEADER));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/_debug/queries")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
