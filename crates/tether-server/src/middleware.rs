//! Per-request connection lifecycle.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use tether_db::DbConnection;
use tracing::Instrument;

use crate::{Tether, TetherError};

/// A pooled connection shared by the handlers of one request.
///
/// Handles are cheap to clone. Closing any handle returns the connection to
/// the pool for all of them.
#[derive(Clone)]
pub struct RequestConnection {
    inner: Arc<Mutex<Option<DbConnection>>>,
}

impl std::fmt::Debug for RequestConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RequestConnection {
    pub fn new(conn: DbConnection) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Runs `f` with the connection. Blocking; call it from
    /// `spawn_blocking` inside handlers.
    ///
    /// # Errors
    ///
    /// Returns `TetherError::ConnectionClosed` once the connection has been
    /// closed.
    pub fn with<R>(&self, f: impl FnOnce(&Connection) -> R) -> Result<R, TetherError> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or(TetherError::ConnectionClosed)?;
        Ok(f(conn))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Returns the connection to the pool. Returns `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<DbConnection>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("request connection lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Closes the request connection when dropped, so it is released even if
/// the handler fails or the request future is cancelled.
struct CloseOnDrop {
    tether: Tether,
    conn: RequestConnection,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.tether.close(&self.conn);
    }
}

/// Middleware that opens a connection before the handler and closes it
/// after the response is produced.
///
/// Requires the [`Tether`] extension, which [`Tether::bind`] installs. The
/// connection is available to handlers as `Extension<RequestConnection>`.
pub async fn lifecycle_middleware(
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let tether = req
        .extensions()
        .get::<Tether>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::debug_span!(
        "request_connection",
        %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let opener = tether.clone();
    let conn = tokio::task::spawn_blocking(move || opener.connect())
        .await
        .map_err(|e| {
            tracing::error!(%request_id, "connection task join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            tracing::error!(%request_id, "failed to open request connection: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    req.extensions_mut().insert(conn.clone());
    let guard = CloseOnDrop { tether, conn };

    let response = next.run(req).instrument(span).await;
    drop(guard);
    Ok(response)
}
