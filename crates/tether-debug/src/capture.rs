//! SQL statement capture through the SQLite profile hook.
//!
//! SQLite's profile callback is a plain function pointer, so captured
//! statements go to a single process-wide [`QueryLog`]. A capture covers one
//! request: [`capture_middleware`] resets the log when a request starts and
//! the panel reads whatever the last captured request executed.

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Response header carrying the number of statements a request executed.
pub const QUERY_COUNT_HEADER: &str = "x-tether-queries";

static LOG: QueryLog = QueryLog::new();

/// The process-wide query log fed by [`install_profiler`].
pub fn query_log() -> &'static QueryLog {
    &LOG
}

/// A single executed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub sql: String,
    /// Execution time in seconds.
    pub duration: f64,
}

#[derive(Debug)]
struct CaptureState {
    active: bool,
    records: Vec<QueryRecord>,
}

/// Buffer of statements executed during the current capture.
#[derive(Debug)]
pub struct QueryLog {
    state: Mutex<CaptureState>,
}

impl QueryLog {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState {
                active: false,
                records: Vec::new(),
            }),
        }
    }

    /// Discards previous records and starts recording.
    pub fn begin(&self) {
        let mut state = self.lock();
        state.records.clear();
        state.active = true;
    }

    /// Stops recording. Records stay readable until the next `begin`.
    pub fn finish(&self) -> usize {
        let mut state = self.lock();
        state.active = false;
        state.records.len()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Appends a statement if a capture is active.
    pub fn record(&self, sql: &str, duration: Duration) {
        let mut state = self.lock();
        if state.active {
            state.records.push(QueryRecord {
                sql: sql.to_string(),
                duration: duration.as_secs_f64(),
            });
        }
    }

    pub fn records(&self) -> Vec<QueryRecord> {
        self.lock().records.clone()
    }

    pub fn amount(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("query log lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new()
    }
}

fn profile_hook(sql: &str, duration: Duration) {
    tracing::debug!(
        target: "tether::sql",
        duration_ms = duration.as_secs_f64() * 1000.0,
        sql,
        "executed statement"
    );
    LOG.record(sql, duration);
}

/// Connection hook that routes executed statements into [`query_log`].
///
/// Pass it to `Database::open_with_hook` when the panel is enabled.
pub fn install_profiler(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.profile(Some(profile_hook));
    Ok(())
}

/// Middleware that captures the statements executed while handling a request.
///
/// Adds the statement count as the `x-tether-queries` response header.
pub async fn capture_middleware(req: Request<Body>, next: Next) -> Response {
    let log = query_log();
    log.begin();
    let mut response = next.run(req).await;
    let amount = log.finish();
    response
        .headers_mut()
        .insert(QUERY_COUNT_HEADER, HeaderValue::from(amount));
    response
}
