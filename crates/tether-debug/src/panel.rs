//! Debug panel routes.
//!
//! Provides:
//! - `GET /_debug/queries` - statements captured for the last request
//! - `GET /_debug/sql_select` - replays a signed `SELECT`
//! - `GET /_debug/sql_explain` - `EXPLAIN QUERY PLAN` for a signed `SELECT`

use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tether_db::Database;

use crate::capture::query_log;
use crate::error::PanelError;
use crate::token::QuerySigner;

/// Shared state for the panel handlers.
#[derive(Debug, Clone)]
pub struct DebugState {
    pub database: Database,
    pub signer: QuerySigner,
}

impl DebugState {
    pub fn new(database: Database, secret_key: &str) -> Self {
        Self {
            database,
            signer: QuerySigner::new(secret_key),
        }
    }
}

/// Builds the panel router.
///
/// Merge it after layering [`capture_middleware`](crate::capture_middleware)
/// onto the application routes, otherwise viewing the panel resets the
/// capture it is meant to show.
pub fn routes(state: DebugState) -> Router {
    Router::new()
        .route("/_debug/queries", get(queries_handler))
        .route("/_debug/sql_select", get(sql_select_handler))
        .route("/_debug/sql_explain", get(sql_explain_handler))
        .layer(Extension(Arc::new(state)))
}

/// A captured statement as shown in the panel.
#[derive(Debug, Serialize)]
pub struct PanelQuery {
    /// Replay token, absent for statements that are not `SELECT`s.
    pub signed_query: Option<String>,
    pub sql: String,
    /// Seconds.
    pub duration: f64,
}

/// Response for `GET /_debug/queries`.
#[derive(Debug, Serialize)]
pub struct PanelContent {
    pub title: String,
    pub nav_title: String,
    pub nav_subtitle: String,
    pub has_content: bool,
    pub queries: Vec<PanelQuery>,
}

/// Handler for `GET /_debug/queries`.
pub async fn queries_handler(Extension(state): Extension<Arc<DebugState>>) -> Json<PanelContent> {
    let queries: Vec<PanelQuery> = query_log()
        .records()
        .into_iter()
        .map(|record| PanelQuery {
            signed_query: state.signer.dumps(&record.sql, &[]),
            sql: record.sql,
            duration: record.duration,
        })
        .collect();

    let total: f64 = queries.iter().map(|q| q.duration).sum();
    Json(PanelContent {
        title: "SQL Queries".to_string(),
        nav_title: "SQL".to_string(),
        nav_subtitle: format!("{} queries in {:.2}ms", queries.len(), total * 1000.0),
        has_content: !queries.is_empty(),
        queries,
    })
}

/// Query parameters for the replay endpoints.
#[derive(Debug, Deserialize)]
pub struct ReplayParams {
    /// Token produced by the queries panel.
    pub query: String,
    /// Original execution time in seconds, echoed back.
    pub duration: Option<f64>,
}

/// Result of a replayed statement.
#[derive(Debug, Serialize)]
pub struct ReplayResult {
    pub sql: String,
    pub duration: Option<f64>,
    pub headers: Vec<String>,
    pub result: Vec<Vec<Value>>,
}

/// Handler for `GET /_debug/sql_select`.
pub async fn sql_select_handler(
    Extension(state): Extension<Arc<DebugState>>,
    Query(params): Query<ReplayParams>,
) -> Result<Json<ReplayResult>, PanelError> {
    replay(&state, params, false).await.map(Json)
}

/// Handler for `GET /_debug/sql_explain`.
pub async fn sql_explain_handler(
    Extension(state): Extension<Arc<DebugState>>,
    Query(params): Query<ReplayParams>,
) -> Result<Json<ReplayResult>, PanelError> {
    replay(&state, params, true).await.map(Json)
}

async fn replay(
    state: &DebugState,
    params: ReplayParams,
    explain: bool,
) -> Result<ReplayResult, PanelError> {
    let (sql, bound) = state.signer.loads(&params.query)?;
    let database = state.database.clone();
    let statement = if explain {
        format!("EXPLAIN QUERY PLAN\n{sql}")
    } else {
        sql.clone()
    };
    tracing::debug!(sql = %sql, explain, "replaying captured statement");

    let (headers, result) = tokio::task::spawn_blocking(move || {
        let conn = database.connect()?;
        run_statement(&conn, &statement, &bound)
    })
    .await??;

    Ok(ReplayResult {
        sql,
        duration: params.duration,
        headers,
        result,
    })
}

type Rows = (Vec<String>, Vec<Vec<Value>>);

fn run_statement(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> Result<Rows, PanelError> {
    let mut stmt = conn.prepare(sql)?;
    let headers: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = headers.len();
    let bound: Vec<SqlValue> = params.iter().map(to_sql_value).collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(to_json(row.get_ref(i)?));
        }
        result.push(values);
    }
    Ok((headers, result))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(hex::encode(b)),
    }
}
