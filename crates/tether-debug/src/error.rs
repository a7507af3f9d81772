//! Error types for the debug panel.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Errors that can occur while serving panel requests.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// The query token is malformed or its signature does not match.
    #[error("bad query signature")]
    BadSignature,

    /// Only captured `SELECT` statements may be replayed.
    #[error("statement is not replayable")]
    NotReplayable,

    /// Opening a connection failed.
    #[error("debug panel database error: {0}")]
    Pool(#[from] tether_db::DatabaseError),

    /// Executing the replayed statement failed.
    #[error("debug panel query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for PanelError {
    fn into_response(self) -> Response {
        let status = match self {
            PanelError::BadSignature | PanelError::NotReplayable => StatusCode::NOT_ACCEPTABLE,
            PanelError::Query(_) => StatusCode::BAD_REQUEST,
            PanelError::Pool(_) | PanelError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}
