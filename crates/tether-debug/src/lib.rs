//! SQL debug panel for Tether applications.
//!
//! Every pooled connection opened with [`install_profiler`] as its connect
//! hook reports executed statements to a process-wide [`QueryLog`].
//! [`capture_middleware`] scopes a capture to one request, and the panel
//! routes list the captured statements and replay signed `SELECT`s.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_debug::{capture_middleware, install_profiler, routes, DebugState};
//!
//! let db = Database::open_with_hook(uri, &params, Some(install_profiler))?;
//! let app = app_routes
//!     .layer(axum::middleware::from_fn(capture_middleware))
//!     .merge(routes(DebugState::new(db, &secret_key)));
//! ```
//!
//! The capture is shared by the whole process and meant for development.

mod capture;
mod error;
mod panel;
mod token;

pub use capture::{
    capture_middleware, install_profiler, query_log, QueryLog, QueryRecord, QUERY_COUNT_HEADER,
};
pub use error::PanelError;
pub use panel::{
    queries_handler, routes, sql_explain_handler, sql_select_handler, DebugState, PanelContent,
    PanelQuery, ReplayParams, ReplayResult,
};
pub use token::{is_select, QuerySigner, TOKEN_SALT};
