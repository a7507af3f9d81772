//! Tether: binds a SQLite database, its models and migrations to an axum
//! application.
//!
//! [`Tether`] is built once at startup from the `[database]` configuration.
//! It owns the connection pool, hands out per-request connections through
//! [`Tether::bind`], lists the application's models and drives the migration
//! commands exposed by the `tether` binary.

pub mod cli;
pub mod config;
pub mod middleware;

use axum::{middleware::from_fn, routing::get, Extension, Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use tether_db::{Database, DatabaseError, MigrationError, Router as MigrationRouter, TableSchema};
use tether_debug::{capture_middleware, DebugState};
use tether_models::{ModelMeta, ModelRegistry};
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub use config::{Config, DatabaseConfig};
pub use middleware::{lifecycle_middleware, RequestConnection};
pub use tether_models::{model_signals, Model, ModelError, ModelSignals, SaveContext, Signal};
pub use tether_types::{Choice, Choices};

/// Errors raised while setting up or operating the database binding.
#[derive(Debug, Error)]
pub enum TetherError {
    /// A required setting is missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The pool could not hand out a connection.
    #[error(transparent)]
    Database(DatabaseError),

    /// A migration command failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The request connection was already closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Writing command output failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl From<DatabaseError> for TetherError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Pool(_) => TetherError::Database(err),
            other => TetherError::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Applied and pending migrations, as reported by [`Tether::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationList {
    pub done: Vec<String>,
    pub undone: Vec<String>,
}

/// The database binding shared by the application.
///
/// Cloning is cheap; every clone shares the same pool.
#[derive(Debug, Clone)]
pub struct Tether {
    database: Database,
    config: DatabaseConfig,
    manual: bool,
    registry: &'static ModelRegistry,
}

impl Tether {
    /// Opens the database named by `config.uri`.
    ///
    /// # Errors
    ///
    /// Returns `TetherError::InvalidConfiguration` if the URI, connection
    /// parameters or migrations directory are missing or invalid, and
    /// `TetherError::Database` if the pool cannot be built.
    pub fn init(config: DatabaseConfig) -> Result<Self, TetherError> {
        if config.uri.trim().is_empty() {
            return Err(TetherError::InvalidConfiguration(
                "database.uri is empty".to_string(),
            ));
        }
        let database = Database::open(&config.uri, &config.connection_params)?;
        Self::with_database(config, database)
    }

    /// Binds an already opened database. `config.uri` is ignored.
    ///
    /// # Errors
    ///
    /// Returns `TetherError::InvalidConfiguration` if the migrations
    /// directory is empty.
    pub fn with_database(config: DatabaseConfig, database: Database) -> Result<Self, TetherError> {
        if config.migrations.trim().is_empty() {
            return Err(TetherError::InvalidConfiguration(
                "database.migrations is empty".to_string(),
            ));
        }

        // Each connection to an in-memory database would see its own empty
        // database, so connections are never opened per request.
        let manual = config.manual || database.is_memory();
        if manual && !config.manual {
            tracing::info!(uri = %database.uri(), "in-memory database, forcing manual mode");
        }
        tracing::debug!(uri = %database.uri(), manual, "database bound");

        Ok(Self {
            database,
            config,
            manual,
            registry: tether_models::registry::global(),
        })
    }

    /// Lists models from `registry` instead of the global registry.
    pub fn with_registry(mut self, registry: &'static ModelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn migrations_dir(&self) -> &Path {
        Path::new(&self.config.migrations)
    }

    /// Checks out a connection. Blocks until the pool has one free.
    ///
    /// # Errors
    ///
    /// Returns `TetherError::Database` on pool timeout or connection failure.
    pub fn connect(&self) -> Result<RequestConnection, TetherError> {
        let conn = self.database.connect()?;
        Ok(RequestConnection::new(conn))
    }

    /// Returns the connection to the pool. Closing twice is a no-op.
    pub fn close(&self, conn: &RequestConnection) {
        if conn.close() {
            tracing::trace!("request connection closed");
        }
    }

    /// Layers per-request connection handling onto `router` unless manual
    /// mode is on.
    pub fn bind(&self, router: Router) -> Router {
        if self.manual {
            return router;
        }
        router
            .layer(from_fn(lifecycle_middleware))
            .layer(Extension(self.clone()))
    }

    /// Models from the registry, restricted to `models_module` and without
    /// the names in `models_ignore`, in registration order.
    pub fn models(&self) -> Vec<&'static ModelMeta> {
        let module = self.config.models_module.trim();
        self.registry
            .models()
            .into_iter()
            .filter(|meta| module.is_empty() || in_module(meta.module, module))
            .filter(|meta| !self.config.models_ignore.iter().any(|name| name == meta.name))
            .collect()
    }

    /// Writes a new migration. With `auto`, its statements are generated
    /// from the schemas of [`Tether::models`]; returns `None` if nothing
    /// changed.
    ///
    /// # Errors
    ///
    /// Propagates router errors as `TetherError::Migration`.
    pub fn create(&self, name: &str, auto: bool) -> Result<Option<String>, TetherError> {
        let conn = self.database.connect()?;
        let router = MigrationRouter::new(&conn, self.migrations_dir())?;
        let created = if auto {
            let tables: Vec<TableSchema> = self.models().iter().map(|meta| meta.schema).collect();
            router.create(name, Some(tables.as_slice()))?
        } else {
            router.create(name, None)?
        };
        Ok(created)
    }

    /// Applies pending migrations up to `name` (all when `None`).
    ///
    /// # Errors
    ///
    /// Propagates router errors as `TetherError::Migration`.
    pub fn migrate(&self, name: Option<&str>, fake: bool) -> Result<Vec<String>, TetherError> {
        let conn = self.database.connect()?;
        let router = MigrationRouter::new(&conn, self.migrations_dir())?;
        let applied = router.run(name, fake)?;
        if !applied.is_empty() {
            tracing::info!(migrations = %applied.join(", "), "migrations are completed");
        }
        Ok(applied)
    }

    /// Rolls back the most recently applied migration, which must be `name`.
    ///
    /// # Errors
    ///
    /// Propagates router errors as `TetherError::Migration`.
    pub fn rollback(&self, name: &str) -> Result<(), TetherError> {
        let conn = self.database.connect()?;
        MigrationRouter::new(&conn, self.migrations_dir())?.rollback(name)?;
        Ok(())
    }

    /// Lists applied and pending migrations.
    ///
    /// # Errors
    ///
    /// Propagates router errors as `TetherError::Migration`.
    pub fn list(&self) -> Result<MigrationList, TetherError> {
        let conn = self.database.connect()?;
        let router = MigrationRouter::new(&conn, self.migrations_dir())?;
        Ok(MigrationList {
            done: router.done()?,
            undone: router.diff()?,
        })
    }
}

fn in_module(module: &str, prefix: &str) -> bool {
    module
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router.
///
/// Application routes get per-request connections from `tether`. With a
/// debug state, they are also captured for the panel, whose routes are
/// mounted outside the capture.
pub fn app(tether: &Tether, debug: Option<DebugState>) -> Router {
    let routes = tether.bind(Router::new().route("/health", get(health)));
    let router = match debug {
        Some(state) => routes
            .layer(from_fn(capture_middleware))
            .merge(tether_debug::routes(state)),
        None => routes,
    };
    router.layer(TraceLayer::new_for_http())
}
