//! Database handle construction from a connection URI.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default URI used when configuration does not name one.
pub const DEFAULT_DATABASE_URI: &str = "sqlite:///tether.sqlite";

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`DbPool`]. Returned to the pool on drop.
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Hook run on every freshly opened connection, after pragmas are applied.
pub type ConnectHook = fn(&mut Connection) -> rusqlite::Result<()>;

/// Errors that can occur when resolving or opening a database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The URI could not be parsed.
    #[error("invalid database uri '{0}'")]
    InvalidUri(String),

    /// The URI names a backend other than SQLite.
    #[error("unsupported database scheme '{0}' (only sqlite:// and memory:// are available)")]
    UnsupportedScheme(String),

    /// A connection parameter is malformed.
    #[error("invalid connection parameter '{0}'")]
    InvalidParam(String),

    /// Building the pool or checking out a connection failed.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUri {
    /// A file-backed SQLite database.
    File(PathBuf),
    /// A private in-memory SQLite database.
    Memory,
}

impl DatabaseUri {
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl FromStr for DatabaseUri {
    type Err = DatabaseError;

    /// Accepts `sqlite:///relative.db`, `sqlite:////absolute.db`,
    /// `sqlite:///:memory:`, `sqlite://:memory:` and `memory://`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| DatabaseError::InvalidUri(s.to_string()))?;

        match scheme {
            "memory" => Ok(Self::Memory),
            "sqlite" | "sqlite3" => {
                // `sqlite://` is followed by an empty host; the path starts
                // after the third slash.
                let path = rest.strip_prefix('/').unwrap_or(rest);
                match path {
                    "" => Err(DatabaseError::InvalidUri(s.to_string())),
                    ":memory:" => Ok(Self::Memory),
                    path => Ok(Self::File(PathBuf::from(path))),
                }
            }
            "" => Err(DatabaseError::InvalidUri(s.to_string())),
            other => Err(DatabaseError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "sqlite:///{}", path.display()),
            Self::Memory => f.write_str("sqlite:///:memory:"),
        }
    }
}

/// Driver-level connection options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionParams {
    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Extra `PRAGMA name = value` statements applied to every connection.
    #[serde(default)]
    pub pragmas: BTreeMap<String, String>,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            pragmas: BTreeMap::new(),
        }
    }
}

impl ConnectionParams {
    fn validate(&self) -> Result<(), DatabaseError> {
        if self.pool_max_size == 0 {
            return Err(DatabaseError::InvalidParam("pool_max_size".to_string()));
        }
        for (name, value) in &self.pragmas {
            let name_ok = !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            let value_ok = !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
            if !name_ok || !value_ok {
                return Err(DatabaseError::InvalidParam(format!("pragmas.{name}")));
            }
        }
        Ok(())
    }

    fn init_sql(&self) -> String {
        let mut sql = format!(
            "PRAGMA foreign_keys = ON;\nPRAGMA busy_timeout = {};\n",
            self.busy_timeout_ms
        );
        for (name, value) in &self.pragmas {
            sql.push_str(&format!("PRAGMA {name} = {value};\n"));
        }
        sql
    }
}

/// The concrete database handle shared by every dependent.
///
/// Built once at startup and cloned into whatever needs it; each clone
/// shares the same pool.
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    uri: DatabaseUri,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("uri", &self.uri)
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl Database {
    /// Resolves `uri` and opens a pool for it.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the URI or parameters are invalid or the
    /// pool cannot be built.
    pub fn open(uri: &str, params: &ConnectionParams) -> Result<Self, DatabaseError> {
        Self::open_with_hook(uri, params, None)
    }

    /// Like [`Database::open`], running `hook` on every new connection.
    pub fn open_with_hook(
        uri: &str,
        params: &ConnectionParams,
        hook: Option<ConnectHook>,
    ) -> Result<Self, DatabaseError> {
        let uri: DatabaseUri = uri.parse()?;
        let pool = create_pool(&uri, params, hook)?;
        tracing::debug!(%uri, max_size = pool.max_size(), "opened database pool");
        Ok(Self { pool, uri })
    }

    /// Wraps a pool that was built elsewhere.
    pub fn from_pool(pool: DbPool, uri: DatabaseUri) -> Self {
        Self { pool, uri }
    }

    pub fn uri(&self) -> &DatabaseUri {
        &self.uri
    }

    pub fn is_memory(&self) -> bool {
        self.uri.is_memory()
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Checks a connection out of the pool. Blocks until one is free or the
    /// pool's connection timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Pool` on timeout or connection failure.
    pub fn connect(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool.get()?)
    }
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// In-memory databases get a single long-lived connection: every new
/// connection would otherwise see its own empty database.
///
/// # Errors
///
/// Returns `DatabaseError::InvalidParam` for malformed parameters and
/// `DatabaseError::Pool` if the pool cannot be created.
pub fn create_pool(
    uri: &DatabaseUri,
    params: &ConnectionParams,
    hook: Option<ConnectHook>,
) -> Result<DbPool, DatabaseError> {
    params.validate()?;

    let init_sql = params.init_sql();
    let init = move |conn: &mut Connection| {
        // In-memory databases report "memory" which is expected and acceptable.
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        if journal_mode != "wal" && journal_mode != "memory" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!(
                    "failed to set WAL journal mode, got: {}",
                    journal_mode
                )),
            ));
        }
        conn.execute_batch(&init_sql)?;
        if let Some(hook) = hook {
            hook(conn)?;
        }
        Ok(())
    };

    let pool = match uri {
        DatabaseUri::File(path) => {
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
            let manager = SqliteConnectionManager::file(path)
                .with_flags(flags)
                .with_init(init);
            Pool::builder()
                .max_size(params.pool_max_size)
                .build(manager)?
        }
        DatabaseUri::Memory => {
            let manager = SqliteConnectionManager::memory().with_init(init);
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
                .build(manager)?
        }
    };

    Ok(pool)
}
