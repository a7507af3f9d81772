//! Directory-based migration router.
//!
//! Migrations are SQL files named `NNN_name.sql` inside a migrations
//! directory. Each file holds a `-- migrate:up` section and an optional
//! `-- migrate:down` section. Applied migrations are tracked in the
//! `migratehistory` table; each migration runs in its own transaction
//! together with its history update, so a failure leaves no partial state.

use chrono::Utc;
use rusqlite::Connection;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::schema::{diff_schema, TableSchema};

/// Table recording applied migrations.
pub const HISTORY_TABLE: &str = "migratehistory";

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";

/// Errors that can occur while managing migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(#[from] rusqlite::Error),

    /// Reading or writing a migration file failed.
    #[error("migration file error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Migration names may only contain ASCII letters, digits and underscores.
    #[error("invalid migration name '{0}'")]
    InvalidName(String),

    /// The named migration is not pending.
    #[error("unknown migration '{0}'")]
    UnknownMigration(String),

    /// Only the most recently applied migration can be rolled back.
    #[error("only the last migration can be rolled back (requested '{name}', last applied {})", .latest.as_deref().unwrap_or("<none>"))]
    NotLatest {
        name: String,
        latest: Option<String>,
    },

    /// Auto-generation compares against the live schema, which is only
    /// meaningful once every migration has been applied.
    #[error("cannot auto-generate while migrations are pending: {}", .0.join(", "))]
    PendingMigrations(Vec<String>),
}

/// A parsed migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub name: String,
    pub up: String,
    pub down: String,
}

impl MigrationScript {
    /// Splits file contents into `up` and `down` sections. A file without
    /// markers is treated as `up` only.
    pub fn parse(name: &str, contents: &str) -> Self {
        let (up, down) = match contents.find(UP_MARKER) {
            Some(up_at) => {
                let after_up = &contents[up_at + UP_MARKER.len()..];
                match after_up.find(DOWN_MARKER) {
                    Some(down_at) => (
                        &after_up[..down_at],
                        &after_up[down_at + DOWN_MARKER.len()..],
                    ),
                    None => (after_up, ""),
                }
            }
            None => match contents.find(DOWN_MARKER) {
                Some(down_at) => (
                    &contents[..down_at],
                    &contents[down_at + DOWN_MARKER.len()..],
                ),
                None => (contents, ""),
            },
        };

        Self {
            name: name.to_string(),
            up: up.trim().to_string(),
            down: down.trim().to_string(),
        }
    }

    fn render(&self) -> String {
        format!(
            "-- tether migration: {}\n-- created: {}\n\n{UP_MARKER}\n{}\n\n{DOWN_MARKER}\n{}\n",
            self.name,
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            self.up,
            self.down
        )
    }
}

/// Applies, rolls back and lists migrations stored in a directory.
pub struct Router<'c> {
    conn: &'c Connection,
    dir: PathBuf,
}

impl<'c> Router<'c> {
    /// Creates a router over `conn` using migrations in `dir`.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::StateQuery` if the history table cannot be
    /// created.
    pub fn new(conn: &'c Connection, dir: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {HISTORY_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                migrated_at TEXT NOT NULL
            );"
        ))?;
        Ok(Self {
            conn,
            dir: dir.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All migrations present in the directory, in order.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Io` if the directory exists but cannot be read.
    pub fn todo(&self) -> Result<Vec<String>, MigrationError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(MigrationError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_migration_name(stem) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Migrations recorded as applied, in application order.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::StateQuery` on SQL failure.
    pub fn done(&self) -> Result<Vec<String>, MigrationError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT name FROM {HISTORY_TABLE} ORDER BY id"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// Migrations present in the directory but not yet applied.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Router::todo`] and [`Router::done`].
    pub fn diff(&self) -> Result<Vec<String>, MigrationError> {
        let done = self.done()?;
        Ok(self
            .todo()?
            .into_iter()
            .filter(|name| !done.contains(name))
            .collect())
    }

    /// Writes a new migration file and returns its name.
    ///
    /// With `auto`, the file is filled with statements that bring the live
    /// schema in line with the given tables; if nothing differs no file is
    /// written and `None` is returned. Without `auto`, an empty template is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidName` for a bad name,
    /// `MigrationError::PendingMigrations` when auto-generating with
    /// unapplied migrations, and `MigrationError::Io` if the file cannot be
    /// written.
    pub fn create(
        &self,
        name: &str,
        auto: Option<&[TableSchema]>,
    ) -> Result<Option<String>, MigrationError> {
        let name = name.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(MigrationError::InvalidName(name.to_string()));
        }

        let (up, down) = match auto {
            Some(tables) => {
                let pending = self.diff()?;
                if !pending.is_empty() {
                    return Err(MigrationError::PendingMigrations(pending));
                }
                let diff = diff_schema(self.conn, tables)?;
                if diff.is_empty() {
                    tracing::info!("no schema changes found");
                    return Ok(None);
                }
                (diff.up.join("\n\n"), diff.down.join("\n\n"))
            }
            None => (String::new(), String::new()),
        };

        let number = self
            .todo()?
            .iter()
            .filter_map(|existing| existing[..3].parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let script = MigrationScript {
            name: format!("{number:03}_{name}"),
            up,
            down,
        };

        std::fs::create_dir_all(&self.dir).map_err(|source| MigrationError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(&script.name);
        // Never replace an existing migration, applied or not.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;
        file.write_all(script.render().as_bytes())
            .map_err(|source| MigrationError::Io { path, source })?;

        tracing::info!(migration = %script.name, "created migration");
        Ok(Some(script.name))
    }

    /// Applies pending migrations in order, up to and including `name` when
    /// given. With `fake`, migrations are recorded without executing them.
    ///
    /// Returns the names of the migrations that were applied.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::UnknownMigration` if `name` is not pending,
    /// and `MigrationError::ExecutionFailed` if a migration fails. Migrations
    /// applied before the failing one stay applied.
    pub fn run(&self, name: Option<&str>, fake: bool) -> Result<Vec<String>, MigrationError> {
        let mut pending = self.diff()?;
        if let Some(target) = name {
            let pos = pending
                .iter()
                .position(|n| n == target)
                .ok_or_else(|| MigrationError::UnknownMigration(target.to_string()))?;
            pending.truncate(pos + 1);
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            let script = self.read(&migration)?;
            tracing::info!(migration = %script.name, fake, "applying migration");
            self.in_transaction(&script.name, |conn| {
                if !fake && !script.up.is_empty() {
                    conn.execute_batch(&script.up)?;
                }
                conn.execute(
                    &format!("INSERT INTO {HISTORY_TABLE} (name, migrated_at) VALUES (?1, ?2)"),
                    rusqlite::params![script.name, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })?;
            applied.push(migration);
        }

        Ok(applied)
    }

    /// Rolls back `name`, which must be the most recently applied migration.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::NotLatest` if `name` is not the last applied
    /// migration and `MigrationError::ExecutionFailed` if its `down` section
    /// fails.
    pub fn rollback(&self, name: &str) -> Result<(), MigrationError> {
        let name = name.trim();
        let latest = self.done()?.pop();
        if latest.as_deref() != Some(name) {
            return Err(MigrationError::NotLatest {
                name: name.to_string(),
                latest,
            });
        }

        let script = self.read(name)?;
        tracing::info!(migration = %script.name, "rolling back migration");
        self.in_transaction(&script.name, |conn| {
            if !script.down.is_empty() {
                conn.execute_batch(&script.down)?;
            }
            conn.execute(
                &format!("DELETE FROM {HISTORY_TABLE} WHERE name = ?1"),
                [&script.name],
            )?;
            Ok(())
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.sql"))
    }

    fn read(&self, name: &str) -> Result<MigrationScript, MigrationError> {
        let path = self.path_for(name);
        let contents =
            std::fs::read_to_string(&path).map_err(|source| MigrationError::Io { path, source })?;
        Ok(MigrationScript::parse(name, &contents))
    }

    fn in_transaction<F>(&self, name: &str, f: F) -> Result<(), MigrationError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<()>,
    {
        let failed = |source| MigrationError::ExecutionFailed {
            name: name.to_string(),
            source,
        };
        let tx = self.conn.unchecked_transaction().map_err(failed)?;
        f(&tx).map_err(failed)?;
        tx.commit().map_err(failed)
    }
}

fn is_migration_name(stem: &str) -> bool {
    let bytes = stem.as_bytes();
    bytes.len() > 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b'_'
}
