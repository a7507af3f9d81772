//! Unit tests for model signals and the registry.
//!
//! Signals are per-type statics, so each test defines its own model type to
//! stay independent of the others when run in parallel.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};
use tether_db::{ColumnDef, TableSchema};

use crate::{
    registry, Model, ModelError, ModelMeta, ModelRegistry, ReceiverError, SaveContext, SignalError,
};

const ARTICLE: TableSchema = TableSchema {
    table: "article",
    columns: &[ColumnDef::primary_key("id"), ColumnDef::new("title", "TEXT")],
};

/// Shared event log written by persistence calls and receivers.
#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

macro_rules! test_model {
    ($ty:ident, $name:literal) => {
        struct $ty {
            id: Option<i64>,
            title: String,
            log: Log,
        }

        impl $ty {
            fn new(title: &str, log: &Log) -> Self {
                Self {
                    id: None,
                    title: title.to_string(),
                    log: log.clone(),
                }
            }
        }

        impl Model for $ty {
            fn meta() -> &'static ModelMeta {
                static META: ModelMeta = ModelMeta {
                    name: $name,
                    module: module_path!(),
                    schema: ARTICLE,
                    is_abstract: false,
                };
                &META
            }

            fn signals() -> &'static crate::ModelSignals<Self> {
                crate::model_signals!($ty)
            }

            fn pk(&self) -> Option<i64> {
                self.id
            }

            fn persist(&mut self, conn: &Connection, force_insert: bool) -> rusqlite::Result<()> {
                self.log.push("persist");
                if force_insert || self.id.is_none() {
                    conn.execute(
                        "INSERT INTO article (id, title) VALUES (?1, ?2)",
                        params![self.id, self.title],
                    )?;
                    self.id = Some(conn.last_insert_rowid());
                } else {
                    conn.execute(
                        "UPDATE article SET title = ?1 WHERE id = ?2",
                        params![self.title, self.id],
                    )?;
                }
                Ok(())
            }

            fn remove(&self, conn: &Connection) -> rusqlite::Result<usize> {
                self.log.push("remove");
                conn.execute("DELETE FROM article WHERE id = ?1", [self.id])
            }

            fn get(conn: &Connection, pk: i64) -> rusqlite::Result<Self> {
                conn.query_row("SELECT id, title FROM article WHERE id = ?1", [pk], |row| {
                    Ok(Self {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        log: Log::default(),
                    })
                })
            }
        }
    };
}

fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    conn.execute_batch(&ARTICLE.create_sql())
        .expect("should create article table");
    conn
}

fn article_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM article", [], |row| row.get(0))
        .expect("should count articles")
}

fn record_save<M: Model + HasLog>(
    tag: &'static str,
) -> impl Fn(&M, &SaveContext) -> Result<(), ReceiverError> + Send + Sync + 'static {
    move |model: &M, ctx: &SaveContext| {
        model.log().push(format!("{tag} created={} pk={:?}", ctx.created, model.pk()));
        Ok(())
    }
}

fn record_delete<M: Model + HasLog>(
    tag: &'static str,
) -> impl Fn(&M, &()) -> Result<(), ReceiverError> + Send + Sync + 'static {
    move |model: &M, _: &()| {
        model.log().push(tag);
        Ok(())
    }
}

trait HasLog {
    fn log(&self) -> &Log;
}

macro_rules! has_log {
    ($($ty:ident),*) => {
        $(impl HasLog for $ty {
            fn log(&self) -> &Log {
                &self.log
            }
        })*
    };
}

test_model!(SaveFresh, "save_fresh");
test_model!(SaveExisting, "save_existing");
test_model!(ForceInsert, "force_insert");
test_model!(DeleteOrder, "delete_order");
test_model!(PreSaveVeto, "pre_save_veto");
test_model!(PostSaveFailure, "post_save_failure");
test_model!(PreDeleteVeto, "pre_delete_veto");
test_model!(Lookup, "lookup");
test_model!(IsolatedA, "isolated_a");
test_model!(IsolatedB, "isolated_b");
test_model!(Registered, "registered");

has_log!(
    SaveFresh,
    SaveExisting,
    ForceInsert,
    DeleteOrder,
    PreSaveVeto,
    PostSaveFailure,
    PreDeleteVeto,
    IsolatedA,
    IsolatedB
);

// ── save ─────────────────────────────────────────────────────────────

#[test]
fn save_fresh_instance_reports_created() {
    let conn = test_db();
    let log = Log::default();
    SaveFresh::signals().pre_save.connect(record_save::<SaveFresh>("pre_save"));
    SaveFresh::signals().post_save.connect(record_save::<SaveFresh>("post_save"));

    let mut article = SaveFresh::new("hello", &log);
    article.save(&conn, false).expect("save should succeed");

    assert_eq!(
        log.entries(),
        vec![
            "pre_save created=true pk=None",
            "persist",
            "post_save created=true pk=Some(1)",
        ]
    );
    assert_eq!(article_count(&conn), 1);
}

#[test]
fn save_existing_instance_reports_not_created() {
    let conn = test_db();
    let log = Log::default();
    let mut article = SaveExisting::new("draft", &log);
    article.save(&conn, false).expect("first save should succeed");

    SaveExisting::signals().pre_save.connect(record_save::<SaveExisting>("pre_save"));
    SaveExisting::signals().post_save.connect(record_save::<SaveExisting>("post_save"));

    article.title = "final".to_string();
    article.save(&conn, false).expect("second save should succeed");

    let entries = log.entries();
    assert_eq!(
        &entries[1..],
        &[
            "pre_save created=false pk=Some(1)",
            "persist",
            "post_save created=false pk=Some(1)",
        ]
    );
    let stored = SaveExisting::get(&conn, 1).expect("row should exist");
    assert_eq!(stored.title, "final");
    assert_eq!(article_count(&conn), 1);
}

#[test]
fn force_insert_reports_created_even_with_pk() {
    let conn = test_db();
    let log = Log::default();
    ForceInsert::signals().pre_save.connect(record_save::<ForceInsert>("pre_save"));

    let mut article = ForceInsert::new("imported", &log);
    article.id = Some(42);
    article.save(&conn, true).expect("forced insert should succeed");

    assert_eq!(log.entries()[0], "pre_save created=true pk=Some(42)");
    assert!(ForceInsert::get_or_none(&conn, 42).unwrap().is_some());
}

#[test]
fn failing_pre_save_prevents_write() {
    let conn = test_db();
    let log = Log::default();
    PreSaveVeto::signals()
        .pre_save
        .connect(|_: &PreSaveVeto, _: &SaveContext| Err("title rejected".into()));
    PreSaveVeto::signals().post_save.connect(record_save::<PreSaveVeto>("post_save"));

    let mut article = PreSaveVeto::new("spam", &log);
    let err = article.save(&conn, false).unwrap_err();

    match err {
        ModelError::Signal(SignalError::Receiver { signal, source }) => {
            assert_eq!(signal, "pre_save");
            assert_eq!(source.to_string(), "title rejected");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(log.entries().is_empty(), "neither persist nor post_save should run");
    assert_eq!(article_count(&conn), 0);
    assert_eq!(article.pk(), None);
}

#[test]
fn failing_post_save_surfaces_after_write() {
    let conn = test_db();
    let log = Log::default();
    PostSaveFailure::signals()
        .post_save
        .connect(|_: &PostSaveFailure, _: &SaveContext| Err("notify failed".into()));

    let mut article = PostSaveFailure::new("hello", &log);
    let err = article.save(&conn, false).unwrap_err();

    assert!(matches!(
        err,
        ModelError::Signal(SignalError::Receiver { signal: "post_save", .. })
    ));
    assert_eq!(log.entries(), vec!["persist"]);
    assert_eq!(article_count(&conn), 1, "the write itself is not undone");
}

#[test]
fn persistence_error_surfaces_as_database_error() {
    let conn = test_db();
    let log = Log::default();
    let mut first = ForceInsertConflict::new("a", &log);
    first.save(&conn, false).unwrap();

    let mut clash = ForceInsertConflict::new("b", &log);
    clash.id = first.id;
    let err = clash.save(&conn, true).unwrap_err();
    assert!(matches!(err, ModelError::Database(_)));
}

test_model!(ForceInsertConflict, "force_insert_conflict");

// ── delete ───────────────────────────────────────────────────────────

#[test]
fn delete_fires_pre_before_and_post_after_remove() {
    let conn = test_db();
    let log = Log::default();
    let mut article = DeleteOrder::new("doomed", &log);
    article.save(&conn, false).unwrap();

    DeleteOrder::signals().pre_delete.connect(record_delete::<DeleteOrder>("pre_delete"));
    DeleteOrder::signals().post_delete.connect(record_delete::<DeleteOrder>("post_delete"));

    let removed = article.delete_instance(&conn).expect("delete should succeed");
    assert_eq!(removed, 1);
    assert_eq!(&log.entries()[1..], &["pre_delete", "remove", "post_delete"]);
    assert_eq!(article_count(&conn), 0);

    // Deleting again still fires both signals around a no-op delete.
    let removed = article.delete_instance(&conn).expect("delete should succeed");
    assert_eq!(removed, 0);
    assert_eq!(&log.entries()[4..], &["pre_delete", "remove", "post_delete"]);
}

#[test]
fn failing_pre_delete_keeps_row() {
    let conn = test_db();
    let log = Log::default();
    let mut article = PreDeleteVeto::new("protected", &log);
    article.save(&conn, false).unwrap();

    PreDeleteVeto::signals()
        .pre_delete
        .connect(|_: &PreDeleteVeto, _: &()| Err("protected".into()));

    assert!(article.delete_instance(&conn).is_err());
    assert_eq!(article_count(&conn), 1);
    assert!(!log.entries().contains(&"remove".to_string()));
}

// ── lookups ──────────────────────────────────────────────────────────

#[test]
fn get_or_none_distinguishes_missing_rows() {
    let conn = test_db();
    let log = Log::default();
    let mut article = Lookup::new("present", &log);
    article.save(&conn, false).unwrap();

    let found = Lookup::get_or_none(&conn, 1).unwrap().expect("row 1 exists");
    assert_eq!(found.title, "present");
    assert!(Lookup::get_or_none(&conn, 99).unwrap().is_none());
}

// ── per-type signals ─────────────────────────────────────────────────

#[test]
fn signals_are_not_shared_between_types() {
    let conn = test_db();
    let log_a = Log::default();
    let log_b = Log::default();
    IsolatedA::signals().pre_save.connect(record_save::<IsolatedA>("a"));

    IsolatedB::new("b", &log_b).save(&conn, false).unwrap();
    assert_eq!(log_b.entries(), vec!["persist"]);
    assert!(IsolatedB::signals().pre_save.is_empty());

    IsolatedA::new("a", &log_a).save(&conn, false).unwrap();
    assert_eq!(log_a.entries()[0], "a created=true pk=None");
}

// ── registry ─────────────────────────────────────────────────────────

static ABSTRACT_BASE: ModelMeta = ModelMeta {
    name: "model",
    module: module_path!(),
    schema: TableSchema {
        table: "model",
        columns: &[],
    },
    is_abstract: true,
};

#[test]
fn registry_skips_abstract_models() {
    let registry = ModelRegistry::new();
    assert!(!registry.register_meta(&ABSTRACT_BASE));
    assert!(registry.register::<Registered>());
    assert!(registry.register::<Lookup>());

    let names: Vec<&str> = registry.models().iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["registered", "lookup"]);
    assert!(registry.find("model").is_none());
    assert_eq!(registry.find("lookup").map(|m| m.schema.table), Some("article"));
}

#[test]
fn registry_does_not_deduplicate() {
    let registry = ModelRegistry::new();
    registry.register::<Registered>();
    registry.register::<Registered>();
    assert_eq!(registry.len(), 2);

    registry.clear();
    assert!(registry.is_empty());
}

#[test]
fn registration_does_not_affect_persistence() {
    let registry = ModelRegistry::new();
    registry.register::<Registered>();

    let conn = test_db();
    let log = Log::default();
    let mut row = Registered::new("listed", &log);
    row.save(&conn, false).unwrap();
    assert_eq!(row.pk(), Some(1));
    assert_eq!(log.entries(), vec!["persist"]);
    assert_eq!(article_count(&conn), 1);
}

#[test]
fn global_registry_can_be_cleared() {
    let global = registry::global();
    global.register::<Registered>();
    assert!(global.find("registered").is_some());
    global.clear();
    assert!(global.find("registered").is_none());
}
