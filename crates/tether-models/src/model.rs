//! The model trait and its lifecycle signals.

use rusqlite::Connection;
use tether_db::TableSchema;

use crate::error::ModelError;
use crate::signal::Signal;

/// Context passed to save receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveContext {
    /// `true` when the save inserts a new row.
    pub created: bool,
}

/// The four lifecycle signals of a model type.
pub struct ModelSignals<M> {
    pub pre_save: Signal<M, SaveContext>,
    pub post_save: Signal<M, SaveContext>,
    pub pre_delete: Signal<M>,
    pub post_delete: Signal<M>,
}

impl<M> ModelSignals<M> {
    pub const fn new() -> Self {
        Self {
            pre_save: Signal::new("pre_save"),
            post_save: Signal::new("post_save"),
            pre_delete: Signal::new("pre_delete"),
            post_delete: Signal::new("post_delete"),
        }
    }

    /// Disconnects every receiver from all four signals.
    pub fn clear(&self) {
        self.pre_save.clear();
        self.post_save.clear();
        self.pre_delete.clear();
        self.post_delete.clear();
    }
}

impl<M> Default for ModelSignals<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Static description of a model type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelMeta {
    /// Identifier matched against `models_ignore`, e.g. `"user"`.
    pub name: &'static str,
    /// Module path the model is defined in, usually `module_path!()`.
    pub module: &'static str,
    pub schema: TableSchema,
    /// Abstract models carry shared behaviour and are never registered.
    pub is_abstract: bool,
}

/// Declares the per-type signal storage for a [`Model`] impl.
///
/// ```ignore
/// fn signals() -> &'static ModelSignals<Self> {
///     tether_models::model_signals!(User)
/// }
/// ```
#[macro_export]
macro_rules! model_signals {
    ($model:ty) => {{
        static SIGNALS: $crate::ModelSignals<$model> = $crate::ModelSignals::new();
        &SIGNALS
    }};
}

/// A persistable entity.
///
/// Implementors supply the raw persistence calls (`persist`, `remove`,
/// `get`); the provided `save` and `delete_instance` wrap them with the
/// lifecycle signals. Application code should call the wrappers.
pub trait Model: Sized + Send + Sync + 'static {
    fn meta() -> &'static ModelMeta;

    /// Per-type signals; implement with [`model_signals!`].
    fn signals() -> &'static ModelSignals<Self>;

    /// Primary key, `None` until the row exists.
    fn pk(&self) -> Option<i64>;

    /// Writes the row: insert when `force_insert` or the key is unset,
    /// update otherwise. Must set the key after an insert.
    fn persist(&mut self, conn: &Connection, force_insert: bool) -> rusqlite::Result<()>;

    /// Deletes the row, returning the number of rows removed.
    fn remove(&self, conn: &Connection) -> rusqlite::Result<usize>;

    /// Loads a row by primary key.
    fn get(conn: &Connection, pk: i64) -> rusqlite::Result<Self>;

    /// Saves the instance, firing `pre_save` and `post_save` around the write.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Signal` if a receiver fails (a `pre_save`
    /// failure prevents the write) and `ModelError::Database` if the write
    /// fails.
    fn save(&mut self, conn: &Connection, force_insert: bool) -> Result<(), ModelError> {
        let context = SaveContext {
            created: force_insert || self.pk().is_none(),
        };
        let signals = Self::signals();
        signals.pre_save.send(self, &context)?;
        self.persist(conn, force_insert)?;
        signals.post_save.send(self, &context)?;
        tracing::debug!(
            model = Self::meta().name,
            pk = self.pk(),
            created = context.created,
            "saved model"
        );
        Ok(())
    }

    /// Deletes the instance, firing `pre_delete` and `post_delete` around
    /// the delete.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Signal` if a receiver fails and
    /// `ModelError::Database` if the delete fails.
    fn delete_instance(&self, conn: &Connection) -> Result<usize, ModelError> {
        let signals = Self::signals();
        signals.pre_delete.send(self, &())?;
        let removed = self.remove(conn)?;
        signals.post_delete.send(self, &())?;
        tracing::debug!(model = Self::meta().name, pk = self.pk(), removed, "deleted model");
        Ok(removed)
    }

    /// Loads a row by primary key, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Database` for any failure other than a missing row.
    fn get_or_none(conn: &Connection, pk: i64) -> Result<Option<Self>, ModelError> {
        match Self::get(conn, pk) {
            Ok(model) => Ok(Some(model)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
