//! Process-wide list of model types.

use std::sync::{Mutex, MutexGuard};

use crate::model::{Model, ModelMeta};

static GLOBAL: ModelRegistry = ModelRegistry::new();

/// The process-wide registry. Populated by [`ModelRegistry::register`]
/// during startup; tests that touch it should call [`ModelRegistry::clear`]
/// when done.
pub fn global() -> &'static ModelRegistry {
    &GLOBAL
}

/// An ordered list of concrete model types.
///
/// Registration is not de-duplicated: registering a type twice lists it
/// twice.
#[derive(Debug)]
pub struct ModelRegistry {
    models: Mutex<Vec<&'static ModelMeta>>,
}

impl ModelRegistry {
    pub const fn new() -> Self {
        Self {
            models: Mutex::new(Vec::new()),
        }
    }

    /// Registers `M` unless it is abstract. Returns whether it was added.
    pub fn register<M: Model>(&self) -> bool {
        self.register_meta(M::meta())
    }

    pub fn register_meta(&self, meta: &'static ModelMeta) -> bool {
        if meta.is_abstract {
            tracing::debug!(model = meta.name, "skipping abstract model");
            return false;
        }
        self.lock().push(meta);
        tracing::debug!(model = meta.name, table = meta.schema.table, "registered model");
        true
    }

    /// Snapshot of registered models in registration order.
    pub fn models(&self) -> Vec<&'static ModelMeta> {
        self.lock().clone()
    }

    pub fn find(&self, name: &str) -> Option<&'static ModelMeta> {
        self.lock().iter().copied().find(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<&'static ModelMeta>> {
        self.models.lock().unwrap_or_else(|poisoned| {
            tracing::error!("model registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
