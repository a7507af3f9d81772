//! Model lifecycle signals and the model registry.
//!
//! Every model type owns four [`Signal`]s (`pre_save`, `post_save`,
//! `pre_delete`, `post_delete`) declared with [`model_signals!`]. The
//! provided [`Model::save`] and [`Model::delete_instance`] fire them around
//! the implementor's persistence calls, so receivers can validate before a
//! write or react after it.
//!
//! Concrete model types are listed in a [`ModelRegistry`], either the
//! process-wide [`registry::global`] instance or one owned by the
//! application, which the migration commands use for auto-generation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tether_models::{Model, SaveContext};
//!
//! User::signals().post_save.connect(|user: &User, ctx: &SaveContext| {
//!     if ctx.created {
//!         tracing::info!(name = %user.name, "welcome");
//!     }
//!     Ok(())
//! });
//!
//! let mut user = User::new("ada");
//! user.save(&conn, false)?;
//! ```

mod error;
mod model;
pub mod registry;
mod signal;

pub use error::{ModelError, ReceiverError, SignalError};
pub use model::{Model, ModelMeta, ModelSignals, SaveContext};
pub use registry::ModelRegistry;
pub use signal::{Receiver, Signal};

#[cfg(test)]
mod tests;
