//! Shared value types for the Tether workspace.
//!
//! This crate holds types that model code and API handlers both need but
//! that carry no database or framework dependency. At the moment that is
//! [`Choices`], the helper for enum-like model fields.

mod choices;

pub use choices::{Choice, ChoiceError, Choices};
