//! Error types for signals and model persistence.

/// Error type returned by signal receivers.
pub type ReceiverError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while connecting to or dispatching a signal.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// `disconnect` was called with a receiver that is not connected.
    #[error("unknown receiver for signal '{signal}'")]
    UnknownReceiver {
        /// Name of the signal.
        signal: &'static str,
    },

    /// A receiver returned an error; dispatch stopped at that receiver.
    #[error("receiver for signal '{signal}' failed: {source}")]
    Receiver {
        /// Name of the signal.
        signal: &'static str,
        /// The receiver's error.
        source: ReceiverError,
    },
}

/// Errors that can occur while saving or deleting a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// A lifecycle signal receiver aborted the operation.
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// The underlying persistence call failed.
    #[error("model database error: {0}")]
    Database(#[from] rusqlite::Error),
}
