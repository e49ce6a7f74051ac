//! Error handling for relay-dispatch
//!
//! Two families of errors live here:
//!
//! - [`DispatchError`] - precondition violations reported synchronously to the
//!   caller (attaching to a started pipeline, using the main context for
//!   background work, bad configuration files).
//! - [`DispatchFailure`] - an unrecoverable failure of a node's work function,
//!   delivered asynchronously to the pipeline or global error callback.

use crate::queue::id::{NodeId, QueueId};
use std::fmt;
use thiserror::Error;

/// Main error type for relay-dispatch operations
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The pipeline was already started, so nodes can no longer be attached
    #[error("Dispatch queue {queue_id} has already been started")]
    AlreadyStarted { queue_id: QueueId },

    /// The pipeline was cancelled and cannot be modified or restarted
    #[error("Dispatch queue {queue_id} has been cancelled")]
    Cancelled { queue_id: QueueId },

    /// A background queue was configured on the main context
    #[error("Context '{context}' is the main context and cannot perform background work")]
    MainContextForBackground { context: String },

    /// A node already has the maximum number of sources
    #[error("Node {node_id} already has the maximum number of sources")]
    TooManySources { node_id: NodeId },

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DispatchError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error is an invalid-state precondition violation
    pub fn is_invalid_state(&self) -> bool {
        match self {
            DispatchError::AlreadyStarted { .. }
            | DispatchError::Cancelled { .. }
            | DispatchError::MainContextForBackground { .. }
            | DispatchError::TooManySources { .. } => true,
            DispatchError::WithContext { source, .. } => source.is_invalid_state(),
            _ => false,
        }
    }
}

/// Result type alias for relay-dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// An unrecoverable work failure, handed to error callbacks.
///
/// By the time a callback receives this, the owning pipeline has been
/// cancelled.
#[derive(Debug)]
pub struct DispatchFailure {
    /// The error returned by the work function or its error handler
    pub error: anyhow::Error,
    /// Id of the node that failed
    pub node_id: NodeId,
    /// Label of the node that failed
    pub label: String,
    /// Queue id of the pipeline the node belonged to
    pub queue_id: QueueId,
}

impl fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node '{}' ({}) in queue {} failed: {:#}",
            self.label, self.node_id, self.queue_id, self.error
        )
    }
}

/// Sink for unrecoverable failures (per pipeline or process-wide).
#[cfg_attr(test, mockall::automock)]
pub trait ErrorCallback: Send + Sync {
    fn on_error(&self, failure: DispatchFailure);
}

impl<F> ErrorCallback for F
where
    F: Fn(DispatchFailure) + Send + Sync,
{
    fn on_error(&self, failure: DispatchFailure) {
        self(failure)
    }
}
