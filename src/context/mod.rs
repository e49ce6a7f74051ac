//! Execution contexts: named serial run loops that nodes are bound to.
//!
//! The engine only relies on the [`ExecutionContext`] contract: post a unit,
//! post it after a delay, cancel a pending unit. Units posted to one context
//! run one at a time, FIFO modulo their delays.
//!
//! # Components
//!
//! - [`RunLoop`] - a dedicated thread draining a `crossbeam-channel` command queue
//! - [`ImmediateContext`] - runs units inline on the posting thread (tests)
//! - [`ContextFactory`] / [`DefaultContextFactory`] - build contexts by kind or name
//! - [`ContextRegistry`] - caches the shared named contexts for the process

pub mod factory;
pub mod immediate;
pub mod registry;
pub mod run_loop;

pub use factory::{ContextFactory, DefaultContextFactory};
pub use immediate::ImmediateContext;
pub use registry::ContextRegistry;
pub use run_loop::RunLoop;

use crate::queue::id::TaskHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A unit of work posted to a context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named serial run context.
pub trait ExecutionContext: Send + Sync {
    /// Name of the context (the thread name for run loops).
    fn name(&self) -> &str;

    /// Whether this is the designated main context.
    fn is_main(&self) -> bool {
        false
    }

    /// Whether the context still accepts and runs units.
    fn is_active(&self) -> bool;

    /// Post a unit to run as soon as possible.
    fn post(&self, job: Job) -> TaskHandle;

    /// Post a unit to run after `delay`.
    fn post_delayed(&self, delay: Duration, job: Job) -> TaskHandle;

    /// Remove a pending unit. Units already running are not interrupted.
    fn cancel(&self, handle: TaskHandle);

    /// Stop accepting units and shut the context down.
    fn quit(&self);
}

/// Kinds of context the factory knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKind {
    /// Shared general-purpose background loop.
    Background,
    /// Second shared background loop.
    BackgroundSecondary,
    /// Shared loop for network calls.
    Network,
    /// Shared loop for file and disk IO.
    Io,
    /// A fresh loop owned by one pipeline; shut down when it is cancelled.
    New,
    /// The designated main context; also receives error callbacks.
    Main,
    /// Inline execution on the posting thread.
    Test,
}

impl ContextKind {
    /// Kinds that are cached and shared by the registry.
    pub fn is_shared(self) -> bool {
        !matches!(self, ContextKind::New)
    }
}

/// A context plus whether the pipeline using it owns its lifetime.
#[derive(Clone)]
pub struct ContextInfo {
    pub context: Arc<dyn ExecutionContext>,
    /// Quit the context when the owning pipeline is cancelled.
    pub close_on_cancel: bool,
}

impl ContextInfo {
    pub fn shared(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            close_on_cancel: false,
        }
    }

    pub fn owned(context: Arc<dyn ExecutionContext>) -> Self {
        Self {
            context,
            close_on_cancel: true,
        }
    }

    pub fn name(&self) -> &str {
        self.context.name()
    }

    /// Post `job`, delayed when `delay` is non-zero.
    pub fn schedule(&self, delay: Duration, job: Job) -> TaskHandle {
        if delay.is_zero() {
            self.context.post(job)
        } else {
            self.context.post_delayed(delay, job)
        }
    }
}

impl std::fmt::Debug for ContextInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextInfo")
            .field("name", &self.context.name())
            .field("close_on_cancel", &self.close_on_cancel)
            .finish()
    }
}
