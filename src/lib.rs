//! # relay-dispatch: deferred-task chaining
//!
//! Build pipelines of computations, each bound to a named serial execution
//! context, and let the engine schedule, join, retry and cancel them.
//!
//! ## Architecture
//!
//! - **Queue**: typed [`Dispatch`] handles over a shared, arena-backed chain
//!   of nodes; one node runs at a time, in attachment order
//! - **Context**: serial run loops (one thread each, fed through
//!   `crossbeam-channel`) plus an inline context for tests
//! - **Controller**: groups of pipelines cancelled together, optionally
//!   partitioned by lifecycle stage
//! - **Config**: TOML/JSON file seeding process-wide [`config::Settings`]
//!
//! ## Configuration
//!
//! The configuration file lives in the platform config directory under
//! `relay-dispatch/dispatch.toml`. Settings can also be installed directly
//! with [`config::settings::init`].
//!
//! ## Example
//!
//! ```no_run
//! use relay_dispatch::{DispatchQueue, DispatchQueueController, QueueController};
//! use std::sync::Arc;
//!
//! fn main() -> relay_dispatch::Result<()> {
//!     let controller = Arc::new(DispatchQueueController::new());
//!
//!     let numbers = DispatchQueue::background()?.then(|()| 1)?;
//!     let letters = DispatchQueue::io()?.then(|()| "x".to_string())?;
//!
//!     numbers
//!         .zip(&letters)?
//!         .then(|(n, s)| format!("{}{}", n, s))?
//!         .post(|joined| println!("{}", joined))?
//!         .managed_by(controller.clone())
//!         .start()?;
//!
//!     // Later, e.g. on shutdown
//!     controller.cancel_all();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod logging;
pub mod queue;

// Re-export commonly used types
pub use config::{DispatchConfig, Settings};
pub use context::{ContextInfo, ContextKind, ExecutionContext};
pub use controller::{
    CancelType, DispatchQueueController, LifecycleDispatchQueueController, LifecycleEvent,
    QueueController,
};
pub use error::{DispatchError, DispatchFailure, ErrorCallback, Result};
pub use logging::{Logger, TracingLogger};
pub use queue::{Dispatch, DispatchObserver, DispatchQueue, NodeId, QueueId, QueueRef};
