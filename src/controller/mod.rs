//! Queue controllers: groups of pipelines cancelled together.
//!
//! A controller tracks pipelines by their [`QueueId`] and holds them weakly,
//! so a pipeline that completes or is dropped never needs to notify it. A
//! pipeline is managed by at most one controller at a time; handing it to a
//! new one with [`crate::queue::Dispatch::managed_by`] evicts it from the old.
//!
//! - [`DispatchQueueController`] - a plain managed set
//! - [`LifecycleDispatchQueueController`] - additionally tags each pipeline
//!   with the lifecycle stage at which it should be cancelled

pub mod dispatch_controller;
pub mod lifecycle;

pub use dispatch_controller::DispatchQueueController;
pub use lifecycle::{CancelType, LifecycleDispatchQueueController, LifecycleEvent};

use crate::queue::{QueueId, QueueRef};

/// Membership protocol shared by all controllers.
///
/// `manage` only records membership. Use
/// [`Dispatch::managed_by`](crate::queue::Dispatch::managed_by) to also
/// record the controller on the pipeline and evict it from a previous one.
#[cfg_attr(test, mockall::automock)]
pub trait QueueController: Send + Sync {
    /// Track `queue`.
    fn manage(&self, queue: &QueueRef);

    /// Stop tracking the pipeline with `queue_id`.
    fn unmanage(&self, queue_id: QueueId);

    /// Cancel and forget every tracked pipeline.
    fn cancel_all(&self);

    /// Cancel and forget the tracked pipelines among `queue_ids`.
    fn cancel_queues(&self, queue_ids: &[QueueId]);

    /// Snapshot of the tracked pipelines.
    fn managed_queues(&self) -> Vec<QueueId>;
}
