//! Controller partitioned by lifecycle stage.
//!
//! Each managed pipeline is tagged with the [`CancelType`] at which it should
//! be cancelled. The host forwards its lifecycle notifications through
//! [`LifecycleDispatchQueueController::handle_event`]. Destruction escalates:
//! it cancels every managed pipeline, whatever its tag.

use crate::controller::dispatch_controller::cancel_drained;
use crate::controller::{DispatchQueueController, QueueController};
use crate::queue::{QueueId, QueueRef};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle stage at which a pipeline is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelType {
    Paused,
    Stopped,
    Destroyed,
}

/// Lifecycle notification from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Paused,
    Stopped,
    Destroyed,
}

#[derive(Default)]
pub struct LifecycleDispatchQueueController {
    base: DispatchQueueController,
    paused: Mutex<BTreeSet<QueueId>>,
    stopped: Mutex<BTreeSet<QueueId>>,
    destroyed: Mutex<BTreeSet<QueueId>>,
}

impl LifecycleDispatchQueueController {
    pub fn new() -> Self {
        Self::default()
    }

    fn tag_set(&self, cancel_type: CancelType) -> &Mutex<BTreeSet<QueueId>> {
        match cancel_type {
            CancelType::Paused => &self.paused,
            CancelType::Stopped => &self.stopped,
            CancelType::Destroyed => &self.destroyed,
        }
    }

    fn untag(&self, queue_id: QueueId) {
        for cancel_type in [CancelType::Paused, CancelType::Stopped, CancelType::Destroyed] {
            if self.tag_set(cancel_type).lock().remove(&queue_id) {
                return;
            }
        }
    }

    /// Track `queue` and tag it with `cancel_type`, replacing any earlier tag.
    pub fn manage_with(&self, queue: &QueueRef, cancel_type: CancelType) {
        let queue_id = queue.queue_id();
        self.untag(queue_id);
        self.base.manage(queue);
        self.tag_set(cancel_type).lock().insert(queue_id);
        tracing::debug!("Dispatch queue {} tagged {:?}", queue_id, cancel_type);
    }

    pub fn manage_all(&self, queues: &[QueueRef]) {
        for queue in queues {
            self.manage(queue);
        }
    }

    pub fn unmanage_all(&self, queue_ids: &[QueueId]) {
        for &queue_id in queue_ids {
            self.unmanage(queue_id);
        }
    }

    /// Cancel the tracked pipelines among `queues`.
    pub fn cancel_dispatch(&self, queues: &[QueueRef]) {
        let ids: Vec<QueueId> = queues.iter().map(QueueRef::queue_id).collect();
        self.cancel_queues(&ids);
    }

    /// Cancel every pipeline tagged `cancel_type`.
    fn cancel_tagged(&self, cancel_type: CancelType) {
        let ids: Vec<QueueId> = std::mem::take(&mut *self.tag_set(cancel_type).lock())
            .into_iter()
            .collect();
        tracing::debug!("Cancelling {} {:?} dispatch queue(s)", ids.len(), cancel_type);
        cancel_drained(self.base.take(&ids));
    }

    pub fn cancel_all_paused(&self) {
        self.cancel_tagged(CancelType::Paused);
    }

    pub fn cancel_all_stopped(&self) {
        self.cancel_tagged(CancelType::Stopped);
    }

    /// Cancel every managed pipeline, paused- and stopped-tagged included.
    pub fn cancel_all_destroyed(&self) {
        self.base.cancel_all();
        self.cancel_all_paused();
        self.cancel_all_stopped();
        self.destroyed.lock().clear();
    }

    /// Forward a host lifecycle notification.
    pub fn handle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Paused => self.cancel_all_paused(),
            LifecycleEvent::Stopped => self.cancel_all_stopped(),
            LifecycleEvent::Destroyed => self.cancel_all_destroyed(),
        }
    }

    pub fn managed_paused(&self) -> Vec<QueueId> {
        self.paused.lock().iter().copied().collect()
    }

    pub fn managed_stopped(&self) -> Vec<QueueId> {
        self.stopped.lock().iter().copied().collect()
    }

    pub fn managed_destroyed(&self) -> Vec<QueueId> {
        self.destroyed.lock().iter().copied().collect()
    }
}

impl QueueController for LifecycleDispatchQueueController {
    /// Tags the pipeline [`CancelType::Destroyed`].
    fn manage(&self, queue: &QueueRef) {
        self.manage_with(queue, CancelType::Destroyed);
    }

    fn unmanage(&self, queue_id: QueueId) {
        self.base.unmanage(queue_id);
        self.untag(queue_id);
    }

    fn cancel_all(&self) {
        self.cancel_all_destroyed();
    }

    fn cancel_queues(&self, queue_ids: &[QueueId]) {
        for &queue_id in queue_ids {
            self.untag(queue_id);
        }
        self.base.cancel_queues(queue_ids);
    }

    fn managed_queues(&self) -> Vec<QueueId> {
        self.base.managed_queues()
    }
}

impl std::fmt::Debug for LifecycleDispatchQueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleDispatchQueueController")
            .field("paused", &self.managed_paused())
            .field("stopped", &self.managed_stopped())
            .field("destroyed", &self.managed_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DispatchQueue;
    use serial_test::serial;
    use std::sync::Arc;

    #[test]
    #[serial]
    fn test_manage_defaults_to_destroyed() {
        let controller = Arc::new(LifecycleDispatchQueueController::new());
        let queue = DispatchQueue::test().unwrap().managed_by(controller.clone());
        assert_eq!(controller.managed_destroyed(), vec![queue.queue_id()]);
        assert!(controller.managed_paused().is_empty());
        queue.cancel();
        assert!(controller.managed_destroyed().is_empty());
        assert!(controller.managed_queues().is_empty());
    }

    #[test]
    #[serial]
    fn test_paused_only_cancels_paused() {
        let controller = Arc::new(LifecycleDispatchQueueController::new());
        let paused = DispatchQueue::test()
            .unwrap()
            .managed_by_lifecycle(&controller, CancelType::Paused);
        let stopped = DispatchQueue::test()
            .unwrap()
            .managed_by_lifecycle(&controller, CancelType::Stopped);

        controller.handle_event(LifecycleEvent::Paused);
        assert!(paused.is_cancelled());
        assert!(!stopped.is_cancelled());
        assert_eq!(controller.managed_queues(), vec![stopped.queue_id()]);
        stopped.cancel();
    }

    #[test]
    #[serial]
    fn test_retag_moves_between_sets() {
        let controller = Arc::new(LifecycleDispatchQueueController::new());
        let queue = DispatchQueue::test()
            .unwrap()
            .managed_by_lifecycle(&controller, CancelType::Paused)
            .managed_by_lifecycle(&controller, CancelType::Stopped);
        assert!(controller.managed_paused().is_empty());
        assert_eq!(controller.managed_stopped(), vec![queue.queue_id()]);
        queue.cancel();
    }
}
