//! The basic queue controller.

use crate::controller::QueueController;
use crate::queue::chain::Chain;
use crate::queue::{QueueId, QueueRef};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Weak;

/// Tracks a set of pipelines for bulk cancellation.
///
/// Cancellation drains the matching entries under the lock and cancels the
/// pipelines after releasing it, since cancelling calls back into
/// [`QueueController::unmanage`].
#[derive(Default)]
pub struct DispatchQueueController {
    queues: Mutex<BTreeMap<QueueId, Weak<Chain>>>,
}

impl DispatchQueueController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manage_all(&self, queues: &[QueueRef]) {
        for queue in queues {
            self.manage(queue);
        }
    }

    pub fn unmanage_all(&self, queue_ids: &[QueueId]) {
        let mut queues = self.queues.lock();
        for queue_id in queue_ids {
            queues.remove(queue_id);
        }
    }

    /// Cancel the tracked pipelines among `queues`.
    pub fn cancel_dispatch(&self, queues: &[QueueRef]) {
        let ids: Vec<QueueId> = queues.iter().map(QueueRef::queue_id).collect();
        self.cancel_queues(&ids);
    }

    pub fn is_managed(&self, queue_id: QueueId) -> bool {
        self.queues.lock().contains_key(&queue_id)
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }

    /// Remove and return the tracked pipelines among `queue_ids`.
    pub(crate) fn take(&self, queue_ids: &[QueueId]) -> Vec<Weak<Chain>> {
        let mut queues = self.queues.lock();
        queue_ids
            .iter()
            .filter_map(|queue_id| queues.remove(queue_id))
            .collect()
    }

    pub(crate) fn take_all(&self) -> Vec<Weak<Chain>> {
        std::mem::take(&mut *self.queues.lock())
            .into_values()
            .collect()
    }
}

pub(crate) fn cancel_drained(drained: Vec<Weak<Chain>>) {
    for chain in drained.iter().filter_map(Weak::upgrade) {
        chain.cancel();
    }
}

impl QueueController for DispatchQueueController {
    fn manage(&self, queue: &QueueRef) {
        tracing::debug!("Managing dispatch queue {}", queue.queue_id());
        self.queues.lock().insert(queue.queue_id(), queue.downgrade());
    }

    fn unmanage(&self, queue_id: QueueId) {
        if self.queues.lock().remove(&queue_id).is_some() {
            tracing::debug!("Unmanaged dispatch queue {}", queue_id);
        }
    }

    fn cancel_all(&self) {
        let drained = self.take_all();
        tracing::debug!("Cancelling {} managed dispatch queue(s)", drained.len());
        cancel_drained(drained);
    }

    fn cancel_queues(&self, queue_ids: &[QueueId]) {
        cancel_drained(self.take(queue_ids));
    }

    fn managed_queues(&self) -> Vec<QueueId> {
        self.queues.lock().keys().copied().collect()
    }
}

impl std::fmt::Debug for DispatchQueueController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueueController")
            .field("queues", &self.managed_queues())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings;
    use crate::queue::DispatchQueue;
    use serial_test::serial;
    use std::sync::Arc;

    #[test]
    #[serial]
    fn test_cancel_all_drains_and_cancels() {
        settings::set_log_warnings(false);
        let controller = Arc::new(DispatchQueueController::new());
        let a = DispatchQueue::test().unwrap().managed_by(controller.clone());
        let b = DispatchQueue::test().unwrap().managed_by(controller.clone());
        assert_eq!(controller.len(), 2);

        controller.cancel_all();
        assert!(controller.is_empty());
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[test]
    #[serial]
    fn test_cancel_dispatch_only_touches_listed() {
        let controller = Arc::new(DispatchQueueController::new());
        let a = DispatchQueue::test().unwrap().managed_by(controller.clone());
        let b = DispatchQueue::test().unwrap().managed_by(controller.clone());

        controller.cancel_dispatch(&[a.queue_ref()]);
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(controller.managed_queues(), vec![b.queue_id()]);
        b.cancel();
        assert!(controller.is_empty());
    }

    #[test]
    #[serial]
    fn test_dropped_pipeline_is_skipped() {
        let controller = DispatchQueueController::new();
        let queue = DispatchQueue::test().unwrap();
        controller.manage(&queue.queue_ref());
        drop(queue);
        controller.cancel_all();
        assert!(controller.is_empty());
    }

    #[test]
    #[serial]
    fn test_unmanage_all() {
        let controller = DispatchQueueController::new();
        let a = DispatchQueue::test().unwrap();
        let b = DispatchQueue::test().unwrap();
        controller.manage_all(&[a.queue_ref(), b.queue_ref()]);
        controller.unmanage_all(&[a.queue_id()]);
        assert!(!controller.is_managed(a.queue_id()));
        assert!(controller.is_managed(b.queue_id()));
    }
}
