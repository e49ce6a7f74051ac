//! Observers notified with a node's produced value.

use crate::queue::value::{DispatchValue, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Listener invoked with each value a node produces.
pub trait DispatchObserver<R>: Send + Sync {
    fn on_changed(&self, value: &R);
}

impl<R, F> DispatchObserver<R> for F
where
    F: Fn(&R) + Send + Sync,
{
    fn on_changed(&self, value: &R) {
        self(value)
    }
}

type ErasedObserver = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of an observer: the address of the `Arc` it was registered with.
fn identity<T: ?Sized>(observer: &Arc<T>) -> usize {
    Arc::as_ptr(observer) as *const () as usize
}

/// Ordered set of erased observers for one node.
#[derive(Default)]
pub(crate) struct ObserverSet {
    entries: Mutex<Vec<(usize, ErasedObserver)>>,
}

impl ObserverSet {
    pub fn add<R: DispatchValue>(&self, observer: Arc<dyn DispatchObserver<R>>) {
        let key = identity(&observer);
        let erased: ErasedObserver = Arc::new(move |value: &Value| {
            if let Some(value) = value.downcast_ref::<R>() {
                observer.on_changed(value);
            }
        });
        let mut entries = self.entries.lock();
        if entries.iter().all(|(k, _)| *k != key) {
            entries.push((key, erased));
        }
    }

    pub fn remove<R>(&self, observer: &Arc<dyn DispatchObserver<R>>) {
        let key = identity(observer);
        self.entries.lock().retain(|(k, _)| *k != key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Copy every entry of `other` into this set, keeping identities.
    pub fn extend_from(&self, other: &ObserverSet) {
        let copied = other.entries.lock().clone();
        let mut entries = self.entries.lock();
        for (key, observer) in copied {
            if entries.iter().all(|(k, _)| *k != key) {
                entries.push((key, observer));
            }
        }
    }

    /// Notify every observer in registration order.
    ///
    /// The set is snapshotted first so observers may add or remove observers,
    /// or cancel the pipeline, without deadlocking.
    pub fn notify(&self, value: &Value) {
        let snapshot: Vec<ErasedObserver> =
            self.entries.lock().iter().map(|(_, o)| o.clone()).collect();
        for observer in snapshot {
            observer(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::value::wrap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_in_order_and_once() {
        let set = ObserverSet::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first: Arc<dyn DispatchObserver<i32>> = Arc::new(move |v: &i32| s1.lock().push(*v));
        let s2 = seen.clone();
        let second: Arc<dyn DispatchObserver<i32>> =
            Arc::new(move |v: &i32| s2.lock().push(v * 10));

        set.add(first.clone());
        set.add(second);
        set.add(first);
        assert_eq!(set.len(), 2);

        set.notify(&wrap(3_i32));
        assert_eq!(*seen.lock(), vec![3, 30]);
    }

    #[test]
    fn test_remove_by_identity() {
        let set = ObserverSet::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let observer: Arc<dyn DispatchObserver<u8>> = Arc::new(move |_: &u8| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        set.add(observer.clone());
        set.remove(&observer);
        set.notify(&wrap(1_u8));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
