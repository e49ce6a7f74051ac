//! Test pipeline builders and recorders

use super::test_timeout;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use relay_dispatch::DispatchObserver;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Records every value an observer sees
pub struct Recorder<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn observer(&self) -> Arc<dyn DispatchObserver<T>> {
        let tx = self.tx.clone();
        Arc::new(move |value: &T| {
            let _ = tx.send(value.clone());
        })
    }

    /// Wait for the next value
    pub fn recv(&self) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(test_timeout())
    }

    /// Every value recorded so far
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

/// Work that fails until it has been called `succeed_on` times
pub fn failing_until(succeed_on: u32) -> (Arc<AtomicU32>, impl Fn(()) -> anyhow::Result<u32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let work = move |()| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if call < succeed_on {
            anyhow::bail!("call {} failed", call);
        }
        Ok(call)
    };
    (calls, work)
}

/// Work that always fails, counting its calls
pub fn always_failing() -> (Arc<AtomicU32>, impl Fn(()) -> anyhow::Result<u32>) {
    failing_until(u32::MAX)
}
