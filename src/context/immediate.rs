//! Inline execution context.
//!
//! Runs every unit on the posting thread before `post` returns, sleeping
//! first for any delay. Pipelines on this context complete synchronously
//! inside `start`, which makes them convenient for deterministic tests.
//! Pending units cannot be cancelled because there are none.

use crate::context::{ExecutionContext, Job};
use crate::queue::id::TaskHandle;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub struct ImmediateContext {
    name: String,
    active: AtomicBool,
    next_handle: AtomicU64,
}

impl ImmediateContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: AtomicBool::new(true),
            next_handle: AtomicU64::new(1),
        }
    }

    fn run(&self, delay: Duration, job: Job) -> TaskHandle {
        if !self.is_active() {
            return TaskHandle::NONE;
        }
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        job();
        handle
    }
}

impl ExecutionContext for ImmediateContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn post(&self, job: Job) -> TaskHandle {
        self.run(Duration::ZERO, job)
    }

    fn post_delayed(&self, delay: Duration, job: Job) -> TaskHandle {
        self.run(delay, job)
    }

    fn cancel(&self, _handle: TaskHandle) {}

    fn quit(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}
