//! A single pipeline step.
//!
//! Nodes live in their chain's arena and refer to their sources by arena
//! index. All mutable state sits behind narrow locks so that the chain can
//! read a source's result while another thread tears the node down.

use crate::context::ContextInfo;
use crate::error::{DispatchError, Result};
use crate::queue::id::{NodeId, TaskHandle};
use crate::queue::observer::ObserverSet;
use crate::queue::value::{ErrorHandler, Value, Work};
use parking_lot::Mutex;
use std::time::Duration;

/// Maximum number of sources a node can merge.
pub const MAX_SOURCES: usize = 3;

/// Bounded retry budget of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub attempts_used: u32,
}

impl RetryPolicy {
    /// Consume one attempt, returning the delay to wait before it.
    fn consume(&mut self) -> Option<Duration> {
        if self.attempts_used < self.max_attempts {
            self.attempts_used += 1;
            Some(self.delay)
        } else {
            None
        }
    }
}

struct NodeInner {
    label: String,
    work: Option<Work>,
    result: Option<Value>,
    retry: RetryPolicy,
    error_handler: Option<ErrorHandler>,
    pending: Option<TaskHandle>,
}

pub(crate) struct Node {
    pub id: NodeId,
    pub delay: Duration,
    pub context: ContextInfo,
    sources: Mutex<Vec<usize>>,
    inner: Mutex<NodeInner>,
    pub observers: ObserverSet,
}

impl Node {
    pub fn new(context: ContextInfo, delay: Duration, work: Option<Work>) -> Self {
        let id = NodeId::next();
        Self {
            id,
            delay,
            context,
            sources: Mutex::new(Vec::new()),
            inner: Mutex::new(NodeInner {
                label: format!("node-{}", id.0),
                work,
                result: None,
                retry: RetryPolicy::default(),
                error_handler: None,
                pending: None,
            }),
            observers: ObserverSet::default(),
        }
    }

    /// Copy this node for splicing into another chain.
    ///
    /// The copy gets a fresh id and no sources; the caller re-links them.
    /// Retry limits are copied with a fresh budget.
    pub fn clone_for(&self, context: ContextInfo) -> Self {
        let inner = self.inner.lock();
        let copy = Node::new(context, self.delay, inner.work.clone());
        {
            let mut copied = copy.inner.lock();
            copied.label = inner.label.clone();
            copied.result = inner.result.clone();
            copied.error_handler = inner.error_handler.clone();
            copied.retry = RetryPolicy {
                attempts_used: 0,
                ..inner.retry
            };
        }
        drop(inner);
        copy.observers.extend_from(&self.observers);
        copy
    }

    pub fn label(&self) -> String {
        self.inner.lock().label.clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.inner.lock().label = label.into();
    }

    pub fn add_source(&self, index: usize) -> Result<()> {
        let mut sources = self.sources.lock();
        if sources.len() >= MAX_SOURCES {
            return Err(DispatchError::TooManySources { node_id: self.id });
        }
        sources.push(index);
        Ok(())
    }

    pub fn sources(&self) -> Vec<usize> {
        self.sources.lock().clone()
    }

    pub fn work(&self) -> Option<Work> {
        self.inner.lock().work.clone()
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.lock().result.clone()
    }

    pub fn set_result(&self, value: Value) {
        self.inner.lock().result = Some(value);
    }

    pub fn set_retry(&self, max_attempts: u32, delay: Duration) {
        self.inner.lock().retry = RetryPolicy {
            max_attempts,
            delay,
            attempts_used: 0,
        };
    }

    pub fn consume_retry(&self) -> Option<Duration> {
        self.inner.lock().retry.consume()
    }

    pub fn reset_retry(&self) {
        self.inner.lock().retry.attempts_used = 0;
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        self.inner.lock().error_handler = Some(handler);
    }

    pub fn error_handler(&self) -> Option<ErrorHandler> {
        self.inner.lock().error_handler.clone()
    }

    /// Swap the pending unit handle, returning the previous one.
    pub fn replace_pending(&self, handle: Option<TaskHandle>) -> Option<TaskHandle> {
        std::mem::replace(&mut self.inner.lock().pending, handle)
    }

    /// Drop everything the node references so the pipeline can be reclaimed.
    ///
    /// Returns the unit still pending on the node's context, if any.
    pub fn teardown(&self) -> Option<TaskHandle> {
        self.sources.lock().clear();
        self.observers.clear();
        let mut inner = self.inner.lock();
        inner.work = None;
        inner.result = None;
        inner.error_handler = None;
        inner.retry = RetryPolicy::default();
        inner.pending.take()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label())
            .field("context", &self.context.name())
            .field("sources", &self.sources())
            .finish()
    }
}
