//! Shared state of one pipeline and its execution algorithm.
//!
//! A [`Chain`] owns every node of a pipeline in an append-only arena. Index 0
//! is the root, and because attachment always appends at the tail, the
//! successor of node `i` is node `i + 1`. Joined branches are cloned into the
//! arena ahead of the join node, so running the arena front to back always
//! fills a join's sources before the join runs.
//!
//! # Locking
//!
//! - `state` guards the tail, lifecycle flags, error callback and controller.
//! - `nodes` guards the arena; it is only taken after `state`, never before.
//! - Each node guards its own fields.
//!
//! No lock is held while work, error handlers, observers or callbacks run,
//! nor while posting to or cancelling on a context.

use crate::config::settings;
use crate::context::ContextInfo;
use crate::controller::QueueController;
use crate::error::{DispatchError, DispatchFailure, ErrorCallback, Result};
use crate::logging::TAG;
use crate::queue::id::QueueId;
use crate::queue::node::Node;
use crate::queue::value::{unit, Value, Work};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ChainState {
    tail: usize,
    started: bool,
    interval: bool,
    error_callback: Option<Arc<dyn ErrorCallback>>,
    controller: Option<Arc<dyn QueueController>>,
}

pub(crate) struct Chain {
    queue_id: QueueId,
    /// Default context for nodes attached without an explicit one
    context: ContextInfo,
    cancelled: AtomicBool,
    state: Mutex<ChainState>,
    nodes: RwLock<Vec<Arc<Node>>>,
}

/// A node cloned out of another chain, with sources as positions in the
/// same clone list.
struct BranchClone {
    node: Node,
    sources: Vec<usize>,
}

impl Chain {
    pub fn new(context: ContextInfo, root: Node, interval: bool) -> Arc<Self> {
        let queue_id = QueueId::next();
        tracing::trace!(
            "Created dispatch queue {} on '{}' (interval: {})",
            queue_id,
            context.name(),
            interval
        );
        Arc::new(Self {
            queue_id,
            context,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(ChainState {
                tail: 0,
                started: false,
                interval,
                error_callback: None,
                controller: None,
            }),
            nodes: RwLock::new(vec![Arc::new(root)]),
        })
    }

    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    pub fn context(&self) -> &ContextInfo {
        &self.context
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_interval(&self) -> bool {
        self.state.lock().interval
    }

    pub fn tail(&self) -> usize {
        self.state.lock().tail
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn node(&self, index: usize) -> Option<Arc<Node>> {
        self.nodes.read().get(index).cloned()
    }

    pub fn controller(&self) -> Option<Arc<dyn QueueController>> {
        self.state.lock().controller.clone()
    }

    /// Record `controller` as the owner, returning the one it replaces.
    /// A cancelled chain keeps no controller.
    pub fn replace_controller(
        &self,
        controller: Arc<dyn QueueController>,
    ) -> Result<Option<Arc<dyn QueueController>>> {
        let mut state = self.state.lock();
        if self.is_cancelled() {
            return Err(DispatchError::Cancelled {
                queue_id: self.queue_id,
            });
        }
        Ok(state.controller.replace(controller))
    }

    fn check_attachable(&self, state: &ChainState) -> Result<()> {
        if self.is_cancelled() {
            return Err(DispatchError::Cancelled {
                queue_id: self.queue_id,
            });
        }
        if state.started {
            return Err(DispatchError::AlreadyStarted {
                queue_id: self.queue_id,
            });
        }
        Ok(())
    }

    /// Append `node` at the tail with the given sources.
    pub fn attach(&self, node: Node, sources: &[usize]) -> Result<usize> {
        let mut state = self.state.lock();
        self.check_attachable(&state)?;

        for &source in sources {
            node.add_source(source)?;
        }

        let mut nodes = self.nodes.write();
        nodes.push(Arc::new(node));
        state.tail = nodes.len() - 1;
        tracing::trace!("Attached node {} to dispatch queue {}", state.tail, self.queue_id);
        Ok(state.tail)
    }

    /// Clone every node reachable from `from` through source links, sources
    /// first, rebinding the clones to `context`.
    fn clone_branch(&self, from: usize, context: &ContextInfo) -> Vec<BranchClone> {
        let originals: Vec<Arc<Node>> = self.nodes.read().clone();
        let mut clones = Vec::new();
        let mut cloned_at: HashMap<usize, usize> = HashMap::new();

        // Iterative post-order walk: (index, sources already pushed)
        let mut stack = vec![(from, false)];
        while let Some((index, expanded)) = stack.pop() {
            if cloned_at.contains_key(&index) {
                continue;
            }
            let Some(original) = originals.get(index) else {
                continue;
            };
            let sources = original.sources();
            if !expanded {
                stack.push((index, true));
                for &source in sources.iter().rev() {
                    if !cloned_at.contains_key(&source) {
                        stack.push((source, false));
                    }
                }
                continue;
            }

            let mapped = sources
                .iter()
                .filter_map(|source| cloned_at.get(source).copied())
                .collect();
            cloned_at.insert(index, clones.len());
            clones.push(BranchClone {
                node: original.clone_for(context.clone()),
                sources: mapped,
            });
        }

        clones
    }

    /// Splice copies of the given branches into this chain, then attach a
    /// join node merging `own` with the end of each branch.
    pub fn join(&self, own: usize, branches: &[(&Arc<Chain>, usize)], work: Work) -> Result<usize> {
        let spliced: Vec<Vec<BranchClone>> = branches
            .iter()
            .map(|(chain, from)| chain.clone_branch(*from, &self.context))
            .collect();

        let mut state = self.state.lock();
        self.check_attachable(&state)?;

        let mut nodes = self.nodes.write();
        let mut join_sources = vec![own];
        for branch in spliced {
            let base = nodes.len();
            if branch.is_empty() {
                continue;
            }
            let end = base + branch.len() - 1;
            for clone in branch {
                for source in clone.sources {
                    clone.node.add_source(base + source)?;
                }
                nodes.push(Arc::new(clone.node));
            }
            join_sources.push(end);
        }

        let join = Node::new(self.context.clone(), Duration::ZERO, Some(work));
        for source in join_sources {
            join.add_source(source)?;
        }
        nodes.push(Arc::new(join));
        state.tail = nodes.len() - 1;
        tracing::trace!(
            "Joined {} branch(es) into dispatch queue {} at node {}",
            branches.len(),
            self.queue_id,
            state.tail
        );
        Ok(state.tail)
    }

    /// Start the pipeline by scheduling its root.
    ///
    /// Starting a started pipeline is a no-op. `callback`, when given,
    /// replaces the pipeline's error callback.
    pub fn start(self: &Arc<Self>, callback: Option<Arc<dyn ErrorCallback>>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if self.is_cancelled() {
                return Err(DispatchError::Cancelled {
                    queue_id: self.queue_id,
                });
            }
            if state.started {
                return Ok(());
            }
            state.started = true;
            if callback.is_some() {
                state.error_callback = callback;
            }
        }
        tracing::debug!("Starting dispatch queue {}", self.queue_id);
        self.schedule(0, None);
        Ok(())
    }

    /// Post node `index` on its context. `retry_delay` replaces the node's
    /// own delay for retry attempts.
    fn schedule(self: &Arc<Self>, index: usize, retry_delay: Option<Duration>) {
        if self.is_cancelled() {
            return;
        }
        let Some(node) = self.node(index) else {
            return;
        };

        if let Some(previous) = node.replace_pending(None) {
            node.context.context.cancel(previous);
        }

        if index == 0 {
            self.warn_if_unmanaged();
        }

        let delay = retry_delay.unwrap_or(node.delay);
        tracing::trace!(
            "Scheduling node {} of dispatch queue {} on '{}' after {:?}",
            index,
            self.queue_id,
            node.context.name(),
            delay
        );

        let chain = Arc::clone(self);
        let handle = node
            .context
            .schedule(delay, Box::new(move || chain.execute(index)));

        if !handle.is_none() && !self.is_cancelled() {
            node.replace_pending(Some(handle));
        }
    }

    fn warn_if_unmanaged(&self) {
        if self.state.lock().controller.is_some() {
            return;
        }
        let settings = settings::current();
        if settings.enable_log_warnings {
            settings.logger.print(
                TAG,
                &format!(
                    "No controller set for dispatch queue {}. \
                     Unmanaged long-running pipelines can leak.",
                    self.queue_id
                ),
            );
        }
    }

    /// Read every source result. `None` while any source is still unset.
    fn gather(&self, node: &Node) -> Option<Vec<Value>> {
        let sources = node.sources();
        let nodes = self.nodes.read();
        sources
            .iter()
            .map(|&index| nodes.get(index).and_then(|source| source.result()))
            .collect()
    }

    /// Run node `index`. This is the unit posted to the node's context.
    fn execute(self: &Arc<Self>, index: usize) {
        if self.is_cancelled() {
            return;
        }
        let Some(node) = self.node(index) else {
            return;
        };
        node.replace_pending(None);

        let Some(inputs) = self.gather(&node) else {
            tracing::warn!(
                "Node {} of dispatch queue {} ran before its sources were ready",
                index,
                self.queue_id
            );
            return;
        };

        let outcome = match node.work() {
            Some(work) => work(&inputs),
            None => Ok(unit()),
        };

        match outcome {
            Ok(value) => {
                node.reset_retry();
                self.complete(&node, index, value);
            }
            Err(error) => self.fail(&node, index, error),
        }
    }

    fn complete(self: &Arc<Self>, node: &Node, index: usize, value: Value) {
        // A node torn down while its work ran stays cleared
        if self.is_cancelled() {
            return;
        }
        node.set_result(value.clone());
        node.observers.notify(&value);
        self.advance(index);
    }

    /// Schedule the successor, re-run the root of an interval pipeline, or
    /// end the pipeline.
    fn advance(self: &Arc<Self>, index: usize) {
        if self.is_cancelled() {
            return;
        }
        if index + 1 < self.len() {
            self.schedule(index + 1, None);
        } else if self.is_interval() {
            self.schedule(0, None);
        } else {
            tracing::debug!("Dispatch queue {} completed", self.queue_id);
            self.cancel();
        }
    }

    fn fail(self: &Arc<Self>, node: &Node, index: usize, error: anyhow::Error) {
        if self.is_cancelled() {
            tracing::debug!(
                "Dropping failure of node '{}' in cancelled dispatch queue {}: {:#}",
                node.label(),
                self.queue_id,
                error
            );
            return;
        }

        if let Some(delay) = node.consume_retry() {
            tracing::debug!(
                "Node '{}' of dispatch queue {} failed, retrying in {:?}: {:#}",
                node.label(),
                self.queue_id,
                delay,
                error
            );
            self.schedule(index, Some(delay));
            return;
        }

        if let Some(handler) = node.error_handler() {
            match handler(&error) {
                Ok(value) => self.complete(node, index, value),
                Err(handler_error) => self.unrecoverable(node, handler_error),
            }
            return;
        }

        self.unrecoverable(node, error);
    }

    /// Deliver an unrecovered failure and cancel the pipeline.
    ///
    /// Failures go to the pipeline callback, then the process-wide one, and
    /// are delivered on the main context. With no sink the failure panics
    /// on the executing context.
    fn unrecoverable(self: &Arc<Self>, node: &Node, error: anyhow::Error) {
        let failure = DispatchFailure {
            error,
            node_id: node.id,
            label: node.label(),
            queue_id: self.queue_id,
        };

        // `cancel` sets the flag before it clears the callback
        let callback = {
            let state = self.state.lock();
            if self.is_cancelled() {
                tracing::debug!("Dropping failure of cancelled pipeline: {}", failure);
                return;
            }
            state.error_callback.clone()
        };
        let callback = callback.or_else(|| settings::current().error_callback);

        self.cancel();

        let Some(callback) = callback else {
            tracing::error!("Unhandled failure: {}", failure);
            panic!("unhandled dispatch failure: {}", failure);
        };

        tracing::debug!("Delivering failure to error callback: {}", failure);
        match settings::registry().main() {
            Ok(main) => {
                main.context.post(Box::new(move || callback.on_error(failure)));
            }
            Err(e) => {
                tracing::warn!("Main context unavailable ({}), delivering failure inline", e);
                callback.on_error(failure);
            }
        }
    }

    /// Cancel the pipeline. Idempotent.
    ///
    /// Every node is torn down, pending units are removed from their
    /// contexts, contexts owned by the pipeline are shut down and the
    /// managing controller forgets the pipeline.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let controller = {
            let mut state = self.state.lock();
            state.started = false;
            state.error_callback = None;
            state.controller.take()
        };

        let nodes: Vec<Arc<Node>> = self.nodes.read().clone();
        let mut owned: Vec<ContextInfo> = Vec::new();
        if self.context.close_on_cancel {
            owned.push(self.context.clone());
        }
        for node in &nodes {
            if let Some(handle) = node.teardown() {
                node.context.context.cancel(handle);
            }
            if node.context.close_on_cancel
                && !owned
                    .iter()
                    .any(|info| Arc::ptr_eq(&info.context, &node.context.context))
            {
                owned.push(node.context.clone());
            }
        }

        for info in owned {
            info.context.quit();
        }

        if let Some(controller) = controller {
            controller.unmanage(self.queue_id);
        }

        tracing::debug!("Cancelled dispatch queue {}", self.queue_id);
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("queue_id", &self.queue_id)
            .field("context", &self.context.name())
            .field("cancelled", &self.is_cancelled())
            .field("nodes", &self.len())
            .finish()
    }
}
