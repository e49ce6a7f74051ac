//! Dispatch queues: typed pipeline builders over the erased chain.
//!
//! A pipeline starts from one of the [`DispatchQueue`] constructors, grows by
//! attaching continuations (`then`, `post`) and joins (`zip`, `zip3`), and
//! runs when any of its handles is started.
//!
//! ```no_run
//! use relay_dispatch::queue::DispatchQueue;
//! use std::sync::Arc;
//!
//! # fn main() -> relay_dispatch::Result<()> {
//! let queue = DispatchQueue::background()?
//!     .then(|()| 5_u32)?
//!     .then(|n| n * 2)?
//!     .then(|n| n.to_string())?
//!     .add_observer(Arc::new(|s: &String| println!("got {}", s)));
//! queue.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`Dispatch`] - typed handle to one node of a pipeline
//! - [`QueueRef`] - untyped handle to a whole pipeline, used by controllers
//! - `chain` - shared pipeline state and the execution algorithm
//! - `node` - a single step

pub(crate) mod chain;
pub mod id;
pub(crate) mod node;
pub mod observer;
pub mod value;

pub use id::{NodeId, QueueId, TaskHandle};
pub use observer::DispatchObserver;
pub use value::{DispatchValue, Value};

use crate::config::settings;
use crate::context::{registry::ensure_not_main, ContextInfo, ContextKind};
use crate::controller::{CancelType, LifecycleDispatchQueueController, QueueController};
use crate::error::{DispatchError, ErrorCallback, Result};
use chain::Chain;
use node::Node;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use value::{handler_fn, merge1, merge2, merge3, work_fn, wrap, Work};

/// Entry points for building pipelines.
pub struct DispatchQueue;

impl DispatchQueue {
    /// A pipeline whose default context is the shared context of `kind`.
    ///
    /// The main context is rejected; use [`Dispatch::post`] to hop onto it.
    pub fn create(kind: ContextKind) -> Result<Dispatch<()>> {
        let context = settings::registry().background(kind)?;
        Ok(Dispatch::root(context, Duration::ZERO, None, false))
    }

    pub fn background() -> Result<Dispatch<()>> {
        Self::create(ContextKind::Background)
    }

    pub fn background_secondary() -> Result<Dispatch<()>> {
        Self::create(ContextKind::BackgroundSecondary)
    }

    pub fn network() -> Result<Dispatch<()>> {
        Self::create(ContextKind::Network)
    }

    pub fn io() -> Result<Dispatch<()>> {
        Self::create(ContextKind::Io)
    }

    /// A pipeline running inline on the thread that starts it.
    pub fn test() -> Result<Dispatch<()>> {
        Self::create(ContextKind::Test)
    }

    /// A pipeline on a fresh context it owns. The context shuts down when
    /// the pipeline is cancelled or completes.
    pub fn new_thread(name: Option<&str>) -> Result<Dispatch<()>> {
        let context = settings::registry().named(name)?;
        Ok(Dispatch::root(context, Duration::ZERO, None, false))
    }

    /// A pipeline on a caller-supplied context.
    pub fn with_context(context: ContextInfo) -> Result<Dispatch<()>> {
        ensure_not_main(context.context.as_ref())?;
        Ok(Dispatch::root(context, Duration::ZERO, None, false))
    }

    /// A repeating pipeline: after its last node completes, the root runs
    /// again after `period`, until cancelled.
    pub fn interval(period: Duration, kind: ContextKind) -> Result<Dispatch<()>> {
        let context = settings::registry().background(kind)?;
        Ok(Dispatch::root(context, period, None, true))
    }

    /// A background pipeline whose root produces `value`.
    pub fn just<T: DispatchValue>(value: T) -> Result<Dispatch<T>> {
        let context = settings::registry().background(ContextKind::Background)?;
        let work = work_fn(move |_| Ok(wrap(value.clone())));
        Ok(Dispatch::root(context, Duration::ZERO, Some(work), false))
    }
}

/// Typed handle to one node of a pipeline.
///
/// Handles are cheap to clone. Builder methods attach new nodes at the
/// pipeline's tail and return a handle to them; attaching fails once the
/// pipeline is started or cancelled.
pub struct Dispatch<R> {
    chain: Arc<Chain>,
    index: usize,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for Dispatch<R> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            index: self.index,
            _marker: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for Dispatch<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("queue_id", &self.chain.queue_id())
            .field("index", &self.index)
            .field("type", &std::any::type_name::<R>())
            .finish()
    }
}

impl<R: DispatchValue> Dispatch<R> {
    fn root(context: ContextInfo, delay: Duration, work: Option<Work>, interval: bool) -> Self {
        let root = Node::new(context.clone(), delay, work);
        Self {
            chain: Chain::new(context, root, interval),
            index: 0,
            _marker: PhantomData,
        }
    }

    fn attached<U>(&self, index: usize) -> Dispatch<U> {
        Dispatch {
            chain: self.chain.clone(),
            index,
            _marker: PhantomData,
        }
    }

    fn attach_work<U: DispatchValue>(
        &self,
        context: ContextInfo,
        delay: Duration,
        work: Work,
    ) -> Result<Dispatch<U>> {
        let index = self
            .chain
            .attach(Node::new(context, delay, Some(work)), &[self.index])?;
        Ok(self.attached(index))
    }

    fn node(&self) -> Option<Arc<Node>> {
        self.chain.node(self.index)
    }

    /// Transform this node's result on the pipeline's default context.
    pub fn then<U, F>(&self, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> U + Send + Sync + 'static,
    {
        self.then_delayed(Duration::ZERO, f)
    }

    /// Like [`then`](Self::then), waiting `delay` before running.
    pub fn then_delayed<U, F>(&self, delay: Duration, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> U + Send + Sync + 'static,
    {
        let work = work_fn(move |values| Ok(wrap(f(merge1::<R>(values)?))));
        self.attach_work(self.chain.context().clone(), delay, work)
    }

    /// A fallible transform. An `Err` goes through retry and error handling.
    pub fn try_then<U, F>(&self, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        self.try_then_delayed(Duration::ZERO, f)
    }

    /// Like [`try_then`](Self::try_then), waiting `delay` before the first
    /// attempt. Retries wait the retry delay instead.
    pub fn try_then_delayed<U, F>(&self, delay: Duration, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> anyhow::Result<U> + Send + Sync + 'static,
    {
        let work = work_fn(move |values| f(merge1::<R>(values)?).map(wrap));
        self.attach_work(self.chain.context().clone(), delay, work)
    }

    /// Transform on the shared context of `kind` instead of the default one.
    pub fn then_on<U, F>(&self, kind: ContextKind, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> U + Send + Sync + 'static,
    {
        let context = settings::registry().get(kind)?;
        let work = work_fn(move |values| Ok(wrap(f(merge1::<R>(values)?))));
        self.attach_work(context, Duration::ZERO, work)
    }

    /// Transform on the main context.
    pub fn post<U, F>(&self, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> U + Send + Sync + 'static,
    {
        self.post_delayed(Duration::ZERO, f)
    }

    pub fn post_delayed<U, F>(&self, delay: Duration, f: F) -> Result<Dispatch<U>>
    where
        U: DispatchValue,
        F: Fn(R) -> U + Send + Sync + 'static,
    {
        let context = settings::registry().main()?;
        let work = work_fn(move |values| Ok(wrap(f(merge1::<R>(values)?))));
        self.attach_work(context, delay, work)
    }

    /// Join with a copy of `other`'s pipeline up to `other`.
    ///
    /// `other`'s nodes are cloned into this pipeline and run on its default
    /// context before the join node; `other` itself is left untouched.
    pub fn zip<U: DispatchValue>(&self, other: &Dispatch<U>) -> Result<Dispatch<(R, U)>> {
        other.ensure_not_cancelled()?;
        let work = work_fn(|values| Ok(wrap(merge2::<R, U>(values)?)));
        let index = self
            .chain
            .join(self.index, &[(&other.chain, other.index)], work)?;
        Ok(self.attached(index))
    }

    /// Three-way [`zip`](Self::zip).
    pub fn zip3<U: DispatchValue, V: DispatchValue>(
        &self,
        second: &Dispatch<U>,
        third: &Dispatch<V>,
    ) -> Result<Dispatch<(R, U, V)>> {
        second.ensure_not_cancelled()?;
        third.ensure_not_cancelled()?;
        let work = work_fn(|values| Ok(wrap(merge3::<R, U, V>(values)?)));
        let index = self.chain.join(
            self.index,
            &[(&second.chain, second.index), (&third.chain, third.index)],
            work,
        )?;
        Ok(self.attached(index))
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.chain.is_cancelled() {
            return Err(DispatchError::Cancelled {
                queue_id: self.chain.queue_id(),
            });
        }
        Ok(())
    }

    /// Retry this node up to `count` more times, `delay` apart, when its
    /// work fails.
    pub fn retry(self, count: u32, delay: Duration) -> Self {
        if let Some(node) = self.node() {
            node.set_retry(count, delay);
        }
        self
    }

    /// Substitute a result when this node fails after its retries. An `Err`
    /// from the handler is unrecoverable.
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        if let Some(node) = self.node() {
            let handler = handler_fn(move |error| handler(error).map(wrap));
            node.set_error_handler(handler);
        }
        self
    }

    /// Hand the pipeline to `controller`, evicting it from any previous one.
    ///
    /// A [`LifecycleDispatchQueueController`] passed here tags the pipeline
    /// [`CancelType::Destroyed`]. Managing a cancelled pipeline does nothing.
    pub fn managed_by(self, controller: Arc<dyn QueueController>) -> Self {
        if self.evict_and_replace(controller.clone()) {
            controller.manage(&self.queue_ref());
            self.forget_if_cancelled(controller.as_ref());
        }
        self
    }

    /// Hand the pipeline to a lifecycle controller under `cancel_type`.
    pub fn managed_by_lifecycle(
        self,
        controller: &Arc<LifecycleDispatchQueueController>,
        cancel_type: CancelType,
    ) -> Self {
        if self.evict_and_replace(controller.clone()) {
            controller.manage_with(&self.queue_ref(), cancel_type);
            self.forget_if_cancelled(controller.as_ref());
        }
        self
    }

    /// The pipeline may have completed between recording the controller and
    /// registering with it; its own unmanage already ran in that case.
    fn forget_if_cancelled(&self, controller: &dyn QueueController) {
        if self.chain.is_cancelled() {
            controller.unmanage(self.chain.queue_id());
        }
    }

    fn evict_and_replace(&self, controller: Arc<dyn QueueController>) -> bool {
        match self.chain.replace_controller(controller) {
            Ok(previous) => {
                if let Some(previous) = previous {
                    previous.unmanage(self.chain.queue_id());
                }
                true
            }
            Err(e) => {
                tracing::debug!("Not managing dispatch queue: {}", e);
                false
            }
        }
    }

    pub fn add_observer(self, observer: Arc<dyn DispatchObserver<R>>) -> Self {
        match self.node() {
            Some(node) if !self.chain.is_cancelled() => node.observers.add(observer),
            _ => tracing::debug!(
                "Ignoring observer for cancelled dispatch queue {}",
                self.chain.queue_id()
            ),
        }
        self
    }

    pub fn remove_observer(self, observer: &Arc<dyn DispatchObserver<R>>) -> Self {
        if let Some(node) = self.node() {
            node.observers.remove(observer);
        }
        self
    }

    pub fn remove_observers(self) -> Self {
        if let Some(node) = self.node() {
            node.observers.clear();
        }
        self
    }

    pub fn observer_count(&self) -> usize {
        self.node().map_or(0, |node| node.observers.len())
    }
}

impl<R> Dispatch<R> {
    /// Diagnostic label of this node.
    pub fn label(&self) -> String {
        self.chain.node(self.index).map(|n| n.label()).unwrap_or_default()
    }

    pub fn set_label(self, label: impl Into<String>) -> Self {
        if let Some(node) = self.chain.node(self.index) {
            node.set_label(label);
        }
        self
    }

    /// Id of this node.
    pub fn id(&self) -> Option<NodeId> {
        self.chain.node(self.index).map(|n| n.id)
    }

    pub fn queue_id(&self) -> QueueId {
        self.chain.queue_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.chain.is_cancelled()
    }

    pub fn is_started(&self) -> bool {
        self.chain.is_started()
    }

    pub fn controller(&self) -> Option<Arc<dyn QueueController>> {
        self.chain.controller()
    }

    /// Untyped handle to the whole pipeline.
    pub fn queue_ref(&self) -> QueueRef {
        QueueRef {
            chain: self.chain.clone(),
        }
    }

    /// Start the pipeline from its root.
    pub fn start(self) -> Result<Self> {
        self.chain.start(None)?;
        Ok(self)
    }

    /// Start the pipeline, routing unrecovered failures to `callback`.
    pub fn start_with(self, callback: Arc<dyn ErrorCallback>) -> Result<Self> {
        self.chain.start(Some(callback))?;
        Ok(self)
    }

    /// Cancel the whole pipeline. Idempotent.
    pub fn cancel(&self) {
        self.chain.cancel();
    }
}

/// Untyped handle to a whole pipeline.
#[derive(Clone)]
pub struct QueueRef {
    chain: Arc<Chain>,
}

impl QueueRef {
    pub fn queue_id(&self) -> QueueId {
        self.chain.queue_id()
    }

    pub fn is_cancelled(&self) -> bool {
        self.chain.is_cancelled()
    }

    pub fn cancel(&self) {
        self.chain.cancel();
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<Chain> {
        Arc::downgrade(&self.chain)
    }
}

impl std::fmt::Debug for QueueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("QueueRef").field(&self.chain.queue_id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ImmediateContext;
    use crate::controller::MockQueueController;
    use parking_lot::Mutex;
    use serial_test::serial;

    fn quiet() {
        settings::set_log_warnings(false);
    }

    #[test]
    #[serial]
    fn test_then_chain_runs_inline() {
        quiet();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        DispatchQueue::test()
            .unwrap()
            .then(|()| 5)
            .unwrap()
            .then(|n: i32| n * 2)
            .unwrap()
            .add_observer(Arc::new(move |n: &i32| s.lock().push(*n)))
            .start()
            .unwrap();
        assert_eq!(*seen.lock(), vec![10]);
    }

    #[test]
    #[serial]
    fn test_start_after_cancel_fails() {
        quiet();
        let queue = DispatchQueue::test().unwrap();
        queue.cancel();
        let err = queue.start().unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled { .. }));
    }

    #[test]
    #[serial]
    fn test_with_context_rejects_main() {
        let main = settings::registry().main().unwrap();
        let err = DispatchQueue::with_context(main).unwrap_err();
        assert!(err.is_invalid_state());

        let inline = ContextInfo::shared(Arc::new(ImmediateContext::new("custom")));
        assert!(DispatchQueue::with_context(inline).is_ok());
    }

    #[test]
    #[serial]
    fn test_zip_with_cancelled_branch_fails() {
        quiet();
        let queue = DispatchQueue::test().unwrap();
        let other = DispatchQueue::test().unwrap();
        other.cancel();
        assert!(queue.zip(&other).is_err());
    }

    #[test]
    #[serial]
    fn test_pipeline_finishing_while_being_managed_is_forgotten() {
        quiet();
        let queue = DispatchQueue::test().unwrap();
        let queue_id = queue.queue_id();

        let mut controller = MockQueueController::new();
        // The pipeline ends right as the controller registers it
        controller
            .expect_manage()
            .times(1)
            .returning(|queue: &QueueRef| queue.cancel());
        controller
            .expect_unmanage()
            .withf(move |id| *id == queue_id)
            .times(2)
            .return_const(());

        let queue = queue.managed_by(Arc::new(controller));
        assert!(queue.is_cancelled());
        assert!(queue.controller().is_none());
    }

    #[test]
    #[serial]
    fn test_label_and_observer_count() {
        let queue = DispatchQueue::test().unwrap().set_label("root");
        assert_eq!(queue.label(), "root");
        let observer: Arc<dyn DispatchObserver<()>> = Arc::new(|_: &()| {});
        let queue = queue.add_observer(observer.clone());
        assert_eq!(queue.observer_count(), 1);
        let queue = queue.remove_observer(&observer);
        assert_eq!(queue.observer_count(), 0);
        queue.cancel();
    }
}
