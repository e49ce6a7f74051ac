//! Dedicated-thread run loop
//!
//! A [`RunLoop`] owns one OS thread that executes posted units one at a time.
//! The thread is fed through a `crossbeam-channel` command queue; delayed
//! units wait in a deadline heap until they are due.
//!
//! # Ordering
//!
//! Units are ordered by `(deadline, handle)`. Handles are issued from a
//! monotonic counter, so units posted without delay run in posting order.
//!
//! # Cancellation
//!
//! `cancel` removes a pending unit lazily: its job is dropped from the job
//! table and the heap entry is skipped when it comes due. Commands are
//! drained before every unit runs, so a cancel issued by the unit in flight
//! takes effect before the next unit starts.
//!
//! # Faults
//!
//! A panicking unit unwinds the loop thread. The loop is marked inactive and
//! the fault is logged; the registry replaces inactive shared loops on the
//! next lookup.

use crate::context::{ExecutionContext, Job};
use crate::queue::id::TaskHandle;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Commands sent from posting threads to the loop thread
enum LoopCommand {
    /// Queue a unit to run at `deadline`
    Post {
        handle: u64,
        deadline: Instant,
        job: Job,
    },
    /// Drop a pending unit
    Cancel(u64),
    /// Stop the loop, dropping pending units
    Quit,
}

/// A named serial context backed by its own thread.
pub struct RunLoop {
    name: String,
    is_main: bool,
    command_tx: Sender<LoopCommand>,
    active: Arc<AtomicBool>,
    next_handle: AtomicU64,
}

impl RunLoop {
    /// Spawn a background run loop named `name`.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        Self::spawn_inner(name.into(), false)
    }

    /// Spawn the run loop designated as the main context.
    pub fn spawn_main(name: impl Into<String>) -> std::io::Result<Self> {
        Self::spawn_inner(name.into(), true)
    }

    fn spawn_inner(name: String, is_main: bool) -> std::io::Result<Self> {
        let (command_tx, command_rx) = unbounded();
        let active = Arc::new(AtomicBool::new(true));
        let worker = LoopWorker {
            name: name.clone(),
            command_rx,
            active: active.clone(),
            heap: BinaryHeap::new(),
            jobs: HashMap::new(),
        };

        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())?;

        tracing::debug!("Spawned run loop '{}'", name);

        Ok(Self {
            name,
            is_main,
            command_tx,
            active,
            next_handle: AtomicU64::new(1),
        })
    }

    fn submit(&self, delay: Duration, job: Job) -> TaskHandle {
        if !self.is_active() {
            tracing::debug!("Run loop '{}' is not active, dropping unit", self.name);
            return TaskHandle::NONE;
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let command = LoopCommand::Post {
            handle,
            deadline: Instant::now() + delay,
            job,
        };
        match self.command_tx.send(command) {
            Ok(()) => TaskHandle(handle),
            Err(_) => {
                tracing::debug!("Run loop '{}' has exited, dropping unit", self.name);
                TaskHandle::NONE
            }
        }
    }
}

impl ExecutionContext for RunLoop {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_main(&self) -> bool {
        self.is_main
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn post(&self, job: Job) -> TaskHandle {
        self.submit(Duration::ZERO, job)
    }

    fn post_delayed(&self, delay: Duration, job: Job) -> TaskHandle {
        self.submit(delay, job)
    }

    fn cancel(&self, handle: TaskHandle) {
        if !handle.is_none() {
            let _ = self.command_tx.send(LoopCommand::Cancel(handle.0));
        }
    }

    fn quit(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Quitting run loop '{}'", self.name);
            let _ = self.command_tx.send(LoopCommand::Quit);
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        let _ = self.command_tx.send(LoopCommand::Quit);
    }
}

/// State owned by the loop thread
struct LoopWorker {
    name: String,
    command_rx: Receiver<LoopCommand>,
    active: Arc<AtomicBool>,
    /// Pending deadlines, earliest first
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    /// Jobs by handle; absent once cancelled
    jobs: HashMap<u64, Job>,
}

impl LoopWorker {
    fn run(mut self) {
        tracing::trace!("Run loop '{}' started", self.name);

        loop {
            let received = match self.next_deadline() {
                Some(deadline) => match self.command_rx.recv_deadline(deadline) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.command_rx.recv() {
                    Ok(cmd) => Some(cmd),
                    Err(_) => break,
                },
            };

            if let Some(cmd) = received {
                if !self.handle_command(cmd) {
                    break;
                }
            }

            if !self.run_due() {
                break;
            }
        }

        tracing::trace!("Run loop '{}' stopped", self.name);
    }

    /// Process a command. Returns false when the loop should exit.
    fn handle_command(&mut self, cmd: LoopCommand) -> bool {
        match cmd {
            LoopCommand::Post {
                handle,
                deadline,
                job,
            } => {
                self.heap.push(Reverse((deadline, handle)));
                self.jobs.insert(handle, job);
                true
            }
            LoopCommand::Cancel(handle) => {
                self.jobs.remove(&handle);
                true
            }
            LoopCommand::Quit => false,
        }
    }

    /// Process every queued command without blocking.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.command_rx.try_recv() {
                Ok(cmd) => {
                    if !self.handle_command(cmd) {
                        return false;
                    }
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Run every unit whose deadline has passed, one at a time.
    fn run_due(&mut self) -> bool {
        loop {
            if !self.drain_commands() {
                return false;
            }
            match self.pop_due(Instant::now()) {
                Some(job) => job(),
                None => return true,
            }
        }
    }

    fn pop_due(&mut self, now: Instant) -> Option<Job> {
        while let Some(Reverse((deadline, handle))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            if let Some(job) = self.jobs.remove(&handle) {
                return Some(job);
            }
        }
        None
    }

    fn next_deadline(&mut self) -> Option<Instant> {
        // Discard cancelled entries so they don't cause spurious wakeups
        while let Some(Reverse((deadline, handle))) = self.heap.peek().copied() {
            if self.jobs.contains_key(&handle) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }
}

impl Drop for LoopWorker {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if std::thread::panicking() {
            tracing::error!("Run loop '{}' terminated by an unhandled fault", self.name);
        }
    }
}
