//! The job queue promise reactions run on.
//!
//! Settling a promise or chaining onto a settled one never runs a handler on
//! the caller's stack. It appends a job to a thread-local FIFO queue, and jobs
//! only run when the thread drives the queue with [`run_once`],
//! [`run_until_idle`], [`block_on`] or an [`EventLoop`].
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{task, Promise, Value};
//!
//! let doubled = Promise::resolved(Value::from(21))
//!     .and_then(|v| Ok(Value::from(v.as_f64().unwrap_or_default() * 2.0)));
//! assert!(doubled.is_pending());
//! task::run_until_idle();
//! assert_eq!(doubled.value(), Some(Value::from(42)));
//! ```
use crate::Error;
use futures::task::{waker, ArcWake};
use std::{
    cell::RefCell,
    collections::VecDeque,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tracing::{debug, trace};

pub(crate) type Job = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
}

pub(crate) fn enqueue(job: Job) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(job));
}

fn next_job() -> Option<Job> {
    // The borrow must end before the job runs; jobs enqueue more jobs.
    QUEUE.with(|queue| queue.borrow_mut().pop_front())
}

/// Number of jobs waiting on this thread.
pub fn pending_jobs() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}

/// Runs the oldest queued job. Returns `false` if the queue was empty.
pub fn run_once() -> bool {
    match next_job() {
        Some(job) => {
            trace!(remaining = pending_jobs(), "running job");
            job();
            true
        }
        None => false,
    }
}

/// Runs jobs, including the ones they enqueue, until the queue is empty.
/// Returns how many ran.
pub fn run_until_idle() -> usize {
    let mut executed = 0;
    while run_once() {
        executed += 1;
    }
    executed
}

/// Drives `future` to completion on the default [`EventLoop`].
///
/// # Examples
///
/// ```
/// use promise_aplus::{task, Error, Promise, Value};
///
/// let promise = Promise::new(|resolve, _reject| {
///     resolve.call(Value::from("done"));
///     Ok(())
/// });
/// assert_eq!(task::block_on(promise.clone()), Ok(Ok(Value::from("done"))));
///
/// // Nothing can ever settle this one.
/// assert_eq!(task::block_on(Promise::pending()), Err(Error::Stalled));
/// ```
pub fn block_on<F: Future>(future: F) -> Result<F::Output, Error> {
    EventLoop::default().block_on(future)
}

/// Limits applied by an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopConfig {
    /// Maximum number of jobs a single `run_until_idle` or `block_on` call may
    /// execute. `None` means unbounded.
    pub job_budget: Option<usize>,
}

impl LoopConfig {
    pub fn with_job_budget(mut self, budget: usize) -> Self {
        self.job_budget = Some(budget);
        self
    }
}

/// A driver for this thread's job queue.
#[derive(Debug, Clone, Default)]
pub struct EventLoop {
    config: LoopConfig,
}

impl EventLoop {
    pub fn new(config: LoopConfig) -> Self {
        EventLoop { config }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Like [`run_until_idle`], but fails once the job budget is spent.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut executed = 0;
        loop {
            if pending_jobs() == 0 {
                return Ok(executed);
            }
            self.charge(executed)?;
            run_once();
            executed += 1;
        }
    }

    /// Polls `future`, running queued jobs between polls until its waker
    /// fires.
    ///
    /// Promises are not `Send`, so nothing outside this thread can settle
    /// them: if the queue drains while `future` is still pending this returns
    /// [`Error::Stalled`] rather than waiting forever.
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, Error> {
        let flag = Arc::new(WakeFlag::default());
        let waker = waker(flag.clone());
        let mut cx = Context::from_waker(&waker);
        futures::pin_mut!(future);

        let mut executed = 0;
        loop {
            flag.0.store(false, Ordering::SeqCst);
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            while !flag.0.load(Ordering::SeqCst) {
                self.charge(executed)?;
                if !run_once() {
                    debug!(executed, "job queue drained with the future still pending");
                    return Err(Error::Stalled);
                }
                executed += 1;
            }
        }
    }

    fn charge(&self, executed: usize) -> Result<(), Error> {
        match self.config.job_budget {
            Some(budget) if executed >= budget => {
                debug!(budget, "job budget exhausted");
                Err(Error::BudgetExhausted { budget })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::SeqCst);
    }
}
