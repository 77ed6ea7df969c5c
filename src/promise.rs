use crate::resolve::resolve_promise;
use crate::task;
use crate::value::{Settler, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{future::Future, task::{Poll, Waker}};
use tracing::trace;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

/// A deferred value that settles at most once, either fulfilled with a value
/// or rejected with a reason.
///
/// `Promise` is a handle: clones share the same state. Handlers attached with
/// [`then_with`](Self::then_with) and friends run on the [`task`] queue, never
/// on the stack that attached them or settled the promise, and they run in the
/// order they were attached.
///
/// # Examples
///
/// ```
/// use promise_aplus::{task, Promise, Value};
///
/// let promise = Promise::new(|resolve, _reject| {
///     resolve.call(Value::from(42));
///     Ok(())
/// })
/// .and_then(|v| Ok(Value::from(v.as_f64().unwrap_or_default() + 1.0)))
/// .and_then(|_| Err(Value::from("boom")))
/// .or_else(|e| Ok(e));
///
/// assert_eq!(task::block_on(promise), Ok(Ok(Value::from("boom"))));
/// ```
#[derive(Clone)]
pub struct Promise {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    id: u64,
    state: State,
    value: Value,
    reactions: Vec<Reaction>,
    wakers: Vec<Waker>,
}

impl Inner {
    fn outcome(&self) -> Option<Result<Value, Value>> {
        match self.state {
            State::Pending => None,
            State::Fulfilled => Some(Ok(self.value.clone())),
            State::Rejected => Some(Err(self.value.clone())),
        }
    }
}

impl Drop for Inner {
    /// Unlinks pending chains iteratively; dropping them link by link would
    /// recurse once per chained promise.
    fn drop(&mut self) {
        let mut unlinked = std::mem::take(&mut self.reactions);
        while let Some(reaction) = unlinked.pop() {
            if Rc::strong_count(&reaction.target.inner) == 1 {
                if let Ok(mut target) = reaction.target.inner.try_borrow_mut() {
                    unlinked.append(&mut target.reactions);
                }
            }
        }
    }
}

/// A success or failure callback given to [`Promise::then_with`].
///
/// `Ok(x)` means the handler returned `x`, `Err(e)` means it raised `e`. An
/// absent handler passes the value or reason through unchanged.
#[derive(Default)]
pub struct Handler(Option<Box<dyn FnOnce(Value) -> Result<Value, Value>>>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        Handler(Some(Box::new(f)))
    }

    pub fn none() -> Self {
        Handler(None)
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    fn call_or(self, arg: Value, passthrough: fn(Value) -> Result<Value, Value>) -> Result<Value, Value> {
        match self.0 {
            Some(f) => f(arg),
            None => passthrough(arg),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_none() { "Handler(none)" } else { "Handler(fn)" })
    }
}

/// Handlers waiting on a source promise, bound to the promise their outcome
/// settles.
struct Reaction {
    on_fulfilled: Handler,
    on_rejected: Handler,
    target: Promise,
}

impl Reaction {
    fn schedule(self, outcome: Result<Value, Value>) {
        task::enqueue(Box::new(move || self.run(outcome)));
    }

    fn run(self, outcome: Result<Value, Value>) {
        let result = match outcome {
            Ok(value) => self.on_fulfilled.call_or(value, Ok),
            Err(reason) => self.on_rejected.call_or(reason, Err),
        };
        match result {
            Ok(x) => resolve_promise(&self.target, x),
            Err(reason) => self.target.reject(reason),
        }
    }
}

impl Promise {
    /// Creates a promise and runs `executor` synchronously with its resolve
    /// and reject settlers.
    ///
    /// An executor that returns `Err(e)` rejects the promise with `e`, unless
    /// it already settled it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{task, Promise, Value};
    ///
    /// let failed = Promise::new(|_resolve, _reject| Err(Value::from("no disk")));
    /// assert_eq!(task::block_on(failed), Ok(Err(Value::from("no disk"))));
    /// ```
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Settler, Settler) -> Result<(), Value>,
    {
        let promise = Promise::pending();
        let (resolve, reject) = promise.settlers();
        if let Err(reason) = executor(resolve, reject) {
            promise.reject(reason);
        }
        promise
    }

    /// A promise with no producer. It stays pending until something settles
    /// it, e.g. the resolution procedure of a chained promise.
    pub fn pending() -> Self {
        Promise {
            inner: Rc::new(RefCell::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: State::Pending,
                value: Value::Undefined,
                reactions: vec![],
                wakers: vec![],
            })),
        }
    }

    /// The settlement entry points of this promise.
    pub(crate) fn settlers(&self) -> (Settler, Settler) {
        let fulfilled = self.clone();
        let rejected = self.clone();
        (
            Settler::new(move |value| fulfilled.fulfill(value)),
            Settler::new(move |reason| rejected.reject(reason)),
        )
    }

    pub(crate) fn fulfill(&self, value: Value) {
        self.transition(State::Fulfilled, value);
    }

    pub(crate) fn reject(&self, reason: Value) {
        self.transition(State::Rejected, reason);
    }

    fn transition(&self, state: State, value: Value) {
        let (outcome, reactions, wakers) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state != State::Pending {
                return;
            }
            trace!(promise = inner.id, ?state, value = value.kind(), "settled");
            inner.state = state;
            inner.value = value;
            (
                inner.outcome(),
                std::mem::take(&mut inner.reactions),
                std::mem::take(&mut inner.wakers),
            )
        };
        if let Some(outcome) = outcome {
            for reaction in reactions {
                reaction.schedule(outcome.clone());
            }
        }
        for waker in wakers {
            waker.wake()
        }
    }

    /// Chains `on_fulfilled` / `on_rejected` onto this promise and returns
    /// the promise their outcome settles.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{task, Handler, Promise, Value};
    ///
    /// let source = Promise::rejected(Value::from("gone"));
    /// let passed = source.then_with(Handler::none(), Handler::none());
    /// task::run_until_idle();
    /// assert_eq!(passed.value(), Some(Value::from("gone")));
    /// ```
    pub fn then_with(&self, on_fulfilled: Handler, on_rejected: Handler) -> Promise {
        let target = Promise::pending();
        let reaction = Reaction {
            on_fulfilled,
            on_rejected,
            target: target.clone(),
        };
        let outcome = {
            let mut inner = self.inner.borrow_mut();
            match inner.outcome() {
                Some(outcome) => outcome,
                None => {
                    inner.reactions.push(reaction);
                    return target;
                }
            }
        };
        reaction.schedule(outcome);
        target
    }

    pub fn then<F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(Handler::new(on_fulfilled), Handler::new(on_rejected))
    }

    /// Chains a success handler only; rejections pass through.
    pub fn and_then<F>(&self, on_fulfilled: F) -> Promise
    where
        F: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(Handler::new(on_fulfilled), Handler::none())
    }

    /// Chains a failure handler only; fulfillment values pass through.
    #[doc(alias = "catch")]
    pub fn or_else<R>(&self, on_rejected: R) -> Promise
    where
        R: FnOnce(Value) -> Result<Value, Value> + 'static,
    {
        self.then_with(Handler::none(), Handler::new(on_rejected))
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// The fulfillment value or rejection reason, `None` while pending.
    pub fn value(&self) -> Option<Value> {
        let inner = self.inner.borrow();
        match inner.state {
            State::Pending => None,
            _ => Some(inner.value.clone()),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => write!(f, "Promise#{}<{:?}>", inner.id, inner.state),
            Err(_) => f.write_str("Promise<borrowed>"),
        }
    }
}

/// Resolves to `Ok(value)` once fulfilled or `Err(reason)` once rejected.
impl Future for Promise {
    type Output = Result<Value, Value>;

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        match inner.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
use super::{Handler, Promise, State};
use crate::{task, Value};
use std::{cell::RefCell, rc::Rc};

fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn FnOnce(Value) -> Result<Value, Value>>) {
    let log = Rc::new(RefCell::new(vec![]));
    let sink = log.clone();
    let make = move |tag: &str| {
        let sink = sink.clone();
        let tag = tag.to_owned();
        Box::new(move |v: Value| {
            sink.borrow_mut().push(tag);
            Ok(v)
        }) as Box<dyn FnOnce(Value) -> Result<Value, Value>>
    };
    (log, make)
}

#[test]
fn test_executor_runs_synchronously() {
    let ran = Rc::new(RefCell::new(false));
    let flag = ran.clone();
    let promise = Promise::new(move |_, _| {
        *flag.borrow_mut() = true;
        Ok(())
    });
    assert!(*ran.borrow());
    assert!(promise.is_pending());
}

#[test]
fn test_first_settlement_wins() {
    let promise = Promise::new(|resolve, reject| {
        resolve.call(1.into());
        reject.call(2.into());
        resolve.call(3.into());
        Ok(())
    });
    assert_eq!(promise.state(), State::Fulfilled);
    assert_eq!(promise.value(), Some(Value::from(1)));
}

#[test]
fn test_executor_error_after_settling_is_ignored() {
    let promise = Promise::new(|resolve, _| {
        resolve.call("ok".into());
        Err("late".into())
    });
    assert_eq!(promise.state(), State::Fulfilled);
    assert_eq!(promise.value(), Some(Value::from("ok")));
}

#[test]
fn test_executor_error_rejects() {
    let promise = Promise::new(|_, _| Err("bad".into()));
    assert_eq!(promise.state(), State::Rejected);
    assert_eq!(promise.value(), Some(Value::from("bad")));
}

#[test]
fn test_handlers_are_deferred() {
    let (log, make) = recorder();
    let promise = Promise::resolved(1.into());
    promise.then_with(Handler::new(make("handler")), Handler::none());
    log.borrow_mut().push("after".into());
    assert_eq!(*log.borrow(), vec!["after"]);
    task::run_until_idle();
    assert_eq!(*log.borrow(), vec!["after", "handler"]);
}

#[test]
fn test_settling_does_not_run_handlers() {
    let (log, make) = recorder();
    let d = crate::deferred();
    d.promise.then_with(Handler::new(make("handler")), Handler::none());
    d.resolve.call(1.into());
    assert!(log.borrow().is_empty());
    assert_eq!(task::pending_jobs(), 1);
    task::run_until_idle();
    assert_eq!(*log.borrow(), vec!["handler"]);
}

#[test]
fn test_reactions_fire_in_registration_order() {
    let (log, make) = recorder();
    let d = crate::deferred();
    for tag in ["a", "b", "c"] {
        d.promise.then_with(Handler::new(make(tag)), Handler::none());
    }
    d.resolve.call(Value::Null);
    task::run_until_idle();
    assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
}

#[test]
fn test_rejection_picks_failure_handler() {
    let (log, make) = recorder();
    let promise = Promise::rejected("why".into());
    let next = promise.then_with(Handler::new(make("ok")), Handler::new(make("err")));
    task::run_until_idle();
    assert_eq!(*log.borrow(), vec!["err"]);
    // The failure handler returned normally, so `next` is fulfilled.
    assert_eq!(next.state(), State::Fulfilled);
    assert_eq!(next.value(), Some(Value::from("why")));
}

#[test]
fn test_missing_handlers_pass_through() {
    let fulfilled = Promise::resolved(5.into()).then_with(Handler::none(), Handler::none());
    let rejected = Promise::rejected(6.into()).then_with(Handler::none(), Handler::none());
    task::run_until_idle();
    assert_eq!(fulfilled.state(), State::Fulfilled);
    assert_eq!(fulfilled.value(), Some(Value::from(5)));
    assert_eq!(rejected.state(), State::Rejected);
    assert_eq!(rejected.value(), Some(Value::from(6)));
}

#[test]
fn test_then_returns_new_promise() {
    let promise = Promise::resolved(Value::Null);
    let next = promise.and_then(|v| Ok(v));
    assert!(!next.ptr_eq(&promise));
    assert_ne!(next.id(), promise.id());
}

#[test]
fn test_handler_error_rejects_target() {
    let next = Promise::resolved(1.into()).and_then(|_| Err("thrown".into()));
    task::run_until_idle();
    assert_eq!(next.state(), State::Rejected);
    assert_eq!(next.value(), Some(Value::from("thrown")));
}

#[test]
fn test_await_pending_promise() {
    let d = crate::deferred();
    let resolve = d.resolve.clone();
    Promise::resolved(Value::Null).and_then(move |_| {
        resolve.call("later".into());
        Ok(Value::Undefined)
    });
    assert_eq!(task::block_on(d.promise), Ok(Ok(Value::from("later"))));
}
}
