use crate::{Promise, Settler, Value};

/// A promise together with the settlers that drive it, the shape conformance
/// suites ask an adapter for.
///
/// # Examples
///
/// ```
/// use promise_aplus::{deferred, task, Value};
///
/// let d = deferred();
/// let promise = d.promise.clone();
/// d.resolve.call(Value::from("🍓"));
/// d.reject.call(Value::from("💥"));
/// assert_eq!(task::block_on(promise), Ok(Ok(Value::from("🍓"))));
/// ```
#[derive(Debug, Clone)]
pub struct Deferred {
    pub promise: Promise,
    pub resolve: Settler,
    pub reject: Settler,
}

impl Deferred {
    pub fn new() -> Self {
        let promise = Promise::pending();
        let (resolve, reject) = promise.settlers();
        Deferred { promise, resolve, reject }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorthand for [`Deferred::new`].
pub fn deferred() -> Deferred {
    Deferred::new()
}

impl Promise {
    /// A promise already fulfilled with `value`.
    ///
    /// `value` is stored as is, even if it is a promise or a thenable.
    pub fn resolved(value: Value) -> Self {
        let promise = Promise::pending();
        promise.fulfill(value);
        promise
    }

    /// A promise already rejected with `reason`.
    pub fn rejected(reason: Value) -> Self {
        let promise = Promise::pending();
        promise.reject(reason);
        promise
    }
}

#[cfg(test)]
mod tests {
use super::deferred;
use crate::{task, Promise, State, Value};

#[test]
fn test_deferred_resolve() {
    let d = deferred();
    assert!(d.promise.is_pending());
    d.resolve.call("hi".into());
    assert_eq!(d.promise.state(), State::Fulfilled);
}

#[test]
fn test_deferred_reject_then_resolve() {
    let d = deferred();
    d.reject.call("reject!!".into());
    d.resolve.call("hi".into());
    assert_eq!(d.promise.state(), State::Rejected);
    assert_eq!(d.promise.value(), Some(Value::from("reject!!")));
}

#[test]
fn test_deferred_unresolved_stalls() {
    let d = deferred();
    drop(d.resolve);
    drop(d.reject);
    assert_eq!(task::block_on(d.promise), Err(crate::Error::Stalled));
}

#[test]
fn test_resolved_keeps_promise_value() {
    let inner = Promise::pending();
    let outer = Promise::resolved(inner.clone().into());
    assert_eq!(outer.value(), Some(Value::Promise(inner)));
}
}
