//! The promise resolution procedure: settles a promise from whatever a
//! handler returned, adopting the state of promises and foreign thenables.
use crate::promise::{Handler, Promise};
use crate::value::{Object, Settler, Then, Value};
use crate::Error;
use std::{cell::Cell, rc::Rc};
use tracing::debug;

/// Settles `promise` from `x`. Never fails: every error becomes a rejection.
pub(crate) fn resolve_promise(promise: &Promise, x: Value) {
    match x {
        Value::Promise(ref p) if p.ptr_eq(promise) => {
            debug!(promise = promise.id(), "chaining cycle detected");
            promise.reject(Value::Error(Error::ChainingCycle));
        }
        Value::Promise(p) => adopt_promise(promise, &p),
        Value::Object(object) => {
            let x = Value::Object(object.clone());
            adopt_thenable(promise, object, x)
        }
        plain => promise.fulfill(plain),
    }
}

fn adopt_promise(promise: &Promise, source: &Promise) {
    let on_fulfilled = promise.clone();
    let on_rejected = promise.clone();
    source.then_with(
        Handler::new(move |y| {
            resolve_promise(&on_fulfilled, y);
            Ok(Value::Undefined)
        }),
        Handler::new(move |r| {
            on_rejected.reject(r);
            Ok(Value::Undefined)
        }),
    );
}

fn adopt_thenable(promise: &Promise, object: Rc<dyn Object>, x: Value) {
    let then = match object.then() {
        Ok(Then::Callable(then)) => then,
        Ok(Then::NotCallable) => return promise.fulfill(x),
        Err(e) => {
            debug!(promise = promise.id(), reason = e.kind(), "reading then failed");
            return promise.reject(e);
        }
    };

    // Only the first call to either callback counts.
    let called = Rc::new(Cell::new(false));
    let on_fulfilled = {
        let called = called.clone();
        let promise = promise.clone();
        Settler::new(move |y| {
            if called.replace(true) {
                debug!(promise = promise.id(), "ignoring repeated thenable callback");
                return;
            }
            resolve_promise(&promise, y);
        })
    };
    let on_rejected = {
        let called = called.clone();
        let promise = promise.clone();
        Settler::new(move |r| {
            if called.replace(true) {
                debug!(promise = promise.id(), "ignoring repeated thenable callback");
                return;
            }
            promise.reject(r);
        })
    };

    if let Err(e) = then(&x, on_fulfilled, on_rejected) {
        if called.replace(true) {
            debug!(promise = promise.id(), reason = e.kind(), "ignoring late error from then");
        } else {
            promise.reject(e);
        }
    }
}
