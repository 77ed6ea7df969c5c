//! Values carried by promises.
//!
//! A promise settles with a dynamically typed [`Value`]. Anything that is an
//! "object or function" is a [`Value::Object`], and the only thing the
//! resolution procedure ever asks of it is its `then` member, through the
//! [`Object`] capability trait.
use crate::{Error, Promise};
use std::{fmt, rc::Rc};

/// An invocable `then` member. Called with the object itself as receiver and
/// the two resolving callbacks. Returning `Err` means `then` raised.
pub type ThenFn = Rc<dyn Fn(&Value, Settler, Settler) -> Result<(), Value>>;

/// Result of reading an object's `then` member.
#[derive(Clone)]
pub enum Then {
    Callable(ThenFn),
    /// The member is absent or holds something that cannot be invoked.
    NotCallable,
}

/// Any object or function value.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Object, Then, Value};
///
/// #[derive(Debug)]
/// struct Poisoned;
///
/// impl Object for Poisoned {
///     fn then(&self) -> Result<Then, Value> {
///         Err("getter raised".into())
///     }
/// }
///
/// let value = Value::object(Poisoned);
/// assert!(value.is_object());
/// ```
pub trait Object: fmt::Debug {
    /// Reads the `then` member. `Err` means the read itself raised.
    fn then(&self) -> Result<Then, Value>;
}

/// A one-argument callback that settles, or tries to settle, a promise.
///
/// Settlers are cheap to clone and may be called any number of times; only the
/// first call that reaches a pending promise has an effect.
#[derive(Clone)]
pub struct Settler {
    f: Rc<dyn Fn(Value)>,
}

impl Settler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value) + 'static,
    {
        Settler { f: Rc::new(f) }
    }

    pub fn call(&self, value: Value) {
        (self.f)(value)
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Settler")
    }
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Error(Error),
    Promise(Promise),
    Object(Rc<dyn Object>),
}

impl Value {
    /// Wraps a user object so it can flow through promises.
    pub fn object<O>(object: O) -> Self
    where
        O: Object + 'static,
    {
        Value::Object(Rc::new(object))
    }

    /// Builds a foreign thenable whose `then` runs `f`.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_aplus::{task, Promise, Value};
    ///
    /// let thenable = Value::thenable(|on_fulfilled, _on_rejected| {
    ///     on_fulfilled.call(Value::from(7));
    ///     Ok(())
    /// });
    /// let promise = Promise::resolved(Value::Null).and_then(move |_| Ok(thenable));
    /// assert_eq!(task::block_on(promise).unwrap(), Ok(Value::from(7)));
    /// ```
    pub fn thenable<F>(f: F) -> Self
    where
        F: Fn(Settler, Settler) -> Result<(), Value> + 'static,
    {
        let then: ThenFn = Rc::new(move |_receiver: &Value, on_fulfilled: Settler, on_rejected: Settler| {
            f(on_fulfilled, on_rejected)
        });
        Value::object(FnThenable { then })
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(&**s),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Short name of the variant, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Error(e) => write!(f, "Error({e})"),
            Value::Promise(p) => fmt::Debug::fmt(p, f),
            Value::Object(o) => fmt::Debug::fmt(o, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Value::Error(e)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

struct FnThenable {
    then: ThenFn,
}

impl Object for FnThenable {
    fn then(&self) -> Result<Then, Value> {
        Ok(Then::Callable(self.then.clone()))
    }
}

impl fmt::Debug for FnThenable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[object Thenable]")
    }
}

#[cfg(test)]
mod tests {
use super::*;

#[test]
fn test_scalar_equality() {
    assert_eq!(Value::from(1), Value::from(1.0));
    assert_eq!(Value::from("a"), Value::from(String::from("a")));
    assert_ne!(Value::Null, Value::Undefined);
    assert_ne!(Value::from(0), Value::from(false));
}

#[test]
fn test_objects_compare_by_identity() {
    let a = Value::thenable(|_, _| Ok(()));
    let b = Value::thenable(|_, _| Ok(()));
    assert_eq!(a, a.clone());
    assert_ne!(a, b);
}

#[test]
fn test_default_is_undefined() {
    assert_eq!(Value::default(), Value::Undefined);
}

#[test]
fn test_settler_can_be_called_twice() {
    let seen = Rc::new(std::cell::RefCell::new(vec![]));
    let sink = seen.clone();
    let settler = Settler::new(move |v| sink.borrow_mut().push(v));
    settler.call(1.into());
    settler.clone().call(2.into());
    assert_eq!(*seen.borrow(), vec![Value::from(1), Value::from(2)]);
}
}
