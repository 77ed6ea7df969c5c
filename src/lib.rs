//! Promise/A+ deferred values.
//!
//! A [`Promise`] settles once, fulfilled with a [`Value`] or rejected with a
//! reason. [`Promise::then_with`] derives a new promise from a handler's
//! return value, adopting the state of other promises and of any foreign
//! object exposing a callable `then` (see [`Object`]). Handlers run on the
//! thread-local [`task`] queue.
//!
//! # Examples
//!
//! ```
//! use promise_aplus::{deferred, task, Value};
//!
//! let d = deferred();
//! let chained = d
//!     .promise
//!     .and_then(|v| Ok(Value::from(format!("got {:?}", v))));
//! d.resolve.call(Value::from(1));
//! assert_eq!(task::block_on(chained), Ok(Ok(Value::from("got 1"))));
//! ```
mod deferred;
mod promise;
mod resolve;
pub mod task;
mod value;

pub use deferred::{deferred, Deferred};
pub use promise::{Handler, Promise, State};
pub use value::{Object, Settler, Then, ThenFn, Value};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("chaining cycle detected for promise")]
    ChainingCycle,
    #[error("job queue drained while the future was still pending")]
    Stalled,
    #[error("job budget of {budget} exhausted")]
    BudgetExhausted { budget: usize },
}
