//! A deferred value: a container for a value that is not known yet.
//!
//! A [`Deferred`] starts out [`Status::Pending`] and settles exactly once,
//! either fulfilled with a value or rejected with a reason. Consumers attach
//! continuations with [`Deferred::then`] and [`Deferred::catch`], each of which
//! returns a new deferred wired to the current one.
//!
//! Continuations run synchronously: on the thread that settles the deferred,
//! or immediately on registration if it is already settled. There is no
//! queue and no scheduler.
//!
//! # Examples
//!
//! ```
//! use deferred::{Deferred, Status};
//!
//! let squared = Deferred::<i32, String>::new(|resolver| resolver.resolve(5))
//!     .then(|a| Ok(a * a));
//! assert_eq!(squared.status(), Status::Fulfilled);
//! assert_eq!(squared.result(), Some(25));
//! ```
//!
//! A deferred settled from another thread can be awaited:
//!
//! ```
//! use deferred::Deferred;
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let (deferred, resolver) = Deferred::<String, String>::pending();
//! let task = thread::spawn(move || resolver.resolve("🍓".into()));
//! assert_eq!(block_on(deferred), Ok("🍓".to_string()));
//! task.join().expect("The task thread has panicked");
//! ```
use std::{any::Any, fmt};
use thiserror::Error;

mod chain;
mod deferred;
mod dispatch;
mod resolver;
mod thenable;

pub use deferred::Deferred;
pub use resolver::{IntoResolution, Resolution, Resolver};
pub use thenable::Thenable;

/// Settlement state of a deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Pending,
    Fulfilled,
    Rejected,
}

impl Status {
    pub fn is_settled(self) -> bool {
        !matches!(self, Status::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Fulfilled => "fulfilled",
            Status::Rejected => "rejected",
        })
    }
}

/// Failures produced by the deferred machinery itself.
///
/// The reason type of a deferred must be able to carry these, see
/// `E: From<Error>` on [`Deferred::new`] and the combinators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("executor panicked: {0}")]
    ExecutorPanicked(String),
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
    #[error("a deferred cannot adopt itself")]
    SelfResolution,
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
