use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

use crate::dispatch::{self, Job};
use crate::{panic_message, Error, Resolver, Status};

pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

/// A single-assignment cell for a value that may not be known yet.
///
/// Every clone of a `Deferred` is a handle to the same cell. It settles at
/// most once; all reactions registered with [`on_settled`](Self::on_settled)
/// (and through it `then`/`catch`) run exactly once, in registration order,
/// on whichever thread settles it, before the outermost settling call
/// returns. Reactions registered after settlement run immediately on the
/// registering thread.
///
/// Settlement does not recurse down a chain. When a reaction settles
/// another deferred, that deferred's status changes at once but its own
/// reactions are queued behind those already waiting on the same thread,
/// so chained links run breadth-first and chains of any length use constant
/// stack. A reaction that panics does not stop the others; the first panic
/// is resumed once every queued reaction has run.
///
/// Ordering is per settling thread: a reaction registered from another
/// thread after the status has changed runs on that thread right away, and
/// may finish before reactions still being dispatched by the settling
/// thread.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Status};
/// use std::thread;
/// use std::time::Duration;
///
/// let deferred = Deferred::<i32, String>::new(|resolver| {
///     thread::spawn(move || {
///         thread::sleep(Duration::from_millis(10));
///         resolver.resolve(5);
///     });
/// });
/// assert_eq!(deferred.status(), Status::Pending);
/// assert_eq!(futures::executor::block_on(deferred.clone()), Ok(5));
/// assert_eq!(deferred.result(), Some(5));
/// ```
pub struct Deferred<T, E> {
    inner: Arc<Mutex<State<T, E>>>,
}

enum State<T, E> {
    Pending {
        reactions: Vec<Reaction<T, E>>,
        wakers: Vec<Waker>,
        /// Set once this cell follows another deferred; only that one may
        /// settle it from then on.
        locked: bool,
        /// The deferred being followed, when it is one of ours.
        following: Option<Weak<Mutex<State<T, E>>>>,
    },
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    fn state(&self) -> MutexGuard<'_, State<T, E>> {
        // The cell is only ever replaced wholesale, so a poisoned lock still
        // guards a consistent value.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> Status {
        match &*self.state() {
            State::Pending { .. } => Status::Pending,
            State::Fulfilled(_) => Status::Fulfilled,
            State::Rejected(_) => Status::Rejected,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Marks a pending cell as following another deferred. Returns `false`
    /// if it is already settled or already following one.
    pub(crate) fn lock_in(&self, target: Option<&Self>) -> bool {
        match &mut *self.state() {
            State::Pending {
                locked, following, ..
            } if !*locked => {
                *locked = true;
                *following = target.map(|target| Arc::downgrade(&target.inner));
                true
            }
            _ => false,
        }
    }

    /// Whether this pending cell is following `other`.
    pub(crate) fn follows(&self, other: &Self) -> bool {
        match &*self.state() {
            State::Pending {
                following: Some(target),
                ..
            } => std::ptr::eq(target.as_ptr(), Arc::as_ptr(&other.inner)),
            _ => false,
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates an unsettled deferred together with the resolver that settles
    /// it.
    pub fn pending() -> (Self, Resolver<T, E>) {
        let deferred = Self {
            inner: Arc::new(Mutex::new(State::Pending {
                reactions: vec![],
                wakers: vec![],
                locked: false,
                following: None,
            })),
        };
        let resolver = Resolver::new(deferred.clone());
        (deferred, resolver)
    }

    /// Runs `executor` synchronously with the resolver of a new deferred.
    ///
    /// The executor may settle the deferred before returning, or move the
    /// resolver elsewhere (another thread, a callback) and settle it later.
    /// A panic inside the executor rejects the deferred with
    /// [`Error::ExecutorPanicked`] unless it has already settled.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
        E: From<Error>,
    {
        let (deferred, resolver) = Self::pending();
        let fallback = resolver.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || executor(resolver))) {
            let message = panic_message(payload.as_ref());
            tracing::debug!(%message, "executor panicked, rejecting deferred");
            fallback.reject(E::from(Error::ExecutorPanicked(message)));
        }
        deferred
    }

    pub fn resolved(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Fulfilled(value))),
        }
    }

    pub fn rejected(reason: E) -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Rejected(reason))),
        }
    }

    /// The fulfillment value, if fulfilled.
    pub fn result(&self) -> Option<T> {
        match &*self.state() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if rejected.
    pub fn reason(&self) -> Option<E> {
        match &*self.state() {
            State::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &*self.state() {
            State::Pending { .. } => None,
            State::Fulfilled(value) => Some(Ok(value.clone())),
            State::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Registers `reaction` to receive the outcome.
    ///
    /// If the deferred is already settled the reaction runs before this
    /// returns.
    pub fn on_settled<F>(&self, reaction: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.state();
            match &mut *state {
                State::Pending { reactions, .. } => {
                    reactions.push(Box::new(reaction));
                    return;
                }
                State::Fulfilled(value) => Ok(value.clone()),
                State::Rejected(reason) => Err(reason.clone()),
            }
        };
        reaction(outcome);
    }

    /// Moves the cell out of pending and dispatches to every reaction.
    ///
    /// Ignored when already settled, or when the cell is locked to another
    /// deferred and this call does not come from it.
    pub(crate) fn settle(&self, outcome: Result<T, E>, adopted: bool) -> bool {
        let (reactions, wakers) = {
            let mut state = self.state();
            let State::Pending { locked, .. } = &*state else {
                tracing::trace!("ignoring settlement of an already settled deferred");
                return false;
            };
            if *locked && !adopted {
                tracing::trace!("ignoring settlement of a deferred that follows another");
                return false;
            }
            let next = match &outcome {
                Ok(value) => State::Fulfilled(value.clone()),
                Err(reason) => State::Rejected(reason.clone()),
            };
            let State::Pending { reactions, wakers, .. } = std::mem::replace(&mut *state, next)
            else {
                return false;
            };
            (reactions, wakers)
        };

        let status = if outcome.is_ok() {
            Status::Fulfilled
        } else {
            Status::Rejected
        };
        if reactions.is_empty() && wakers.is_empty() {
            tracing::trace!(%status, "deferred settled with no consumers");
        } else {
            tracing::debug!(
                %status,
                reactions = reactions.len(),
                wakers = wakers.len(),
                "deferred settled"
            );
        }

        for waker in wakers {
            waker.wake();
        }
        let jobs = reactions
            .into_iter()
            .map(|reaction| {
                let outcome = outcome.clone();
                Box::new(move || reaction(outcome)) as Job
            })
            .collect();
        dispatch::run(jobs);
        true
    }
}

impl<T, E> Future for Deferred<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state();
        match &mut *state {
            State::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            State::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
