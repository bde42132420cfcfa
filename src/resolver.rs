use std::fmt;

use crate::{Deferred, Error, Thenable};

/// What a deferred is settled with.
///
/// `Value` and `Failure` settle directly. `Deferred` and `Thenable` make the
/// target follow another deferred and take on whatever state it reaches.
pub enum Resolution<T, E> {
    Value(T),
    Failure(E),
    Deferred(Deferred<T, E>),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Resolution::Value(..)"),
            Resolution::Failure(_) => f.write_str("Resolution::Failure(..)"),
            Resolution::Deferred(deferred) => write!(f, "Resolution::Deferred({deferred:?})"),
            Resolution::Thenable(thenable) => {
                write!(f, "Resolution::Thenable({})", thenable.status())
            }
        }
    }
}

/// Conversion of a handler's return value into a [`Resolution`].
///
/// Handlers passed to `then`, `then_else` and `catch` may return a
/// `Result` (settle directly), a [`Deferred`] (follow it) or a
/// [`Resolution`].
pub trait IntoResolution<E> {
    type Value;

    fn into_resolution(self) -> Resolution<Self::Value, E>;
}

impl<T, E> IntoResolution<E> for Result<T, E> {
    type Value = T;

    fn into_resolution(self) -> Resolution<T, E> {
        match self {
            Ok(value) => Resolution::Value(value),
            Err(reason) => Resolution::Failure(reason),
        }
    }
}

impl<T, E> IntoResolution<E> for Deferred<T, E> {
    type Value = T;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Deferred(self)
    }
}

impl<T, E> IntoResolution<E> for Resolution<T, E> {
    type Value = T;

    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

/// The capability to settle one [`Deferred`].
///
/// Resolvers are cheap to clone and may be sent to other threads. Only the
/// first effective call across all clones has any effect; the rest are
/// silently ignored.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Status};
///
/// let (inner, inner_resolver) = Deferred::<i32, String>::pending();
/// let outer = Deferred::new(|resolver| resolver.resolve_with(inner));
/// assert_eq!(outer.status(), Status::Pending);
///
/// inner_resolver.resolve(5);
/// assert_eq!(outer.result(), Some(5));
/// ```
pub struct Resolver<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("deferred", &self.deferred)
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn new(deferred: Deferred<T, E>) -> Self {
        Self { deferred }
    }

    /// Fulfills the deferred with `value`.
    pub fn resolve(&self, value: T) {
        self.deferred.settle(Ok(value), false);
    }

    /// Rejects the deferred with `reason`.
    ///
    /// Rejection is a plain state transition; it never panics, whichever
    /// thread or callback it is called from.
    pub fn reject(&self, reason: E) {
        self.deferred.settle(Err(reason), false);
    }

    /// Makes the deferred follow `thenable` and take on its eventual state.
    ///
    /// Following itself rejects with [`Error::SelfResolution`]. Longer
    /// cycles (`a` follows `b` while `b` follows `a`) are not broken: every
    /// deferred in the cycle stays pending for good.
    pub fn resolve_with<R>(&self, thenable: R)
    where
        R: Thenable<T, E> + 'static,
        E: From<Error>,
    {
        self.follow(Box::new(thenable));
    }

    /// Same as [`resolve_with`](Self::resolve_with): a deferred rejected with
    /// another deferred still settles with whatever that one reaches.
    pub fn reject_with<R>(&self, thenable: R)
    where
        R: Thenable<T, E> + 'static,
        E: From<Error>,
    {
        self.follow(Box::new(thenable));
    }

    /// Settles the deferred according to `resolution`.
    pub fn settle(&self, resolution: Resolution<T, E>)
    where
        E: From<Error>,
    {
        match resolution {
            Resolution::Value(value) => self.resolve(value),
            Resolution::Failure(reason) => self.reject(reason),
            Resolution::Deferred(inner) => self.follow(Box::new(inner)),
            Resolution::Thenable(thenable) => self.follow(thenable),
        }
    }

    fn follow(&self, thenable: Box<dyn Thenable<T, E>>)
    where
        E: From<Error>,
    {
        if thenable
            .as_deferred()
            .is_some_and(|inner| inner.ptr_eq(&self.deferred))
        {
            self.reject(E::from(Error::SelfResolution));
            return;
        }
        if !self.deferred.lock_in(thenable.as_deferred()) {
            tracing::trace!("ignoring adoption by a settled or already following deferred");
            return;
        }
        if thenable
            .as_deferred()
            .is_some_and(|inner| inner.follows(&self.deferred))
        {
            tracing::debug!("adoption cycle: the adopted deferred already follows this one");
        }
        tracing::debug!(inner = %thenable.status(), "deferred adopting the state of another");

        let on_fulfilled = self.deferred.clone();
        let on_rejected = self.deferred.clone();
        thenable.subscribe(
            Box::new(move |value| {
                on_fulfilled.settle(Ok(value), true);
            }),
            Box::new(move |reason| {
                on_rejected.settle(Err(reason), true);
            }),
        );
    }
}
