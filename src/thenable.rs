use crate::{Deferred, Status};

/// Anything that eventually settles and lets callers attach continuations.
///
/// [`Resolver::resolve_with`](crate::Resolver::resolve_with) accepts any
/// `Thenable`, so deferred-like types from other libraries can be adopted
/// the same way a [`Deferred`] is.
pub trait Thenable<T, E>: Send {
    fn status(&self) -> Status;

    /// Attaches continuations. Exactly one of them must be called, once,
    /// when the thenable settles (or right away if it already has).
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T) + Send>,
        on_rejected: Box<dyn FnOnce(E) + Send>,
    );

    /// Identity hook used to refuse self-adoption.
    fn as_deferred(&self) -> Option<&Deferred<T, E>> {
        None
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn status(&self) -> Status {
        Deferred::status(self)
    }

    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(T) + Send>,
        on_rejected: Box<dyn FnOnce(E) + Send>,
    ) {
        self.on_settled(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        });
    }

    fn as_deferred(&self) -> Option<&Deferred<T, E>> {
        Some(self)
    }
}
