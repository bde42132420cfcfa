use std::panic::{self, AssertUnwindSafe};

use crate::{panic_message, Deferred, Error, IntoResolution, Resolution};

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<Error> + 'static,
{
    /// Chains `on_fulfilled` onto this deferred.
    ///
    /// The returned deferred settles with whatever `on_fulfilled` returns: an
    /// `Ok` value, an `Err` reason, or another deferred to follow. A
    /// rejection of `self` is passed through unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let doubled = Deferred::<i32, String>::resolved(5)
    ///     .then(|a| Ok(a * a))
    ///     .then(|a| Deferred::resolved(a + 1));
    /// assert_eq!(doubled.result(), Some(26));
    /// ```
    pub fn then<F, R>(&self, on_fulfilled: F) -> Deferred<R::Value, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution<E>,
        R::Value: Clone + Send + 'static,
    {
        self.chain(
            move |value| on_fulfilled(value).into_resolution(),
            Resolution::Failure,
        )
    }

    /// Like [`then`](Self::then), with a handler for rejection as well.
    ///
    /// Returning `Ok` from `on_rejected` turns the rejection into a
    /// fulfillment of the returned deferred.
    pub fn then_else<F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Deferred<R::Value, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(E) -> S + Send + 'static,
        R: IntoResolution<E>,
        S: IntoResolution<E, Value = R::Value>,
        R::Value: Clone + Send + 'static,
    {
        self.chain(
            move |value| on_fulfilled(value).into_resolution(),
            move |reason| on_rejected(reason).into_resolution(),
        )
    }

    /// Recovers from a rejection.
    ///
    /// A fulfillment passes through untouched and `on_rejected` is never
    /// called.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred::Deferred;
    ///
    /// let recovered = Deferred::<i32, String>::rejected("💥".into())
    ///     .catch(|_reason| Ok(42));
    /// assert_eq!(recovered.result(), Some(42));
    /// ```
    pub fn catch<G, S>(&self, on_rejected: G) -> Deferred<T, E>
    where
        G: FnOnce(E) -> S + Send + 'static,
        S: IntoResolution<E, Value = T>,
    {
        self.chain(Resolution::Value, move |reason| {
            on_rejected(reason).into_resolution()
        })
    }

    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: Clone + Send + 'static,
    {
        self.chain(move |value| Resolution::Value(f(value)), Resolution::Failure)
    }

    pub fn map_err<E2, G>(&self, g: G) -> Deferred<T, E2>
    where
        G: FnOnce(E) -> E2 + Send + 'static,
        E2: Clone + Send + From<Error> + 'static,
    {
        let (downstream, resolver) = Deferred::pending();
        self.on_settled(move |outcome| {
            let resolution = match outcome {
                Ok(value) => Resolution::Value(value),
                Err(reason) => guarded(move || Resolution::Failure(g(reason))),
            };
            resolver.settle(resolution);
        });
        downstream
    }

    fn chain<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Deferred<U, E>
    where
        F: FnOnce(T) -> Resolution<U, E> + Send + 'static,
        G: FnOnce(E) -> Resolution<U, E> + Send + 'static,
        U: Clone + Send + 'static,
    {
        let (downstream, resolver) = Deferred::pending();
        self.on_settled(move |outcome| {
            let resolution = match outcome {
                Ok(value) => guarded(move || on_fulfilled(value)),
                Err(reason) => guarded(move || on_rejected(reason)),
            };
            resolver.settle(resolution);
        });
        downstream
    }
}

/// Runs a handler, turning a panic into a rejection.
fn guarded<U, E, F>(handler: F) -> Resolution<U, E>
where
    F: FnOnce() -> Resolution<U, E>,
    E: From<Error>,
{
    panic::catch_unwind(AssertUnwindSafe(handler)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::debug!(%message, "handler panicked, rejecting downstream deferred");
        Resolution::Failure(E::from(Error::HandlerPanicked(message)))
    })
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, Error, Status};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_then_identity() {
        let deferred = Deferred::<i32, String>::new(|resolver| resolver.resolve(5)).then(Ok);
        assert_eq!(deferred.status(), Status::Fulfilled);
        assert_eq!(deferred.result(), Some(5));
    }

    #[test]
    fn test_then_transform() {
        let deferred = Deferred::<i32, String>::new(|resolver| resolver.resolve(5));
        let squared = deferred.then(|a| Ok(a * a));
        assert_eq!(squared.result(), Some(25));
        assert_eq!(deferred.result(), Some(5));
    }

    #[test]
    fn test_then_on_pending_runs_once_settled() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let chained = deferred.then(move |value| {
            *counter.lock().unwrap() += 1;
            Ok(value.to_string())
        });
        assert_eq!(chained.status(), Status::Pending);
        resolver.resolve(7);
        resolver.resolve(8);
        assert_eq!(chained.result(), Some("7".to_string()));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_then_forwards_rejection() {
        let deferred = Deferred::<i32, String>::rejected("💥".into())
            .then(|a| Ok(a + 1))
            .then(|a| Ok(a * 2));
        assert_eq!(deferred.status(), Status::Rejected);
        assert_eq!(deferred.reason(), Some("💥".to_string()));
    }

    #[test]
    fn test_then_handler_error_rejects_downstream() {
        let source = Deferred::<i32, String>::resolved(1);
        let failed = source.then(|_| Err::<i32, _>("bad".to_string()));
        assert_eq!(failed.reason(), Some("bad".to_string()));
        assert_eq!(source.status(), Status::Fulfilled);
    }

    #[test]
    fn test_then_else_recovers_into_fulfillment() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let handled = deferred.then_else(|a| Ok(a + 1), |reason| Ok(reason.len() as i32));
        resolver.reject("four".into());
        assert_eq!(handled.status(), Status::Fulfilled);
        assert_eq!(handled.result(), Some(4));
    }

    #[test]
    fn test_then_else_fulfilled_skips_rejection_handler() {
        let handled = Deferred::<i32, String>::resolved(1)
            .then_else(|a| Ok(a + 1), |_| Err("unexpected".to_string()));
        assert_eq!(handled.result(), Some(2));
    }

    #[test]
    fn test_catch_recovers() {
        let recovered = Deferred::<i32, String>::new(|resolver| resolver.reject("no".into()))
            .catch(|_| Ok(42));
        assert_eq!(recovered.status(), Status::Fulfilled);
        assert_eq!(recovered.result(), Some(42));
    }

    #[test]
    fn test_catch_passes_fulfillment_through() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let passed = Deferred::<i32, String>::resolved(3).catch(move |_| {
            *flag.lock().unwrap() = true;
            Ok(0)
        });
        assert_eq!(passed.result(), Some(3));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_catch_on_pending() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let recovered = deferred.catch(|reason| Ok(reason.len() as i32));
        assert_eq!(recovered.status(), Status::Pending);
        resolver.reject("abc".into());
        assert_eq!(recovered.result(), Some(3));
    }

    #[test]
    fn test_catch_may_rethrow() {
        let rethrown = Deferred::<i32, String>::rejected("first".into())
            .catch(|reason| Err(format!("{reason}, then second")));
        assert_eq!(rethrown.reason(), Some("first, then second".to_string()));
    }

    #[test]
    fn test_handler_returning_deferred_is_followed() {
        let (inner, inner_resolver) = Deferred::<i32, String>::pending();
        let chained = Deferred::<i32, String>::resolved(1).then(move |_| inner);
        assert_eq!(chained.status(), Status::Pending);
        inner_resolver.reject("later".into());
        assert_eq!(chained.reason(), Some("later".to_string()));
    }

    #[test]
    fn test_handler_panic_rejects_downstream() {
        let panicked = Deferred::<i32, Error>::resolved(1).then(|_| -> Result<i32, Error> {
            panic!("in handler")
        });
        assert_eq!(
            panicked.reason(),
            Some(Error::HandlerPanicked("in handler".into()))
        );
    }

    #[test]
    fn test_every_consumer_observes_settlement() {
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let first = deferred.then(|a| Ok(a + 1));
        let second = deferred.then(|a| Ok(a * 10));
        let third = deferred.catch(|_| Ok(0));
        resolver.resolve(2);
        assert_eq!(first.result(), Some(3));
        assert_eq!(second.result(), Some(20));
        assert_eq!(third.result(), Some(2));
    }

    #[test]
    fn test_long_chain_settles_without_recursion() {
        let (head, resolver) = Deferred::<i32, String>::pending();
        let mut tail = head.clone();
        for _ in 0..100_000 {
            tail = tail.then(|a| Ok(a + 1));
        }
        resolver.resolve(0);
        assert_eq!(tail.result(), Some(100_000));
    }

    #[test]
    fn test_chained_links_run_breadth_first() {
        let seen = Arc::new(Mutex::new(vec![]));
        let (deferred, resolver) = Deferred::<i32, String>::pending();
        let (a1, a2, b1) = (seen.clone(), seen.clone(), seen.clone());
        let _a = deferred
            .then(move |v| {
                a1.lock().unwrap().push("a1");
                Ok(v)
            })
            .then(move |v| {
                a2.lock().unwrap().push("a2");
                Ok(v)
            });
        let _b = deferred.then(move |v| {
            b1.lock().unwrap().push("b1");
            Ok(v)
        });
        resolver.resolve(1);
        assert_eq!(*seen.lock().unwrap(), vec!["a1", "b1", "a2"]);
    }

    #[test]
    fn test_map_and_map_err() {
        let mapped = Deferred::<i32, String>::resolved(4).map(|a| a * 2);
        assert_eq!(mapped.result(), Some(8));

        let converted: Deferred<i32, Error> = Deferred::<i32, String>::rejected("x".into())
            .map_err(Error::HandlerPanicked);
        assert_eq!(converted.reason(), Some(Error::HandlerPanicked("x".into())));

        let untouched = Deferred::<i32, String>::resolved(1)
            .map_err(|reason| format!("wrapped: {reason}"));
        assert_eq!(untouched.result(), Some(1));
    }

    #[test]
    fn test_chain_settled_from_another_thread() {
        let (tx, rx) = mpsc::channel();
        let deferred = Deferred::<i32, String>::new(|resolver| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                resolver.resolve(5);
            });
        });
        let _tail = deferred.then(|a| Ok(a * a)).then(move |result| {
            tx.send(result).unwrap();
            Ok(())
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 25);
    }
}
