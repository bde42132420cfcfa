//! Per-thread trampoline for settlement reactions.
//!
//! Settling a deferred from inside a reaction would otherwise recurse once
//! per chain link. Instead, the outermost settlement on a thread drains a
//! FIFO queue; nested settlements only append to it and return.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

pub(crate) type Job = Box<dyn FnOnce()>;

thread_local! {
    static QUEUE: RefCell<Option<VecDeque<Job>>> = const { RefCell::new(None) };
}

/// Runs `jobs` now if no drain is active on this thread, otherwise queues
/// them behind the jobs already waiting.
///
/// Every job runs even if an earlier one panics; the first panic is resumed
/// once the queue is empty.
pub(crate) fn run(jobs: Vec<Job>) {
    if jobs.is_empty() {
        return;
    }
    let nested = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        match queue.as_mut() {
            Some(pending) => {
                pending.extend(jobs);
                true
            }
            None => {
                *queue = Some(jobs.into());
                false
            }
        }
    });
    if nested {
        return;
    }

    let mut first_panic = None;
    while let Some(job) = QUEUE.with(|queue| queue.borrow_mut().as_mut().and_then(VecDeque::pop_front))
    {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            tracing::debug!("reaction panicked, continuing with the remaining ones");
            first_panic.get_or_insert(payload);
        }
    }
    QUEUE.with(|queue| *queue.borrow_mut() = None);

    if let Some(payload) = first_panic {
        panic::resume_unwind(payload);
    }
}
