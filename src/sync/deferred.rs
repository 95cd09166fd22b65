//! A single-assignment, multi-waiter value cell (a "promise").

use crate::error::DeferredDisposedError;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

enum State<T> {
    Pending(Vec<Waker>),
    Resolved(T),
    Disposed,
}

/// Resolves at most once; every clone observes the same resolution.
/// Awaiting a disposed-without-resolving deferred yields
/// [`DeferredDisposedError`].
pub struct Deferred<T> {
    state: Rc<RefCell<State<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Deferred { state: self.state.clone() }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Deferred { state: Rc::new(RefCell::new(State::Pending(Vec::new()))) }
    }

    /// Settles the deferred with `value`. A no-op if already settled.
    pub fn resolve(&self, value: T) {
        let previous = std::mem::replace(&mut *self.state.borrow_mut(), State::Resolved(value));
        if let State::Pending(wakers) = previous {
            for waker in wakers {
                waker.wake();
            }
        } else {
            // already settled: put back whatever was there.
            *self.state.borrow_mut() = previous;
        }
    }

    /// Settles the deferred as disposed, rejecting every waiter with
    /// [`DeferredDisposedError`]. A no-op if already settled.
    pub fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.state.borrow_mut(), State::Disposed);
        if let State::Pending(wakers) = previous {
            for waker in wakers {
                waker.wake();
            }
        } else {
            *self.state.borrow_mut() = previous;
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(&*self.state.borrow(), State::Pending(_))
    }
}

impl<T: Clone> Future for Deferred<T> {
    type Output = Result<T, DeferredDisposedError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            State::Resolved(value) => Poll::Ready(Ok(value.clone())),
            State::Disposed => Poll::Ready(Err(DeferredDisposedError)),
            State::Pending(wakers) => {
                wakers.push(context.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;

    #[test]
    fn resolves_to_the_stored_value() {
        let deferred = Deferred::new();
        deferred.resolve(42);

        let result = block_on(deferred);
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn waiters_registered_before_resolve_are_woken() {
        let deferred = Deferred::new();
        let waiter = deferred.clone();

        let result = block_on(async move {
            crate::executor::spawn(async move {
                crate::executor::YieldNow::new().await;
                deferred.resolve("done");
            });
            waiter.await
        });

        assert_eq!(result, Ok("done"));
    }

    #[test]
    fn disposed_before_resolving_rejects_waiters() {
        let deferred: Deferred<i32> = Deferred::new();
        deferred.dispose();

        let result = block_on(deferred);
        assert_eq!(result, Err(DeferredDisposedError));
    }

    #[test]
    fn resolve_after_dispose_is_ignored() {
        let deferred = Deferred::new();
        deferred.dispose();
        deferred.resolve(1);

        let result = block_on(deferred);
        assert_eq!(result, Err(DeferredDisposedError));
    }
}
