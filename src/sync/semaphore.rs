//! A counting semaphore with FIFO wakeup order.

use crate::error::SemaphoreDisposedError;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct State {
    available: usize,
    disposed: bool,
    waiters: std::collections::VecDeque<Waker>,
}

/// Bounds concurrent access to a resource. Acquirers that arrive while the
/// semaphore is exhausted queue FIFO and are woken in arrival order as
/// permits free up.
#[derive(Clone)]
pub struct Semaphore {
    state: Rc<RefCell<State>>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            state: Rc::new(RefCell::new(State {
                available: permits,
                disposed: false,
                waiters: std::collections::VecDeque::new(),
            })),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.state.borrow().available
    }

    /// Awaits a permit, queueing FIFO if none are free right now.
    pub fn acquire(&self) -> Acquire {
        Acquire { state: self.state.clone(), queued: false }
    }

    /// Takes a permit only if one is free and nobody is already queued
    /// ahead of a hypothetical new waiter. `Ok(None)` means try again later
    /// (or call [`Semaphore::acquire`] to queue).
    pub fn try_acquire(&self) -> Result<Option<SemaphorePermit>, SemaphoreDisposedError> {
        let mut state = self.state.borrow_mut();
        if state.disposed {
            return Err(SemaphoreDisposedError);
        }
        if state.available == 0 || !state.waiters.is_empty() {
            return Ok(None);
        }
        state.available -= 1;
        Ok(Some(SemaphorePermit { state: self.state.clone() }))
    }

    /// Rejects every queued acquirer and every future `acquire()` call.
    pub fn dispose(&self) {
        let mut state = self.state.borrow_mut();
        state.disposed = true;
        let waiters = std::mem::take(&mut state.waiters);
        drop(state);
        for waker in waiters {
            waker.wake();
        }
    }
}

pub struct Acquire {
    state: Rc<RefCell<State>>,
    queued: bool,
}

impl Future for Acquire {
    type Output = Result<SemaphorePermit, SemaphoreDisposedError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.state.borrow_mut();
        if state.disposed {
            return Poll::Ready(Err(SemaphoreDisposedError));
        }

        if !this.queued {
            state.waiters.push_back(context.waker().clone());
            this.queued = true;
        }

        let at_front = state.waiters.front().map(|front| front.will_wake(context.waker())).unwrap_or(false);
        if state.available > 0 && at_front {
            state.available -= 1;
            state.waiters.pop_front();
            drop(state);
            return Poll::Ready(Ok(SemaphorePermit { state: this.state.clone() }));
        }
        Poll::Pending
    }
}

/// Held while a permit is acquired; releases it back to the semaphore (FIFO
/// next-in-line first) on drop.
pub struct SemaphorePermit {
    state: Rc<RefCell<State>>,
}

impl Drop for SemaphorePermit {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.available += 1;
        let next = state.waiters.pop_front();
        drop(state);
        if let Some(waker) = next {
            waker.wake();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn acquires_immediately_while_permits_remain() {
        let semaphore = Semaphore::new(1);
        block_on(async move {
            let permit = semaphore.acquire().await.unwrap();
            assert_eq!(semaphore.available_permits(), 0);
            drop(permit);
            assert_eq!(semaphore.available_permits(), 1);
        });
    }

    #[test]
    fn second_acquirer_waits_for_release() {
        let semaphore = Semaphore::new(1);
        let order = Rc::new(StdRefCell::new(Vec::new()));

        block_on(async move {
            let first = semaphore.acquire().await.unwrap();

            let semaphore2 = semaphore.clone();
            let order2 = order.clone();
            crate::executor::spawn(async move {
                let _second = semaphore2.acquire().await.unwrap();
                order2.borrow_mut().push("second");
            });

            crate::executor::YieldNow::new().await;
            order.borrow_mut().push("first releasing");
            drop(first);
            crate::executor::YieldNow::new().await;
            crate::executor::YieldNow::new().await;
        });

        assert_eq!(*order.borrow(), vec!["first releasing", "second"]);
    }

    #[test]
    fn disposed_semaphore_rejects_acquires() {
        let semaphore = Semaphore::new(0);
        semaphore.dispose();

        let result = block_on(semaphore.acquire());
        assert_eq!(result.err(), Some(SemaphoreDisposedError));
    }
}
