//! A mutual-exclusion lock, implemented as a [`Semaphore`] of one permit.

use super::semaphore::{Acquire, Semaphore, SemaphorePermit};
use crate::error::SemaphoreDisposedError;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Clone)]
pub struct Mutex {
    semaphore: Semaphore,
}

impl Mutex {
    pub fn new() -> Self {
        Mutex { semaphore: Semaphore::new(1) }
    }

    pub fn lock(&self) -> Lock {
        Lock { acquire: self.semaphore.acquire() }
    }

    pub fn try_lock(&self) -> Result<Option<MutexGuard>, SemaphoreDisposedError> {
        Ok(self.semaphore.try_acquire()?.map(|permit| MutexGuard { _permit: permit }))
    }

    pub fn dispose(&self) {
        self.semaphore.dispose();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Lock {
    acquire: Acquire,
}

impl Future for Lock {
    type Output = Result<MutexGuard, SemaphoreDisposedError>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        // `Acquire` is `Unpin` (an `Rc` and a `bool`), so `Lock` is too.
        Pin::new(&mut self.get_mut().acquire)
            .poll(context)
            .map(|result| result.map(|permit| MutexGuard { _permit: permit }))
    }
}

/// Holds the lock; releases it on drop.
pub struct MutexGuard {
    _permit: SemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn excludes_concurrent_critical_sections() {
        let mutex = Mutex::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        block_on(async move {
            let guard = mutex.lock().await.unwrap();

            let mutex2 = mutex.clone();
            let order2 = order.clone();
            crate::executor::spawn(async move {
                let _guard = mutex2.lock().await.unwrap();
                order2.borrow_mut().push("second");
            });

            crate::executor::YieldNow::new().await;
            order.borrow_mut().push("first holds lock");
            drop(guard);
            crate::executor::YieldNow::new().await;
            crate::executor::YieldNow::new().await;
        });

        assert_eq!(*order.borrow(), vec!["first holds lock", "second"]);
    }
}
