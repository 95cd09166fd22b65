//! Single-threaded synchronization primitives for coordinating fibers
//! within one runner tree. None of these are `Send`/`Sync` — there is
//! never more than one OS thread driving the executor, so coordination is
//! plain `Rc<RefCell<..>>` state plus waker bookkeeping, the same pattern
//! the notify/oneshot primitives in the teacher crate use.

mod deferred;
mod gate;
mod mutex;
mod semaphore;

pub use deferred::Deferred;
pub use gate::Gate;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphorePermit};
