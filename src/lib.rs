//! A single-threaded structured concurrency runtime.
//!
//! Every unit of work is a [`fiber::Task`], spawned onto a [`Runner`] that
//! owns it for its whole lifetime: cancelling a runner tears down every
//! fiber still running underneath it, in reverse spawn order, before the
//! cancellation itself is considered complete. There is no implicit
//! background work — a [`Runner`] only ever does something because a task
//! body asked it to, directly or through [`combinators`].
//!
//! ```
//! use supervisy::{combinators, create_runner, executor, fiber};
//! use supervisy::fiber::Task;
//!
//! let runner = create_runner();
//! let result = executor::block_on(async move {
//!     let task = combinators::all(vec![
//!         Task::<i32, String>::new(|_r| async { Ok(1) }),
//!         Task::<i32, String>::new(|_r| async { Ok(2) }),
//!     ]);
//!     fiber::run(&runner, task).await
//! });
//! assert_eq!(result, Ok(vec![1, 2]));
//! ```
//!
//! The [`schedule`] module is a separate, self-contained piece: a
//! [`schedule::Schedule`] is plain state plus a `step` function, useful on
//! its own or threaded into [`combinators::retry`]/[`combinators::repeat`].

pub mod combinators;
pub mod deps;
pub mod error;
pub mod executor;
pub mod fiber;
pub mod id;
pub mod runner;
pub mod schedule;
pub mod stack;
pub mod sync;

pub use error::Reason;
pub use fiber::{Fiber, Task, TaskError};
pub use runner::{Runner, RunnerState};

/// Builds a fresh root [`Runner`] with production [`deps::Deps`] (a real
/// clock, OS randomness, and a stderr/stdout [`deps::Console`]).
///
/// Tests that need deterministic time or randomness should build their own
/// runner from [`deps::test::deps`] instead.
pub fn create_runner() -> Runner {
    Runner::new(deps::Deps::production())
}
