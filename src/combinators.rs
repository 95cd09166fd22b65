//! The task algebra: ways to combine [`Task`]s that all reduce, underneath,
//! to spawning child fibers on the runner they're given and letting the
//! structured-concurrency machinery in [`crate::fiber`] and
//! [`crate::runner`] do the actual cancellation work.

use crate::deps::Time;
use crate::error::{
    AllAbortError, AllSettledAbortError, AnyAbortError, MapAbortError, RaceLostError, Reason,
    RetryError, TimeoutError,
};
use crate::fiber::{self, Fiber, Task, TaskError};
use crate::runner::Runner;
use crate::schedule::{Done, Schedule};
use std::convert::Infallible;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Suspends the current task body for `duration`, using whatever clock
/// the runner's [`crate::deps::Deps`] supplies.
pub fn sleep(duration: Duration) -> Task<(), Infallible> {
    Task::new(move |runner| async move {
        let time = runner.deps().time.clone();
        time.sleep(duration).await;
        Ok(())
    })
}

/// Yields to the executor once without otherwise delaying.
pub fn yield_now() -> Task<(), Infallible> {
    Task::new(|_runner| async {
        crate::executor::YieldNow::new().await;
        Ok(())
    })
}

/// Caps concurrent child spawns from within `task`'s body at `n`, the way
/// `all`/`map` read [`Runner::concurrency`] before spawning each item.
/// Nested `all`/`map` calls inherit the cap, since child runners copy
/// their parent's concurrency value at creation time.
pub fn with_concurrency<T, E>(n: NonZeroUsize, task: Task<T, E>) -> Task<T, E>
where
    T: 'static,
    E: 'static,
{
    Task::new(move |runner| async move {
        runner.set_concurrency(n);
        task.call(runner).await
    })
}

/// Never returns; used by combinators that have just aborted their own
/// runner and need to yield control back to the executor so the
/// fiber-driving select notices the abort and preempts this body, instead
/// of this function inventing a value of type `E` it does not have.
async fn park_forever<T, E>() -> Result<T, E> {
    loop {
        crate::executor::YieldNow::new().await;
    }
}

/// Polls a fixed set of fibers and resolves with the first (index, result)
/// pair among `candidates` to settle.
struct FirstSettled<T, E> {
    fibers: Vec<Fiber<T, E>>,
    candidates: Vec<usize>,
}

impl<T: Clone, E: Clone> Future for FirstSettled<T, E> {
    type Output = (usize, Result<T, TaskError<E>>);

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for &index in &this.candidates {
            if let Poll::Ready(result) = Pin::new(&mut this.fibers[index]).poll(context) {
                return Poll::Ready((index, result));
            }
        }
        Poll::Pending
    }
}

/// Runs every task to completion concurrently and resolves with the
/// first one to settle, successfully or not. Every other branch is
/// aborted with [`RaceLostError`] once a winner is known; the losers'
/// teardown happens as an ordinary part of this task's own child-runner
/// disposal, not something `race` has to wait on itself.
pub fn race<T, E>(tasks: Vec<Task<T, E>>) -> Task<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Task::new(move |runner| async move {
        let fibers: Vec<Fiber<T, E>> = tasks.into_iter().map(|task| fiber::run(&runner, task)).collect();
        let mut remaining: Vec<usize> = (0..fibers.len()).collect();

        loop {
            if remaining.is_empty() {
                runner.abort(Reason::new(RaceLostError));
                return park_forever().await;
            }

            let (index, result) =
                FirstSettled { fibers: fibers.clone(), candidates: remaining.clone() }.await;

            match result {
                Ok(value) => {
                    abort_all_but(&fibers, index, RaceLostError);
                    return Ok(value);
                }
                Err(TaskError::Domain(error)) => {
                    abort_all_but(&fibers, index, RaceLostError);
                    return Err(error);
                }
                Err(TaskError::Abort(_)) => {
                    remaining.retain(|&i| i != index);
                }
            }
        }
    })
}

fn abort_all_but<T, E>(fibers: &[Fiber<T, E>], winner: usize, reason: impl std::fmt::Debug + std::fmt::Display + Clone + 'static) {
    for (index, fiber) in fibers.iter().enumerate() {
        if index != winner {
            fiber.abort(reason.clone());
        }
    }
}

/// Like [`FirstSettled`], but over a sliding window of fibers where a slot
/// may not have been spawned yet (`None`) — the shape `all`/`all_settled`/
/// `map`/`map_settled` need to honor [`Runner::concurrency`].
struct FirstSettledSlot<T, E> {
    fibers: Vec<Option<Fiber<T, E>>>,
}

impl<T: Clone, E: Clone> Future for FirstSettledSlot<T, E> {
    type Output = (usize, Result<T, TaskError<E>>);

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for (index, slot) in this.fibers.iter_mut().enumerate() {
            if let Some(fiber) = slot {
                if let Poll::Ready(result) = Pin::new(fiber).poll(context) {
                    return Poll::Ready((index, result));
                }
            }
        }
        Poll::Pending
    }
}

/// Spawns queued-but-not-yet-started tasks into free slots until either
/// the queue or [`Runner::concurrency`]'s cap is exhausted.
fn fill_capacity<T, E>(
    runner: &Runner,
    queue: &mut [Option<Task<T, E>>],
    fibers: &mut [Option<Fiber<T, E>>],
    next_to_spawn: &mut usize,
    in_flight: &mut usize,
) where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let cap = runner.concurrency().get();
    while *next_to_spawn < queue.len() && *in_flight < cap {
        let task = queue[*next_to_spawn].take().expect("queue slot not yet spawned");
        fibers[*next_to_spawn] = Some(fiber::run(runner, task));
        *in_flight += 1;
        *next_to_spawn += 1;
    }
}

/// Aborts every currently in-flight fiber; slots not yet spawned are left
/// alone for the caller to resolve directly (they never had a runner to
/// abort in the first place).
fn abort_in_flight<T, E>(fibers: &[Option<Fiber<T, E>>], reason: impl std::fmt::Debug + std::fmt::Display + Clone + 'static) {
    for fiber in fibers.iter().flatten() {
        fiber.abort(reason.clone());
    }
}

/// Runs every task concurrently and resolves with all outputs, in input
/// order, once every one has succeeded. The first domain failure aborts
/// every other still-running sibling with [`AllAbortError`] and is
/// propagated as `all`'s own error.
pub fn all<T, E>(tasks: Vec<Task<T, E>>) -> Task<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Task::new(move |runner| async move {
        let total = tasks.len();
        let mut queue: Vec<Option<Task<T, E>>> = tasks.into_iter().map(Some).collect();
        let mut fibers: Vec<Option<Fiber<T, E>>> = (0..total).map(|_| None).collect();
        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut next_to_spawn = 0;
        let mut in_flight = 0;
        let mut remaining = total;

        fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);

        while remaining > 0 {
            let (index, result) = FirstSettledSlot { fibers: fibers.clone() }.await;
            fibers[index] = None;
            in_flight -= 1;
            remaining -= 1;

            match result {
                Ok(value) => {
                    results[index] = Some(value);
                    fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);
                }
                Err(TaskError::Domain(error)) => {
                    abort_in_flight(&fibers, AllAbortError);
                    return Err(error);
                }
                Err(TaskError::Abort(_)) => {
                    // A sibling only ever settles Abort because all()'s own
                    // runner was aborted (nothing else calls abort() on an
                    // individual sibling before all() has already decided
                    // to return). The fiber wrapper around this task forces
                    // Err(Abort) on our own result regardless of what we
                    // return here; park until it does.
                    abort_in_flight(&fibers, AllAbortError);
                    return park_forever().await;
                }
            }
        }

        Ok(results.into_iter().map(|value| value.expect("every index settled Ok before remaining reached zero")).collect())
    })
}

/// What [`all_settled`]/`map_settled` report for each input: the value it
/// produced, the error it failed with, or the fact that it was cancelled
/// before either could happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled<T, E> {
    Completed(T),
    Failed(E),
    Aborted(crate::error::AbortError),
}

/// Runs every task concurrently to completion and reports how each one
/// settled, never short-circuiting on failure.
pub fn all_settled<T, E>(tasks: Vec<Task<T, E>>) -> Task<Vec<Settled<T, E>>, Infallible>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Task::new(move |runner| async move {
        let total = tasks.len();
        let mut queue: Vec<Option<Task<T, E>>> = tasks.into_iter().map(Some).collect();
        let mut fibers: Vec<Option<Fiber<T, E>>> = (0..total).map(|_| None).collect();
        let mut results: Vec<Option<Settled<T, E>>> = (0..total).map(|_| None).collect();
        let mut next_to_spawn = 0;
        let mut in_flight = 0;
        let mut remaining = total;

        fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);

        while remaining > 0 {
            if runner.request_aborted() {
                // The container itself was cancelled; the fiber wrapper
                // around this task forces Err(Abort) on our own result
                // regardless of what we return, so there's no value to
                // assemble here. Abort whatever's in flight and park
                // until that forced abort takes effect.
                abort_in_flight(&fibers, AllSettledAbortError);
                return park_forever().await;
            }

            let (index, result) = FirstSettledSlot { fibers: fibers.clone() }.await;
            fibers[index] = None;
            in_flight -= 1;
            remaining -= 1;

            results[index] = Some(match result {
                Ok(value) => Settled::Completed(value),
                Err(TaskError::Domain(error)) => Settled::Failed(error),
                Err(TaskError::Abort(abort)) => Settled::Aborted(abort),
            });

            fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);
        }

        Ok(results.into_iter().map(|value| value.expect("every index settled before remaining reached zero")).collect())
    })
}

/// Applies `f` to every item concurrently and collects the results in
/// input order, short-circuiting on the first domain failure (aborting
/// the other in-flight items with [`MapAbortError`]) like [`all`] but
/// building the task list from `items` and `f` itself.
pub fn map<I, T, E, F>(items: Vec<I>, f: F) -> Task<Vec<T>, E>
where
    I: 'static,
    T: Clone + 'static,
    E: Clone + 'static,
    F: Fn(I) -> Task<T, E> + 'static,
{
    Task::new(move |runner| async move {
        let total = items.len();
        let mut queue: Vec<Option<Task<T, E>>> = items.into_iter().map(|item| Some(f(item))).collect();
        let mut fibers: Vec<Option<Fiber<T, E>>> = (0..total).map(|_| None).collect();
        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut next_to_spawn = 0;
        let mut in_flight = 0;
        let mut remaining = total;

        fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);

        while remaining > 0 {
            let (index, result) = FirstSettledSlot { fibers: fibers.clone() }.await;
            fibers[index] = None;
            in_flight -= 1;
            remaining -= 1;

            match result {
                Ok(value) => {
                    results[index] = Some(value);
                    fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);
                }
                Err(TaskError::Domain(error)) => {
                    abort_in_flight(&fibers, MapAbortError);
                    return Err(error);
                }
                Err(TaskError::Abort(_)) => {
                    // Same reasoning as all(): a sibling only settles Abort
                    // once map()'s own runner has been aborted, and the
                    // fiber wrapper around this task forces our own result
                    // to Err(Abort) regardless of what we return.
                    abort_in_flight(&fibers, MapAbortError);
                    return park_forever().await;
                }
            }
        }

        Ok(results.into_iter().map(|value| value.expect("every index settled Ok before remaining reached zero")).collect())
    })
}

/// Like [`map`], but collects how every item settled instead of
/// short-circuiting on the first failure.
pub fn map_settled<I, T, E, F>(items: Vec<I>, f: F) -> Task<Vec<Settled<T, E>>, Infallible>
where
    I: 'static,
    T: Clone + 'static,
    E: Clone + 'static,
    F: Fn(I) -> Task<T, E> + 'static,
{
    Task::new(move |runner| async move {
        let total = items.len();
        let mut queue: Vec<Option<Task<T, E>>> = items.into_iter().map(|item| Some(f(item))).collect();
        let mut fibers: Vec<Option<Fiber<T, E>>> = (0..total).map(|_| None).collect();
        let mut results: Vec<Option<Settled<T, E>>> = (0..total).map(|_| None).collect();
        let mut next_to_spawn = 0;
        let mut in_flight = 0;
        let mut remaining = total;

        fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);

        while remaining > 0 {
            if runner.request_aborted() {
                abort_in_flight(&fibers, AllSettledAbortError);
                return park_forever().await;
            }

            let (index, result) = FirstSettledSlot { fibers: fibers.clone() }.await;
            fibers[index] = None;
            in_flight -= 1;
            remaining -= 1;

            results[index] = Some(match result {
                Ok(value) => Settled::Completed(value),
                Err(TaskError::Domain(error)) => Settled::Failed(error),
                Err(TaskError::Abort(abort)) => Settled::Aborted(abort),
            });

            fill_capacity(&runner, &mut queue, &mut fibers, &mut next_to_spawn, &mut in_flight);
        }

        Ok(results.into_iter().map(|value| value.expect("every index settled before remaining reached zero")).collect())
    })
}

/// Runs every task concurrently and resolves with the first to *succeed*.
/// If every task fails, resolves with every domain error in input order.
/// Siblings still running once a winner is known are aborted with
/// [`AnyAbortError`].
pub fn any<T, E>(tasks: Vec<Task<T, E>>) -> Task<T, Vec<E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Task::new(move |runner| async move {
        let fibers: Vec<Fiber<T, E>> = tasks.into_iter().map(|task| fiber::run(&runner, task)).collect();
        let mut failures: Vec<Option<E>> = fibers.iter().map(|_| None).collect();
        let mut pending: Vec<usize> = (0..fibers.len()).collect();

        while !pending.is_empty() {
            let (index, result) =
                FirstSettled { fibers: fibers.clone(), candidates: pending.clone() }.await;
            pending.retain(|&i| i != index);

            match result {
                Ok(value) => {
                    for &i in &pending {
                        fibers[i].abort(AnyAbortError);
                    }
                    return Ok(value);
                }
                Err(TaskError::Domain(error)) => failures[index] = Some(error),
                Err(TaskError::Abort(_)) => {
                    // Unlike all()/map(), any() only aborts a sibling once
                    // it has already found its winner (see above) or the
                    // container itself was aborted from outside; both cases
                    // end the loop rather than continuing it.
                    for &i in &pending {
                        fibers[i].abort(AnyAbortError);
                    }
                    return park_forever().await;
                }
            }
        }

        Err(failures.into_iter().flatten().collect())
    })
}

/// What a timed-out task surfaces: either it ran out of time, or it
/// failed on its own before the clock did.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeoutOutcome<E> {
    #[error(transparent)]
    Elapsed(#[from] TimeoutError),
    #[error("{0}")]
    Failed(E),
}

/// Races `task` against a timer; if the timer wins, `task` is aborted
/// with [`TimeoutError`] and `Elapsed` is reported. Otherwise `task`'s own
/// outcome is passed through.
pub fn timeout<T, E>(task: Task<T, E>, duration: Duration) -> Task<T, TimeoutOutcome<E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    Task::new(move |runner| async move {
        let fiber = fiber::run(&runner, task);
        let time = runner.deps().time.clone();

        enum Winner<T, E> {
            Task(Result<T, TaskError<E>>),
            TimedOut,
        }

        struct Race<T, E> {
            fiber: Fiber<T, E>,
            sleep: Pin<Box<dyn Future<Output = ()>>>,
        }

        impl<T: Clone, E: Clone> Future for Race<T, E> {
            type Output = Winner<T, E>;
            fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
                let this = self.get_mut();
                if let Poll::Ready(result) = Pin::new(&mut this.fiber).poll(context) {
                    return Poll::Ready(Winner::Task(result));
                }
                if let Poll::Ready(()) = this.sleep.as_mut().poll(context) {
                    return Poll::Ready(Winner::TimedOut);
                }
                Poll::Pending
            }
        }

        let winner = Race { fiber: fiber.clone(), sleep: time.sleep(duration) }.await;

        match winner {
            Winner::TimedOut => {
                fiber.abort(TimeoutError);
                Err(TimeoutOutcome::Elapsed(TimeoutError))
            }
            Winner::Task(Ok(value)) => Ok(value),
            Winner::Task(Err(TaskError::Domain(error))) => Err(TimeoutOutcome::Failed(error)),
            Winner::Task(Err(TaskError::Abort(_))) => park_forever().await,
        }
    })
}

/// Invokes `make_task` once per attempt until it succeeds or `schedule`
/// reports [`Done`] on the latest domain error, sleeping between attempts
/// for whatever delay the schedule reports.
pub fn retry<T, E, S, F>(make_task: F, mut schedule: S) -> Task<T, RetryError<E>>
where
    T: Clone + 'static,
    E: Clone + 'static,
    S: Schedule<E, u64> + 'static,
    F: Fn() -> Task<T, E> + 'static,
{
    Task::new(move |runner| async move {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let fiber = fiber::run(&runner, make_task());
            match fiber.await {
                Ok(value) => return Ok(value),
                Err(TaskError::Abort(_)) => return park_forever().await,
                Err(TaskError::Domain(error)) => match schedule.step(error.clone()) {
                    Ok((_, delay)) => {
                        runner.deps().time.clone().sleep(delay).await;
                    }
                    Err(Done) => return Err(RetryError { cause: error, attempts }),
                },
            }
        }
    })
}

/// Invokes `make_task` once, then re-invokes it every time the previous
/// attempt *succeeds*, stepping `schedule` with the latest output.
/// Returns the last output once the schedule reports [`Done`]; a domain
/// failure from `make_task` short-circuits immediately.
pub fn repeat<T, E, S, F>(make_task: F, mut schedule: S) -> Task<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
    S: Schedule<T, u64> + 'static,
    F: Fn() -> Task<T, E> + 'static,
{
    Task::new(move |runner| async move {
        loop {
            let fiber = fiber::run(&runner, make_task());
            match fiber.await {
                Err(TaskError::Domain(error)) => return Err(error),
                Err(TaskError::Abort(_)) => return park_forever().await,
                Ok(value) => match schedule.step(value.clone()) {
                    Err(Done) => return Ok(value),
                    Ok((_, delay)) => {
                        runner.deps().time.clone().sleep(delay).await;
                    }
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test::deps;
    use crate::executor::block_on;
    use crate::fiber::run;
    use crate::runner::Runner;
    use std::cell::Cell;

    fn root() -> Runner {
        let (deps, _, _) = deps(1);
        Runner::new(deps)
    }

    #[test]
    fn race_returns_the_fastest_success_and_cancels_the_rest() {
        let r = root();
        let slow_started = Rc::new(Cell::new(false));
        let slow_started2 = slow_started.clone();

        let result = block_on(async move {
            let fast = Task::<i32, String>::new(|_runner| async { Ok(1) });
            let slow = Task::<i32, String>::new(move |runner| async move {
                slow_started2.set(true);
                sleep(Duration::from_secs(3600)).call(runner).await.unwrap();
                Ok(2)
            });

            let fiber = run(&r, race(vec![fast, slow]));
            fiber.await
        });

        assert_eq!(result, Ok(1));
    }

    #[test]
    fn all_collects_results_in_order() {
        let r = root();

        let result = block_on(async move {
            let tasks = vec![
                Task::<i32, String>::new(|_r| async { Ok(1) }),
                Task::<i32, String>::new(|_r| async { Ok(2) }),
                Task::<i32, String>::new(|_r| async { Ok(3) }),
            ];
            run(&r, all(tasks)).await
        });

        assert_eq!(result, Ok(vec![1, 2, 3]));
    }

    #[test]
    fn all_short_circuits_on_first_failure() {
        let r = root();

        let result = block_on(async move {
            let tasks = vec![
                Task::<i32, String>::new(|_r| async { Ok(1) }),
                Task::<i32, String>::new(|_r| async { Err("boom".to_string()) }),
            ];
            run(&r, all(tasks)).await
        });

        assert_eq!(result, Err(TaskError::Domain("boom".to_string())));
    }

    #[test]
    fn all_settled_reports_every_outcome() {
        let r = root();

        let result = block_on(async move {
            let tasks = vec![
                Task::<i32, String>::new(|_r| async { Ok(1) }),
                Task::<i32, String>::new(|_r| async { Err("boom".to_string()) }),
            ];
            run(&r, all_settled(tasks)).await.unwrap()
        });

        assert_eq!(result, vec![Settled::Completed(1), Settled::Failed("boom".to_string())]);
    }

    #[test]
    fn any_returns_first_success_despite_earlier_failure() {
        let r = root();

        let result = block_on(async move {
            let tasks = vec![
                Task::<i32, String>::new(|_r| async { Err("nope".to_string()) }),
                Task::<i32, String>::new(|_r| async { Ok(42) }),
            ];
            run(&r, any(tasks)).await
        });

        assert_eq!(result, Ok(42));
    }

    #[test]
    fn any_aggregates_every_failure_if_none_succeed() {
        let r = root();

        let result = block_on(async move {
            let tasks = vec![
                Task::<i32, String>::new(|_r| async { Err("a".to_string()) }),
                Task::<i32, String>::new(|_r| async { Err("b".to_string()) }),
            ];
            run(&r, any(tasks)).await
        });

        assert_eq!(result, Err(TaskError::Domain(vec!["a".to_string(), "b".to_string()])));
    }

    #[test]
    fn timeout_preempts_a_task_that_runs_too_long() {
        let r = root();

        let result = block_on(async move {
            let slow = Task::<i32, String>::new(|runner| async move {
                sleep(Duration::from_secs(3600)).call(runner).await.unwrap();
                Ok(1)
            });
            run(&r, timeout(slow, Duration::from_millis(1))).await
        });

        assert!(matches!(result, Err(TaskError::Domain(TimeoutOutcome::Elapsed(TimeoutError)))));
    }

    #[test]
    fn timeout_passes_through_a_task_that_finishes_in_time() {
        let r = root();

        let result = block_on(async move {
            let fast = Task::<i32, String>::new(|_r| async { Ok(7) });
            run(&r, timeout(fast, Duration::from_secs(3600))).await
        });

        assert_eq!(result, Ok(7));
    }

    #[test]
    fn retry_gives_up_once_the_schedule_is_exhausted() {
        let r = root();
        let attempts = Rc::new(Cell::new(0));
        let attempts2 = attempts.clone();

        let result = block_on(async move {
            let make_task = move || {
                let attempts = attempts2.clone();
                Task::<i32, String>::new(move |_r| {
                    attempts.set(attempts.get() + 1);
                    async { Err("always fails".to_string()) }
                })
            };
            run(&r, retry(make_task, crate::schedule::recurs(2))).await
        });

        assert_eq!(attempts.get(), 3);
        assert!(matches!(result, Err(TaskError::Domain(RetryError { attempts: 3, .. }))));
    }

    #[test]
    fn retry_stops_at_the_first_success() {
        let r = root();
        let attempts = Rc::new(Cell::new(0));
        let attempts2 = attempts.clone();

        let result = block_on(async move {
            let make_task = move || {
                let attempts = attempts2.clone();
                Task::<i32, String>::new(move |_r| {
                    let n = attempts.get() + 1;
                    attempts.set(n);
                    async move { if n < 2 { Err("not yet".to_string()) } else { Ok(99) } }
                })
            };
            run(&r, retry(make_task, crate::schedule::forever())).await
        });

        assert_eq!(result, Ok(99));
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn map_applies_the_task_factory_to_every_item_concurrently() {
        let r = root();

        let result = block_on(async move {
            let items = vec![1, 2, 3];
            run(&r, map(items, |n| Task::<i32, String>::new(move |_r| async move { Ok(n * 10) })))
                .await
        });

        assert_eq!(result, Ok(vec![10, 20, 30]));
    }

    #[test]
    fn with_concurrency_caps_how_many_map_items_run_at_once() {
        let r = root();
        let active = Rc::new(Cell::new(0));
        let peak = Rc::new(Cell::new(0));
        let peak_check = peak.clone();

        let result = block_on(async move {
            let items = vec![1, 2, 3, 4];
            let make_item = {
                let active = active.clone();
                let peak = peak.clone();
                move |_n: i32| {
                    let active = active.clone();
                    let peak = peak.clone();
                    Task::<i32, String>::new(move |_r| async move {
                        active.set(active.get() + 1);
                        peak.set(peak.get().max(active.get()));
                        crate::executor::YieldNow::new().await;
                        active.set(active.get() - 1);
                        Ok(1)
                    })
                }
            };

            let capped = with_concurrency(
                NonZeroUsize::new(2).unwrap(),
                map(items, make_item),
            );
            run(&r, capped).await
        });

        assert_eq!(result, Ok(vec![1, 1, 1, 1]));
        assert!(peak.get() <= 2, "peak concurrency {} exceeded the cap", peak.get());
    }

    #[test]
    fn repeat_stops_once_the_schedule_is_exhausted() {
        let r = root();
        let invocations = Rc::new(Cell::new(0));
        let invocations2 = invocations.clone();

        let result = block_on(async move {
            let make_task = move || {
                let invocations = invocations2.clone();
                Task::<i32, String>::new(move |_r| {
                    let n = invocations.get() + 1;
                    invocations.set(n);
                    async move { Ok(n) }
                })
            };
            run(&r, repeat(make_task, crate::schedule::recurs(3))).await
        });

        assert_eq!(invocations.get(), 4);
        assert_eq!(result, Ok(4));
    }
}
