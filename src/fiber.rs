//! Tasks, fibers, and the spawn sequence that ties a fiber's lifetime to a
//! freshly allocated child [`Runner`].

use crate::error::{AbortError, Reason, RunnerClosing};
use crate::runner::{Runner, RunnerState};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// What a fiber's awaiter observes: either the task's own error, or an
/// abort that preempted it.
///
/// `Domain` only requires `E: Display`, not `std::error::Error`, since task
/// bodies are free to fail with plain values (a `String`, an enum with no
/// `source()`) rather than a full error type.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError<E> {
    #[error("{0}")]
    Domain(E),
    #[error(transparent)]
    Abort(#[from] AbortError),
}

impl<E: PartialEq> PartialEq for TaskError<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TaskError::Domain(a), TaskError::Domain(b)) => a == b,
            (TaskError::Abort(a), TaskError::Abort(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: Eq> Eq for TaskError<E> {}

impl<E> TaskError<E> {
    pub fn as_abort(&self) -> Option<&AbortError> {
        match self {
            TaskError::Abort(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_domain(self) -> Option<E> {
        match self {
            TaskError::Domain(error) => Some(error),
            _ => None,
        }
    }
}

type TaskBody<T, E> = Box<dyn FnOnce(Runner) -> Pin<Box<dyn Future<Output = Result<T, E>>>>>;

/// A unit of work: a function from the runner it will be given to a
/// `Result<T, E>`-producing future. Constructed with [`Task::new`] and
/// consumed exactly once by [`run`].
pub struct Task<T, E> {
    body: TaskBody<T, E>,
}

impl<T: 'static, E: 'static> Task<T, E> {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Runner) -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        Task { body: Box::new(move |runner| Box::pin(body(runner))) }
    }

    pub(crate) fn call(self, runner: Runner) -> Pin<Box<dyn Future<Output = Result<T, E>>>> {
        (self.body)(runner)
    }
}

struct FiberInner<T, E> {
    runner: Runner,
    outcome: RefCell<Option<Result<T, E>>>,
    result: RefCell<Option<Result<T, TaskError<E>>>>,
    wakers: RefCell<Vec<Waker>>,
}

/// An awaitable, disposable handle to a running task and the child runner
/// backing it.
pub struct Fiber<T, E> {
    inner: Rc<FiberInner<T, E>>,
}

impl<T, E> Clone for Fiber<T, E> {
    fn clone(&self) -> Self {
        Fiber { inner: self.inner.clone() }
    }
}

impl<T, E> Fiber<T, E> {
    fn new(runner: Runner) -> Self {
        Fiber {
            inner: Rc::new(FiberInner {
                runner,
                outcome: RefCell::new(None),
                result: RefCell::new(None),
                wakers: RefCell::new(Vec::new()),
            }),
        }
    }

    fn settle(&self, outcome: Option<Result<T, E>>, result: Result<T, TaskError<E>>) {
        tracing::trace!(runner = ?self.inner.runner.id(), ok = result.is_ok(), "fiber settled");
        *self.inner.outcome.borrow_mut() = outcome;
        *self.inner.result.borrow_mut() = Some(result);
        for waker in self.inner.wakers.borrow_mut().drain(..) {
            waker.wake();
        }
    }

    pub fn runner(&self) -> &Runner {
        &self.inner.runner
    }

    pub fn state(&self) -> RunnerState {
        self.inner.runner.state()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    /// What the task body itself produced, ignoring any abort that raced
    /// with its completion. `None` until the fiber settles.
    pub fn outcome(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        self.inner.outcome.borrow().clone()
    }

    /// Requests cancellation of this fiber's runner (and transitively its
    /// descendants).
    pub fn abort(&self, reason: impl std::fmt::Debug + std::fmt::Display + 'static) {
        self.inner.runner.abort(Reason::new(reason));
    }

    /// Aborts the fiber (if not already settled) and waits for it to
    /// finish tearing down, satisfying the disposable half of the
    /// awaitable-and-disposable contract.
    pub async fn dispose(&self) {
        if !self.is_settled() {
            self.inner.runner.abort(Reason::new(RunnerClosing));
        }
        SettleWait { fiber: self.clone() }.await;
    }
}

impl<T, E> Future for Fiber<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, TaskError<E>>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.inner.result.borrow().as_ref() {
            return Poll::Ready(result.clone());
        }
        self.inner.wakers.borrow_mut().push(context.waker().clone());
        Poll::Pending
    }
}

struct SettleWait<T, E> {
    fiber: Fiber<T, E>,
}

impl<T, E> Future for SettleWait<T, E> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if self.fiber.is_settled() {
            return Poll::Ready(());
        }
        self.fiber.inner.wakers.borrow_mut().push(context.waker().clone());
        Poll::Pending
    }
}

/// Spawns `task` as a child of `runner`.
///
/// Follows §4.1's creation sequence: a runner no longer `Running` yields an
/// immediately-settled fiber carrying a runner-closing [`AbortError`]
/// without ever invoking the task body; otherwise a child runner is
/// allocated, the body is driven to completion, the child runner is
/// disposed (tearing down grandchildren and running deferred cleanup), and
/// only then is the fiber considered settled and removed from its parent's
/// child list.
pub fn run<T, E>(runner: &Runner, task: Task<T, E>) -> Fiber<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    spawn(runner, task, false)
}

/// Like [`run`], but the resulting fiber is excluded from its parent's
/// structured-disposal wait: the parent aborts it on teardown but does not
/// block on its settlement.
pub fn daemon<T, E>(runner: &Runner, task: Task<T, E>) -> Fiber<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    spawn(runner, task, true)
}

fn spawn<T, E>(runner: &Runner, task: Task<T, E>, as_daemon: bool) -> Fiber<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let child = if as_daemon { runner.spawn_daemon_child() } else { runner.spawn_child() };

    let Some(child) = child else {
        let closed = Runner::synthesize_closed(runner.deps().clone());
        let fiber = Fiber::new(closed.clone());
        let reason = closed.signal_reason().expect("synthesized runner always carries a reason");
        fiber.settle(None, Err(TaskError::Abort(AbortError { reason })));
        return fiber;
    };

    tracing::trace!(parent = ?runner.id(), child = ?child.id(), daemon = as_daemon, "fiber spawned");

    let fiber = Fiber::new(child.clone());
    let settle_target = fiber.clone();
    let parent = runner.clone();
    let body_future = task.call(child.clone());

    crate::executor::spawn(async move {
        let raced = SelectAbort { body: body_future, aborted: child.aborted() };

        let outcome = match raced.await {
            SelectOutcome::Body(outcome) => Some(outcome),
            // The body never produced a value; it was still suspended
            // somewhere when cancellation preempted it, so there is no
            // outcome to report, only the forced abort result below.
            SelectOutcome::Aborted => None,
        };

        child.dispose().await;

        let result = match child.signal_reason() {
            Some(reason) => Err(TaskError::Abort(AbortError { reason })),
            None => match outcome.clone().expect("unaborted fiber always has a body outcome") {
                Ok(value) => Ok(value),
                Err(error) => Err(TaskError::Domain(error)),
            },
        };

        settle_target.settle(outcome, result);
        parent.remove_child(child.id());
    });

    fiber
}

enum SelectOutcome<T, E> {
    Body(Result<T, E>),
    Aborted,
}

struct SelectAbort<T, E> {
    body: Pin<Box<dyn Future<Output = Result<T, E>>>>,
    aborted: crate::runner::Aborted,
}

impl<T, E> Future for SelectAbort<T, E> {
    type Output = SelectOutcome<T, E>;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = this.body.as_mut().poll(context) {
            return Poll::Ready(SelectOutcome::Body(value));
        }
        if let Poll::Ready(()) = Pin::new(&mut this.aborted).poll(context) {
            return Poll::Ready(SelectOutcome::Aborted);
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::test::deps;
    use crate::executor::block_on;

    fn root() -> Runner {
        let (deps, _, _) = deps(1);
        Runner::new(deps)
    }

    #[test]
    fn trait_implementations() {
        use impls::impls;
        use std::fmt::Debug;

        assert!(impls!(Fiber<i32, String>: Clone & !Debug & !Send & !Sync));
        assert!(impls!(TaskError<String>: Debug & Clone & !Send & !Sync));
    }

    #[test]
    fn successful_task_settles_ok_and_removes_child() {
        let r = root();
        let r2 = r.clone();

        let result = block_on(async move {
            let fiber = run(&r2, Task::<i32, String>::new(|_runner| async { Ok(7) }));
            fiber.await
        });

        assert_eq!(result, Ok(7));
        assert_eq!(r.children().len(), 0);
    }

    #[test]
    fn failing_task_settles_domain_error() {
        let r = root();

        let result = block_on(async move {
            let fiber = run(&r, Task::<i32, String>::new(|_runner| async { Err("boom".to_string()) }));
            fiber.await
        });

        assert_eq!(result, Err(TaskError::Domain("boom".to_string())));
    }

    #[test]
    fn aborted_task_surfaces_abort_error_even_if_body_would_succeed() {
        let r = root();

        let outcome = block_on(async move {
            let fiber = run(
                &r,
                Task::<i32, String>::new(|runner| async move {
                    crate::executor::YieldNow::new().await;
                    let _ = runner.signal_aborted();
                    Ok(9)
                }),
            );

            fiber.abort(crate::error::RaceLostError);
            fiber.await
        });

        assert!(outcome.is_err());
        assert!(outcome.unwrap_err().as_abort().unwrap().reason.is::<crate::error::RaceLostError>());
    }

    #[test]
    fn spawning_on_a_non_running_parent_synthesizes_runner_closing() {
        let r = root();
        r.abort(Reason::new(RunnerClosing));
        // mask-free abort flips r straight to Completing, closing it to new work.

        let result = block_on(async move {
            let fiber = run(&r, Task::<i32, String>::new(|_runner| async { Ok(1) }));
            fiber.await
        });

        assert!(result.unwrap_err().as_abort().unwrap().reason.is::<RunnerClosing>());
    }

    #[test]
    fn daemon_fiber_does_not_block_parent_disposal() {
        let r = root();

        block_on(async move {
            let never_settles = daemon(
                &r,
                Task::<(), String>::new(|_runner| async {
                    loop {
                        crate::executor::YieldNow::new().await;
                    }
                }),
            );
            assert!(!never_settles.is_settled());

            r.dispose().await;
            assert_eq!(r.state(), RunnerState::Completed);
        });
    }
}
