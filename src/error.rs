//! Sentinel error types (§7 of the task algebra).
//!
//! Every combinator-induced abort carries one of these as its [`Reason`];
//! user code can pass any `Debug + Display` value to `abort(reason)` just
//! as easily.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

trait ReasonValue: fmt::Debug + fmt::Display {
    fn as_any(&self) -> &dyn Any;
}

impl<T: fmt::Debug + fmt::Display + 'static> ReasonValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Opaque cancellation cause, never unwrapped by the runtime itself.
///
/// Compares equal to another `Reason` when their `Debug` renderings match,
/// which is enough to assert sentinel identity (`reason == RaceLostError`)
/// without requiring every user-supplied reason type to implement `Eq`.
#[derive(Clone)]
pub struct Reason(Rc<dyn ReasonValue>);

impl Reason {
    pub fn new<T: fmt::Debug + fmt::Display + 'static>(value: T) -> Self {
        Reason(Rc::new(value))
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.0.as_any().downcast_ref::<T>().is_some()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl PartialEq for Reason {
    fn eq(&self, other: &Self) -> bool {
        format!("{self:?}") == format!("{other:?}")
    }
}

impl Eq for Reason {}

/// Surfaced to a fiber's awaiter whenever the fiber was cancelled, whether
/// by an external `abort(reason)` call or by a combinator aborting a
/// sibling/loser.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("aborted: {reason}")]
pub struct AbortError {
    pub reason: Reason,
}

impl AbortError {
    pub fn new<T: fmt::Debug + fmt::Display + 'static>(reason: T) -> Self {
        AbortError { reason: Reason::new(reason) }
    }
}

/// `timeout(task, duration)` exceeded `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out")]
pub struct TimeoutError;

/// `retry(task, schedule)` exhausted its schedule without a success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("retry exhausted after {attempts} attempt(s): {cause}")]
pub struct RetryError<C> {
    pub cause: C,
    pub attempts: u64,
}

/// Awaiting a [`crate::sync::Deferred`] that was disposed before resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deferred was disposed before it resolved")]
pub struct DeferredDisposedError;

/// Acquiring or holding a [`crate::sync::Semaphore`]/[`crate::sync::Mutex`]
/// that was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("semaphore was disposed")]
pub struct SemaphoreDisposedError;

/// Reason given to every losing branch of [`crate::combinators::race`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lost the race")]
pub struct RaceLostError;

/// Reason given to siblings aborted after the first `Err` in
/// [`crate::combinators::all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sibling failed, aborting the rest of all()")]
pub struct AllAbortError;

/// Reason given to siblings aborted after the first `Err` in
/// [`crate::combinators::all_settled`] when a `withConcurrency` cap is in
/// effect and a not-yet-spawned sibling is dropped from the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("allSettled() is shutting down")]
pub struct AllSettledAbortError;

/// Reason given to the remaining branches once one has succeeded in
/// [`crate::combinators::any`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("any() already found a winner")]
pub struct AnyAbortError;

/// Reason given to siblings aborted after the first `Err` in
/// [`crate::combinators::map`]/`map_settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sibling failed, aborting the rest of map()")]
pub struct MapAbortError;

/// Reason given to every fiber still alive when its runner is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("runner is closing")]
pub struct RunnerClosing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_reasons_compare_equal_by_identity() {
        let a = AbortError::new(RaceLostError);
        let b = AbortError::new(RaceLostError);

        assert_eq!(a, b);
        assert!(a.reason.is::<RaceLostError>());
    }

    #[test]
    fn distinct_reason_types_are_not_equal() {
        let a = AbortError::new(RaceLostError);
        let b = AbortError::new(TimeoutError);

        assert_ne!(a, b);
    }

    #[test]
    fn custom_reasons_round_trip() {
        let a = AbortError::new("shutting down");

        assert_eq!(a.reason.downcast_ref::<&str>(), Some(&"shutting down"));
    }
}
