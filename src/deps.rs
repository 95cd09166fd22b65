//! Dependency capabilities consumed by the runtime and by task bodies.
//!
//! A [`Deps`] record is built once per root runner and flows down the
//! runner tree unchanged; child runners share the same `Rc`-backed
//! capabilities as their parent. Swap the whole record for [`test::deps`]
//! to get deterministic, manually-advanced time and seeded randomness.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Monotonic-ish clock, plus a cancelable delay primitive.
pub trait Time {
    /// Milliseconds since some arbitrary but fixed epoch.
    fn now(&self) -> u64;

    /// Future that resolves once `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()>>>;
}

/// Uniform [0, 1) sampling, used by [`crate::schedule::transformers::jitter`].
pub trait Random {
    fn next(&self) -> f64;
}

/// Byte generation, used for fiber and runner [`crate::id::Id`]s.
pub trait RandomBytes {
    fn next(&self, n: usize) -> Vec<u8>;
}

/// Structured logger absorbed by the runner as `run.console`.
pub trait Console {
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn enabled(&self) -> bool;
}

/// The dependency record threaded through every runner in a tree.
#[derive(Clone)]
pub struct Deps {
    pub time: Rc<dyn Time>,
    pub random: Rc<dyn Random>,
    pub random_bytes: Rc<dyn RandomBytes>,
    pub console: Rc<dyn Console>,
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deps").finish_non_exhaustive()
    }
}

impl Deps {
    /// Production dependency record, backed by the host clock, `rand`'s
    /// thread-local generator, and stderr/stdout logging.
    pub fn production() -> Self {
        Deps {
            time: Rc::new(RealTime::new()),
            random: Rc::new(OsRandom),
            random_bytes: Rc::new(OsRandom),
            console: Rc::new(StdConsole { enabled: true }),
        }
    }
}

impl Default for Deps {
    fn default() -> Self {
        Deps::production()
    }
}

/// Host-clock implementation, timers are driven by [`crate::executor`].
struct RealTime {
    epoch: Instant,
}

impl RealTime {
    fn new() -> Self {
        RealTime { epoch: Instant::now() }
    }
}

impl Time for RealTime {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()>>> {
        Box::pin(RealSleep::new(duration))
    }
}

/// Future backing [`RealTime::sleep`]; registers and cancels a timer with
/// the thread-local executor reactor.
struct RealSleep {
    deadline: Instant,
    token: Option<crate::executor::TimerToken>,
}

impl RealSleep {
    fn new(duration: Duration) -> Self {
        RealSleep {
            deadline: Instant::now() + duration,
            token: None,
        }
    }
}

impl Future for RealSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if Instant::now() >= self.deadline {
            return Poll::Ready(());
        }

        let deadline = self.deadline;
        match self.token {
            Some(token) => crate::executor::reregister_timer(token, context.waker().clone()),
            None => self.token = Some(crate::executor::register_timer(deadline, context.waker().clone())),
        }

        Poll::Pending
    }
}

impl Drop for RealSleep {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            crate::executor::cancel_timer(token);
        }
    }
}

struct OsRandom;

impl Random for OsRandom {
    fn next(&self) -> f64 {
        rand::random::<f64>()
    }
}

impl RandomBytes for OsRandom {
    fn next(&self, n: usize) -> Vec<u8> {
        (0..n).map(|_| rand::random::<u8>()).collect()
    }
}

struct StdConsole {
    enabled: bool,
}

impl Console for StdConsole {
    fn log(&self, message: &str) {
        if self.enabled {
            tracing::info!(target: "supervisy::console", "{message}");
        }
    }

    fn warn(&self, message: &str) {
        if self.enabled {
            tracing::warn!(target: "supervisy::console", "{message}");
        }
    }

    fn error(&self, message: &str) {
        if self.enabled {
            tracing::error!(target: "supervisy::console", "{message}");
        }
    }

    fn enabled(&self) -> bool {
        self.enabled
    }
}

/// Deterministic test doubles for the dependency traits.
pub mod test {
    use super::*;

    /// Builds a [`Deps`] record backed by [`VirtualClock`], [`SeededRandom`],
    /// and a [`RecordingConsole`].
    pub fn deps(seed: u64) -> (Deps, Rc<VirtualClock>, Rc<RecordingConsole>) {
        let clock = Rc::new(VirtualClock::new());
        let console = Rc::new(RecordingConsole::new());
        let random = Rc::new(SeededRandom::new(seed));

        let deps = Deps {
            time: clock.clone(),
            random: random.clone(),
            random_bytes: random,
            console: console.clone(),
        };

        (deps, clock, console)
    }

    /// Time that only advances when [`VirtualClock::advance`] is called.
    ///
    /// Sleeping fibers are woken synchronously from `advance`, so schedules
    /// built on this clock settle deterministically without real delay.
    pub struct VirtualClock {
        inner: Rc<VirtualClockInner>,
    }

    struct VirtualClockInner {
        now_ms: RefCell<u64>,
        pending: RefCell<Vec<(u64, std::task::Waker)>>,
    }

    impl VirtualClock {
        pub fn new() -> Self {
            VirtualClock {
                inner: Rc::new(VirtualClockInner {
                    now_ms: RefCell::new(0),
                    pending: RefCell::new(Vec::new()),
                }),
            }
        }

        /// Moves virtual time forward and wakes every sleeper whose
        /// deadline has now passed.
        pub fn advance(&self, duration: Duration) {
            let new_now = *self.inner.now_ms.borrow() + duration.as_millis() as u64;
            *self.inner.now_ms.borrow_mut() = new_now;

            let mut pending = self.inner.pending.borrow_mut();
            let (ready, still_pending): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(deadline, _)| *deadline <= new_now);
            *pending = still_pending;
            drop(pending);

            for (_, waker) in ready {
                waker.wake();
            }
        }
    }

    impl Time for VirtualClock {
        fn now(&self) -> u64 {
            *self.inner.now_ms.borrow()
        }

        fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()>>> {
            let deadline = self.now() + duration.as_millis() as u64;
            Box::pin(VirtualSleep {
                deadline,
                inner: self.inner.clone(),
            })
        }
    }

    struct VirtualSleep {
        deadline: u64,
        inner: Rc<VirtualClockInner>,
    }

    impl Future for VirtualSleep {
        type Output = ();

        fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
            if *self.inner.now_ms.borrow() >= self.deadline {
                return Poll::Ready(());
            }

            self.inner
                .pending
                .borrow_mut()
                .push((self.deadline, context.waker().clone()));
            Poll::Pending
        }
    }

    /// Seeded, reproducible source for [`Random`], [`RandomBytes`], and
    /// fiber/runner ids.
    pub struct SeededRandom {
        state: RefCell<u64>,
    }

    impl SeededRandom {
        pub fn new(seed: u64) -> Self {
            SeededRandom {
                state: RefCell::new(seed.wrapping_mul(2685821657736338717).wrapping_add(1)),
            }
        }

        fn next_u64(&self) -> u64 {
            // xorshift64*
            let mut x = *self.state.borrow();
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            *self.state.borrow_mut() = x;
            x.wrapping_mul(0x2545F4914F6CDD1D)
        }
    }

    impl Random for SeededRandom {
        fn next(&self) -> f64 {
            (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
        }
    }

    impl RandomBytes for SeededRandom {
        fn next(&self, n: usize) -> Vec<u8> {
            let mut out = Vec::with_capacity(n);
            while out.len() < n {
                out.extend_from_slice(&self.next_u64().to_le_bytes());
            }
            out.truncate(n);
            out
        }
    }

    /// Console that records every line instead of printing it.
    pub struct RecordingConsole {
        lines: RefCell<Vec<String>>,
    }

    impl RecordingConsole {
        pub fn new() -> Self {
            RecordingConsole { lines: RefCell::new(Vec::new()) }
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.borrow().clone()
        }
    }

    impl Console for RecordingConsole {
        fn log(&self, message: &str) {
            self.lines.borrow_mut().push(format!("log: {message}"));
        }

        fn warn(&self, message: &str) {
            self.lines.borrow_mut().push(format!("warn: {message}"));
        }

        fn error(&self, message: &str) {
            self.lines.borrow_mut().push(format!("error: {message}"));
        }

        fn enabled(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::*;
    use super::{Random, Time};
    use std::time::Duration;

    #[test]
    fn virtual_clock_does_not_advance_on_its_own() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.now(), 0);
    }

    #[test]
    fn virtual_clock_advances_explicitly() {
        let clock = VirtualClock::new();
        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn seeded_random_is_deterministic() {
        let a = SeededRandom::new(7);
        let b = SeededRandom::new(7);

        assert_eq!(a.next(), b.next());
    }

    #[test]
    fn seeded_random_is_in_unit_range() {
        let r = SeededRandom::new(7);
        for _ in 0..100 {
            let sample = Random::next(&r);
            assert!((0.0..1.0).contains(&sample));
        }
    }
}
