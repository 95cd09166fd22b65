//! Building blocks for [`super::Schedule`] pipelines.

use super::{Done, Jitter, MaxDelay, Schedule, ScheduleExt};
use std::time::{Duration, Instant};

/// Recurs forever, reporting the attempt number (0-based). Input ignored.
pub struct Forever {
    attempt: u64,
}

impl<In> Schedule<In, u64> for Forever {
    fn step(&mut self, _input: In) -> Result<(u64, Duration), Done> {
        let attempt = self.attempt;
        self.attempt += 1;
        Ok((attempt, Duration::ZERO))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub fn forever() -> Forever {
    Forever { attempt: 0 }
}

/// Recurs forever with no backoff and no reported attempt count. Input
/// ignored.
pub struct Always;

impl<In> Schedule<In, ()> for Always {
    fn step(&mut self, _input: In) -> Result<((), Duration), Done> {
        Ok(((), Duration::ZERO))
    }
}

pub fn always() -> Always {
    Always
}

/// Fires exactly once.
pub struct Once {
    fired: bool,
}

impl<In> Schedule<In, ()> for Once {
    fn step(&mut self, _input: In) -> Result<((), Duration), Done> {
        if self.fired {
            return Err(Done);
        }
        self.fired = true;
        Ok(((), Duration::ZERO))
    }

    fn reset(&mut self) {
        self.fired = false;
    }
}

pub fn once() -> Once {
    Once { fired: false }
}

/// Fires exactly `n` times, then [`Done`].
pub fn recurs(n: u64) -> super::Take<Forever> {
    <Forever as ScheduleExt<(), u64>>::take(forever(), n)
}

/// Recurs forever, waiting `duration` between each attempt.
pub fn spaced(duration: Duration) -> SpacedSchedule {
    SpacedSchedule { attempt: 0, duration }
}

/// Recurs forever at a constant interval, reporting the attempt number.
pub struct SpacedSchedule {
    attempt: u64,
    duration: Duration,
}

impl<In> Schedule<In, u64> for SpacedSchedule {
    fn step(&mut self, _input: In) -> Result<(u64, Duration), Done> {
        let attempt = self.attempt;
        self.attempt += 1;
        Ok((attempt, self.duration))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// A constant interval, identical to [`spaced`]. Kept as a distinct
/// constructor for readability at call sites that mean "fixed cadence"
/// rather than "backoff with no growth".
pub fn fixed(duration: Duration) -> SpacedSchedule {
    spaced(duration)
}

/// Exponential backoff: `base * factor^attempt`.
pub struct Exponential {
    attempt: u32,
    base: Duration,
    factor: f64,
}

impl<In> Schedule<In, u64> for Exponential {
    fn step(&mut self, _input: In) -> Result<(u64, Duration), Done> {
        let delay = self.base.mul_f64(self.factor.powi(self.attempt as i32));
        let attempt = self.attempt as u64;
        self.attempt += 1;
        Ok((attempt, delay))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub fn exponential(base: Duration, factor: f64) -> Exponential {
    Exponential { attempt: 0, base, factor }
}

/// Linear backoff: `base + increment * attempt`.
pub struct Linear {
    attempt: u32,
    base: Duration,
    increment: Duration,
}

impl<In> Schedule<In, u64> for Linear {
    fn step(&mut self, _input: In) -> Result<(u64, Duration), Done> {
        let delay = self.base + self.increment * self.attempt;
        let attempt = self.attempt as u64;
        self.attempt += 1;
        Ok((attempt, delay))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub fn linear(base: Duration, increment: Duration) -> Linear {
    Linear { attempt: 0, base, increment }
}

/// Fibonacci backoff: delays follow `base, base, 2*base, 3*base, 5*base, ...`.
pub struct Fibonacci {
    previous: Duration,
    current: Duration,
}

impl<In> Schedule<In, Duration> for Fibonacci {
    fn step(&mut self, _input: In) -> Result<(Duration, Duration), Done> {
        let delay = self.current;
        let next = self.previous + self.current;
        self.previous = self.current;
        self.current = next;
        Ok((delay, delay))
    }

    fn reset(&mut self) {
        *self = fibonacci(self.previous.min(self.current));
    }
}

pub fn fibonacci(base: Duration) -> Fibonacci {
    Fibonacci { previous: Duration::ZERO, current: base }
}

/// Aligns each step to the next multiple of `interval`, measured by the
/// cumulative sum of delays this schedule has itself returned so far (not
/// wall-clock time, so it stays deterministic under a virtual clock).
pub struct Windowed {
    interval: Duration,
    elapsed: Duration,
}

impl<In> Schedule<In, u64> for Windowed {
    fn step(&mut self, _input: In) -> Result<(u64, Duration), Done> {
        let remainder = self.elapsed.as_nanos() % self.interval.as_nanos().max(1);
        let delay = self.interval - Duration::from_nanos(remainder as u64);
        self.elapsed += delay;
        let attempt = (self.elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        Ok((attempt, delay))
    }

    fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

pub fn windowed(interval: Duration) -> Windowed {
    Windowed { interval, elapsed: Duration::ZERO }
}

/// Reports wall-clock time elapsed since the first step. Never delays and
/// never completes; combine with [`super::ScheduleExt::max_elapsed`] or
/// [`during`] to bound it.
pub struct ElapsedSchedule {
    start: Option<Instant>,
}

impl<In> Schedule<In, Duration> for ElapsedSchedule {
    fn step(&mut self, _input: In) -> Result<(Duration, Duration), Done> {
        let start = *self.start.get_or_insert_with(Instant::now);
        Ok((start.elapsed(), Duration::ZERO))
    }

    fn reset(&mut self) {
        self.start = None;
    }
}

pub fn elapsed() -> ElapsedSchedule {
    ElapsedSchedule { start: None }
}

/// Like [`elapsed`], but reports [`Done`] once `duration` of wall-clock
/// time has passed since the first step.
pub struct During {
    start: Option<Instant>,
    duration: Duration,
}

impl<In> Schedule<In, Duration> for During {
    fn step(&mut self, _input: In) -> Result<(Duration, Duration), Done> {
        let start = *self.start.get_or_insert_with(Instant::now);
        let elapsed = start.elapsed();
        if elapsed >= self.duration {
            return Err(Done);
        }
        Ok((elapsed, Duration::ZERO))
    }

    fn reset(&mut self) {
        self.start = None;
    }
}

pub fn during(duration: Duration) -> During {
    During { start: None, duration }
}

/// Builds a schedule from a user-supplied step function and seed state,
/// the way [`std::iter::successors`] builds an iterator.
pub struct Unfold<S, F> {
    state: S,
    f: F,
}

impl<In, S, Out, F> Schedule<In, Out> for Unfold<S, F>
where
    S: Clone,
    F: FnMut(S) -> Option<(S, Out, Duration)>,
{
    fn step(&mut self, _input: In) -> Result<(Out, Duration), Done> {
        match (self.f)(self.state.clone()) {
            Some((next_state, out, delay)) => {
                self.state = next_state;
                Ok((out, delay))
            }
            None => Err(Done),
        }
    }
}

pub fn unfold<S, F>(initial: S, f: F) -> Unfold<S, F> {
    Unfold { state: initial, f }
}

/// A capped exponential backoff with jitter, the shape most retry call
/// sites reach for: grows from `base` by doubling, never exceeds
/// `max_delay`, randomized by 50% to avoid thundering-herd retries, and
/// gives up after `max_attempts`.
pub fn aws_retry_strategy(
    base: Duration,
    max_delay: Duration,
    max_attempts: u64,
    random: std::rc::Rc<dyn crate::deps::Random>,
) -> impl Schedule<crate::error::Reason, u64> {
    let capped: MaxDelay<Exponential> =
        <Exponential as ScheduleExt<crate::error::Reason, u64>>::max_delay(exponential(base, 2.0), max_delay);
    let jittered: Jitter<MaxDelay<Exponential>> =
        <MaxDelay<Exponential> as ScheduleExt<crate::error::Reason, u64>>::jitter(capped, random, 0.5);
    <Jitter<MaxDelay<Exponential>> as ScheduleExt<crate::error::Reason, u64>>::take(jittered, max_attempts)
}
