//! Chainable adapters over an existing [`super::Schedule`], returned by
//! [`super::ScheduleExt`]'s methods.

use super::{Done, Schedule};
use std::time::{Duration, Instant};

/// Stops after `remaining` successful steps.
pub struct Take<S> {
    pub(super) inner: S,
    pub(super) remaining: u64,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for Take<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        if self.remaining == 0 {
            return Err(Done);
        }
        let step = self.inner.step(input)?;
        self.remaining -= 1;
        Ok(step)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Stops once wall-clock time since the first step exceeds `limit`.
pub struct MaxElapsed<S> {
    pub(super) inner: S,
    pub(super) limit: Duration,
    pub(super) start: Option<Instant>,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for MaxElapsed<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let start = *self.start.get_or_insert_with(Instant::now);
        if start.elapsed() >= self.limit {
            return Err(Done);
        }
        self.inner.step(input)
    }

    fn reset(&mut self) {
        self.start = None;
        self.inner.reset();
    }
}

/// Clamps every reported delay to at most `limit`.
pub struct MaxDelay<S> {
    pub(super) inner: S,
    pub(super) limit: Duration,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for MaxDelay<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        Ok((out, delay.min(self.limit)))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Randomizes each delay by up to `factor` in either direction.
pub struct Jitter<S> {
    pub(super) inner: S,
    pub(super) random: std::rc::Rc<dyn crate::deps::Random>,
    pub(super) factor: f64,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for Jitter<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        let spread = self.random.next() * 2.0 - 1.0;
        let scaled = delay.mul_f64((1.0 + spread * self.factor).max(0.0));
        Ok((out, scaled))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Adds a constant extra delay to every step.
pub struct Delayed<S> {
    pub(super) inner: S,
    pub(super) extra: Duration,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for Delayed<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        Ok((out, delay + self.extra))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Applies an arbitrary transform to every reported delay.
pub struct ModifyDelay<S, F> {
    pub(super) inner: S,
    pub(super) f: F,
}

impl<In, Out, S, F> Schedule<In, Out> for ModifyDelay<S, F>
where
    S: Schedule<In, Out>,
    F: FnMut(Duration) -> Duration,
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        Ok((out, (self.f)(delay)))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Shortens each nominal delay by however long has actually elapsed since
/// the previous step, so the schedule's overall cadence tracks wall-clock
/// time even when the caller takes a while between steps.
pub struct Compensate<S> {
    pub(super) inner: S,
    pub(super) last_step_at: Option<Instant>,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for Compensate<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, nominal_delay) = self.inner.step(input)?;
        let now = Instant::now();
        let delay = match self.last_step_at {
            Some(previous) => nominal_delay.saturating_sub(now.saturating_duration_since(previous)),
            None => nominal_delay,
        };
        self.last_step_at = Some(now);
        Ok((out, delay))
    }

    fn reset(&mut self) {
        self.last_step_at = None;
        self.inner.reset();
    }
}

/// Stops once `predicate` no longer holds (or, negated, once it starts
/// holding) on the current input, without stepping the inner schedule.
pub struct WhileInput<S, F> {
    pub(super) inner: S,
    pub(super) predicate: F,
    pub(super) negate: bool,
}

impl<In, Out, S, F> Schedule<In, Out> for WhileInput<S, F>
where
    S: Schedule<In, Out>,
    F: Fn(&In) -> bool,
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let holds = (self.predicate)(&input);
        if holds == self.negate {
            return Err(Done);
        }
        self.inner.step(input)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Stops once `predicate` no longer holds (or, negated, once it starts
/// holding) on the freshly computed output.
pub struct WhileOutput<S, F> {
    pub(super) inner: S,
    pub(super) predicate: F,
    pub(super) negate: bool,
}

impl<In, Out, S, F> Schedule<In, Out> for WhileOutput<S, F>
where
    S: Schedule<In, Out>,
    F: Fn(&Out) -> bool,
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        let holds = (self.predicate)(&out);
        if holds == self.negate {
            return Err(Done);
        }
        Ok((out, delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Rewinds the inner schedule to its initial state if more than `duration`
/// has passed since it was started or last reset, so a long-idle caller
/// doesn't inherit a fully-exhausted backoff.
pub struct ResetAfter<S> {
    pub(super) inner: S,
    pub(super) duration: Duration,
    pub(super) started: Option<Instant>,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Out> for ResetAfter<S> {
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let now = Instant::now();
        if let Some(started) = self.started {
            if now.duration_since(started) >= self.duration {
                self.inner.reset();
            }
        }
        self.started = Some(now);
        self.inner.step(input)
    }

    fn reset(&mut self) {
        self.started = None;
        self.inner.reset();
    }
}

/// Transforms the output of every step.
pub struct MapSchedule<S, F, Out> {
    pub(super) inner: S,
    pub(super) f: F,
    pub(super) _marker: std::marker::PhantomData<fn() -> Out>,
}

impl<In, Out, Out2, S, F> Schedule<In, Out2> for MapSchedule<S, F, Out>
where
    S: Schedule<In, Out>,
    F: FnMut(Out) -> Out2,
{
    fn step(&mut self, input: In) -> Result<(Out2, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        Ok(((self.f)(out), delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Replaces the reported output with a copy of the input, keeping the
/// inner schedule's cadence and completion behavior.
pub struct Passthrough<S, Out> {
    pub(super) inner: S,
    pub(super) _marker: std::marker::PhantomData<fn() -> Out>,
}

impl<In, Out, S> Schedule<In, In> for Passthrough<S, Out>
where
    In: Clone,
    S: Schedule<In, Out>,
{
    fn step(&mut self, input: In) -> Result<(In, Duration), Done> {
        let echo = input.clone();
        let (_, delay) = self.inner.step(input)?;
        Ok((echo, delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Replaces the reported output with a running fold over every output
/// produced so far.
pub struct FoldSchedule<S, Acc, F, Out> {
    pub(super) inner: S,
    pub(super) accumulator: Acc,
    pub(super) f: F,
    pub(super) _marker: std::marker::PhantomData<fn() -> Out>,
}

impl<In, Out, Acc, S, F> Schedule<In, Acc> for FoldSchedule<S, Acc, F, Out>
where
    Acc: Clone,
    S: Schedule<In, Out>,
    F: FnMut(Acc, Out) -> Acc,
{
    fn step(&mut self, input: In) -> Result<(Acc, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        self.accumulator = (self.f)(self.accumulator.clone(), out);
        Ok((self.accumulator.clone(), delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Replaces the reported output with the running count of steps taken.
pub struct Repetitions<S, Out> {
    pub(super) inner: S,
    pub(super) count: u64,
    pub(super) _marker: std::marker::PhantomData<fn() -> Out>,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, u64> for Repetitions<S, Out> {
    fn step(&mut self, input: In) -> Result<(u64, Duration), Done> {
        let (_, delay) = self.inner.step(input)?;
        self.count += 1;
        Ok((self.count, delay))
    }

    fn reset(&mut self) {
        self.count = 0;
        self.inner.reset();
    }
}

/// Replaces the reported output with the delay that will be slept.
pub struct Delays<S, Out> {
    pub(super) inner: S,
    pub(super) _marker: std::marker::PhantomData<fn() -> Out>,
}

impl<In, Out, S: Schedule<In, Out>> Schedule<In, Duration> for Delays<S, Out> {
    fn step(&mut self, input: In) -> Result<(Duration, Duration), Done> {
        let (_, delay) = self.inner.step(input)?;
        Ok((delay, delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Accumulates every output produced so far into a growing `Vec`. When
/// built via `collect_while`/`collect_until`, also stops once the
/// predicate fires on the newest output.
pub struct CollectAll<S, Out> {
    pub(super) inner: S,
    pub(super) collected: Vec<Out>,
    pub(super) stop_when: Option<Box<dyn Fn(&Out) -> bool>>,
}

impl<In, Out, S> Schedule<In, Vec<Out>> for CollectAll<S, Out>
where
    Out: Clone,
    S: Schedule<In, Out>,
{
    fn step(&mut self, input: In) -> Result<(Vec<Out>, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        if let Some(stop_when) = &self.stop_when {
            if stop_when(&out) {
                return Err(Done);
            }
        }
        self.collected.push(out);
        Ok((self.collected.clone(), delay))
    }

    fn reset(&mut self) {
        self.collected.clear();
        self.inner.reset();
    }
}

/// Only consumes a step of the inner schedule when `predicate` holds on
/// the input; otherwise passes the input straight through with no delay
/// and without advancing the inner schedule's state.
pub struct WhenInput<S, F> {
    pub(super) inner: S,
    pub(super) predicate: F,
}

impl<In, Out, S, F> Schedule<In, Out> for WhenInput<S, F>
where
    In: Clone,
    Out: Default,
    S: Schedule<In, Out>,
    F: Fn(&In) -> bool,
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        if (self.predicate)(&input) {
            self.inner.step(input)
        } else {
            Ok((Out::default(), Duration::ZERO))
        }
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Calls `f` with a reference to every output, for logging/metrics.
pub struct TapOutput<S, F> {
    pub(super) inner: S,
    pub(super) f: F,
}

impl<In, Out, S, F> Schedule<In, Out> for TapOutput<S, F>
where
    S: Schedule<In, Out>,
    F: FnMut(&Out),
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        let (out, delay) = self.inner.step(input)?;
        (self.f)(&out);
        Ok((out, delay))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Calls `f` with a reference to every input before stepping the inner
/// schedule, for logging/metrics.
pub struct TapInput<S, F> {
    pub(super) inner: S,
    pub(super) f: F,
}

impl<In, Out, S, F> Schedule<In, Out> for TapInput<S, F>
where
    S: Schedule<In, Out>,
    F: FnMut(&In),
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        (self.f)(&input);
        self.inner.step(input)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Runs `a` to exhaustion, then `b`; once `b` is also exhausted the
/// sequence stays [`Done`] forever rather than looping back to `a`.
pub struct SequenceSchedules<A, B> {
    pub(super) a: A,
    pub(super) b: B,
    pub(super) in_second: bool,
}

impl<In, Out, A, B> Schedule<In, Out> for SequenceSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, Out>,
    B: Schedule<In, Out>,
{
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done> {
        if !self.in_second {
            match self.a.step(input.clone()) {
                Ok(step) => return Ok(step),
                Err(Done) => self.in_second = true,
            }
        }
        self.b.step(input)
    }

    fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.in_second = false;
    }
}

/// Steps both schedules on every input; continues only while both still
/// have a step, waiting as long as the slower of the two requires.
pub struct IntersectSchedules<A, B> {
    pub(super) a: A,
    pub(super) b: B,
}

impl<In, OutA, OutB, A, B> Schedule<In, (OutA, OutB)> for IntersectSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, OutA>,
    B: Schedule<In, OutB>,
{
    fn step(&mut self, input: In) -> Result<((OutA, OutB), Duration), Done> {
        let (out_a, delay_a) = self.a.step(input.clone())?;
        let (out_b, delay_b) = self.b.step(input)?;
        Ok(((out_a, out_b), delay_a.max(delay_b)))
    }

    fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }
}

/// Steps both schedules on every input; continues while either still has
/// a step, waiting only as long as the faster of the two requires. Once
/// one side is exhausted it's dropped from further consideration.
pub struct UnionSchedules<A, B> {
    pub(super) a: A,
    pub(super) b: B,
    pub(super) a_done: bool,
    pub(super) b_done: bool,
}

impl<In, OutA, OutB, A, B> Schedule<In, super::Either<OutA, OutB>> for UnionSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, OutA>,
    B: Schedule<In, OutB>,
{
    fn step(&mut self, input: In) -> Result<(super::Either<OutA, OutB>, Duration), Done> {
        let left = if self.a_done { None } else { self.a.step(input.clone()).ok() };
        if left.is_none() {
            self.a_done = true;
        }
        let right = if self.b_done { None } else { self.b.step(input).ok() };
        if right.is_none() {
            self.b_done = true;
        }

        match (left, right) {
            (Some((out, delay)), Some((_, other_delay))) => {
                Ok((super::Either::Left(out), delay.min(other_delay)))
            }
            (Some((out, delay)), None) => Ok((super::Either::Left(out), delay)),
            (None, Some((out, delay))) => Ok((super::Either::Right(out), delay)),
            (None, None) => Err(Done),
        }
    }

    fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
        self.a_done = false;
        self.b_done = false;
    }
}
