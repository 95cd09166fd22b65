//! Composable, lazy, stateful retry/repeat policies.
//!
//! A [`Schedule`] is stepped once per attempt: it either yields an output
//! plus a delay before the next attempt, or reports [`Done`]. Schedules
//! compose the way [`Iterator`] adapters do — [`ScheduleExt`] provides
//! `.take()`, `.jittered()`, `.map_schedule()` and friends as chainable
//! methods over any concrete `Schedule` implementation, so a policy reads
//! as a pipeline rather than nested constructor calls.

mod constructors;
mod transformers;

pub use constructors::*;
pub use transformers::*;

use std::time::Duration;

/// Reported once a schedule has no further steps to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done;

/// A lazy, stateful retry/repeat policy from `In` (what the caller
/// observed — an error being retried, an output being repeated) to `Out`
/// (what the schedule reports back, typically attempt count or elapsed
/// time) plus the delay before the next attempt.
pub trait Schedule<In, Out> {
    /// Advances the schedule by one step. `Err(Done)` means stop.
    fn step(&mut self, input: In) -> Result<(Out, Duration), Done>;

    /// Returns the schedule to its initial state. The default no-op is
    /// correct for schedules with no internal state to rewind (`once`,
    /// `always`); stateful schedules override it.
    fn reset(&mut self) {}
}

/// Chainable combinators over any [`Schedule`], mirroring
/// [`Iterator`]'s adapter methods.
pub trait ScheduleExt<In, Out>: Schedule<In, Out> + Sized {
    fn take(self, count: u64) -> Take<Self> {
        Take { inner: self, remaining: count }
    }

    fn max_elapsed(self, limit: Duration) -> MaxElapsed<Self> {
        MaxElapsed { inner: self, limit, start: None }
    }

    fn max_delay(self, limit: Duration) -> MaxDelay<Self> {
        MaxDelay { inner: self, limit }
    }

    fn jitter(self, random: std::rc::Rc<dyn crate::deps::Random>, factor: f64) -> Jitter<Self> {
        Jitter { inner: self, random, factor }
    }

    fn delayed(self, extra: Duration) -> Delayed<Self> {
        Delayed { inner: self, extra }
    }

    fn modify_delay<F>(self, f: F) -> ModifyDelay<Self, F>
    where
        F: FnMut(Duration) -> Duration,
    {
        ModifyDelay { inner: self, f }
    }

    fn compensate(self) -> Compensate<Self> {
        Compensate { inner: self, last_step_at: None }
    }

    fn while_input<F>(self, predicate: F) -> WhileInput<Self, F>
    where
        F: Fn(&In) -> bool,
    {
        WhileInput { inner: self, predicate, negate: false }
    }

    fn until_input<F>(self, predicate: F) -> WhileInput<Self, F>
    where
        F: Fn(&In) -> bool,
    {
        WhileInput { inner: self, predicate, negate: true }
    }

    fn while_output<F>(self, predicate: F) -> WhileOutput<Self, F>
    where
        F: Fn(&Out) -> bool,
    {
        WhileOutput { inner: self, predicate, negate: false }
    }

    fn until_output<F>(self, predicate: F) -> WhileOutput<Self, F>
    where
        F: Fn(&Out) -> bool,
    {
        WhileOutput { inner: self, predicate, negate: true }
    }

    fn reset_after(self, duration: Duration) -> ResetAfter<Self> {
        ResetAfter { inner: self, duration, started: None }
    }

    fn map_schedule<Out2, F>(self, f: F) -> MapSchedule<Self, F, Out>
    where
        F: FnMut(Out) -> Out2,
    {
        MapSchedule { inner: self, f, _marker: std::marker::PhantomData }
    }

    fn passthrough(self) -> Passthrough<Self, Out>
    where
        In: Clone,
    {
        Passthrough { inner: self, _marker: std::marker::PhantomData }
    }

    fn fold_schedule<Acc, F>(self, initial: Acc, f: F) -> FoldSchedule<Self, Acc, F, Out>
    where
        Acc: Clone,
        F: FnMut(Acc, Out) -> Acc,
    {
        FoldSchedule { inner: self, accumulator: initial, f, _marker: std::marker::PhantomData }
    }

    fn repetitions(self) -> Repetitions<Self, Out> {
        Repetitions { inner: self, count: 0, _marker: std::marker::PhantomData }
    }

    fn delays(self) -> Delays<Self, Out> {
        Delays { inner: self, _marker: std::marker::PhantomData }
    }

    fn collect_all(self) -> CollectAll<Self, Out>
    where
        Out: Clone,
    {
        CollectAll { inner: self, collected: Vec::new(), stop_when: None }
    }

    fn collect_while<F>(self, predicate: F) -> CollectAll<Self, Out>
    where
        Out: Clone,
        F: Fn(&Out) -> bool + 'static,
    {
        CollectAll {
            inner: self,
            collected: Vec::new(),
            stop_when: Some(Box::new(move |out| !predicate(out))),
        }
    }

    fn collect_until<F>(self, predicate: F) -> CollectAll<Self, Out>
    where
        Out: Clone,
        F: Fn(&Out) -> bool + 'static,
    {
        CollectAll { inner: self, collected: Vec::new(), stop_when: Some(Box::new(predicate)) }
    }

    fn when_input<F>(self, predicate: F) -> WhenInput<Self, F>
    where
        In: Clone,
        Out: Default,
        F: Fn(&In) -> bool,
    {
        WhenInput { inner: self, predicate }
    }

    fn tap_output<F>(self, f: F) -> TapOutput<Self, F>
    where
        F: FnMut(&Out),
    {
        TapOutput { inner: self, f }
    }

    fn tap_input<F>(self, f: F) -> TapInput<Self, F>
    where
        F: FnMut(&In),
    {
        TapInput { inner: self, f }
    }
}

impl<In, Out, S: Schedule<In, Out>> ScheduleExt<In, Out> for S {}

/// Runs `a` to completion, then `b`, never looping back to `a` once both
/// are exhausted.
pub fn sequence_schedules<In, Out, A, B>(a: A, b: B) -> SequenceSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, Out>,
    B: Schedule<In, Out>,
{
    SequenceSchedules { a, b, in_second: false }
}

/// Steps both schedules on every input; continues only while both still
/// have a next step, waiting as long as the slower of the two requires.
pub fn intersect_schedules<In, OutA, OutB, A, B>(a: A, b: B) -> IntersectSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, OutA>,
    B: Schedule<In, OutB>,
{
    IntersectSchedules { a, b }
}

/// Steps both schedules on every input; continues while either still has
/// a next step, waiting only as long as the faster of the two requires.
pub fn union_schedules<In, OutA, OutB, A, B>(a: A, b: B) -> UnionSchedules<A, B>
where
    In: Clone,
    A: Schedule<In, OutA>,
    B: Schedule<In, OutB>,
{
    UnionSchedules { a, b, a_done: false, b_done: false }
}

/// Either side of a [`union_schedules`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either<A, B> {
    Left(A),
    Right(B),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn forever_never_reports_done() {
        let mut schedule = forever();
        for attempt in 0..5u64 {
            assert_eq!(schedule.step(()), Ok((attempt, Duration::ZERO)));
        }
    }

    #[test]
    fn recurs_stops_after_n_steps() {
        let mut schedule = recurs(3);
        assert!(schedule.step(()).is_ok());
        assert!(schedule.step(()).is_ok());
        assert!(schedule.step(()).is_ok());
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn exponential_doubles_each_attempt() {
        let mut schedule = exponential(Duration::from_millis(10), 2.0);
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(10));
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(20));
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(40));
    }

    #[test]
    fn max_delay_clamps_exponential_growth() {
        let mut schedule =
            <Exponential as ScheduleExt<(), u64>>::max_delay(exponential(Duration::from_millis(10), 2.0), Duration::from_millis(25));
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(10));
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(20));
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(25));
    }

    #[test]
    fn take_limits_an_otherwise_infinite_schedule() {
        let mut schedule = <SpacedSchedule as ScheduleExt<(), u64>>::take(spaced(Duration::from_secs(1)), 2);
        assert!(schedule.step(()).is_ok());
        assert!(schedule.step(()).is_ok());
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn reset_rewinds_attempt_counters() {
        let mut schedule = exponential(Duration::from_millis(10), 2.0);
        schedule.step(()).unwrap();
        schedule.step(()).unwrap();
        <Exponential as Schedule<(), u64>>::reset(&mut schedule);
        assert_eq!(schedule.step(()).unwrap().1, Duration::from_millis(10));
    }

    #[test]
    fn fibonacci_grows_by_the_golden_recurrence() {
        let mut schedule = fibonacci(Duration::from_millis(10));
        let delays: Vec<Duration> = (0..5).map(|_| schedule.step(()).unwrap().0).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30),
                Duration::from_millis(50),
            ]
        );
    }

    #[test]
    fn while_output_stops_once_the_predicate_fails() {
        let mut schedule = <Forever as ScheduleExt<(), u64>>::while_output(forever(), |&attempt| attempt < 2);
        assert_eq!(schedule.step(()).unwrap().0, 0);
        assert_eq!(schedule.step(()).unwrap().0, 1);
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn collect_all_accumulates_every_output() {
        let mut schedule = <Take<Forever> as ScheduleExt<(), u64>>::collect_all(recurs(3));
        assert_eq!(schedule.step(()).unwrap().0, vec![0]);
        assert_eq!(schedule.step(()).unwrap().0, vec![0, 1]);
        assert_eq!(schedule.step(()).unwrap().0, vec![0, 1, 2]);
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn sequence_runs_the_first_schedule_then_the_second_and_then_stays_done() {
        let mut schedule = sequence_schedules::<(), u64, Take<Forever>, Take<Forever>>(recurs(1), recurs(1));
        assert!(schedule.step(()).is_ok());
        assert!(schedule.step(()).is_ok());
        assert_eq!(schedule.step(()), Err(Done));
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn intersect_stops_as_soon_as_either_side_is_done() {
        let mut schedule = intersect_schedules::<(), u64, u64, Take<Forever>, Take<Forever>>(recurs(1), recurs(3));
        assert!(schedule.step(()).is_ok());
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn union_keeps_going_until_both_sides_are_done() {
        let mut schedule = union_schedules::<(), u64, u64, Take<Forever>, Take<Forever>>(recurs(1), recurs(2));
        assert!(schedule.step(()).is_ok());
        assert!(schedule.step(()).is_ok());
        assert_eq!(schedule.step(()), Err(Done));
    }

    #[test]
    fn jitter_stays_within_the_configured_spread() {
        let random: Rc<dyn crate::deps::Random> = Rc::new(crate::deps::test::SeededRandom::new(3));
        let mut schedule = <SpacedSchedule as ScheduleExt<(), u64>>::jitter(spaced(Duration::from_millis(100)), random, 0.5);
        for _ in 0..10 {
            let (_, delay) = schedule.step(()).unwrap();
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn aws_retry_strategy_gives_up_after_max_attempts() {
        let random: Rc<dyn crate::deps::Random> = Rc::new(crate::deps::test::SeededRandom::new(9));
        let mut schedule = aws_retry_strategy(Duration::from_millis(5), Duration::from_secs(1), 3, random);
        let reason = crate::error::Reason::new(crate::error::RaceLostError);
        assert!(schedule.step(reason.clone()).is_ok());
        assert!(schedule.step(reason.clone()).is_ok());
        assert!(schedule.step(reason.clone()).is_ok());
        assert_eq!(schedule.step(reason), Err(Done));
    }

    #[test]
    fn windowed_aligns_to_the_next_interval_boundary() {
        let mut schedule = windowed(Duration::from_millis(100));
        let (_, first) = schedule.step(()).unwrap();
        assert_eq!(first, Duration::from_millis(100));
        let (_, second) = schedule.step(()).unwrap();
        assert_eq!(second, Duration::from_millis(100));
    }

    #[test]
    fn unfold_builds_a_schedule_from_a_seed_and_step_function() {
        let mut schedule = unfold(1u64, |n| if n <= 8 { Some((n * 2, n, Duration::ZERO)) } else { None });
        assert_eq!(schedule.step(()).unwrap().0, 1);
        assert_eq!(schedule.step(()).unwrap().0, 2);
        assert_eq!(schedule.step(()).unwrap().0, 4);
        assert_eq!(schedule.step(()).unwrap().0, 8);
        assert_eq!(schedule.step(()), Err(Done));
    }
}
