//! The thread-local, single-threaded reactor and scheduler.
//!
//! Every [`crate::Runner`] spawns a boxed future into this executor; the
//! executor polls exactly one ready future at a time (no preemption) and
//! parks the OS thread on the nearest pending timer when nothing is ready.
//! This mirrors the teacher event loop's `ready_tasks` queue and
//! `waker_fn`-based rescheduling, generalized from an io_uring completion
//! queue to a generic timer wheel since this crate has no I/O of its own.

use slotmap::{new_key_type, SlotMap};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

new_key_type! {
    pub(crate) struct FiberKey;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

struct Timer {
    deadline: Instant,
    waker: Waker,
    cancelled: bool,
}

struct ExecutorState {
    fibers: SlotMap<FiberKey, Pin<Box<dyn Future<Output = ()>>>>,
    ready: VecDeque<FiberKey>,
    scheduled: HashSet<FiberKey>,
    timers: Vec<(TimerToken, Timer)>,
    next_timer_id: u64,
}

impl ExecutorState {
    fn new() -> Self {
        ExecutorState {
            fibers: SlotMap::with_key(),
            ready: VecDeque::new(),
            scheduled: HashSet::new(),
            timers: Vec::new(),
            next_timer_id: 0,
        }
    }
}

thread_local! {
    static EXECUTOR: RefCell<Option<ExecutorState>> = RefCell::new(None);
}

/// Runs `future` to completion on a fresh executor, polling every fiber
/// spawned (directly or transitively) during its lifetime.
///
/// Panics if called while already inside a `block_on` on this thread —
/// nested runtimes aren't supported, spawn a fiber instead.
pub fn block_on<T: 'static>(future: impl Future<Output = T> + 'static) -> T {
    EXECUTOR.with(|cell| {
        if cell.borrow().is_some() {
            panic!("supervisy: block_on cannot be nested, spawn a fiber onto the existing runtime instead");
        }
        *cell.borrow_mut() = Some(ExecutorState::new());
    });

    let output = std::rc::Rc::new(RefCell::new(None));
    let output_slot = output.clone();
    let key = spawn(async move {
        *output_slot.borrow_mut() = Some(future.await);
    });

    run_until(|| output.borrow().is_some());

    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        state.as_mut().unwrap().fibers.remove(key);
        *cell.borrow_mut() = None;
    });

    let value = output.borrow_mut().take().unwrap();
    value
}

/// Registers a future with the executor; it will be polled the next time
/// the scheduler drains the ready queue.
pub(crate) fn spawn(future: impl Future<Output = ()> + 'static) -> FiberKey {
    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state.as_mut().expect("supervisy: no runtime is running on this thread");
        let key = state.fibers.insert(Box::pin(future));
        state.ready.push_back(key);
        state.scheduled.insert(key);
        key
    })
}

fn wake(key: FiberKey) {
    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let Some(state) = state.as_mut() else { return };
        if state.fibers.contains_key(key) && state.scheduled.insert(key) {
            state.ready.push_back(key);
        }
    });
}

fn make_waker(key: FiberKey) -> Waker {
    waker_fn::waker_fn(move || wake(key))
}

/// Drains the ready queue and parks on timers until `done` reports true.
fn run_until(done: impl Fn() -> bool) {
    loop {
        if done() {
            return;
        }

        let next_ready = EXECUTOR.with(|cell| cell.borrow_mut().as_mut().unwrap().ready.pop_front());

        let Some(key) = next_ready else {
            if done() {
                return;
            }
            park_until_next_timer();
            continue;
        };

        EXECUTOR.with(|cell| {
            cell.borrow_mut().as_mut().unwrap().scheduled.remove(&key);
        });

        tracing::trace!(?key, "scheduler polling fiber");

        let waker = make_waker(key);
        let mut context = Context::from_waker(&waker);

        let poll = EXECUTOR.with(|cell| {
            let mut state = cell.borrow_mut();
            let state = state.as_mut().unwrap();
            match state.fibers.get_mut(key) {
                Some(future) => Some(future.as_mut().poll(&mut context)),
                None => None,
            }
        });

        if matches!(poll, Some(Poll::Ready(()))) {
            EXECUTOR.with(|cell| {
                cell.borrow_mut().as_mut().unwrap().fibers.remove(key);
            });
        }
    }
}

fn park_until_next_timer() {
    let next_wake = EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state.as_mut().unwrap();
        state.timers.retain(|(_, timer)| !timer.cancelled);
        state.timers.iter().map(|(_, timer)| timer.deadline).min()
    });

    let Some(deadline) = next_wake else {
        // Nothing runnable and no pending timer: the spawning future is
        // waiting on something this executor doesn't know about, which is
        // a deadlock by construction of a single-threaded cooperative
        // runtime. Yield the thread rather than spin.
        std::thread::yield_now();
        return;
    };

    let now = Instant::now();
    if deadline > now {
        std::thread::sleep(deadline - now);
    }

    let now = Instant::now();
    let due = EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state.as_mut().unwrap();
        let mut due = Vec::new();
        state.timers.retain(|(token, timer)| {
            if !timer.cancelled && timer.deadline <= now {
                due.push((*token, timer.waker.clone()));
                false
            } else {
                true
            }
        });
        due
    });

    for (_, waker) in due {
        waker.wake();
    }
}

pub(crate) fn register_timer(deadline: Instant, waker: Waker) -> TimerToken {
    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let state = state.as_mut().expect("supervisy: no runtime is running on this thread");
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let token = TimerToken(id);
        state.timers.push((
            token,
            Timer {
                deadline,
                waker,
                cancelled: false,
            },
        ));
        token
    })
}

pub(crate) fn reregister_timer(token: TimerToken, waker: Waker) {
    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let Some(state) = state.as_mut() else { return };
        if let Some((_, timer)) = state.timers.iter_mut().find(|(t, _)| *t == token) {
            timer.waker = waker;
        }
    });
}

pub(crate) fn cancel_timer(token: TimerToken) {
    EXECUTOR.with(|cell| {
        let mut state = cell.borrow_mut();
        let Some(state) = state.as_mut() else { return };
        if let Some((_, timer)) = state.timers.iter_mut().find(|(t, _)| *t == token) {
            timer.cancelled = true;
        }
    });
}

/// Returns control to the executor's ready queue once, resuming after
/// every fiber that was already ready has had its turn.
pub(crate) struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new() -> Self {
        YieldNow { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        context.waker().wake_by_ref();
        Poll::Pending
    }
}
