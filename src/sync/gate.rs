//! A level-triggered open/close signal that any number of fibers can wait
//! on at once.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct State {
    open: bool,
    wakers: Vec<Waker>,
}

/// Starts open or closed; `open`/`close` can be called any number of
/// times, waking every current waiter each time it transitions closed ->
/// open.
#[derive(Clone)]
pub struct Gate {
    state: Rc<RefCell<State>>,
}

impl Gate {
    pub fn open() -> Self {
        Gate { state: Rc::new(RefCell::new(State { open: true, wakers: Vec::new() })) }
    }

    pub fn closed() -> Self {
        Gate { state: Rc::new(RefCell::new(State { open: false, wakers: Vec::new() })) }
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }

    pub fn set_open(&self) {
        let mut state = self.state.borrow_mut();
        if state.open {
            return;
        }
        state.open = true;
        let wakers = std::mem::take(&mut state.wakers);
        drop(state);
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn set_closed(&self) {
        self.state.borrow_mut().open = false;
    }

    /// A future that resolves once the gate is (or becomes) open.
    pub fn wait(&self) -> GateWait {
        GateWait { state: self.state.clone() }
    }
}

pub struct GateWait {
    state: Rc<RefCell<State>>,
}

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.borrow_mut();
        if state.open {
            return Poll::Ready(());
        }
        state.wakers.push(context.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::cell::Cell;

    #[test]
    fn open_gate_does_not_block() {
        let gate = Gate::open();
        block_on(gate.wait());
    }

    #[test]
    fn closed_gate_blocks_until_opened() {
        let gate = Gate::closed();
        let opener = gate.clone();
        let reached = Rc::new(Cell::new(false));
        let reached2 = reached.clone();

        block_on(async move {
            crate::executor::spawn(async move {
                crate::executor::YieldNow::new().await;
                opener.set_open();
            });
            gate.wait().await;
            reached2.set(true);
        });

        assert!(reached.get());
    }

    #[test]
    fn reopening_wakes_new_waiters_too() {
        let gate = Gate::closed();
        gate.set_open();
        gate.set_closed();

        let waiter = gate.clone();
        let done = Rc::new(Cell::new(false));
        let done2 = done.clone();
        block_on(async move {
            crate::executor::spawn(async move {
                crate::executor::YieldNow::new().await;
                gate.set_open();
            });
            waiter.wait().await;
            done2.set(true);
        });

        assert!(done.get());
    }
}
