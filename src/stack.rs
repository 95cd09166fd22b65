//! `AsyncDisposableStack`: a LIFO bag of cleanup actions, the building
//! block behind a runner's own defer list and available directly to task
//! bodies that manage several short-lived resources.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Anything that knows how to tear itself down asynchronously.
pub trait AsyncDisposable {
    fn dispose(self) -> Pin<Box<dyn Future<Output = ()>>>;
}

type Cleanup = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()>>>>;

/// Accumulates disposal actions and runs them last-registered-first when
/// [`AsyncDisposableStack::dispose_async`] is called (or never, if the
/// stack is [`AsyncDisposableStack::move_out`]'d into a longer-lived one).
///
/// Disposal runs unmasked: a stack doesn't check or honour any runner's
/// cancellation signal, because cleanup must happen regardless of why the
/// surrounding scope is unwinding.
pub struct AsyncDisposableStack {
    entries: RefCell<Vec<Cleanup>>,
    disposed: Cell<bool>,
}

impl fmt::Debug for AsyncDisposableStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDisposableStack")
            .field("pending", &self.entries.borrow().len())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}

impl Default for AsyncDisposableStack {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDisposableStack {
    pub fn new() -> Self {
        AsyncDisposableStack {
            entries: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Registers a bare cleanup future, run in LIFO order on disposal.
    pub fn defer(&self, cleanup: impl Future<Output = ()> + 'static) {
        self.push(Box::new(move || Box::pin(cleanup) as Pin<Box<dyn Future<Output = ()>>>));
    }

    /// Registers `value`'s own disposer and hands `value` back so it can
    /// still be used for the remainder of the scope.
    pub fn use_disposable<D: AsyncDisposable + 'static>(&self, value: D) -> AdoptedHandle<D> {
        let shared = std::rc::Rc::new(RefCell::new(Some(value)));
        let for_cleanup = shared.clone();
        self.push(Box::new(move || match for_cleanup.borrow_mut().take() {
            Some(value) => value.dispose(),
            None => Box::pin(async {}),
        }));
        AdoptedHandle { shared }
    }

    /// Registers an arbitrary value plus an explicit disposer, for values
    /// that don't implement [`AsyncDisposable`] themselves.
    pub fn adopt<V: 'static, F, Fut>(&self, value: V, dispose: F) -> AdoptedHandle<V>
    where
        F: FnOnce(V) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let shared = std::rc::Rc::new(RefCell::new(Some(value)));
        let for_cleanup = shared.clone();
        self.push(Box::new(move || match for_cleanup.borrow_mut().take() {
            Some(value) => Box::pin(dispose(value)) as Pin<Box<dyn Future<Output = ()>>>,
            None => Box::pin(async {}),
        }));
        AdoptedHandle { shared }
    }

    fn push(&self, cleanup: Cleanup) {
        assert!(!self.disposed.get(), "supervisy: used a disposed AsyncDisposableStack");
        self.entries.borrow_mut().push(cleanup);
    }

    /// Transfers every pending cleanup into a new stack and marks `self`
    /// disposed without running any of them — for handing ownership of a
    /// scope's resources up to a caller that will outlive it.
    pub fn move_out(&self) -> AsyncDisposableStack {
        assert!(!self.disposed.get(), "supervisy: moved a disposed AsyncDisposableStack");
        self.disposed.set(true);
        AsyncDisposableStack {
            entries: RefCell::new(std::mem::take(&mut *self.entries.borrow_mut())),
            disposed: Cell::new(false),
        }
    }

    /// Runs every pending cleanup LIFO, then marks the stack disposed.
    /// Idempotent: a second call is a no-op.
    pub async fn dispose_async(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        for cleanup in entries.into_iter().rev() {
            cleanup().await;
        }
    }
}

/// A value registered with an [`AsyncDisposableStack`], still reachable
/// until the stack disposes it.
pub struct AdoptedHandle<V> {
    shared: std::rc::Rc<RefCell<Option<V>>>,
}

impl<V> AdoptedHandle<V> {
    pub fn with<R>(&self, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.shared.borrow().as_ref().map(f)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.borrow().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::block_on;
    use std::rc::Rc;

    #[test]
    fn runs_defers_in_lifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let stack = AsyncDisposableStack::new();

        for i in 0..3 {
            let log = log.clone();
            stack.defer(async move { log.borrow_mut().push(i) });
        }

        block_on(async move { stack.dispose_async().await });
        assert_eq!(*log.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn dispose_is_idempotent() {
        let log = Rc::new(RefCell::new(0));
        let stack = AsyncDisposableStack::new();
        let log2 = log.clone();
        stack.defer(async move { *log2.borrow_mut() += 1 });

        block_on(async move {
            stack.dispose_async().await;
            stack.dispose_async().await;
        });

        assert_eq!(*log.borrow(), 1);
    }

    #[test]
    #[should_panic]
    fn using_a_disposed_stack_panics() {
        let stack = AsyncDisposableStack::new();
        block_on({
            let stack_ref = &stack;
            async move { stack_ref.dispose_async().await }
        });
        stack.defer(async {});
    }

    #[test]
    fn move_out_transfers_without_running_cleanups() {
        let log = Rc::new(RefCell::new(0));
        let outer = AsyncDisposableStack::new();
        let log2 = log.clone();
        outer.defer(async move { *log2.borrow_mut() += 1 });

        let inner = outer.move_out();
        assert!(outer.is_disposed());
        assert_eq!(*log.borrow(), 0);

        block_on(async move { inner.dispose_async().await });
        assert_eq!(*log.borrow(), 1);
    }

    #[test]
    fn adopted_handle_stays_usable_until_disposed() {
        let stack = AsyncDisposableStack::new();
        let handle = stack.adopt(42, |_value| async {});

        assert_eq!(handle.with(|v| *v), Some(42));
        block_on(async move { stack.dispose_async().await });
        assert!(handle.is_disposed());
    }
}
