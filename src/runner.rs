//! The supervision tree: runners, cancellation, events, and snapshots.

use crate::deps::Deps;
use crate::error::{Reason, RunnerClosing};
use crate::id::Id;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::Waker;

/// A runner's lifecycle is monotonic: `Running -> Completing -> Completed`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Completing,
    Completed,
}

/// Diagnostic events bubbled from a runner to its ancestors when
/// [`Runner::set_events_enabled`] is on.
#[derive(Debug, Clone)]
pub enum Event {
    ChildAdded { child_id: Id },
    StateChanged { runner_id: Id, state: RunnerState },
    ChildRemoved { child_id: Id },
}

/// A frozen, structurally-shared view of a runner and its descendants.
///
/// `runner.snapshot() == runner.snapshot()` by reference whenever nothing
/// changed; subtrees untouched by the most recent state change keep their
/// previous snapshot `Rc` (see [`Runner::snapshot`]).
#[derive(Debug, PartialEq, Eq)]
pub struct SnapshotData {
    pub id: Id,
    pub state: RunnerState,
    pub children: Vec<Snapshot>,
}

pub type Snapshot = Rc<SnapshotData>;

type DeferFn = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()>>>>;

pub(crate) struct RunnerInner {
    id: Id,
    parent: RefCell<Option<Weak<RunnerInner>>>,
    children: RefCell<Vec<Runner>>,
    state: Cell<RunnerState>,
    request_reason: RefCell<Option<Reason>>,
    mask: Cell<u32>,
    deps: Deps,
    on_abort: RefCell<Vec<Box<dyn FnOnce(Reason)>>>,
    on_event: RefCell<Option<Box<dyn Fn(Event)>>>,
    events_enabled: Rc<Cell<bool>>,
    concurrency: Cell<NonZeroUsize>,
    defers: RefCell<Vec<DeferFn>>,
    child_removed_wakers: RefCell<Vec<Waker>>,
    snapshot_cache: RefCell<Option<Snapshot>>,
    daemon: Cell<bool>,
    abort_wakers: RefCell<Vec<Waker>>,
}

/// A node in the supervision tree: owns zero or more child runners, each
/// backing a running [`crate::Fiber`].
#[derive(Clone)]
pub struct Runner {
    pub(crate) inner: Rc<RunnerInner>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates the root of a supervision tree.
    pub fn new(deps: Deps) -> Self {
        let id = Id::fresh(&*deps.random_bytes);
        Runner {
            inner: Rc::new(RunnerInner {
                id,
                parent: RefCell::new(None),
                children: RefCell::new(Vec::new()),
                state: Cell::new(RunnerState::Running),
                request_reason: RefCell::new(None),
                mask: Cell::new(0),
                deps,
                on_abort: RefCell::new(Vec::new()),
                on_event: RefCell::new(None),
                events_enabled: Rc::new(Cell::new(false)),
                concurrency: Cell::new(NonZeroUsize::new(1).unwrap()),
                defers: RefCell::new(Vec::new()),
                child_removed_wakers: RefCell::new(Vec::new()),
                snapshot_cache: RefCell::new(None),
                daemon: Cell::new(false),
                abort_wakers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Synthesizes an already-`Completed` orphan runner carrying a
    /// runner-closing abort, for the rule-1 short-circuit in
    /// [`crate::fiber::run`] when the parent is no longer accepting work.
    pub(crate) fn synthesize_closed(deps: Deps) -> Runner {
        let runner = Runner::new(deps);
        *runner.inner.request_reason.borrow_mut() = Some(Reason::new(RunnerClosing));
        runner.inner.state.set(RunnerState::Completed);
        runner
    }

    pub fn id(&self) -> Id {
        self.inner.id
    }

    pub fn state(&self) -> RunnerState {
        self.inner.state.get()
    }

    pub fn parent(&self) -> Option<Runner> {
        self.inner
            .parent
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Runner { inner })
    }

    pub fn children(&self) -> Vec<Runner> {
        self.inner.children.borrow().clone()
    }

    pub fn deps(&self) -> &Deps {
        &self.inner.deps
    }

    /// Raw cancellation request, visible through masks (`requestSignal`).
    pub fn request_aborted(&self) -> bool {
        self.inner.request_reason.borrow().is_some()
    }

    /// Effective cancellation signal: requested and no active mask.
    pub fn signal_aborted(&self) -> bool {
        self.request_aborted() && self.inner.mask.get() == 0
    }

    pub fn signal_reason(&self) -> Option<Reason> {
        self.inner.request_reason.borrow().clone()
    }

    pub fn events_enabled(&self) -> bool {
        self.inner.events_enabled.get()
    }

    pub fn set_events_enabled(&self, enabled: bool) {
        self.inner.events_enabled.set(enabled);
    }

    pub fn concurrency(&self) -> NonZeroUsize {
        self.inner.concurrency.get()
    }

    pub fn set_concurrency(&self, n: NonZeroUsize) {
        self.inner.concurrency.set(n);
    }

    pub fn on_event(&self, callback: impl Fn(Event) + 'static) {
        *self.inner.on_event.borrow_mut() = Some(Box::new(callback));
    }

    /// Registers a listener that fires exactly once with the raw
    /// cancellation reason. Fires immediately if already aborted.
    pub fn on_abort(&self, callback: impl FnOnce(Reason) + 'static) {
        if let Some(reason) = self.signal_raw_reason_if_requested() {
            callback(reason);
            return;
        }
        self.inner.on_abort.borrow_mut().push(Box::new(callback));
    }

    fn signal_raw_reason_if_requested(&self) -> Option<Reason> {
        self.inner.request_reason.borrow().clone()
    }

    /// Requests cancellation of this runner and every descendant.
    #[tracing::instrument(level = "debug", skip(self, reason), fields(runner = ?self.id()))]
    pub fn abort(&self, reason: Reason) {
        let already_requested = self.inner.request_reason.borrow().is_some();
        if already_requested {
            return;
        }

        tracing::debug!(reason = %reason, "runner aborting");
        *self.inner.request_reason.borrow_mut() = Some(reason.clone());

        for listener in self.inner.on_abort.borrow_mut().drain(..) {
            listener(reason.clone());
        }

        if self.inner.mask.get() == 0 {
            self.transition(RunnerState::Completing);
            self.wake_abort_waiters();
        }

        for child in self.children() {
            child.abort(reason.clone());
        }
    }

    fn wake_abort_waiters(&self) {
        for waker in std::mem::take(&mut *self.inner.abort_wakers.borrow_mut()) {
            waker.wake();
        }
    }

    /// A future that resolves once this runner's effective (unmasked)
    /// cancellation signal is observed true — the primitive combinators
    /// like `race`/`timeout`/`all` race a sibling's work against this to
    /// stop awaiting it the moment a sibling fails or the deadline passes,
    /// without requiring the sibling's own body to poll for cancellation.
    pub fn aborted(&self) -> Aborted {
        Aborted { runner: self.clone() }
    }

    fn transition(&self, state: RunnerState) {
        if self.inner.state.get() == state {
            return;
        }
        tracing::debug!(runner = ?self.id(), from = ?self.inner.state.get(), to = ?state, "runner state transition");
        self.inner.state.set(state);
        self.emit(Event::StateChanged { runner_id: self.id(), state });
    }

    fn emit(&self, event: Event) {
        if !self.events_enabled() {
            return;
        }
        if let Some(callback) = self.inner.on_event.borrow().as_ref() {
            callback(event.clone());
        }
        if let Some(parent) = self.parent() {
            parent.emit(event);
        }
    }

    pub(crate) fn enter_mask(&self) -> u32 {
        let depth = self.inner.mask.get() + 1;
        self.inner.mask.set(depth);
        depth
    }

    pub(crate) fn exit_mask(&self) {
        let depth = self.inner.mask.get();
        assert!(depth > 0, "supervisy: unabortable mask underflow");
        self.inner.mask.set(depth - 1);
        if depth - 1 == 0 && self.request_aborted() {
            self.transition(RunnerState::Completing);
            self.wake_abort_waiters();
        }
    }

    pub(crate) fn mask_depth(&self) -> u32 {
        self.inner.mask.get()
    }

    /// Spawns a fresh child runner, inheriting deps/concurrency/events.
    /// Returns `None` if `self` is no longer accepting new work (rule 1 of
    /// §4.1's creation sequence — the caller should synthesize a
    /// runner-closing abort for the fiber it was about to create).
    pub(crate) fn spawn_child(&self) -> Option<Runner> {
        self.spawn_child_with_daemon(false)
    }

    /// Like [`Runner::spawn_child`], but the child is excluded from the
    /// parent's structured-disposal wait (§11: daemon fibers).
    pub(crate) fn spawn_daemon_child(&self) -> Option<Runner> {
        self.spawn_child_with_daemon(true)
    }

    fn spawn_child_with_daemon(&self, daemon: bool) -> Option<Runner> {
        if self.state() != RunnerState::Running {
            return None;
        }

        let child_id = Id::fresh(&*self.inner.deps.random_bytes);
        let child = Runner {
            inner: Rc::new(RunnerInner {
                id: child_id,
                parent: RefCell::new(Some(Rc::downgrade(&self.inner))),
                children: RefCell::new(Vec::new()),
                state: Cell::new(RunnerState::Running),
                request_reason: RefCell::new(None),
                mask: Cell::new(0),
                deps: self.inner.deps.clone(),
                on_abort: RefCell::new(Vec::new()),
                on_event: RefCell::new(None),
                events_enabled: self.inner.events_enabled.clone(),
                concurrency: Cell::new(self.concurrency()),
                defers: RefCell::new(Vec::new()),
                child_removed_wakers: RefCell::new(Vec::new()),
                snapshot_cache: RefCell::new(None),
                daemon: Cell::new(daemon),
                abort_wakers: RefCell::new(Vec::new()),
            }),
        };

        self.inner.children.borrow_mut().push(child.clone());
        tracing::trace!(parent = ?self.id(), child = ?child_id, daemon, "spawned child runner");
        self.emit(Event::ChildAdded { child_id });

        if let Some(reason) = self.signal_raw_reason_if_requested() {
            child.abort(reason);
        }

        Some(child)
    }

    pub fn is_daemon(&self) -> bool {
        self.inner.daemon.get()
    }

    pub(crate) fn remove_child(&self, child_id: Id) {
        self.inner.children.borrow_mut().retain(|c| c.id() != child_id);
        tracing::trace!(parent = ?self.id(), child = ?child_id, "removed settled child runner");
        self.emit(Event::ChildRemoved { child_id });
        let wakers = std::mem::take(&mut *self.inner.child_removed_wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers a cleanup task that survives the calling fiber's scope by
    /// attaching to the root runner's defer list (§4.1: "disposal is
    /// attached to the root ... not to the ephemeral factory scope").
    pub fn defer(&self, cleanup: impl Future<Output = ()> + 'static) {
        let root = self.root();
        root.inner.defers.borrow_mut().push(Box::new(move || Box::pin(cleanup) as Pin<Box<dyn Future<Output = ()>>>));
    }

    fn root(&self) -> Runner {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Awaits until every direct child has settled and been removed.
    pub(crate) fn children_settled(&self) -> ChildrenSettled {
        ChildrenSettled { runner: self.clone() }
    }

    /// Runs the full disposal sequence: abort children, await them, run
    /// defers LIFO, transition to completed.
    pub(crate) async fn dispose(&self) {
        tracing::debug!(runner = ?self.id(), "runner disposing");

        self.transition(RunnerState::Completing);

        for child in self.children() {
            if child.state() != RunnerState::Completed {
                child.abort(Reason::new(RunnerClosing));
            }
        }

        self.children_settled().await;

        let defers = std::mem::take(&mut *self.inner.defers.borrow_mut());
        tracing::trace!(runner = ?self.id(), count = defers.len(), "running deferred cleanups");
        for defer in defers.into_iter().rev() {
            defer().await;
        }

        self.transition(RunnerState::Completed);
    }

    /// A frozen, reference-shared view of this runner and its descendants.
    /// See [`SnapshotData`] for the structural-sharing contract.
    pub fn snapshot(&self) -> Snapshot {
        let children: Vec<Snapshot> = self.children().iter().map(Runner::snapshot).collect();
        let state = self.state();

        if let Some(prev) = self.inner.snapshot_cache.borrow().as_ref() {
            let same_children = prev.children.len() == children.len()
                && prev.children.iter().zip(children.iter()).all(|(a, b)| Rc::ptr_eq(a, b));
            if prev.state == state && same_children {
                return prev.clone();
            }
        }

        let fresh: Snapshot = Rc::new(SnapshotData { id: self.id(), state, children });
        *self.inner.snapshot_cache.borrow_mut() = Some(fresh.clone());
        fresh
    }
}

pub(crate) struct ChildrenSettled {
    runner: Runner,
}

impl Future for ChildrenSettled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, context: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        if self.runner.children().iter().all(|c| c.is_daemon()) {
            return std::task::Poll::Ready(());
        }
        self.runner.inner.child_removed_wakers.borrow_mut().push(context.waker().clone());
        std::task::Poll::Pending
    }
}

pub struct Aborted {
    runner: Runner,
}

impl Future for Aborted {
    type Output = ();

    fn poll(self: Pin<&mut Self>, context: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        if self.runner.signal_aborted() {
            return std::task::Poll::Ready(());
        }
        self.runner.inner.abort_wakers.borrow_mut().push(context.waker().clone());
        std::task::Poll::Pending
    }
}
