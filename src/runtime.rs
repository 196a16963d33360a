//! [`Runtime`] — the "Context" component: process-wide reactive state and the root scope.

use std::cell::{Cell, RefCell};

use slotmap::{Key, SlotMap};

use crate::edge::{Edge, EdgeId};
use crate::node::{Node, NodeFlags, NodeHandle, NodeId};
use crate::scheduler::Scheduler;

thread_local! {
    static GLOBAL_RUNTIME: Cell<Option<&'static Runtime>> = const { Cell::new(None) };
}

/// The reactive runtime. Usually obtained as a leaked `'static` via [`create_root`], so that
/// signal/memo/effect handles can be `'static` and `Copy` without threading a lifetime parameter
/// through every call site.
pub(crate) struct Runtime {
    pub nodes: RefCell<SlotMap<NodeId, Node>>,
    pub edges: RefCell<SlotMap<EdgeId, Edge>>,
    /// The node currently executing a tracked body. Doubles as the owner scope for `on_cleanup`
    /// and for newly created child nodes.
    pub consumer_scope: Cell<NodeId>,
    pub root_node: Cell<NodeId>,
    pub global_version: Cell<u32>,
    pub batch_depth: Cell<u32>,
    pub scheduler: Scheduler,
}

impl Runtime {
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn global() -> &'static Runtime {
        GLOBAL_RUNTIME.with(|rt| rt.get()).expect(
            "no reactive runtime found: this function must be called inside `create_root`",
        )
    }

    pub fn try_global() -> Option<&'static Runtime> {
        GLOBAL_RUNTIME.with(|rt| rt.get())
    }

    pub fn set_global(rt: Option<&'static Runtime>) -> Option<&'static Runtime> {
        GLOBAL_RUNTIME.with(|slot| slot.replace(rt))
    }

    /// Creates a new, leaked runtime with a root scope node.
    pub fn new_static() -> &'static Runtime {
        let this = Runtime {
            nodes: RefCell::new(SlotMap::default()),
            edges: RefCell::new(SlotMap::default()),
            consumer_scope: Cell::new(NodeId::null()),
            root_node: Cell::new(NodeId::null()),
            global_version: Cell::new(0),
            batch_depth: Cell::new(0),
            scheduler: Scheduler::default(),
        };
        let this = Box::leak(Box::new(this));
        let root = this.nodes.borrow_mut().insert(Node::new_scope(NodeId::null()));
        this.root_node.set(root);
        this
    }

    /// Tears down everything owned by this runtime and creates a fresh root scope. Used by tests
    /// that want a clean slate without leaking a new `Runtime` for every case.
    pub fn reinit(&'static self) {
        NodeHandle(self.root_node.get()).dispose();
        self.batch_depth.set(0);
        self.global_version.set(0);
        self.consumer_scope.set(NodeId::null());
        let prev = Runtime::set_global(Some(self));
        let root = self.nodes.borrow_mut().insert(Node::new_scope(NodeId::null()));
        self.root_node.set(root);
        Runtime::set_global(prev);
    }

    /// Creates a new child scope owned by the currently-running node.
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn create_child_scope(&'static self, f: impl FnOnce()) -> NodeHandle {
        let parent = self.consumer_scope.get();
        let parent = if parent.is_null() { self.root_node.get() } else { parent };
        let node = self.nodes.borrow_mut().insert(Node::new_scope(parent));
        if let Some(p) = self.nodes.borrow_mut().get_mut(parent) {
            p.children.push(node);
        }
        let prev = self.consumer_scope.replace(node);
        f();
        self.consumer_scope.set(prev);
        NodeHandle(node)
    }

    pub fn start_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    /// Leaving the outermost batch flushes the scheduler exactly once.
    pub fn end_batch(&'static self) {
        let depth = self.batch_depth.get() - 1;
        self.batch_depth.set(depth);
        if depth == 0 {
            self.scheduler.flush(self);
        }
    }
}

/// A handle to a runtime, letting callers dispose or re-enter it.
///
/// Obtained from [`create_root`].
#[derive(Clone, Copy)]
pub struct RootHandle {
    rt: &'static Runtime,
}

impl RootHandle {
    /// Destroys everything created in this root's scope.
    pub fn dispose(&self) {
        self.rt.reinit();
    }

    /// Runs `f` with this root as the current global runtime.
    pub fn run_in<T>(&self, f: impl FnOnce() -> T) -> T {
        let prev = Runtime::set_global(Some(self.rt));
        let ret = f();
        Runtime::set_global(prev);
        ret
    }
}

/// Creates a new reactive runtime with a root scope and runs `f` inside it.
///
/// # Example
/// ```
/// # use weave_reactive::*;
/// create_root(|| {
///     let count = create_signal(0);
///     assert_eq!(count.get(), 0);
/// });
/// ```
#[must_use = "the root should eventually be disposed"]
pub fn create_root(f: impl FnOnce()) -> RootHandle {
    let rt = Runtime::new_static();
    #[cfg(not(target_arch = "wasm32"))]
    {
        // Keep the leaked allocation reachable from Miri/Valgrind's point of view.
        struct UnsafeSendPtr<T>(*const T);
        unsafe impl<T> Send for UnsafeSendPtr<T> {}
        static KEEP_ALIVE: std::sync::Mutex<Vec<UnsafeSendPtr<Runtime>>> =
            std::sync::Mutex::new(Vec::new());
        KEEP_ALIVE.lock().unwrap().push(UnsafeSendPtr(rt as *const Runtime));
    }

    let prev = Runtime::set_global(Some(rt));
    f();
    Runtime::set_global(prev);
    RootHandle { rt }
}

/// Creates a child scope of the currently-running node. Returns a handle that can be used to
/// dispose everything created inside `f` without tearing down the whole runtime.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_child_scope(f: impl FnOnce()) -> NodeHandle {
    Runtime::global().create_child_scope(f)
}

/// Registers a callback that runs when the current scope is disposed (or re-run, for a derived
/// or consumer body).
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let rt = Runtime::global();
    let current = rt.consumer_scope.get();
    if !current.is_null() {
        rt.nodes.borrow_mut()[current].cleanups.push(Box::new(f));
    }
}

/// Defers consumer flushes until the outermost `batch` call returns. Writes inside the batch are
/// observed atomically: a consumer that reads multiple batched producers never sees an
/// intermediate state.
///
/// # Example
/// ```
/// # use weave_reactive::*;
/// # create_root(|| {
/// let a = create_signal(1);
/// let b = create_signal(2);
/// let sum = create_memo(move || a.get() + b.get());
/// batch(move || {
///     a.set(10);
///     b.set(20);
/// });
/// assert_eq!(sum.get(), 30);
/// # });
/// ```
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    let rt = Runtime::global();
    rt.start_batch();
    // `f` may panic. The scheduler must still flush whatever was
    // pending before the panic continues unwinding, mirroring `try { } finally { flush() }`.
    struct EndBatchOnUnwind(&'static Runtime);
    impl Drop for EndBatchOnUnwind {
        fn drop(&mut self) {
            self.0.end_batch();
        }
    }
    let _guard = EndBatchOnUnwind(rt);
    f()
}

/// Runs `f` with tracking suspended: reads inside `f` create no edges. A nested `track` scope
/// (e.g. another signal's own recompute) restores tracking for its own extent.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    let rt = Runtime::global();
    let prev = rt.consumer_scope.replace(NodeId::null());
    let ret = f();
    rt.consumer_scope.set(prev);
    ret
}

/// Returns a handle to the node that owns whatever is currently running.
pub fn use_current_scope() -> NodeHandle {
    NodeHandle(Runtime::global().consumer_scope.get())
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn batch_flushes_pending_effects_even_when_the_body_panics() {
        create_root(|| {
            let s = create_signal(0);
            let runs = create_signal(0);
            create_effect(move || {
                s.get();
                runs.update(|n| {
                    *n += 1;
                    true
                });
            });
            assert_eq!(runs.get_untracked(), 1);

            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                batch(|| {
                    s.set(1);
                    panic!("boom");
                });
            }));
            assert!(result.is_err());

            // The effect scheduled by `s.set(1)` must have run despite the panic unwinding
            // through `batch`, not been silently dropped along with the rest of the queue.
            assert_eq!(runs.get_untracked(), 2);
        });
    }
}
