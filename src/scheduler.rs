//! The consumer scheduler: an intrusive FIFO queue plus the pluggable `Host` seam for deferred
//! flush strategies for deferring and coalescing consumer re-runs.

use std::cell::{Cell, RefCell};

use slotmap::Key;

use crate::node::{NodeFlags, NodeId};
use crate::runtime::Runtime;

/// How a consumer's re-runs (not its initial synchronous run) get flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Flush synchronously as soon as the scheduler runs, inside the batch that dirtied it.
    #[default]
    Sync,
    /// Defer to the host's microtask queue.
    Microtask,
    /// Defer to the host's next animation frame.
    AnimationFrame,
    /// Coalesce repeated wake-ups within a debounce window.
    Debounced { millis: u32 },
}

/// A seam for bridging deferred strategies to a real event loop. The core ships only
/// [`SyncHost`], which runs everything immediately; a host environment (e.g. a GUI event loop or
/// a wasm binding, both out of scope for this crate) would implement the others for real.
pub trait Host {
    fn schedule_microtask(&self, run: Box<dyn FnOnce()>);
    fn schedule_animation_frame(&self, run: Box<dyn FnOnce()>);
    fn schedule_debounced(&self, millis: u32, run: Box<dyn FnOnce()>);
}

/// The default host: every deferred strategy runs immediately, as if it were [`Strategy::Sync`].
/// Correct (if not actually deferred) because the core never promises a particular deferred
/// timing — that guarantee is a host's to make, not the core's.
#[derive(Default)]
pub struct SyncHost;

impl Host for SyncHost {
    fn schedule_microtask(&self, run: Box<dyn FnOnce()>) {
        run();
    }
    fn schedule_animation_frame(&self, run: Box<dyn FnOnce()>) {
        run();
    }
    fn schedule_debounced(&self, _millis: u32, run: Box<dyn FnOnce()>) {
        run();
    }
}

pub(crate) struct Scheduler {
    head: Cell<NodeId>,
    tail: Cell<NodeId>,
    host: RefCell<Box<dyn Host>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            head: Cell::new(NodeId::null()),
            tail: Cell::new(NodeId::null()),
            host: RefCell::new(Box::new(SyncHost)),
        }
    }
}

impl Scheduler {
    /// Replaces the host used for deferred strategies.
    pub fn set_host(&self, host: Box<dyn Host>) {
        *self.host.borrow_mut() = host;
    }

    /// Idempotent: a node already `SCHEDULED` is not re-enqueued.
    pub fn enqueue(&self, rt: &Runtime, node: NodeId) {
        let mut nodes = rt.nodes.borrow_mut();
        let Some(n) = nodes.get_mut(node) else { return };
        if n.flags.contains(NodeFlags::SCHEDULED) {
            return;
        }
        n.flags.insert(NodeFlags::SCHEDULED);
        n.next_scheduled = None;
        let old_tail = self.tail.get();
        n.prev_scheduled = if old_tail.is_null() { None } else { Some(old_tail) };
        drop(nodes);

        if old_tail.is_null() {
            self.head.set(node);
            self.tail.set(node);
        } else {
            rt.nodes.borrow_mut()[old_tail].next_scheduled = Some(node);
            self.tail.set(node);
        }
    }

    /// Unlinks a scheduled node from the queue in O(1), wherever it sits — patching its
    /// predecessor's and successor's links (or `head`/`tail` when there is no predecessor/
    /// successor) rather than relying on `flush` to notice it is gone. Must run before the node
    /// is removed from the arena, since it reads the node's own `prev_scheduled`/`next_scheduled`.
    pub fn cancel(&self, rt: &Runtime, node: NodeId) {
        let (prev, next) = match rt.nodes.borrow().get(node) {
            Some(n) => (n.prev_scheduled, n.next_scheduled),
            None => return,
        };
        match prev {
            Some(p) => rt.nodes.borrow_mut()[p].next_scheduled = next,
            None => self.head.set(next.unwrap_or(NodeId::null())),
        }
        match next {
            Some(n) => rt.nodes.borrow_mut()[n].prev_scheduled = prev,
            None => self.tail.set(prev.unwrap_or(NodeId::null())),
        }
    }

    /// Pops every currently-queued consumer in FIFO order and flushes it. Nested enqueues that
    /// happen during a flush (a consumer that dirties another) append to the tail and are drained
    /// within the same call, matching the "nested enqueues append and run in the same flush"
    /// ordering guarantee.
    pub fn flush(&self, rt: &'static Runtime) {
        #[cfg(feature = "trace")]
        if !self.head.get().is_null() {
            tracing::trace!("scheduler flush starting");
        }
        loop {
            let node = self.head.get();
            if node.is_null() {
                return;
            }
            let next = rt.nodes.borrow().get(node).and_then(|n| n.next_scheduled);
            self.head.set(next.unwrap_or(NodeId::null()));
            if let Some(next) = next {
                rt.nodes.borrow_mut()[next].prev_scheduled = None;
            } else {
                self.tail.set(NodeId::null());
            }

            // `cancel` keeps the queue itself consistent on dispose, so a node reaching here
            // missing from the arena, or already `DISPOSED`, would indicate a bug elsewhere
            // rather than the expected path — but the check is kept as a defensive fallback.
            let mut nodes_mut = rt.nodes.borrow_mut();
            let Some(n) = nodes_mut.get_mut(node) else { continue };
            if n.flags.contains(NodeFlags::DISPOSED) {
                continue;
            }
            n.flags.remove(NodeFlags::SCHEDULED);
            n.next_scheduled = None;
            n.prev_scheduled = None;
            let strategy = n.strategy;
            drop(nodes_mut);

            match strategy {
                Strategy::Sync => crate::effect::run_consumer(rt, node),
                Strategy::Microtask => {
                    let host = self.host.borrow();
                    host.schedule_microtask(Box::new(move || crate::effect::run_consumer(rt, node)));
                }
                Strategy::AnimationFrame => {
                    let host = self.host.borrow();
                    host.schedule_animation_frame(Box::new(move || {
                        crate::effect::run_consumer(rt, node)
                    }));
                }
                Strategy::Debounced { millis } => {
                    let host = self.host.borrow();
                    host.schedule_debounced(
                        millis,
                        Box::new(move || crate::effect::run_consumer(rt, node)),
                    );
                }
            }
        }
    }
}
