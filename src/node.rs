//! The reactive node arena.
//!
//! Every producer, derived and consumer is the same [`Node`] record, tagged with a small
//! bitfield instead of living at the bottom of an inheritance hierarchy. A plain scope (no
//! value, no callback) is a node with neither `PRODUCER` nor `CONSUMER` set, used only to group
//! child nodes for disposal.

use std::any::Any;
#[cfg(debug_assertions)]
use std::panic::Location;

use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::edge::EdgeId;
use crate::instrument::Instrument;
use crate::scheduler::Strategy;

new_key_type! {
    pub(crate) struct NodeId;
}

/// Status/role bitfield. `CLEAN`/`DIRTY`/`PENDING` are mutually exclusive; a node that is neither
/// `DIRTY` nor `PENDING` is implicitly `CLEAN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct NodeFlags(u16);

impl NodeFlags {
    pub const PRODUCER: u16 = 1 << 0;
    pub const CONSUMER: u16 = 1 << 1;
    pub const DERIVED: u16 = Self::PRODUCER | Self::CONSUMER;
    pub const SCHEDULED: u16 = 1 << 2;
    pub const DIRTY: u16 = 1 << 3;
    pub const PENDING: u16 = 1 << 4;
    pub const RUNNING: u16 = 1 << 5;
    pub const DISPOSED: u16 = 1 << 6;

    pub fn contains(self, bits: u16) -> bool {
        self.0 & bits == bits
    }

    pub fn any(self, bits: u16) -> bool {
        self.0 & bits != 0
    }

    pub fn insert(&mut self, bits: u16) {
        self.0 |= bits;
    }

    pub fn remove(&mut self, bits: u16) {
        self.0 &= !bits;
    }

    /// Sets the status to exactly one of clean/dirty/pending, clearing the other two.
    pub fn set_status(&mut self, bits: u16) {
        debug_assert!(bits == 0 || bits == Self::DIRTY || bits == Self::PENDING);
        self.0 &= !(Self::DIRTY | Self::PENDING);
        self.0 |= bits;
    }

    pub fn is_clean(self) -> bool {
        !self.any(Self::DIRTY | Self::PENDING)
    }
}

/// A reactive node: producer, derived, consumer or plain scope, distinguished by `flags` and by
/// whether `callback` is set.
pub(crate) struct Node {
    pub flags: NodeFlags,
    /// Local version, bumped on value-changing producer writes and on derived recomputes whose
    /// output actually changed.
    pub version: u32,
    /// Generation stamp bumped every time this node's tracked body runs; used to detect and
    /// detach dependency edges that were not re-touched on the latest run.
    pub tracking_version: u32,
    /// Current value. `None` only for plain scope nodes.
    pub value: Option<Box<dyn Any>>,
    /// Recompute/flush body. Returns whether the value changed. `None` for producers and plain
    /// scopes.
    pub callback: Option<Box<dyn FnMut(&mut Box<dyn Any>) -> bool>>,
    /// Incoming edges (this node acting as a consumer). Inline-capacity 1: the overwhelming
    /// majority of consumers track a single producer at a time (the sequential-reuse fast path in
    /// `edge::track_dependency` exists for the same reason), so most nodes never touch the heap
    /// for this field.
    pub dependencies: SmallVec<[EdgeId; 1]>,
    /// Outgoing edges (this node acting as a producer).
    pub subscribers: SmallVec<[EdgeId; 1]>,
    /// Intrusive scheduler queue links (forward and backward, so a scheduled node can be unlinked
    /// in O(1) from wherever it sits in the queue, not only from the head).
    pub next_scheduled: Option<NodeId>,
    pub prev_scheduled: Option<NodeId>,
    /// Flush strategy, meaningful only for `CONSUMER` nodes.
    pub strategy: Strategy,
    /// Owning scope. The "null" key for the root.
    pub parent: NodeId,
    /// Nodes owned by this node (child scopes, signals/memos/effects created inside its body).
    pub children: Vec<NodeId>,
    /// Cleanups registered via `on_cleanup` while this node (or a descendant scope) was current.
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    /// Devtools hook, invoked at read/write/recompute/run/dispose. Empty by default.
    pub instrument: Instrument,
    #[cfg(debug_assertions)]
    pub created_at: Location<'static>,
}

impl Node {
    #[cfg_attr(debug_assertions, track_caller)]
    pub fn new_scope(parent: NodeId) -> Self {
        Node {
            flags: NodeFlags::default(),
            version: 0,
            tracking_version: 0,
            value: None,
            callback: None,
            dependencies: SmallVec::new(),
            subscribers: SmallVec::new(),
            next_scheduled: None,
            prev_scheduled: None,
            strategy: Strategy::Sync,
            parent,
            children: Vec::new(),
            cleanups: Vec::new(),
            instrument: Instrument::default(),
            #[cfg(debug_assertions)]
            created_at: *Location::caller(),
        }
    }
}

#[derive(Debug)]
pub struct NodeHandle(pub(crate) NodeId);

impl NodeId {
    /// Disposes this node and everything it owns, iteratively (no recursion, so disposing a deep
    /// scope tree cannot overflow the stack).
    pub(crate) fn dispose(self, rt: &crate::runtime::Runtime) {
        let mut stack = vec![self];
        while let Some(id) = stack.pop() {
            if !rt.nodes.borrow().contains_key(id) {
                continue;
            }
            let cleanups = std::mem::take(&mut rt.nodes.borrow_mut()[id].cleanups);
            for cleanup in cleanups.into_iter().rev() {
                cleanup();
            }
            let children = std::mem::take(&mut rt.nodes.borrow_mut()[id].children);
            stack.extend(children);
            crate::edge::detach_all(rt, id);
            if rt.nodes.borrow()[id].flags.contains(NodeFlags::SCHEDULED) {
                rt.scheduler.cancel(rt, id);
            }
            let node = rt.nodes.borrow_mut().remove(id);
            if let Some(mut node) = node {
                node.flags.insert(NodeFlags::DISPOSED);
                if node.flags.contains(NodeFlags::CONSUMER) {
                    node.instrument.emit(crate::instrument::Event::EffectDispose {
                        node: NodeHandle(id),
                    });
                }
            }
        }
    }

    /// Disposes every child of this node and runs its cleanups, but keeps the node itself alive.
    /// Used before re-running a derived or consumer body.
    pub(crate) fn dispose_children(self, rt: &crate::runtime::Runtime) {
        let cleanups = std::mem::take(&mut rt.nodes.borrow_mut()[self].cleanups);
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        let children = std::mem::take(&mut rt.nodes.borrow_mut()[self].children);
        for child in children {
            child.dispose(rt);
        }
    }
}

impl NodeHandle {
    pub fn dispose(self) {
        let rt = crate::runtime::Runtime::global();
        self.0.dispose(rt);
    }
}
