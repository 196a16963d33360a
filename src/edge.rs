//! Dependency edges and the push/shallow-propagate half of the update algorithm.
//!
//! An edge is the only ownership path between a consumer and a producer: it is recorded in both
//! the producer's `subscribers` list and the consumer's `dependencies` list, or in neither. Lists
//! are flat `SmallVec<[EdgeId; 1]>`s rather than intrusive prev/next links, trading the textbook
//! O(1) detach for O(n) `retain`, which is never the bottleneck at the graph sizes this crate
//! targets.

use slotmap::new_key_type;

use crate::node::{NodeFlags, NodeId};
use crate::runtime::Runtime;

new_key_type! {
    pub(crate) struct EdgeId;
}

pub(crate) struct Edge {
    pub producer: NodeId,
    pub consumer: NodeId,
    /// The producer's `version` observed at the last successful track.
    pub observed_version: u32,
    /// Stamp matching the consumer's `tracking_version` at the time this edge was last (re)used.
    pub tracking_version: u32,
}

/// Runs `f` as the tracked body of `consumer`: bumps its tracking generation, makes it the
/// current scope for the duration of the call, and detaches any dependency edge that was not
/// re-touched by the end of the call (dynamic dependencies).
pub(crate) fn track<T>(rt: &Runtime, consumer: NodeId, f: impl FnOnce() -> T) -> T {
    rt.nodes.borrow_mut()[consumer].tracking_version =
        rt.nodes.borrow()[consumer].tracking_version.wrapping_add(1);
    let prev = rt.consumer_scope.replace(consumer);

    // `f` may panic (a compute body that cycles, or any other `UserError`). The scope must be
    // restored on the way out either way — a bare statement after `f()` only runs on the happy
    // path and would leave `consumer_scope` pointing at a node that is no longer executing,
    // misattributing every later untracked read until something else happens to overwrite it.
    struct RestoreScope<'a> {
        rt: &'a Runtime,
        prev: NodeId,
    }
    impl Drop for RestoreScope<'_> {
        fn drop(&mut self) {
            self.rt.consumer_scope.set(self.prev);
        }
    }
    let _guard = RestoreScope { rt, prev };
    let ret = f();
    drop(_guard);

    let stale: Vec<EdgeId> = rt.nodes.borrow()[consumer]
        .dependencies
        .iter()
        .copied()
        .filter(|&e| rt.edges.borrow()[e].tracking_version != rt.nodes.borrow()[consumer].tracking_version)
        .collect();
    for edge in stale {
        detach_one(rt, edge);
    }
    ret
}

/// Called from a producer/derived `read()` when a consumer scope is active. Implements the
/// sequential-reuse fast path, then search-and-relink, then allocate, exactly as specified.
pub(crate) fn track_dependency(rt: &Runtime, producer: NodeId, consumer: NodeId) {
    let tracking_version = rt.nodes.borrow()[consumer].tracking_version;

    // Fast path: the tail of the dependency list already points at this producer.
    if let Some(&tail) = rt.nodes.borrow()[consumer].dependencies.last() {
        if rt.edges.borrow()[tail].producer == producer {
            rt.edges.borrow_mut()[tail].tracking_version = tracking_version;
            return;
        }
    }

    // Search for an existing edge to this producer and relink it at the tail.
    let existing = rt.nodes.borrow()[consumer]
        .dependencies
        .iter()
        .position(|&e| rt.edges.borrow()[e].producer == producer);
    if let Some(pos) = existing {
        let edge = rt.nodes.borrow_mut()[consumer].dependencies.remove(pos);
        rt.nodes.borrow_mut()[consumer].dependencies.push(edge);
        rt.edges.borrow_mut()[edge].tracking_version = tracking_version;
        return;
    }

    // Allocate a new edge.
    let observed_version = rt.nodes.borrow()[producer].version;
    let edge = rt.edges.borrow_mut().insert(Edge {
        producer,
        consumer,
        observed_version,
        tracking_version,
    });
    rt.nodes.borrow_mut()[consumer].dependencies.push(edge);
    rt.nodes.borrow_mut()[producer].subscribers.push(edge);
}

fn detach_one(rt: &Runtime, edge: EdgeId) {
    let Edge { producer, consumer, .. } = rt.edges.borrow_mut().remove(edge).unwrap();
    if let Some(node) = rt.nodes.borrow_mut().get_mut(producer) {
        node.subscribers.retain(|&e| e != edge);
    }
    if let Some(node) = rt.nodes.borrow_mut().get_mut(consumer) {
        node.dependencies.retain(|&e| e != edge);
    }
}

/// Unlinks every incoming edge of `consumer` from both sides.
pub(crate) fn detach_all(rt: &Runtime, consumer: NodeId) {
    let edges = std::mem::take(&mut rt.nodes.borrow_mut()[consumer].dependencies);
    for edge in edges {
        if let Some(Edge { producer, .. }) = rt.edges.borrow_mut().remove(edge) {
            if let Some(node) = rt.nodes.borrow_mut().get_mut(producer) {
                node.subscribers.retain(|&e| e != edge);
            }
        }
    }
    // Also detach this node's own subscriber edges if it is disposed while still a producer.
    let subs = std::mem::take(&mut rt.nodes.borrow_mut()[consumer].subscribers);
    for edge in subs {
        if let Some(Edge { consumer: dependent, .. }) = rt.edges.borrow_mut().remove(edge) {
            if let Some(node) = rt.nodes.borrow_mut().get_mut(dependent) {
                node.dependencies.retain(|&e| e != edge);
            }
        }
    }
}

/// Called when a derived recomputes and its value actually changes: marks each *direct*
/// subscriber dirty (not transitive — transitive work happens lazily the next time each of those
/// nodes is pulled or flushed).
pub(crate) fn shallow_propagate(rt: &Runtime, derived: NodeId) {
    let subs = rt.nodes.borrow()[derived].subscribers.clone();
    for edge in subs {
        let target = rt.edges.borrow()[edge].consumer;
        mark_dirty_and_maybe_schedule(rt, target);
    }
}

fn mark_dirty_and_maybe_schedule(rt: &Runtime, node: NodeId) {
    let mut nodes = rt.nodes.borrow_mut();
    let Some(n) = nodes.get_mut(node) else { return };
    if n.flags.contains(NodeFlags::DISPOSED) {
        return;
    }
    n.flags.set_status(NodeFlags::DIRTY);
    let is_pure_consumer = !n.flags.contains(NodeFlags::PRODUCER);
    let already_scheduled = n.flags.contains(NodeFlags::SCHEDULED);
    drop(nodes);
    if is_pure_consumer && !already_scheduled {
        rt.scheduler.enqueue(rt, node);
    }
}

/// Called from a producer's `write()` when the value actually changes: a transitive, bounded
/// push down the subscriber graph. Pure consumer subscribers are marked `DIRTY` and
/// scheduled; derived subscribers are marked `PENDING` and the walk continues through their own
/// subscribers, stopping as soon as it reaches a node that is already `PENDING`, `DIRTY` or
/// `SCHEDULED` (the frontier is already accounted for).
///
/// The frontier is a FIFO, not a stack: subscribers of one producer must be visited (and thus
/// enqueued on the scheduler) in the same order they were inserted into its `subscribers` list,
/// matching the scheduler's own first-enqueue-runs-first ordering guarantee. Draining a `Vec`
/// with `pop()` would visit them in reverse.
pub(crate) fn push_invalidate(rt: &Runtime, producer: NodeId) {
    let mut frontier: std::collections::VecDeque<NodeId> = rt.nodes.borrow()[producer]
        .subscribers
        .iter()
        .map(|&e| rt.edges.borrow()[e].consumer)
        .collect();

    while let Some(node) = frontier.pop_front() {
        let mut nodes = rt.nodes.borrow_mut();
        let Some(n) = nodes.get_mut(node) else { continue };
        if n.flags.contains(NodeFlags::DISPOSED) {
            continue;
        }
        let is_derived_like = n.flags.contains(NodeFlags::PRODUCER);
        if is_derived_like {
            if n.flags.any(NodeFlags::PENDING | NodeFlags::DIRTY) {
                continue;
            }
            n.flags.set_status(NodeFlags::PENDING);
            let next: Vec<NodeId> = n
                .subscribers
                .iter()
                .map(|&e| rt.edges.borrow()[e].consumer)
                .collect();
            drop(nodes);
            frontier.extend(next);
        } else {
            n.flags.set_status(NodeFlags::DIRTY);
            let already_scheduled = n.flags.contains(NodeFlags::SCHEDULED);
            drop(nodes);
            if !already_scheduled {
                rt.scheduler.enqueue(rt, node);
            }
        }
    }
}
