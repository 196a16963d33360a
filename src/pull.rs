//! The pull propagator: given a `PENDING` derived, walks its upstream edges and reports whether
//! it must recompute.
//!
//! Pushing invalidation down is one pass (`edge::push_invalidate`); pulling validation up is a
//! second, separate pass that never recurses directly — it walks an explicit stack of frames
//! instead, which is what lets reading the bottom of a thousand-node derived chain not blow the
//! native stack.
//!
//! The walk is exhaustive: every incoming edge is visited even after one is found to be stale.
//! Short-circuiting on the first stale edge would let a later recomputation observe a mix of
//! fresh and stale upstream values, so it is deliberately not implemented, not even as an option.

use crate::node::{NodeFlags, NodeId};
use crate::runtime::Runtime;

struct Frame {
    node: NodeId,
    edge_idx: usize,
    changed: bool,
}

/// Returns whether `root` (which must be `PENDING`) has at least one upstream producer whose
/// value actually changed since `root`'s edges last observed it. Refreshes `observed_version` on
/// every edge it visits, whether or not it turns out to have changed.
pub(crate) fn pull_updates(rt: &'static Runtime, root: NodeId) -> bool {
    let mut stack = vec![Frame { node: root, edge_idx: 0, changed: false }];
    // Set when a child frame just finished: its result must be folded into the edge that caused
    // the recursive descent before the parent frame resumes scanning its remaining edges.
    let mut child_result: Option<bool> = None;

    loop {
        let mut frame = stack.pop().expect("pull_updates stack is never empty mid-loop");
        let edges = rt.nodes.borrow()[frame.node].dependencies.clone();

        if let Some(changed) = child_result.take() {
            // `frame.edge_idx - 1` is the edge we descended into on the previous iteration.
            let edge = edges[frame.edge_idx - 1];
            let producer = rt.edges.borrow()[edge].producer;
            if changed {
                crate::derived::recompute(rt, producer);
            }
            refresh_edge(rt, edge, producer, &mut frame.changed);
        }

        let mut descended = false;
        while frame.edge_idx < edges.len() {
            let edge = edges[frame.edge_idx];
            let producer = rt.edges.borrow()[edge].producer;
            frame.edge_idx += 1;

            let producer_flags = rt.nodes.borrow()[producer].flags;
            if producer_flags.contains(NodeFlags::DERIVED) {
                if producer_flags.contains(NodeFlags::RUNNING) {
                    panic!(
                        "{}",
                        crate::error::ReactiveError::CycleDetected {
                            node: crate::node::NodeHandle(producer)
                        }
                    );
                }
                if producer_flags.any(NodeFlags::DIRTY) {
                    crate::derived::recompute(rt, producer);
                } else if producer_flags.any(NodeFlags::PENDING) {
                    // Must verify the producer itself before trusting its version; resume this
                    // frame after the child frame reports back.
                    stack.push(frame);
                    stack.push(Frame { node: producer, edge_idx: 0, changed: false });
                    descended = true;
                    break;
                }
            }
            refresh_edge(rt, edge, producer, &mut frame.changed);
        }

        if descended {
            continue;
        }
        if stack.is_empty() {
            return frame.changed;
        }
        child_result = Some(frame.changed);
    }
}

fn refresh_edge(rt: &Runtime, edge: crate::edge::EdgeId, producer: NodeId, changed: &mut bool) {
    let producer_version = rt.nodes.borrow()[producer].version;
    let mut edges = rt.edges.borrow_mut();
    let e = &mut edges[edge];
    if e.observed_version != producer_version {
        e.observed_version = producer_version;
        *changed = true;
    }
}
