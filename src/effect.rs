//! Consumers: effects and selective subscriptions.

use std::any::Any;

use slotmap::Key;

use crate::instrument::{Event, Instrument};
use crate::node::{Node, NodeFlags, NodeHandle, NodeId};
use crate::runtime::Runtime;
use crate::scheduler::Strategy;

/// A handle to a running effect or subscription. Dropping it does *not* dispose the consumer —
/// call [`EffectHandle::dispose`] explicitly, matching [`NodeHandle::dispose`].
#[derive(Clone, Copy)]
pub struct EffectHandle(pub(crate) NodeId);

impl EffectHandle {
    /// Invokes the last cleanup if any, detaches all dependencies, marks the node `DISPOSED` and
    /// removes it from the scheduler. Idempotent: disposing twice is a no-op.
    pub fn dispose(self) {
        let rt = Runtime::global();
        if rt.nodes.borrow().get(self.0).is_none() {
            return;
        }
        if rt.nodes.borrow()[self.0].flags.contains(NodeFlags::DISPOSED) {
            return;
        }
        self.0.dispose(rt);
    }
}

/// Runs a scheduled consumer's flush body. Called by [`crate::scheduler::Scheduler::flush`], and
/// directly for the mandatory synchronous first run: an effect always runs once synchronously to
/// establish its initial edges before any re-run is ever scheduled.
// Unlike `derived::recompute`, `node` here may already be gone by the time the scheduler pops
// it (a consumer disposed after being scheduled but before the flush reaches it) — the span
// field is kept to the node's own `Debug` impl rather than indexing the arena for its
// `created_at` location, which would panic on exactly the case this function exists to tolerate.
#[cfg_attr(
    feature = "trace",
    tracing::instrument(skip(rt), fields(node = ?node))
)]
pub(crate) fn run_consumer(rt: &'static Runtime, node: NodeId) {
    if !rt.nodes.borrow().contains_key(node) {
        return;
    }
    if rt.nodes.borrow()[node].flags.contains(NodeFlags::DISPOSED) {
        return;
    }
    node.dispose_children(rt);

    let mut nodes_mut = rt.nodes.borrow_mut();
    let mut callback = nodes_mut[node].callback.take().expect("consumer node has no body");
    let mut value = nodes_mut[node]
        .value
        .take()
        .unwrap_or_else(|| Box::new(()) as Box<dyn Any>);
    drop(nodes_mut);

    // See the matching comment in `derived::recompute`: the body must go back onto the node
    // before a panic is allowed to propagate out of `flush`, or the
    // consumer becomes permanently unusable instead of just failing this one run.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        crate::edge::track(rt, node, || callback(&mut value))
    }));

    let mut nodes_mut = rt.nodes.borrow_mut();
    nodes_mut[node].callback = Some(callback);
    nodes_mut[node].value = Some(value);
    nodes_mut[node].flags.set_status(0);
    drop(nodes_mut);
    if let Err(payload) = result {
        std::panic::resume_unwind(payload);
    }
    rt.nodes.borrow()[node]
        .instrument
        .emit(Event::EffectRun { node: NodeHandle(node) });
}

fn new_consumer_node(
    mut body: impl FnMut() + 'static,
    strategy: Strategy,
    instrument: Instrument,
) -> EffectHandle {
    let rt = Runtime::global();
    let parent = rt.consumer_scope.get();
    let parent = if parent.is_null() { rt.root_node.get() } else { parent };

    let callback: Box<dyn FnMut(&mut Box<dyn Any>) -> bool> = Box::new(move |_| {
        body();
        true
    });

    let mut node = Node::new_scope(parent);
    node.flags.insert(NodeFlags::CONSUMER);
    node.callback = Some(callback);
    node.strategy = strategy;
    node.instrument = instrument;
    let id = rt.nodes.borrow_mut().insert(node);
    if let Some(p) = rt.nodes.borrow_mut().get_mut(parent) {
        p.children.push(id);
    }

    run_consumer(rt, id);
    EffectHandle(id)
}

/// Creates an effect: runs `body` synchronously once to establish its dependency edges, then
/// re-runs it (synchronously, via the scheduler) whenever any of those dependencies changes.
///
/// # Example
/// ```
/// # use weave_reactive::*;
/// # create_root(|| {
/// let count = create_signal(0);
/// let seen = create_signal(0);
/// create_effect(move || seen.set_silent(count.get()));
/// count.set(5);
/// assert_eq!(seen.get_untracked(), 5);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect(body: impl FnMut() + 'static) -> EffectHandle {
    new_consumer_node(body, Strategy::Sync, Instrument::default())
}

/// Same as [`create_effect`] but re-runs are flushed according to `strategy` instead of
/// synchronously via the chosen flush strategy. The initial run is always synchronous.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect_with_strategy(body: impl FnMut() + 'static, strategy: Strategy) -> EffectHandle {
    new_consumer_node(body, strategy, Instrument::default())
}

/// Same as [`create_effect`] but invokes `instrument`'s hooks on every run and on dispose,
/// matching [`crate::signal::create_signal_instrumented`] and
/// [`crate::derived::create_memo`]'s devtools seam.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_effect_instrumented(body: impl FnMut() + 'static, instrument: Instrument) -> EffectHandle {
    new_consumer_node(body, Strategy::Sync, instrument)
}

/// A consumer split into a tracked *source* and an untracked *callback*: the source
/// is re-run and tracked like a normal effect body, but the callback only ever sees its result,
/// never contributing its own reads to the dependency set.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_subscription<T: 'static>(
    mut source: impl FnMut() -> T + 'static,
    mut callback: impl FnMut(T) + 'static,
) -> EffectHandle {
    new_consumer_node(
        move || {
            let value = source();
            crate::runtime::untrack(|| callback(value));
        },
        Strategy::Sync,
        Instrument::default(),
    )
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn batch_runs_effect_once() {
        create_root(|| {
            let a = create_signal(1);
            let b = create_signal(2);
            let runs = create_signal(0);
            let sum = create_signal(0);
            create_effect(move || {
                let total = a.get() + b.get();
                runs.update(|n| {
                    *n += 1;
                    true
                });
                sum.set_silent(total);
            });
            assert_eq!(runs.get_untracked(), 1);
            batch(move || {
                a.set(10);
                b.set(20);
            });
            assert_eq!(runs.get_untracked(), 2);
            assert_eq!(sum.get_untracked(), 30);
        });
    }

    #[test]
    fn dynamic_dependency_does_not_wake_on_unread_producer() {
        create_root(|| {
            let cond = create_signal(true);
            let x = create_signal(1);
            let y = create_signal(2);
            let runs = create_signal(0);
            create_effect(move || {
                if cond.get() { x.get(); } else { y.get(); }
                runs.update(|n| {
                    *n += 1;
                    true
                });
            });
            assert_eq!(runs.get_untracked(), 1);
            y.set(99);
            assert_eq!(runs.get_untracked(), 1);
            x.set(2);
            assert_eq!(runs.get_untracked(), 2);
        });
    }

    #[test]
    fn dispose_is_idempotent() {
        create_root(|| {
            let trigger = create_signal(0);
            let runs = create_signal(0);
            let handle = create_effect(move || {
                trigger.get();
                runs.update(|n| {
                    *n += 1;
                    true
                });
            });
            assert_eq!(runs.get_untracked(), 1);
            handle.dispose();
            handle.dispose();
            trigger.set(1);
            assert_eq!(runs.get_untracked(), 1);
        });
    }
}
