//! Derived nodes ([`Memo`]): pure, cached functions of other reactive nodes.

use std::any::Any;
use std::marker::PhantomData;

use slotmap::Key;

use crate::edge::{shallow_propagate, track_dependency};
use crate::error::ReactiveError;
use crate::instrument::{Event, Instrument};
use crate::node::{Node, NodeFlags, NodeHandle, NodeId};
use crate::pull::pull_updates;
use crate::runtime::Runtime;

/// A lazily-recomputed, cached derived value.
pub struct Memo<T> {
    pub(crate) id: NodeId,
    _marker: PhantomData<*const T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Memo<T> {}

impl<T: 'static> Memo<T> {
    /// Reads the cached value, recomputing first if it is `DIRTY`, or if it is `PENDING` and
    /// [`pull_updates`] reports that an upstream value actually changed.
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.with(Clone::clone)
    }

    pub fn get_untracked(self) -> T
    where
        T: Clone,
    {
        self.with_untracked(Clone::clone)
    }

    pub fn with<U>(self, f: impl FnOnce(&T) -> U) -> U {
        let rt = Runtime::global();
        self.validate(rt);
        let consumer = rt.consumer_scope.get();
        if !consumer.is_null() {
            track_dependency(rt, self.id, consumer);
        }
        rt.nodes.borrow()[self.id]
            .instrument
            .emit(Event::Read { node: NodeHandle(self.id) });
        self.with_untracked(f)
    }

    pub fn with_untracked<U>(self, f: impl FnOnce(&T) -> U) -> U {
        let rt = Runtime::global();
        let nodes = rt.nodes.borrow();
        let value = nodes[self.id]
            .value
            .as_ref()
            .expect("derived node has not run yet")
            .downcast_ref::<T>()
            .expect("memo accessed at wrong type");
        f(value)
    }

    /// `read()` with the consumer scope suspended — laziness is preserved, only tracking is
    /// skipped.
    pub fn peek(self) -> T
    where
        T: Clone,
    {
        let rt = Runtime::global();
        self.validate(rt);
        crate::runtime::untrack(|| self.get_untracked())
    }

    /// Runs the read algorithm's validation steps without touching tracking or returning the
    /// value: recompute if dirty, verify and conditionally recompute if pending.
    fn validate(self, rt: &'static Runtime) {
        let flags = rt.nodes.borrow()[self.id].flags;
        if flags.contains(NodeFlags::RUNNING) {
            panic!(
                "{}",
                ReactiveError::CycleDetected { node: NodeHandle(self.id) }
            );
        }
        if flags.any(NodeFlags::DIRTY) {
            recompute(rt, self.id);
        } else if flags.any(NodeFlags::PENDING) {
            if pull_updates(rt, self.id) {
                recompute(rt, self.id);
            } else {
                rt.nodes.borrow_mut()[self.id].flags.set_status(0);
            }
        }
    }
}

/// Runs a derived node's compute body, possibly updating its cached value and version, and
/// shallow-propagating to direct subscribers if the value changed. Shared by the initial
/// creation run, `Memo::validate`, and `pull_updates`'s own recursive recomputes.
#[cfg_attr(all(feature = "trace", not(debug_assertions)), tracing::instrument(skip(rt)))]
#[cfg_attr(
    all(feature = "trace", debug_assertions),
    tracing::instrument(skip(rt), fields(created_at = rt.nodes.borrow()[node].created_at.to_string()))
)]
pub(crate) fn recompute(rt: &'static Runtime, node: NodeId) {
    rt.nodes.borrow_mut()[node].flags.insert(NodeFlags::RUNNING);
    node.dispose_children(rt);

    let mut nodes_mut = rt.nodes.borrow_mut();
    let mut callback = nodes_mut[node].callback.take().expect("derived node has no compute body");
    let mut value = nodes_mut[node]
        .value
        .take()
        .unwrap_or_else(|| Box::new(()) as Box<dyn Any>);
    drop(nodes_mut);

    // `callback`/`value` are out of the node for the duration of the call. If the compute body
    // panics, they must go back before the panic is allowed to continue unwinding — otherwise the
    // node is left with no body and every future read panics too, rather than the single
    // triggering read. `RUNNING` is cleared the same way so the cycle guard doesn't misfire on
    // unrelated later reads.
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        crate::edge::track(rt, node, || callback(&mut value))
    }));

    let mut nodes_mut = rt.nodes.borrow_mut();
    nodes_mut[node].callback = Some(callback);
    nodes_mut[node].value = Some(value);
    nodes_mut[node].flags.remove(NodeFlags::RUNNING);
    let changed = match result {
        Ok(changed) => changed,
        Err(payload) => {
            // Leave the node `DIRTY` rather than `CLEAN`: the attempt failed, so the cached value
            // (whatever was restored above) must not be trusted as up to date; a later read must
            // retry the compute body instead of treating the stale value as valid.
            nodes_mut[node].flags.set_status(NodeFlags::DIRTY);
            drop(nodes_mut);
            std::panic::resume_unwind(payload);
        }
    };
    nodes_mut[node].flags.set_status(0);
    if changed {
        nodes_mut[node].version = nodes_mut[node].version.wrapping_add(1);
    }
    let sub_count = nodes_mut[node].subscribers.len();
    drop(nodes_mut);

    if changed {
        rt.nodes.borrow()[node]
            .instrument
            .emit(Event::ComputedValue { node: NodeHandle(node) });
    }
    if changed && sub_count > 1 {
        shallow_propagate(rt, node);
    }
}

fn new_derived_node<T: 'static>(
    eq: Option<Box<dyn Fn(&T, &T) -> bool>>,
    mut compute: impl FnMut() -> T + 'static,
    instrument: Instrument,
) -> Memo<T> {
    let rt = Runtime::global();
    let parent = rt.consumer_scope.get();
    let parent = if parent.is_null() { rt.root_node.get() } else { parent };

    let callback: Box<dyn FnMut(&mut Box<dyn Any>) -> bool> = Box::new(move |slot| {
        let new_value = compute();
        let changed = match slot.downcast_ref::<T>() {
            Some(old) => match &eq {
                Some(eq) => !eq(old, &new_value),
                None => true,
            },
            None => true,
        };
        if changed {
            *slot = Box::new(new_value);
        }
        changed
    });

    let mut node = Node::new_scope(parent);
    node.flags.insert(NodeFlags::DERIVED | NodeFlags::DIRTY);
    node.callback = Some(callback);
    node.instrument = instrument;
    let id = rt.nodes.borrow_mut().insert(node);
    if let Some(p) = rt.nodes.borrow_mut().get_mut(parent) {
        p.children.push(id);
    }

    recompute(rt, id);
    Memo { id, _marker: PhantomData }
}

/// Creates a derived value, using `T: PartialEq` as the default "did it actually change"
/// comparison.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_memo<T: PartialEq + 'static>(compute: impl FnMut() -> T + 'static) -> Memo<T> {
    new_derived_node(Some(Box::new(|a: &T, b: &T| a == b)), compute, Instrument::default())
}

/// Creates a derived value whose change detection is an explicit, caller-supplied predicate
/// instead of `PartialEq` — an opt-in hook rather than the default, since this optimization is
/// only correct if it runs after upstream versions have been fully refreshed. It only ever runs
/// after [`pull_updates`] has done that refresh, because it is invoked from the same `recompute`
/// every other memo goes through.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_memo_with_eq<T: 'static>(
    compute: impl FnMut() -> T + 'static,
    eq: impl Fn(&T, &T) -> bool + 'static,
) -> Memo<T> {
    new_derived_node(Some(Box::new(eq)), compute, Instrument::default())
}

/// Creates a derived value that always treats its output as changed, for values with no
/// meaningful equality.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_memo_always_changed<T: 'static>(compute: impl FnMut() -> T + 'static) -> Memo<T> {
    new_derived_node(None, compute, Instrument::default())
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn diamond() {
        create_root(|| {
            let a = create_signal(1);
            let b = create_memo(move || a.get() * 2);
            let c = create_memo(move || a.get() * 3);
            let d = create_memo(move || b.get() + c.get());
            assert_eq!(d.get(), 5);
            a.set(10);
            assert_eq!(d.get(), 50);
        });
    }

    #[test]
    fn conditional_dependency() {
        create_root(|| {
            let c = create_signal(true);
            let x = create_signal(1);
            let y = create_signal(2);
            let r = create_memo(move || if c.get() { x.get() } else { y.get() });
            assert_eq!(r.get(), 1);

            y.set(99);
            // y was never read; a fresh memo dependency set after the next compute still
            // shouldn't have included it, so this write changes nothing observable yet. We can't
            // directly assert "no recompute happened" without instrumentation, but the value
            // must still reflect x.
            assert_eq!(r.get(), 1);

            c.set(false);
            assert_eq!(r.get(), 99);

            x.set(42);
            assert_eq!(r.get(), 99);
        });
    }

    #[test]
    fn cycle_detected_leaves_node_usable_afterwards() {
        use std::cell::RefCell;
        use std::rc::Rc;

        create_root(|| {
            let trigger = create_signal(0);
            let self_ref: Rc<RefCell<Option<Memo<i32>>>> = Rc::new(RefCell::new(None));
            let self_ref2 = self_ref.clone();
            let m = create_memo(move || {
                trigger.get();
                match *self_ref2.borrow() {
                    Some(inner) => inner.get(),
                    None => 1,
                }
            });
            *self_ref.borrow_mut() = Some(m);

            trigger.set(1);
            let first = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m.get()));
            assert!(first.is_err(), "reading a memo from inside its own compute body must panic");

            // The node must still be a well-formed derived node after unwinding: reading it again
            // re-enters the same cyclic compute body and panics the same way, rather than some
            // different panic from a corrupted `callback`/`value` slot.
            trigger.set(2);
            let second = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| m.get()));
            assert!(second.is_err());
        });
    }

    #[test]
    fn deep_chain_is_iterative() {
        create_root(|| {
            let c0 = create_signal(0);
            let mut prev = create_memo(move || c0.get() + 1);
            for _ in 1..1000 {
                let p = prev;
                prev = create_memo(move || p.get() + 1);
            }
            let last = prev;
            assert_eq!(last.get(), 1000);
            c0.set(10);
            assert_eq!(last.get(), 1010);
        });
    }
}
