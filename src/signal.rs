//! Producers ([`Signal`]/[`ReadSignal`]).

use std::any::Any;
use std::marker::PhantomData;

use slotmap::Key;

use crate::edge::{push_invalidate, track_dependency};
use crate::instrument::{Event, Instrument};
use crate::node::{Node, NodeFlags, NodeHandle, NodeId};
use crate::runtime::Runtime;

/// A read-only handle to a producer. Obtained from [`Signal`] by deref, or directly from a
/// computation that only needs to read.
pub struct ReadSignal<T> {
    pub(crate) id: NodeId,
    _marker: PhantomData<*const T>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ReadSignal<T> {}

impl<T: 'static> ReadSignal<T> {
    /// Reads the value, tracking it if called inside a consumer's body.
    pub fn get(self) -> T
    where
        T: Clone,
    {
        self.with(Clone::clone)
    }

    /// Reads the value without tracking it, regardless of the current scope.
    pub fn get_untracked(self) -> T
    where
        T: Clone,
    {
        self.with_untracked(Clone::clone)
    }

    /// Reads the value by reference, tracking it if called inside a consumer's body.
    pub fn with<U>(self, f: impl FnOnce(&T) -> U) -> U {
        let rt = Runtime::global();
        self.track(rt);
        rt.nodes.borrow()[self.id]
            .instrument
            .emit(Event::Read { node: NodeHandle(self.id) });
        self.with_untracked(f)
    }

    /// Reads the value by reference without tracking it.
    pub fn with_untracked<U>(self, f: impl FnOnce(&T) -> U) -> U {
        let rt = Runtime::global();
        let nodes = rt.nodes.borrow();
        let value = nodes[self.id]
            .value
            .as_ref()
            .expect("producer node missing its value")
            .downcast_ref::<T>()
            .expect("signal accessed at wrong type");
        f(value)
    }

    /// Equivalent to [`ReadSignal::get`] except that any active tracking scope is suspended
    /// first, then restored; identical semantics otherwise, only untracked.
    pub fn peek(self) -> T
    where
        T: Clone,
    {
        crate::runtime::untrack(|| self.get())
    }

    /// Establishes a dependency edge on this producer without reading the value, used when the
    /// value itself is irrelevant (e.g. a `()` trigger signal).
    pub fn track(self, rt: &Runtime) {
        let consumer = rt.consumer_scope.get();
        if !consumer.is_null() {
            track_dependency(rt, self.id, consumer);
        }
    }
}

/// A mutable producer cell.
pub struct Signal<T> {
    read: ReadSignal<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Signal<T> {}

impl<T: 'static> std::ops::Deref for Signal<T> {
    type Target = ReadSignal<T>;
    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Sets the value. A no-op (no version bump, no propagation) if the new value equals the
    /// current one, so no consumer ever re-runs from a same-value write.
    pub fn set(self, value: T) {
        self.update(move |slot| {
            if *slot == value {
                false
            } else {
                *slot = value;
                true
            }
        });
    }

    /// Sets the value without comparing it to the old one and without propagating. Used to seed
    /// state from inside a reactive body without triggering re-entrant updates.
    pub fn set_silent(self, value: T) {
        let rt = Runtime::global();
        *rt.nodes.borrow_mut()[self.read.id]
            .value
            .as_mut()
            .unwrap()
            .downcast_mut::<T>()
            .unwrap() = value;
    }

    /// Updates the value in place via `f`, propagating only if `f` returns `true`.
    pub fn update(self, f: impl FnOnce(&mut T) -> bool) {
        let rt = Runtime::global();
        let changed = {
            let mut nodes = rt.nodes.borrow_mut();
            let slot = nodes[self.read.id]
                .value
                .as_mut()
                .unwrap()
                .downcast_mut::<T>()
                .unwrap();
            f(slot)
        };
        if !changed {
            return;
        }
        let mut nodes = rt.nodes.borrow_mut();
        nodes[self.read.id].version = nodes[self.read.id].version.wrapping_add(1);
        drop(nodes);
        rt.global_version.set(rt.global_version.get().wrapping_add(1));
        rt.nodes.borrow()[self.read.id]
            .instrument
            .emit(Event::Write { node: NodeHandle(self.read.id) });
        push_invalidate(rt, self.read.id);
        if rt.batch_depth.get() == 0 {
            rt.scheduler.flush(rt);
        }
    }
}

/// Creates a new producer with an initial value.
///
/// # Example
/// ```
/// # use weave_reactive::*;
/// # create_root(|| {
/// let count = create_signal(0);
/// assert_eq!(count.get(), 0);
/// count.set(1);
/// assert_eq!(count.get(), 1);
/// # });
/// ```
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal<T: 'static>(value: T) -> Signal<T> {
    create_signal_instrumented(value, Instrument::default())
}

/// Same as [`create_signal`] but invokes `instrument`'s hooks on read and write.
#[cfg_attr(debug_assertions, track_caller)]
pub fn create_signal_instrumented<T: 'static>(value: T, instrument: Instrument) -> Signal<T> {
    let rt = Runtime::global();
    let parent = rt.consumer_scope.get();
    let parent = if parent.is_null() { rt.root_node.get() } else { parent };
    let mut node = Node::new_scope(parent);
    node.flags.insert(NodeFlags::PRODUCER);
    node.value = Some(Box::new(value) as Box<dyn Any>);
    node.instrument = instrument;
    let id = rt.nodes.borrow_mut().insert(node);
    if let Some(p) = rt.nodes.borrow_mut().get_mut(parent) {
        p.children.push(id);
    }
    Signal {
        read: ReadSignal { id, _marker: PhantomData },
    }
}

impl<T: std::fmt::Debug + 'static> std::fmt::Debug for ReadSignal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|value| value.fmt(f))
    }
}
impl<T: std::fmt::Debug + 'static> std::fmt::Debug for Signal<T> {
    #[cfg_attr(debug_assertions, track_caller)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with(|value| value.fmt(f))
    }
}

#[cfg(feature = "serde")]
impl<T: serde::Serialize + 'static> serde::Serialize for ReadSignal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + 'static> serde::Deserialize<'de> for ReadSignal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(*create_signal(T::deserialize(deserializer)?))
    }
}
#[cfg(feature = "serde")]
impl<T: serde::Serialize + 'static> serde::Serialize for Signal<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.with(|value| value.serialize(serializer))
    }
}
#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de> + 'static> serde::Deserialize<'de> for Signal<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(create_signal(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn signal_read_write() {
        create_root(|| {
            let state = create_signal(0);
            assert_eq!(state.get(), 0);
            state.set(1);
            assert_eq!(state.get(), 1);
        });
    }

    #[test]
    fn signal_set_same_value_is_noop() {
        create_root(|| {
            let state = create_signal(1);
            let runs = create_signal(0);
            create_effect(move || {
                state.get();
                runs.update(|n| {
                    *n += 1;
                    true
                });
            });
            assert_eq!(runs.get_untracked(), 1);
            state.set(1);
            assert_eq!(runs.get_untracked(), 1);
        });
    }
}
