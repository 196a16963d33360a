//! Keyed ordered container and reconciliation.
//!
//! Reconciliation skips a matching prefix and suffix before falling back to the general
//! insert/remove/move diff, computed via the longest increasing subsequence of surviving old
//! positions (see `lis.rs`).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::ReactiveError;
use crate::lis::longest_increasing_subsequence;
use crate::signal::{create_signal, Signal};

/// An ordered container keyed by `K`, with O(1)-ish lookup by key. Length is itself a producer:
/// reading [`KeyedList::len`] or [`KeyedList::has`] inside a derived or effect body establishes a
/// dependency on the container's structural version.
pub struct KeyedList<K, V> {
    order: std::cell::RefCell<Vec<K>>,
    items: std::cell::RefCell<HashMap<K, Signal<V>>>,
    /// Bumped on every structural change (insert/remove/move); value replacements bump only the
    /// per-item signal instead.
    length: Signal<usize>,
}

impl<K, V> KeyedList<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    pub fn new() -> Self {
        Self::from_iter(std::iter::empty())
    }

    pub fn from_iter(items: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut order = Vec::new();
        let mut map = HashMap::new();
        for (k, v) in items {
            order.push(k.clone());
            map.insert(k, create_signal(v));
        }
        let length = create_signal(order.len());
        KeyedList {
            order: std::cell::RefCell::new(order),
            items: std::cell::RefCell::new(map),
            length,
        }
    }

    /// Every structural mutation (insert/remove/move) counts as a write to the length producer,
    /// even if the count itself is unchanged (a move), so the version bump and propagation are
    /// unconditional rather than routed through `Signal::set`'s equality short-circuit.
    fn bump_length(&self) {
        let n = self.order.borrow().len();
        self.length.set_silent(n);
        let rt = crate::runtime::Runtime::global();
        {
            let mut nodes = rt.nodes.borrow_mut();
            nodes[self.length.id].version = nodes[self.length.id].version.wrapping_add(1);
        }
        crate::edge::push_invalidate(rt, self.length.id);
        if rt.batch_depth.get() == 0 {
            rt.scheduler.flush(rt);
        }
    }

    /// Tracked length read.
    pub fn len(&self) -> usize {
        self.length.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked membership check.
    pub fn has(&self, key: &K) -> bool {
        self.length.track(crate::runtime::Runtime::global());
        self.items.borrow().contains_key(key)
    }

    /// Tracked value read.
    pub fn get(&self, key: &K) -> Option<V> {
        self.items.borrow().get(key).map(|s| s.get())
    }

    /// Untracked snapshot of the whole list in order.
    pub fn peek(&self) -> Vec<(K, V)> {
        crate::runtime::untrack(|| {
            self.order
                .borrow()
                .iter()
                .map(|k| (k.clone(), self.items.borrow()[k].get_untracked()))
                .collect()
        })
    }

    /// Tracked snapshot of the whole list in order: reads the structural length producer (so a
    /// consumer re-runs on any insert/remove/move) and then each item's own value producer (so it
    /// also re-runs on an in-place value replacement), unlike [`KeyedList::peek`].
    pub fn iter(&self) -> Vec<(K, V)> {
        let _ = self.len();
        self.order
            .borrow()
            .iter()
            .map(|k| (k.clone(), self.items.borrow()[k].get()))
            .collect()
    }

    pub fn append(&self, key: K, value: V) -> Result<(), ReactiveError> {
        if self.items.borrow().contains_key(&key) {
            return Err(ReactiveError::DuplicateKey);
        }
        self.order.borrow_mut().push(key.clone());
        self.items.borrow_mut().insert(key, create_signal(value));
        self.bump_length();
        Ok(())
    }

    pub fn prepend(&self, key: K, value: V) -> Result<(), ReactiveError> {
        if self.items.borrow().contains_key(&key) {
            return Err(ReactiveError::DuplicateKey);
        }
        self.order.borrow_mut().insert(0, key.clone());
        self.items.borrow_mut().insert(key, create_signal(value));
        self.bump_length();
        Ok(())
    }

    /// Inserts `value` under `key`, immediately before the item currently keyed `before`.
    pub fn insert_before(&self, key: K, value: V, before: &K) -> Result<(), ReactiveError> {
        if self.items.borrow().contains_key(&key) {
            return Err(ReactiveError::DuplicateKey);
        }
        let pos = self
            .order
            .borrow()
            .iter()
            .position(|k| k == before)
            .ok_or(ReactiveError::KeyNotFound)?;
        self.order.borrow_mut().insert(pos, key.clone());
        self.items.borrow_mut().insert(key, create_signal(value));
        self.bump_length();
        Ok(())
    }

    /// Moves an existing item so that it sits immediately before `before`, or at the end of the
    /// list if `before` is `None`.
    pub fn move_before(&self, key: &K, before: Option<&K>) -> Result<(), ReactiveError> {
        if !self.items.borrow().contains_key(key) {
            return Err(ReactiveError::KeyNotFound);
        }
        let old_pos = self
            .order
            .borrow()
            .iter()
            .position(|k| k == key)
            .ok_or(ReactiveError::KeyNotFound)?;
        let removed = self.order.borrow_mut().remove(old_pos);
        let new_pos = match before {
            Some(before) => self
                .order
                .borrow()
                .iter()
                .position(|k| k == before)
                .ok_or(ReactiveError::KeyNotFound)?,
            None => self.order.borrow().len(),
        };
        self.order.borrow_mut().insert(new_pos, removed);
        self.bump_length();
        Ok(())
    }

    pub fn remove(&self, key: &K) -> Result<(), ReactiveError> {
        let pos = self
            .order
            .borrow()
            .iter()
            .position(|k| k == key)
            .ok_or(ReactiveError::KeyNotFound)?;
        self.order.borrow_mut().remove(pos);
        self.items.borrow_mut().remove(key);
        self.bump_length();
        Ok(())
    }

    /// Replaces the value stored under `key`. Bumps only that item's own version, not the
    /// structural one.
    pub fn update(&self, key: &K, value: V) -> Result<(), ReactiveError> {
        let signal = *self.items.borrow().get(key).ok_or(ReactiveError::KeyNotFound)?;
        signal.set(value);
        Ok(())
    }
}

impl<K, V> Default for KeyedList<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Callbacks invoked by [`reconcile`] as it mutates a [`KeyedList`] toward a new sequence.
pub struct ReconcileCallbacks<'a, K, V> {
    pub on_insert: Option<Box<dyn FnMut(&K, &V) + 'a>>,
    pub on_remove: Option<Box<dyn FnMut(&K) + 'a>>,
    pub on_move: Option<Box<dyn FnMut(&K) + 'a>>,
    pub on_update: Option<Box<dyn FnMut(&K, &V) + 'a>>,
}

// Written by hand rather than `#[derive(Default)]`, which would add spurious `K: Default`/
// `V: Default` bounds even though every field is an `Option` that defaults to `None` regardless.
impl<'a, K, V> Default for ReconcileCallbacks<'a, K, V> {
    fn default() -> Self {
        ReconcileCallbacks {
            on_insert: None,
            on_remove: None,
            on_move: None,
            on_update: None,
        }
    }
}

/// Reconciles `list` toward `new_items`, producing the minimal sequence of insert/remove/move/
/// update mutations.
///
/// Fast paths handle the degenerate empty/prefix/suffix cases directly; the general path builds
/// an old-position map, removes anything no longer present, computes the longest increasing
/// subsequence of surviving old positions (the items already in relative order, which must not
/// move), and then walks the new sequence right to left inserting or moving everything else.
pub fn reconcile<K, V>(
    list: &KeyedList<K, V>,
    new_items: &[(K, V)],
    mut callbacks: ReconcileCallbacks<'_, K, V>,
) where
    K: Eq + Hash + Clone + 'static,
    V: PartialEq + Clone + 'static,
{
    let old = list.peek();

    if old.is_empty() && new_items.is_empty() {
        return;
    }
    if old.is_empty() {
        for (k, v) in new_items {
            list.append(k.clone(), v.clone()).expect("key already validated absent");
            if let Some(cb) = callbacks.on_insert.as_mut() {
                cb(k, v);
            }
        }
        return;
    }
    if new_items.is_empty() {
        for (k, _) in &old {
            list.remove(k).expect("key came from list.peek()");
            if let Some(cb) = callbacks.on_remove.as_mut() {
                cb(k);
            }
        }
        return;
    }

    // Skip a matching prefix and suffix before falling back to the general path; this mirrors
    // the fast paths `map_keyed` takes before it resorts to a full rewrite.
    let mut start = 0;
    while start < old.len() && start < new_items.len() && old[start].0 == new_items[start].0 {
        if old[start].1 != new_items[start].1 {
            list.update(&old[start].0, new_items[start].1.clone()).unwrap();
            if let Some(cb) = callbacks.on_update.as_mut() {
                cb(&new_items[start].0, &new_items[start].1);
            }
        }
        start += 1;
    }
    let mut old_end = old.len();
    let mut new_end = new_items.len();
    while old_end > start
        && new_end > start
        && old[old_end - 1].0 == new_items[new_end - 1].0
    {
        old_end -= 1;
        new_end -= 1;
        if old[old_end].1 != new_items[new_end].1 {
            list.update(&old[old_end].0, new_items[new_end].1.clone()).unwrap();
            if let Some(cb) = callbacks.on_update.as_mut() {
                cb(&new_items[new_end].0, &new_items[new_end].1);
            }
        }
    }
    if start == old_end && start == new_end {
        return;
    }

    let old_index: HashMap<K, usize> = old
        .iter()
        .enumerate()
        .map(|(i, (k, _))| (k.clone(), i))
        .collect();
    let new_keys: HashSet<&K> = new_items[start..new_end].iter().map(|(k, _)| k).collect();

    // Step 3: remove survivors of the prefix/suffix skip that are gone in the new sequence.
    for (k, _) in old[start..old_end].iter() {
        if !new_keys.contains(k) {
            list.remove(k).expect("key came from list.peek()");
            if let Some(cb) = callbacks.on_remove.as_mut() {
                cb(k);
            }
        }
    }

    // Step 2 (value updates) + building the old-index sequence for the middle window.
    let mut present: Vec<(usize, usize)> = Vec::new(); // (position in new_items, old index)
    for (new_pos, (k, v)) in new_items.iter().enumerate().take(new_end).skip(start) {
        if let Some(&old_idx) = old_index.get(k) {
            present.push((new_pos, old_idx));
            if old[old_idx].1 != *v {
                list.update(k, v.clone()).unwrap();
                if let Some(cb) = callbacks.on_update.as_mut() {
                    cb(k, v);
                }
            }
        }
    }

    // Step 4: the LIS of old indices identifies items whose relative order is already correct.
    let old_index_seq: Vec<usize> = present.iter().map(|&(_, oi)| oi).collect();
    let lis = longest_increasing_subsequence(&old_index_seq);
    let keep_new_pos: HashSet<usize> = lis.iter().map(|&i| present[i].0).collect();

    // Step 5: walk right to left, inserting new keys and moving everything not in the LIS.
    let mut next_key: Option<K> = None;
    for (new_pos, (k, v)) in new_items.iter().enumerate().take(new_end).skip(start).rev() {
        if keep_new_pos.contains(&new_pos) {
            next_key = Some(k.clone());
            continue;
        }
        if old_index.contains_key(k) {
            list.move_before(k, next_key.as_ref()).expect("key already validated present");
            if let Some(cb) = callbacks.on_move.as_mut() {
                cb(k);
            }
        } else {
            match &next_key {
                Some(before) => {
                    list.insert_before(k.clone(), v.clone(), before)
                        .expect("key already validated absent");
                }
                None => {
                    list.append(k.clone(), v.clone()).expect("key already validated absent");
                }
            }
            if let Some(cb) = callbacks.on_insert.as_mut() {
                cb(k, v);
            }
        }
        next_key = Some(k.clone());
    }
}
