//! Value-typed collection snapshots and the pure edits applied to them.
//!
//! Nothing here touches the network or shared state. Every reducer takes a
//! snapshot by reference and returns a new one, so the before/after pair of
//! an optimistic mutation is just two values.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// An entity the optimistic cache can hold.
pub trait CacheEntity: Clone + Debug + Send + Sync + 'static {
    /// Stable key, unique within a snapshot.
    type Key: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;
    /// The mutable field an update replaces (e.g., a quantity).
    type Field: Clone + Debug + Send + Sync + 'static;

    fn key(&self) -> &Self::Key;

    /// Combine with an incoming entity of the same key (an add onto an
    /// existing entry).
    #[must_use]
    fn merge(&self, incoming: &Self) -> Self;

    /// Copy of this entity with its mutable field replaced.
    #[must_use]
    fn with_field(&self, field: &Self::Field) -> Self;

    /// Whether this entity should be dropped from the collection
    /// (e.g., quantity ≤ 0).
    fn is_vacant(&self) -> bool {
        false
    }
}

/// Ordered, key-unique collection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot<V> {
    items: Vec<V>,
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<V: CacheEntity> Snapshot<V> {
    /// Empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot from server items. A repeated key keeps its last occurrence
    /// at the position of the first; vacant entries are dropped.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = V>) -> Self {
        let mut snapshot = Self::new();
        for item in items {
            match snapshot.position(item.key()) {
                Some(index) => snapshot.items[index] = item,
                None => snapshot.items.push(item),
            }
        }
        snapshot.items.retain(|item| !item.is_vacant());
        snapshot
    }

    #[must_use]
    pub fn items(&self) -> &[V] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.items.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &V::Key) -> Option<&V> {
        self.items.iter().find(|item| item.key() == key)
    }

    #[must_use]
    pub fn contains(&self, key: &V::Key) -> bool {
        self.get(key).is_some()
    }

    fn position(&self, key: &V::Key) -> Option<usize> {
        self.items.iter().position(|item| item.key() == key)
    }

    /// Add `item`, merging into an existing entry of the same key.
    #[must_use]
    pub fn apply_add(&self, item: &V) -> Self {
        let mut items = self.items.clone();
        match self.position(item.key()) {
            Some(index) => items[index] = items[index].merge(item),
            None => items.push(item.clone()),
        }
        items.retain(|item| !item.is_vacant());
        Self { items }
    }

    /// Replace the field of the entry with `key`, dropping it if that leaves
    /// it vacant. Unknown keys leave the snapshot unchanged.
    #[must_use]
    pub fn apply_update(&self, key: &V::Key, field: &V::Field) -> Self {
        let items = self
            .items
            .iter()
            .map(|item| {
                if item.key() == key {
                    item.with_field(field)
                } else {
                    item.clone()
                }
            })
            .filter(|item| !item.is_vacant())
            .collect();
        Self { items }
    }

    /// Remove the entry with `key`.
    #[must_use]
    pub fn apply_remove(&self, key: &V::Key) -> Self {
        Self {
            items: self
                .items
                .iter()
                .filter(|item| item.key() != key)
                .cloned()
                .collect(),
        }
    }

    /// Empty the collection.
    #[must_use]
    pub fn apply_clear(&self) -> Self {
        Self::new()
    }

    /// Set whether `item` is a member. Membership never merges: adding an
    /// existing member leaves it as is.
    #[must_use]
    pub fn apply_membership(&self, item: &V, present: bool) -> Self {
        if !present {
            return self.apply_remove(item.key());
        }
        if self.contains(item.key()) {
            return self.clone();
        }
        let mut items = self.items.clone();
        items.push(item.clone());
        Self { items }
    }
}

impl<V> IntoIterator for Snapshot<V> {
    type Item = V;
    type IntoIter = std::vec::IntoIter<V>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A local edit to one collection.
#[derive(Debug, Clone)]
pub enum Edit<V: CacheEntity> {
    Add(V),
    Update { key: V::Key, field: V::Field },
    Remove(V::Key),
    Clear,
    /// Toggle-style membership, computed from the state at apply time.
    SetMember { item: V, present: bool },
}

impl<V: CacheEntity> Edit<V> {
    /// Apply this edit to `snapshot`.
    #[must_use]
    pub fn apply(&self, snapshot: &Snapshot<V>) -> Snapshot<V> {
        match self {
            Self::Add(item) => snapshot.apply_add(item),
            Self::Update { key, field } => snapshot.apply_update(key, field),
            Self::Remove(key) => snapshot.apply_remove(key),
            Self::Clear => snapshot.apply_clear(),
            Self::SetMember { item, present } => snapshot.apply_membership(item, *present),
        }
    }

    /// The key this edit touches; `None` for edits spanning the collection.
    #[must_use]
    pub fn target(&self) -> Option<&V::Key> {
        match self {
            Self::Add(item) | Self::SetMember { item, .. } => Some(item.key()),
            Self::Update { key, .. } | Self::Remove(key) => Some(key),
            Self::Clear => None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update { .. } => "update",
            Self::Remove(_) => "remove",
            Self::Clear => "clear",
            Self::SetMember { present: true, .. } => "set_member",
            Self::SetMember { present: false, .. } => "unset_member",
        }
    }
}
