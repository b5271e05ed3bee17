//! Array fields with stable item identity
//!
//! Every item of a registered array gets an [`ItemKey`] that follows it
//! through reordering. The key list mirrors the live array and the
//! key-to-position map is patched only over the range an operation touches.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace, warn};
use ulid::Ulid;

use crate::config::FieldEvent;
use crate::engine::FormEngine;
use crate::events::FormEvent;

/// Opaque identity of an array item. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey(Ulid);

impl ItemKey {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ItemKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Length limits enforced by structural operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayRules {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
}

/// Why a structural operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayRejection {
    #[error("{len} items would exceed the maximum of {max}")]
    TooMany { len: usize, max: usize },

    #[error("{len} items would fall below the minimum of {min}")]
    TooFew { len: usize, min: usize },

    #[error("index {index} is out of range for {len} items")]
    OutOfRange { index: usize, len: usize },

    #[error("value at the array path is not an array")]
    NotAnArray,
}

impl ArrayRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    fn check_grow(&self, len: usize, added: usize) -> Result<(), ArrayRejection> {
        match self.max_length {
            Some(max) if len + added > max => Err(ArrayRejection::TooMany {
                len: len + added,
                max,
            }),
            _ => Ok(()),
        }
    }

    fn check_shrink(&self, len: usize, removed: usize) -> Result<(), ArrayRejection> {
        match self.min_length {
            Some(min) if len - removed < min => Err(ArrayRejection::TooFew {
                len: len - removed,
                min,
            }),
            _ => Ok(()),
        }
    }

    fn check_replace(&self, new_len: usize) -> Result<(), ArrayRejection> {
        if let Some(max) = self.max_length.filter(|max| new_len > *max) {
            return Err(ArrayRejection::TooMany { len: new_len, max });
        }
        if let Some(min) = self.min_length.filter(|min| new_len < *min) {
            return Err(ArrayRejection::TooFew { len: new_len, min });
        }
        Ok(())
    }
}

fn check_index(index: usize, len: usize) -> Result<(), ArrayRejection> {
    if index < len {
        Ok(())
    } else {
        Err(ArrayRejection::OutOfRange { index, len })
    }
}

/// How item positions moved in one structural operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRemap {
    /// Nothing moved
    Identity,
    /// `count` items were inserted at `at`
    Shift { at: usize, count: usize },
    /// Items at these sorted, distinct positions were removed
    Remove { removed: Vec<usize> },
    Swap(usize, usize),
    Move { from: usize, to: usize },
    /// Every prior position is gone
    Discard,
}

impl IndexRemap {
    /// New position of the item formerly at `old`, `None` when it was removed.
    pub fn map(&self, old: usize) -> Option<usize> {
        match self {
            IndexRemap::Identity => Some(old),
            IndexRemap::Shift { at, count } => Some(if old >= *at { old + count } else { old }),
            IndexRemap::Remove { removed } => match removed.binary_search(&old) {
                Ok(_) => None,
                Err(before) => Some(old - before),
            },
            IndexRemap::Swap(a, b) => Some(if old == *a {
                *b
            } else if old == *b {
                *a
            } else {
                old
            }),
            IndexRemap::Move { from, to } => Some(if old == *from {
                *to
            } else if from < to && old > *from && old <= *to {
                old - 1
            } else if from > to && old >= *to && old < *from {
                old + 1
            } else {
                old
            }),
            IndexRemap::Discard => None,
        }
    }
}

/// Key list and position index of one array.
#[derive(Debug, Clone)]
pub struct ArrayField {
    rules: ArrayRules,
    keys: Vec<ItemKey>,
    index: HashMap<ItemKey, usize>,
}

impl ArrayField {
    pub fn new(rules: ArrayRules, len: usize) -> Self {
        let mut field = Self {
            rules,
            keys: Vec::with_capacity(len),
            index: HashMap::with_capacity(len),
        };
        field.sync_len(len);
        field
    }

    pub fn rules(&self) -> ArrayRules {
        self.rules
    }

    pub fn set_rules(&mut self, rules: ArrayRules) {
        self.rules = rules;
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[ItemKey] {
        &self.keys
    }

    pub fn index_of(&self, key: &ItemKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    fn reindex(&mut self, range: std::ops::Range<usize>) {
        for position in range {
            self.index.insert(self.keys[position], position);
        }
    }

    /// Fresh keys for every position.
    pub fn rebuild(&mut self, len: usize) {
        self.keys.clear();
        self.index.clear();
        self.sync_len(len);
    }

    /// Grow or truncate the key list to `len` without touching kept keys.
    pub fn sync_len(&mut self, len: usize) {
        if len < self.keys.len() {
            for key in self.keys.drain(len..) {
                self.index.remove(&key);
            }
        } else if len > self.keys.len() {
            let start = self.keys.len();
            self.keys.extend((start..len).map(|_| ItemKey::new()));
            self.reindex(start..len);
        }
    }

    fn insert_keys(&mut self, at: usize, count: usize) -> IndexRemap {
        self.keys
            .splice(at..at, (0..count).map(|_| ItemKey::new()));
        self.reindex(at..self.keys.len());
        IndexRemap::Shift { at, count }
    }

    fn remove_keys(&mut self, removed: Vec<usize>) -> IndexRemap {
        let Some(&first) = removed.first() else {
            return IndexRemap::Identity;
        };
        for &position in removed.iter().rev() {
            let key = self.keys.remove(position);
            self.index.remove(&key);
        }
        self.reindex(first..self.keys.len());
        IndexRemap::Remove { removed }
    }

    fn swap_keys(&mut self, a: usize, b: usize) -> IndexRemap {
        self.keys.swap(a, b);
        self.index.insert(self.keys[a], a);
        self.index.insert(self.keys[b], b);
        IndexRemap::Swap(a, b)
    }

    fn move_key(&mut self, from: usize, to: usize) -> IndexRemap {
        let key = self.keys.remove(from);
        self.keys.insert(to, key);
        self.reindex(from.min(to)..from.max(to) + 1);
        IndexRemap::Move { from, to }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.index.len() == self.keys.len()
            && self
                .keys
                .iter()
                .enumerate()
                .all(|(position, key)| self.index.get(key) == Some(&position))
    }
}

/// Structural operation kinds, reported with [`FormEvent::ArrayChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayOp {
    Append,
    Prepend,
    Insert,
    Remove,
    RemoveAll,
    Swap,
    Move,
    Update,
    Replace,
}

/// Where the UI should move focus after an operation. Passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusHint {
    /// Leave focus alone
    None,
    /// Focus the item at this position
    Index(usize),
    /// Focus a named field inside the item at this position
    Field { index: usize, name: String },
}

/// An item with its stable key.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayItem {
    pub key: ItemKey,
    pub value: Value,
}

/// Handle for structural operations on one array path.
///
/// Operations return false and leave values, keys and meta unchanged when
/// they are refused.
#[derive(Debug, Clone)]
pub struct FieldArray {
    engine: FormEngine,
    path: String,
    focus: Option<FocusHint>,
}

impl FieldArray {
    pub(crate) fn new(engine: FormEngine, path: String) -> Self {
        Self {
            engine,
            path,
            focus: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach a focus hint to events from operations made through this handle.
    pub fn with_focus(mut self, hint: FocusHint) -> Self {
        self.focus = Some(hint);
        self
    }

    fn with_field<R>(&self, read: impl FnOnce(&[Value], &ArrayField) -> R) -> R {
        let mut guard = self.engine.lock();
        let state = &mut *guard;
        let items = match state.store.get(&self.path) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        };
        let field = state
            .arrays
            .entry(self.path.clone())
            .or_insert_with(|| ArrayField::new(ArrayRules::default(), 0));
        field.sync_len(items.len());
        read(items, field)
    }

    /// Items with their keys, in order.
    pub fn fields(&self) -> Vec<ArrayItem> {
        self.with_field(|items, field| {
            field
                .keys()
                .iter()
                .zip(items)
                .map(|(key, value)| ArrayItem {
                    key: *key,
                    value: value.clone(),
                })
                .collect()
        })
    }

    pub fn keys(&self) -> Vec<ItemKey> {
        self.with_field(|_, field| field.keys().to_vec())
    }

    pub fn len(&self) -> usize {
        self.with_field(|items, _| items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live position of the item with `key`.
    pub fn index_of(&self, key: &ItemKey) -> Option<usize> {
        self.with_field(|_, field| field.index_of(key))
    }

    pub fn append(&self, value: Value) -> bool {
        self.append_many(vec![value])
    }

    pub fn append_many(&self, values: Vec<Value>) -> bool {
        self.mutate(ArrayOp::Append, |items, field| {
            field.rules.check_grow(items.len(), values.len())?;
            let at = items.len();
            let count = values.len();
            items.extend(values);
            Ok(field.insert_keys(at, count))
        })
    }

    pub fn prepend(&self, value: Value) -> bool {
        self.prepend_many(vec![value])
    }

    pub fn prepend_many(&self, values: Vec<Value>) -> bool {
        self.insert_at(ArrayOp::Prepend, 0, values)
    }

    /// Insert at `index`, clamped into `0..=len`.
    pub fn insert(&self, index: usize, value: Value) -> bool {
        self.insert_many(index, vec![value])
    }

    pub fn insert_many(&self, index: usize, values: Vec<Value>) -> bool {
        self.insert_at(ArrayOp::Insert, index, values)
    }

    fn insert_at(&self, op: ArrayOp, index: usize, values: Vec<Value>) -> bool {
        self.mutate(op, |items, field| {
            field.rules.check_grow(items.len(), values.len())?;
            let at = index.min(items.len());
            let count = values.len();
            items.splice(at..at, values);
            Ok(field.insert_keys(at, count))
        })
    }

    pub fn remove(&self, index: usize) -> bool {
        self.remove_many(&[index])
    }

    /// Remove several positions at once. Duplicates collapse; any position
    /// out of range refuses the whole call.
    pub fn remove_many(&self, indices: &[usize]) -> bool {
        let mut removed = indices.to_vec();
        removed.sort_unstable();
        removed.dedup();
        self.mutate(ArrayOp::Remove, |items, field| {
            if let Some(&last) = removed.last() {
                check_index(last, items.len())?;
            }
            field.rules.check_shrink(items.len(), removed.len())?;
            for &position in removed.iter().rev() {
                items.remove(position);
            }
            Ok(field.remove_keys(removed))
        })
    }

    pub fn remove_all(&self) -> bool {
        self.mutate(ArrayOp::RemoveAll, |items, field| {
            field.rules.check_shrink(items.len(), items.len())?;
            let removed: Vec<usize> = (0..items.len()).collect();
            items.clear();
            Ok(field.remove_keys(removed))
        })
    }

    pub fn swap(&self, a: usize, b: usize) -> bool {
        self.mutate(ArrayOp::Swap, |items, field| {
            check_index(a, items.len())?;
            check_index(b, items.len())?;
            items.swap(a, b);
            Ok(field.swap_keys(a, b))
        })
    }

    pub fn move_item(&self, from: usize, to: usize) -> bool {
        self.mutate(ArrayOp::Move, |items, field| {
            check_index(from, items.len())?;
            check_index(to, items.len())?;
            let item = items.remove(from);
            items.insert(to, item);
            Ok(field.move_key(from, to))
        })
    }

    /// Replace the value at `index`, keeping its key.
    pub fn update(&self, index: usize, value: Value) -> bool {
        self.mutate(ArrayOp::Update, |items, _| {
            check_index(index, items.len())?;
            items[index] = value;
            Ok(IndexRemap::Identity)
        })
    }

    /// Replace the whole array. Every item gets a fresh key.
    pub fn replace(&self, values: Vec<Value>) -> bool {
        self.mutate(ArrayOp::Replace, |items, field| {
            field.rules.check_replace(values.len())?;
            *items = values;
            field.rebuild(items.len());
            Ok(IndexRemap::Discard)
        })
    }

    fn mutate<F>(&self, op: ArrayOp, apply: F) -> bool
    where
        F: FnOnce(&mut Vec<Value>, &mut ArrayField) -> Result<IndexRemap, ArrayRejection>,
    {
        let path = self.path.as_str();
        let revalidate = {
            let mut guard = self.engine.lock();
            let state = &mut *guard;
            let field = state
                .arrays
                .entry(path.to_string())
                .or_insert_with(|| ArrayField::new(ArrayRules::default(), 0));

            // A missing array is built aside and written only once the
            // operation is accepted
            let mut created = None;
            let result = match state.store.get(path) {
                Some(Value::Array(_)) => {
                    let Some(items) = state.store.array_mut(path) else {
                        return false;
                    };
                    field.sync_len(items.len());
                    apply(items, field)
                }
                None | Some(Value::Null) => {
                    field.sync_len(0);
                    let mut items = Vec::new();
                    let result = apply(&mut items, field);
                    created = Some(items);
                    result
                }
                Some(_) => {
                    warn!(path, ?op, rejection = %ArrayRejection::NotAnArray, "rejected array operation");
                    return false;
                }
            };

            let remap = match result {
                Ok(remap) => remap,
                Err(rejection @ ArrayRejection::OutOfRange { .. }) => {
                    warn!(path, ?op, %rejection, "rejected array operation");
                    return false;
                }
                Err(rejection) => {
                    debug!(path, ?op, %rejection, "rejected array operation");
                    return false;
                }
            };
            if let Some(items) = created {
                if !state.store.set(path, Value::Array(items)) {
                    field.sync_len(0);
                    return false;
                }
            }
            trace!(path, ?op, ?remap, "array changed");

            state.store.remap_array_items(path, &remap);
            state.store.clear_validating_under(path);
            state.validation.invalidate_under(path);
            self.engine.inner.timers.cancel_under(path);
            self.engine
                .dirty_tracker()
                .track_write(&mut state.store, path, true);
            self.engine
                .should_validate(&state.store, path, FieldEvent::Change)
        };

        self.engine.emit(FormEvent::ArrayChanged {
            path: self.path.clone(),
            op,
            focus: self.focus.clone(),
        });
        if revalidate {
            self.engine.schedule_revalidate(path);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_remap_positions() {
        let shift = IndexRemap::Shift { at: 1, count: 2 };
        assert_eq!(shift.map(0), Some(0));
        assert_eq!(shift.map(1), Some(3));

        let remove = IndexRemap::Remove { removed: vec![1, 3] };
        assert_eq!(remove.map(0), Some(0));
        assert_eq!(remove.map(1), None);
        assert_eq!(remove.map(2), Some(1));
        assert_eq!(remove.map(4), Some(2));

        let forward = IndexRemap::Move { from: 1, to: 3 };
        assert_eq!(
            (0..5).map(|i| forward.map(i).unwrap()).collect::<Vec<_>>(),
            vec![0, 3, 1, 2, 4]
        );
        let backward = IndexRemap::Move { from: 3, to: 1 };
        assert_eq!(
            (0..5).map(|i| backward.map(i).unwrap()).collect::<Vec<_>>(),
            vec![0, 2, 3, 1, 4]
        );
        assert_eq!(IndexRemap::Swap(0, 2).map(2), Some(0));
        assert_eq!(IndexRemap::Discard.map(0), None);
    }

    #[test]
    fn test_rules() {
        let rules = ArrayRules::new().min_length(1).max_length(3);
        assert!(rules.check_grow(2, 1).is_ok());
        assert_eq!(
            rules.check_grow(3, 1),
            Err(ArrayRejection::TooMany { len: 4, max: 3 })
        );
        assert_eq!(
            rules.check_shrink(1, 1),
            Err(ArrayRejection::TooFew { len: 0, min: 1 })
        );
        assert!(rules.check_replace(0).is_err());
        assert!(rules.check_replace(4).is_err());
        assert!(rules.check_replace(2).is_ok());
    }

    #[test]
    fn test_sync_len_keeps_existing_keys() {
        let mut field = ArrayField::new(ArrayRules::default(), 2);
        let before = field.keys().to_vec();
        field.sync_len(4);
        assert_eq!(&field.keys()[..2], before.as_slice());
        field.sync_len(1);
        assert_eq!(field.keys(), &before[..1]);
        assert!(field.is_consistent());
        field.rebuild(1);
        assert_ne!(field.keys()[0], before[0]);
    }

    #[derive(Debug, Clone)]
    enum Step {
        Insert(usize, usize),
        Remove(usize),
        Swap(usize, usize),
        Move(usize, usize),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..12usize, 1..3usize).prop_map(|(at, n)| Step::Insert(at, n)),
            (0..12usize).prop_map(Step::Remove),
            (0..12usize, 0..12usize).prop_map(|(a, b)| Step::Swap(a, b)),
            (0..12usize, 0..12usize).prop_map(|(a, b)| Step::Move(a, b)),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_tracks_positions(steps in prop::collection::vec(step(), 1..40)) {
            let mut field = ArrayField::new(ArrayRules::default(), 3);
            // Shadow list of keys maintained the slow way
            let mut shadow: Vec<ItemKey> = field.keys().to_vec();
            for step in steps {
                let len = field.len();
                match step {
                    Step::Insert(at, n) => {
                        let at = at.min(len);
                        field.insert_keys(at, n);
                        shadow.splice(at..at, field.keys()[at..at + n].iter().copied());
                    }
                    Step::Remove(i) if i < len => {
                        field.remove_keys(vec![i]);
                        shadow.remove(i);
                    }
                    Step::Swap(a, b) if a < len && b < len => {
                        field.swap_keys(a, b);
                        shadow.swap(a, b);
                    }
                    Step::Move(a, b) if a < len && b < len => {
                        field.move_key(a, b);
                        let key = shadow.remove(a);
                        shadow.insert(b, key);
                    }
                    _ => {}
                }
                prop_assert_eq!(field.keys(), shadow.as_slice());
                prop_assert!(field.is_consistent());
                let mut unique = shadow.clone();
                unique.sort();
                unique.dedup();
                prop_assert_eq!(unique.len(), shadow.len());
            }
        }
    }
}
