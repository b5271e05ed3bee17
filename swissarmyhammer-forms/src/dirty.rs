//! Dirty detection by comparison against the default snapshot

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::trace;

use crate::config::NoDirtyWritePolicy;
use crate::hash::optional_equal;
use crate::path::{ancestors, join};
use crate::store::ValueStore;

/// Keeps dirty flags in line with "current value differs from default".
#[derive(Debug, Clone, Copy)]
pub struct DirtyTracker {
    policy: NoDirtyWritePolicy,
}

impl DirtyTracker {
    pub fn new(policy: NoDirtyWritePolicy) -> Self {
        Self { policy }
    }

    /// Compare `path` against its default and set or clear its flag.
    /// Returns true when the flag changed.
    pub fn evaluate(&self, store: &mut ValueStore, path: &str) -> bool {
        let differs = !optional_equal(store.get(path), store.default_at(path));
        if differs {
            store.mark_dirty(path)
        } else {
            store.clear_dirty(path)
        }
    }

    /// Update flags after a write at `path`, returning paths whose flag changed.
    ///
    /// A write that should mark dirty re-derives the flags of the subtree it
    /// could have changed, at the same granularity as [`recompute_all`], and
    /// re-evaluates flagged ancestors. A write that should not follows the
    /// configured [`NoDirtyWritePolicy`].
    ///
    /// [`recompute_all`]: DirtyTracker::recompute_all
    pub fn track_write(&self, store: &mut ValueStore, path: &str, should_dirty: bool) -> Vec<String> {
        let mut changed = Vec::new();
        if should_dirty {
            let scope = comparison_scope(store, path);
            let differing: BTreeSet<String> =
                differing_leaves_at(&scope, store.get(&scope), store.default_at(&scope))
                    .into_iter()
                    .collect();
            for flagged in store.dirty_paths_under(&scope) {
                if !differing.contains(&flagged) && store.clear_dirty(&flagged) {
                    changed.push(flagged);
                }
            }
            for leaf in differing {
                if store.mark_dirty(&leaf) {
                    changed.push(leaf);
                }
            }
            self.reevaluate_ancestors(store, &scope, &mut changed);
            return changed;
        }

        match self.policy {
            NoDirtyWritePolicy::Rebaseline => {
                let value = store.get(path).cloned();
                match value {
                    Some(value) => {
                        store.rebaseline(path, value);
                    }
                    None => {
                        trace!(path, "nothing written, baseline unchanged");
                    }
                }
                for flagged in store.dirty_paths_under(path) {
                    if store.clear_dirty(&flagged) {
                        changed.push(flagged);
                    }
                }
                self.reevaluate_ancestors(store, path, &mut changed);
            }
            NoDirtyWritePolicy::Preserve => {}
        }
        changed
    }

    fn reevaluate_ancestors(&self, store: &mut ValueStore, path: &str, changed: &mut Vec<String>) {
        let flagged: Vec<String> = ancestors(path)
            .filter(|ancestor| store.is_field_dirty(ancestor))
            .map(str::to_string)
            .collect();
        for ancestor in flagged {
            if self.evaluate(store, &ancestor) {
                changed.push(ancestor);
            }
        }
    }

    /// Drop every flag and flag each leaf that differs from the defaults.
    pub fn recompute_all(&self, store: &mut ValueStore) {
        let differing = differing_leaves(Some(store.values()), Some(store.defaults()));
        store.clear_all_dirty();
        for path in differing {
            store.mark_dirty(&path);
        }
    }
}

/// Leaf paths where `current` and `baseline` disagree.
pub fn differing_leaves(current: Option<&Value>, baseline: Option<&Value>) -> Vec<String> {
    differing_leaves_at("", current, baseline)
}

/// Like [`differing_leaves`] for subtrees rooted at `prefix`.
pub fn differing_leaves_at(prefix: &str, current: Option<&Value>, baseline: Option<&Value>) -> Vec<String> {
    let mut out = Vec::new();
    collect_differences(prefix, current, baseline, &mut out);
    out
}

/// Shallowest path on the way to `path` that a write there can reshape.
///
/// Descends only through objects present in both trees; the first array on
/// the way bounds the scope because item writes may pad it.
fn comparison_scope(store: &ValueStore, path: &str) -> String {
    let mut above: Vec<&str> = ancestors(path).collect();
    above.push("");
    for prefix in above.into_iter().rev() {
        let both_objects = matches!(
            (store.get(prefix), store.default_at(prefix)),
            (Some(Value::Object(_)), Some(Value::Object(_)))
        );
        if !both_objects {
            return prefix.to_string();
        }
    }
    path.to_string()
}

fn collect_differences(prefix: &str, current: Option<&Value>, baseline: Option<&Value>, out: &mut Vec<String>) {
    match (current, baseline) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            for (key, value) in a {
                collect_differences(&join(prefix, key), Some(value), b.get(key), out);
            }
            for (key, value) in b {
                if !a.contains_key(key) {
                    collect_differences(&join(prefix, key), None, Some(value), out);
                }
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for index in 0..a.len().max(b.len()) {
                collect_differences(
                    &join(prefix, &index.to_string()),
                    a.get(index),
                    b.get(index),
                    out,
                );
            }
        }
        (a, b) => {
            if !optional_equal(a, b) {
                out.push(prefix.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathAccessor;
    use serde_json::json;
    use std::sync::Arc;

    fn store(defaults: Value) -> ValueStore {
        ValueStore::new(Arc::new(PathAccessor::default()), defaults)
    }

    #[test]
    fn test_set_then_revert_ends_clean() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"email": ""}));
        for value in ["a", "ab", ""] {
            store.set("email", json!(value));
            tracker.track_write(&mut store, "email", true);
        }
        assert!(!store.is_field_dirty("email"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_parent_write_reevaluates_flagged_children() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"user": {"name": "a", "age": 1}}));
        store.set("user.name", json!("b"));
        tracker.track_write(&mut store, "user.name", true);
        assert!(store.is_field_dirty("user.name"));

        store.set("user", json!({"name": "a", "age": 1}));
        tracker.track_write(&mut store, "user", true);
        assert!(!store.is_field_dirty("user"));
        assert!(!store.is_field_dirty("user.name"));
        assert_eq!(store.dirty_count(), 0);
    }

    #[test]
    fn test_parent_write_flags_differing_leaves() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"user": {"name": "a", "age": 1}}));
        store.set("user", json!({"name": "b", "age": 1}));
        let changed = tracker.track_write(&mut store, "user", true);
        assert_eq!(changed, vec!["user.name"]);
        assert!(store.is_field_dirty("user.name"));
        assert!(!store.is_field_dirty("user"));
        assert!(!store.is_field_dirty("user.age"));

        store.set("user.name", json!("a"));
        tracker.track_write(&mut store, "user.name", true);
        assert_eq!(store.dirty_count(), 0);
    }

    #[test]
    fn test_writes_agree_with_recompute() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"list": [1], "user": {"name": "a"}}));
        let writes = [
            ("user", json!({"name": "b", "tags": ["x"]})),
            ("profile.city", json!("Oslo")),
            ("list.2", json!(3)),
            ("user.tags.0", json!("y")),
        ];
        for (path, value) in writes {
            store.set(path, value);
            tracker.track_write(&mut store, path, true);
        }
        let mut incremental = store.dirty_paths_under("");
        incremental.sort();

        tracker.recompute_all(&mut store);
        let mut recomputed = store.dirty_paths_under("");
        recomputed.sort();
        assert_eq!(incremental, recomputed);
        assert_eq!(store.dirty_count(), recomputed.len());
    }

    #[test]
    fn test_no_dirty_write_rebaselines() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"name": "a"}));
        store.set("name", json!("b"));
        tracker.track_write(&mut store, "name", true);
        assert!(store.is_field_dirty("name"));

        store.set("name", json!("c"));
        tracker.track_write(&mut store, "name", false);
        assert!(!store.is_field_dirty("name"));
        assert_eq!(store.default_at("name"), Some(&json!("c")));

        // The new baseline is what later writes compare against
        store.set("name", json!("a"));
        tracker.track_write(&mut store, "name", true);
        assert!(store.is_field_dirty("name"));
    }

    #[test]
    fn test_no_dirty_write_preserve_keeps_flags() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Preserve);
        let mut store = store(json!({"name": "a"}));
        store.set("name", json!("b"));
        tracker.track_write(&mut store, "name", true);
        store.set("name", json!("a"));
        assert!(tracker.track_write(&mut store, "name", false).is_empty());
        assert!(store.is_field_dirty("name"));
        assert_eq!(store.default_at("name"), Some(&json!("a")));
    }

    #[test]
    fn test_recompute_all_flags_differing_leaves() {
        let tracker = DirtyTracker::new(NoDirtyWritePolicy::Rebaseline);
        let mut store = store(json!({"a": 1, "list": [1, 2], "nested": {"x": true}}));
        store.replace_values(json!({"a": 1.0, "list": [1], "nested": {"x": false, "y": 0}}));
        tracker.recompute_all(&mut store);
        let mut dirty = store.dirty_paths_under("");
        dirty.sort();
        assert_eq!(dirty, vec!["list.1", "nested.x", "nested.y"]);
        assert_eq!(store.dirty_count(), 3);
    }

    #[test]
    fn test_absent_differs_from_null() {
        let found = differing_leaves(Some(&json!({"a": null})), Some(&json!({})));
        assert_eq!(found, vec!["a"]);
    }
}
