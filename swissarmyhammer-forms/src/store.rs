//! Value tree, default snapshot and per-path field state

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::trace;

use crate::array::IndexRemap;
use crate::path::{ancestors, is_index, is_same_or_descendant, PathAccessor};

/// One entry of a collect-all error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorTypeValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Error attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Kind of the first violation
    pub kind: String,
    /// Message of the first violation
    pub message: String,
    /// Every violation keyed by kind, present in collect-all mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<BTreeMap<String, ErrorTypeValue>>,
}

impl FieldError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            types: None,
        }
    }
}

/// Flags and errors recorded for one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMeta {
    pub touched: bool,
    pub dirty: bool,
    /// Schema error, or one set by hand
    pub error: Option<FieldError>,
    /// Error from a field-local validator
    pub custom_error: Option<FieldError>,
}

impl FieldMeta {
    fn is_empty(&self) -> bool {
        !self.touched && !self.dirty && self.error.is_none() && self.custom_error.is_none()
    }
}

/// Owns the values, the default snapshot, field meta and form-level state.
///
/// Dirty and touched counts are maintained on transitions so whole-form
/// questions never scan the meta table.
#[derive(Debug)]
pub struct ValueStore {
    paths: Arc<PathAccessor>,
    values: Value,
    defaults: Value,
    meta: HashMap<String, FieldMeta>,
    dirty_count: usize,
    touched_count: usize,
    external_errors: BTreeMap<String, FieldError>,
    validating: HashMap<String, HashSet<u64>>,
    full_runs: HashSet<u64>,
    next_token: u64,
    generation: u64,
    pub(crate) submit_count: u32,
    pub(crate) is_submitting: bool,
    pub(crate) is_submitted: bool,
    pub(crate) is_submit_successful: bool,
    pub(crate) is_loading: bool,
    pub(crate) load_error: Option<String>,
}

impl ValueStore {
    /// Store whose values start as a deep copy of `defaults`.
    pub fn new(paths: Arc<PathAccessor>, defaults: Value) -> Self {
        Self {
            paths,
            values: defaults.clone(),
            defaults,
            meta: HashMap::new(),
            dirty_count: 0,
            touched_count: 0,
            external_errors: BTreeMap::new(),
            validating: HashMap::new(),
            full_runs: HashSet::new(),
            next_token: 0,
            generation: 0,
            submit_count: 0,
            is_submitting: false,
            is_submitted: false,
            is_submit_successful: false,
            is_loading: false,
            load_error: None,
        }
    }

    pub fn paths(&self) -> &PathAccessor {
        &self.paths
    }

    pub fn values(&self) -> &Value {
        &self.values
    }

    pub fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.paths.get(&self.values, path)
    }

    pub fn default_at(&self, path: &str) -> Option<&Value> {
        self.paths.get(&self.defaults, path)
    }

    /// Write a value through the path guards.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        self.paths.set(&mut self.values, path, value)
    }

    /// Mutable access to the array at `path`.
    pub fn array_mut(&mut self, path: &str) -> Option<&mut Vec<Value>> {
        match self.paths.get_mut(&mut self.values, path) {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    pub fn unset(&mut self, path: &str) -> bool {
        self.paths.unset(&mut self.values, path)
    }

    /// Replace the current values wholesale.
    pub fn replace_values(&mut self, values: Value) {
        self.values = values;
    }

    /// Replace the default snapshot wholesale.
    pub fn replace_defaults(&mut self, defaults: Value) {
        self.defaults = defaults;
    }

    /// Copy `value` into the default snapshot at `path`.
    pub fn rebaseline(&mut self, path: &str, value: Value) -> bool {
        if self.defaults.is_null() {
            self.defaults = Value::Object(Map::new());
        }
        self.paths.set(&mut self.defaults, path, value)
    }

    pub fn meta(&self, path: &str) -> Option<&FieldMeta> {
        self.meta.get(path)
    }

    fn entry(&mut self, path: &str) -> &mut FieldMeta {
        self.meta.entry(path.to_string()).or_default()
    }

    fn prune(&mut self, path: &str) {
        if self.meta.get(path).is_some_and(FieldMeta::is_empty) {
            self.meta.remove(path);
        }
    }

    fn recount(&mut self) {
        self.dirty_count = self.meta.values().filter(|m| m.dirty).count();
        self.touched_count = self.meta.values().filter(|m| m.touched).count();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_count > 0
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_count
    }

    pub fn touched_count(&self) -> usize {
        self.touched_count
    }

    pub fn is_field_dirty(&self, path: &str) -> bool {
        self.meta.get(path).is_some_and(|m| m.dirty)
    }

    /// True when `path`, anything under it, or an ancestor that differs as
    /// a whole is flagged dirty.
    pub fn is_path_dirty(&self, path: &str) -> bool {
        let covered = !path.is_empty()
            && (self.is_field_dirty("") || ancestors(path).any(|a| self.is_field_dirty(a)));
        covered
            || self
                .meta
                .iter()
                .any(|(flagged, meta)| meta.dirty && is_same_or_descendant(flagged, path))
    }

    pub fn is_field_touched(&self, path: &str) -> bool {
        self.meta.get(path).is_some_and(|m| m.touched)
    }

    /// Returns true when the flag changed.
    pub fn mark_dirty(&mut self, path: &str) -> bool {
        if self.is_field_dirty(path) {
            return false;
        }
        self.entry(path).dirty = true;
        self.dirty_count += 1;
        true
    }

    /// Returns true when the flag changed.
    pub fn clear_dirty(&mut self, path: &str) -> bool {
        if !self.is_field_dirty(path) {
            return false;
        }
        self.entry(path).dirty = false;
        self.dirty_count -= 1;
        self.prune(path);
        true
    }

    /// Returns true when the flag changed.
    pub fn mark_touched(&mut self, path: &str) -> bool {
        if self.is_field_touched(path) {
            return false;
        }
        self.entry(path).touched = true;
        self.touched_count += 1;
        true
    }

    /// Returns true when the flag changed.
    pub fn clear_touched(&mut self, path: &str) -> bool {
        if !self.is_field_touched(path) {
            return false;
        }
        self.entry(path).touched = false;
        self.touched_count -= 1;
        self.prune(path);
        true
    }

    /// Dirty-flagged paths at or under `prefix`.
    pub fn dirty_paths_under(&self, prefix: &str) -> Vec<String> {
        self.meta
            .iter()
            .filter(|(path, meta)| meta.dirty && is_same_or_descendant(path, prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn clear_all_dirty(&mut self) {
        for meta in self.meta.values_mut() {
            meta.dirty = false;
        }
        self.meta.retain(|_, meta| !meta.is_empty());
        self.dirty_count = 0;
    }

    pub fn clear_all_touched(&mut self) {
        for meta in self.meta.values_mut() {
            meta.touched = false;
        }
        self.meta.retain(|_, meta| !meta.is_empty());
        self.touched_count = 0;
    }

    pub fn schema_error(&self, path: &str) -> Option<&FieldError> {
        self.meta.get(path).and_then(|m| m.error.as_ref())
    }

    /// Set or clear the schema error at `path`. Returns true when it changed.
    pub fn set_schema_error(&mut self, path: &str, error: Option<FieldError>) -> bool {
        if self.schema_error(path) == error.as_ref() {
            return false;
        }
        self.entry(path).error = error;
        self.prune(path);
        true
    }

    /// Set or clear the validator error at `path`. Returns true when it changed.
    pub fn set_custom_error(&mut self, path: &str, error: Option<FieldError>) -> bool {
        if self.meta.get(path).and_then(|m| m.custom_error.as_ref()) == error.as_ref() {
            return false;
        }
        self.entry(path).custom_error = error;
        self.prune(path);
        true
    }

    /// Paths at or under `prefix` holding a schema error.
    pub fn schema_error_paths_under(&self, prefix: &str) -> Vec<String> {
        self.meta
            .iter()
            .filter(|(path, meta)| meta.error.is_some() && is_same_or_descendant(path, prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Drop schema and validator errors at or under `prefix`, returning the
    /// paths that lost an error.
    pub fn clear_errors_under(&mut self, prefix: &str) -> Vec<String> {
        let cleared: Vec<String> = self
            .meta
            .iter()
            .filter(|(path, meta)| {
                (meta.error.is_some() || meta.custom_error.is_some())
                    && is_same_or_descendant(path, prefix)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in &cleared {
            let meta = self.entry(path);
            meta.error = None;
            meta.custom_error = None;
            self.prune(path);
        }
        cleared
    }

    /// Replace the host-supplied errors.
    pub fn set_external_errors(&mut self, errors: BTreeMap<String, FieldError>) {
        self.external_errors = errors;
    }

    pub fn external_errors(&self) -> &BTreeMap<String, FieldError> {
        &self.external_errors
    }

    /// Displayed error at `path`: external, then schema, then validator.
    pub fn error(&self, path: &str) -> Option<&FieldError> {
        self.external_errors.get(path).or_else(|| {
            self.meta
                .get(path)
                .and_then(|m| m.error.as_ref().or(m.custom_error.as_ref()))
        })
    }

    /// All displayed errors, keyed by path.
    pub fn errors(&self) -> BTreeMap<String, FieldError> {
        let mut errors: BTreeMap<String, FieldError> = self
            .meta
            .iter()
            .filter_map(|(path, meta)| {
                meta.error
                    .as_ref()
                    .or(meta.custom_error.as_ref())
                    .map(|e| (path.clone(), e.clone()))
            })
            .collect();
        for (path, error) in &self.external_errors {
            errors.insert(path.clone(), error.clone());
        }
        errors
    }

    pub fn has_errors(&self) -> bool {
        !self.external_errors.is_empty()
            || self
                .meta
                .values()
                .any(|m| m.error.is_some() || m.custom_error.is_some())
    }

    /// Record an in-flight validation of `path`; the token ends it.
    pub fn begin_validating(&mut self, path: &str) -> u64 {
        self.next_token += 1;
        self.validating
            .entry(path.to_string())
            .or_default()
            .insert(self.next_token);
        self.next_token
    }

    pub fn end_validating(&mut self, path: &str, token: u64) {
        if let Some(tokens) = self.validating.get_mut(path) {
            tokens.remove(&token);
            if tokens.is_empty() {
                self.validating.remove(path);
            }
        }
    }

    pub fn begin_full_validation(&mut self) -> u64 {
        self.next_token += 1;
        self.full_runs.insert(self.next_token);
        self.next_token
    }

    pub fn end_full_validation(&mut self, token: u64) {
        self.full_runs.remove(&token);
    }

    pub fn is_validating(&self) -> bool {
        !self.validating.is_empty() || !self.full_runs.is_empty()
    }

    pub fn is_field_validating(&self, path: &str) -> bool {
        self.validating.contains_key(path)
    }

    pub fn validating_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.validating.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn clear_validating(&mut self) {
        self.validating.clear();
        self.full_runs.clear();
    }

    pub fn clear_validating_under(&mut self, prefix: &str) {
        self.validating
            .retain(|path, _| !is_same_or_descendant(path, prefix));
    }

    /// Move per-item meta under `array_path` to the items' new positions.
    /// Meta of removed items is dropped.
    pub fn remap_array_items(&mut self, array_path: &str, remap: &IndexRemap) {
        if matches!(remap, IndexRemap::Identity) {
            return;
        }
        let prefix = if array_path.is_empty() {
            String::new()
        } else {
            format!("{array_path}.")
        };
        let affected: Vec<String> = self
            .meta
            .keys()
            .filter(|path| path.len() > prefix.len() && path.starts_with(&prefix))
            .cloned()
            .collect();

        let mut moved = Vec::with_capacity(affected.len());
        for path in affected {
            let rest = &path[prefix.len()..];
            let (segment, tail) = match rest.find('.') {
                Some(dot) => (&rest[..dot], &rest[dot..]),
                None => (rest, ""),
            };
            if !is_index(segment) {
                continue;
            }
            let Ok(old) = segment.parse::<usize>() else {
                continue;
            };
            let Some(meta) = self.meta.remove(&path) else {
                continue;
            };
            if let Some(new) = remap.map(old) {
                moved.push((format!("{prefix}{new}{tail}"), meta));
            } else {
                trace!(path = %path, "dropping meta of removed item");
            }
        }
        for (path, meta) in moved {
            self.meta.insert(path, meta);
        }
        self.recount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(defaults: Value) -> ValueStore {
        ValueStore::new(Arc::new(PathAccessor::default()), defaults)
    }

    #[test]
    fn test_values_start_as_copy_of_defaults() {
        let mut store = store(json!({"name": "a"}));
        assert!(store.set("name", json!("b")));
        assert_eq!(store.get("name"), Some(&json!("b")));
        assert_eq!(store.default_at("name"), Some(&json!("a")));
    }

    #[test]
    fn test_dirty_and_touched_are_idempotent() {
        let mut store = store(json!({}));
        assert!(store.mark_dirty("a"));
        assert!(!store.mark_dirty("a"));
        assert_eq!(store.dirty_count(), 1);
        assert!(store.clear_dirty("a"));
        assert!(!store.clear_dirty("a"));
        assert_eq!(store.dirty_count(), 0);
        assert!(!store.is_dirty());

        assert!(store.mark_touched("a"));
        assert!(!store.mark_touched("a"));
        assert_eq!(store.touched_count(), 1);
        assert!(store.clear_touched("a"));
        assert_eq!(store.touched_count(), 0);
        assert!(store.meta("a").is_none());
    }

    #[test]
    fn test_path_dirty_looks_up_and_down() {
        let mut store = store(json!({}));
        store.mark_dirty("user.name");
        assert!(store.is_path_dirty("user"));
        assert!(store.is_path_dirty("user.name"));
        assert!(!store.is_path_dirty("user.age"));

        store.mark_dirty("profile");
        assert!(store.is_path_dirty("profile.city"));
        assert!(!store.is_path_dirty("prof"));
    }

    #[test]
    fn test_error_precedence() {
        let mut store = store(json!({}));
        store.set_custom_error("email", Some(FieldError::new("validate", "taken")));
        assert_eq!(store.error("email").unwrap().message, "taken");
        store.set_schema_error("email", Some(FieldError::new("invalid_string", "Invalid email")));
        assert_eq!(store.error("email").unwrap().message, "Invalid email");
        store.set_external_errors(BTreeMap::from([(
            "email".to_string(),
            FieldError::new("server", "rejected by server"),
        )]));
        assert_eq!(store.error("email").unwrap().message, "rejected by server");
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn test_clear_errors_under_prefix() {
        let mut store = store(json!({}));
        store.set_schema_error("user.name", Some(FieldError::new("too_small", "short")));
        store.set_custom_error("user.email", Some(FieldError::new("validate", "taken")));
        store.set_schema_error("other", Some(FieldError::new("too_small", "short")));
        let mut cleared = store.clear_errors_under("user");
        cleared.sort();
        assert_eq!(cleared, vec!["user.email", "user.name"]);
        assert_eq!(store.errors().len(), 1);
    }

    #[test]
    fn test_validating_tokens() {
        let mut store = store(json!({}));
        let a = store.begin_validating("email");
        let b = store.begin_validating("email");
        store.end_validating("email", a);
        assert!(store.is_field_validating("email"));
        store.end_validating("email", b);
        assert!(!store.is_validating());

        let full = store.begin_full_validation();
        assert!(store.is_validating());
        assert!(store.validating_paths().is_empty());
        store.end_full_validation(full);
        assert!(!store.is_validating());
    }

    #[test]
    fn test_remap_array_items_after_removal() {
        let mut store = store(json!({}));
        store.mark_touched("items.0.name");
        store.mark_dirty("items.1.name");
        store.set_schema_error("items.2", Some(FieldError::new("custom", "bad")));
        store.mark_touched("items");

        store.remap_array_items("items", &IndexRemap::Remove { removed: vec![0] });

        assert!(store.meta("items.0.name").unwrap().dirty);
        assert!(store.schema_error("items.1").is_some());
        assert!(store.meta("items.2").is_none());
        assert!(store.is_field_touched("items"));
        assert_eq!(store.touched_count(), 1);
        assert_eq!(store.dirty_count(), 1);
    }
}
