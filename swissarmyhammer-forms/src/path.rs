//! Dot-path access into the value tree
//!
//! Paths look like `user.addresses.0.city`; bracket indices
//! (`user.addresses[0].city`) are accepted as an alias. Parsed segment
//! lists are memoized in a small FIFO cache because the same literal paths
//! are resolved on every keystroke and every validation pass.

use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{trace, warn};

use crate::config::{DEFAULT_MAX_ARRAY_INDEX, DEFAULT_PATH_CACHE_CAPACITY};
use crate::error::{FormsError, Result};

/// Parsed path segments, shared between cache and callers.
pub type Segments = Arc<[String]>;

/// Keys that are never written through a path.
pub const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns true when the segment addresses an array position.
pub fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Returns true when `path` equals `prefix` or lies underneath it.
pub fn is_same_or_descendant(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// Join two normalized paths.
pub fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}.{rest}"),
    }
}

/// Normalized ancestors of a path, nearest first, excluding the root.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .rev()
        .filter(|(_, c)| *c == '.')
        .map(move |(i, _)| &path[..i])
}

fn parse_index(segment: &str) -> Option<usize> {
    if is_index(segment) {
        segment.parse().ok()
    } else {
        None
    }
}

fn empty_container(next_segment: &str) -> Value {
    if is_index(next_segment) {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

/// Split a path into segments without consulting the cache.
pub fn parse_segments(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for part in path.split('.') {
        if part.is_empty() {
            return Err(FormsError::invalid_path(path, "empty segment"));
        }
        // `name[0][1]` splits into `name`, `0`, `1`
        let mut rest = part;
        match rest.find('[') {
            Some(0) => {}
            Some(open) => {
                segments.push(rest[..open].to_string());
                rest = &rest[open..];
            }
            None => {
                segments.push(rest.to_string());
                continue;
            }
        }
        while !rest.is_empty() {
            let Some(inner) = rest.strip_prefix('[') else {
                return Err(FormsError::invalid_path(path, "unexpected text after ']'"));
            };
            let Some(close) = inner.find(']') else {
                return Err(FormsError::invalid_path(path, "unclosed '['"));
            };
            let segment = &inner[..close];
            if segment.is_empty() {
                return Err(FormsError::invalid_path(path, "empty segment"));
            }
            segments.push(segment.to_string());
            rest = &inner[close + 1..];
        }
    }
    Ok(segments)
}

/// Bounded FIFO memo of parsed paths.
#[derive(Debug)]
struct SegmentCache {
    capacity: usize,
    entries: IndexMap<String, Segments>,
}

impl SegmentCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::with_capacity(capacity.max(1)),
        }
    }

    fn get(&self, path: &str) -> Option<Segments> {
        self.entries.get(path).cloned()
    }

    fn insert(&mut self, path: &str, segments: Segments) {
        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(path.to_string(), segments);
    }
}

/// Nested get/set/unset/has by dot-path.
#[derive(Debug)]
pub struct PathAccessor {
    max_index: usize,
    cache: Mutex<SegmentCache>,
}

impl Default for PathAccessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ARRAY_INDEX, DEFAULT_PATH_CACHE_CAPACITY)
    }
}

impl PathAccessor {
    pub fn new(max_index: usize, cache_capacity: usize) -> Self {
        Self {
            max_index,
            cache: Mutex::new(SegmentCache::new(cache_capacity)),
        }
    }

    /// Highest array index a write may create.
    pub fn max_index(&self) -> usize {
        self.max_index
    }

    /// Parse a path, using the memo when possible.
    pub fn segments(&self, path: &str) -> Result<Segments> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(path) {
            return Ok(hit);
        }
        let parsed: Segments = parse_segments(path)?.into();
        cache.insert(path, parsed.clone());
        Ok(parsed)
    }

    /// Number of memoized paths.
    pub fn cached_paths(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Canonical dot form of a path, `None` when it does not parse.
    pub fn normalize(&self, path: &str) -> Option<String> {
        match self.segments(path) {
            Ok(segments) => Some(segments.join(".")),
            Err(err) => {
                warn!(%err, "ignoring malformed path");
                None
            }
        }
    }

    /// Value at `path`, `None` when absent. The empty path is the root.
    pub fn get<'a>(&self, root: &'a Value, path: &str) -> Option<&'a Value> {
        let segments = self.segments(path).ok()?;
        let mut current = root;
        for segment in segments.iter() {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(parse_index(segment)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable value at `path`, `None` when absent.
    pub fn get_mut<'a>(&self, root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
        let segments = self.segments(path).ok()?;
        let mut current = root;
        for segment in segments.iter() {
            current = match current {
                Value::Object(map) => map.get_mut(segment)?,
                Value::Array(items) => items.get_mut(parse_index(segment)?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// True when every container along the path owns the next key, even if
    /// the final value is `null`.
    pub fn has(&self, root: &Value, path: &str) -> bool {
        let Ok(segments) = self.segments(path) else {
            return false;
        };
        let mut current = root;
        for segment in segments.iter() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => parse_index(segment).and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return false,
            }
        }
        true
    }

    /// Write `value` at `path`, creating intermediate containers.
    ///
    /// Returns false and leaves `root` untouched when the path is malformed,
    /// contains a dangerous key, exceeds the index ceiling, or walks into an
    /// existing array with a non-numeric segment.
    pub fn set(&self, root: &mut Value, path: &str, value: Value) -> bool {
        let segments = match self.segments(path) {
            Ok(segments) => segments,
            Err(err) => {
                warn!(%err, "rejected write");
                return false;
            }
        };
        if !self.check_write(root, path, &segments) {
            return false;
        }

        let Some((last, parents)) = segments.split_last() else {
            *root = value;
            return true;
        };

        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            if !matches!(current, Value::Object(_) | Value::Array(_)) {
                if !current.is_null() {
                    trace!(path, segment = %segment, "replacing primitive with container");
                }
                *current = empty_container(segment);
            }
            let next_segment = segments.get(i + 1).map(String::as_str).unwrap_or(last);
            current = match current {
                Value::Object(map) => map
                    .entry(segment.clone())
                    .or_insert_with(|| empty_container(next_segment)),
                Value::Array(items) => {
                    let Some(index) = parse_index(segment) else {
                        return false;
                    };
                    if index >= items.len() {
                        items.resize(index + 1, Value::Null);
                    }
                    &mut items[index]
                }
                _ => return false,
            };
        }

        if !matches!(current, Value::Object(_) | Value::Array(_)) {
            *current = empty_container(last);
        }
        match current {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                true
            }
            Value::Array(items) => {
                let Some(index) = parse_index(last) else {
                    return false;
                };
                if index >= items.len() {
                    items.resize(index + 1, Value::Null);
                }
                items[index] = value;
                true
            }
            _ => false,
        }
    }

    /// Delete the leaf at `path`. Array positions become `null` so sibling
    /// positions never shift. Returns true when something was removed.
    pub fn unset(&self, root: &mut Value, path: &str) -> bool {
        let segments = match self.segments(path) {
            Ok(segments) => segments,
            Err(err) => {
                warn!(%err, "rejected unset");
                return false;
            }
        };
        if let Some(bad) = segments.iter().find(|s| DANGEROUS_KEYS.contains(&s.as_str())) {
            warn!(path, key = %bad, "rejected unset of dangerous key");
            return false;
        }
        let Some((last, parents)) = segments.split_last() else {
            return false;
        };

        let mut current = root;
        for segment in parents.iter() {
            current = match current {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(next) => next,
                    None => return false,
                },
                Value::Array(items) => match parse_index(segment).and_then(|i| items.get_mut(i)) {
                    Some(next) => next,
                    None => return false,
                },
                _ => return false,
            };
        }

        match current {
            Value::Object(map) => map.remove(last).is_some(),
            Value::Array(items) => match parse_index(last).and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = Value::Null;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Guards applied before any mutation happens.
    fn check_write(&self, root: &Value, path: &str, segments: &[String]) -> bool {
        if let Some(bad) = segments.iter().find(|s| DANGEROUS_KEYS.contains(&s.as_str())) {
            warn!(path, key = %bad, "rejected write to dangerous key");
            return false;
        }
        if let Some(index) = segments
            .iter()
            .filter_map(|s| parse_index(s))
            .find(|&i| i > self.max_index)
        {
            warn!(
                path,
                index,
                max = self.max_index,
                "rejected write beyond array index ceiling"
            );
            return false;
        }
        // A non-numeric segment into an existing array would fail halfway
        let mut current = Some(root);
        for segment in segments {
            current = match current {
                Some(Value::Array(items)) => match parse_index(segment) {
                    Some(i) => items.get(i),
                    None => {
                        warn!(path, segment = %segment, "rejected non-numeric segment into array");
                        return false;
                    }
                },
                Some(Value::Object(map)) => map.get(segment),
                _ => None,
            };
            if current.is_none() {
                break;
            }
        }
        true
    }
}
