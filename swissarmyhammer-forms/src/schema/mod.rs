//! Schema validator contract
//!
//! The engine consumes schemas through the [`Schema`] trait: a validation
//! entry point plus enough node introspection for the analyzer to extract
//! the sub-schema for a path and decide whether validating it alone is
//! sound. [`SchemaNode`] is a built-in implementation; hosts can bring their
//! own.

mod node;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use node::{Refinement, SchemaNode};

/// Shared handle to any schema node.
pub type SchemaRef = Arc<dyn Schema>;

/// Structural role of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// A value with no addressable children
    Leaf,
    /// Named children
    Object,
    /// One element schema for every position
    Array,
    /// Accepts absent/`null`, otherwise defers to `inner()`
    Optional,
    /// Accepts `null`, otherwise defers to `inner()`
    Nullable,
    /// Substitutes a default for absent/`null`, then defers to `inner()`
    Default,
}

impl SchemaKind {
    /// True for the wrapper kinds that only forward to `inner()`.
    pub fn is_wrapper(self) -> bool {
        matches!(
            self,
            SchemaKind::Optional | SchemaKind::Nullable | SchemaKind::Default
        )
    }
}

/// One failed constraint, addressed relative to the validated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Dot path relative to the node that produced it; empty for the node itself
    pub path: String,
    pub kind: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        path: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Same violation with `prefix` prepended to its path.
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.path = crate::path::join(prefix, &self.path);
        self
    }
}

/// A schema node the engine can validate against and introspect.
#[async_trait]
pub trait Schema: Send + Sync + fmt::Debug {
    fn kind(&self) -> SchemaKind;

    /// Named child of an object node.
    fn child(&self, _name: &str) -> Option<SchemaRef> {
        None
    }

    /// Element schema of an array node.
    fn element(&self) -> Option<SchemaRef> {
        None
    }

    /// Wrapped schema of an optional/nullable/default node.
    fn inner(&self) -> Option<SchemaRef> {
        None
    }

    /// True when this node carries a check that may read values outside its
    /// own sub-tree. Atomic leaf rules (length, format, bounds) do not count.
    fn has_refinement(&self) -> bool {
        false
    }

    /// Validate a value, returning every violation found.
    async fn validate(&self, value: &Value) -> Vec<Violation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_violation() {
        let v = Violation::new("city", "too_small", "too short").prefixed("addresses.0");
        assert_eq!(v.path, "addresses.0.city");
        let root = Violation::new("", "custom", "bad").prefixed("email");
        assert_eq!(root.path, "email");
    }

    #[test]
    fn test_wrapper_kinds() {
        assert!(SchemaKind::Optional.is_wrapper());
        assert!(SchemaKind::Default.is_wrapper());
        assert!(!SchemaKind::Object.is_wrapper());
        assert!(!SchemaKind::Leaf.is_wrapper());
    }
}
