//! Form state and validation engine
//!
//! `swissarmyhammer-forms` owns a JSON value tree addressed by dot-paths and
//! everything a form needs around it: per-field dirty/touched/error state,
//! array fields whose items keep their identity when reordered, and
//! schema-driven validation with caching, debouncing and protection against
//! stale async results. Rendering and input wiring belong to the host.
//!
//! # Architecture
//!
//! - **Paths**: `user.addresses.0.city`, with guards against dangerous keys
//!   and runaway array indices
//! - **Dirty by comparison**: a field is dirty iff its value differs from the
//!   default snapshot
//! - **Partial validation**: a field is validated against its own sub-schema
//!   when no refinement could see outside it, otherwise against the whole form
//! - **Generations and request ids**: async results that lost a race or
//!   outlived a reset are dropped
//! - **Events**: state changes are broadcast as [`FormEvent`]s
//!
//! ```rust,ignore
//! let engine = FormEngine::builder()
//!     .schema(SchemaNode::object([
//!         ("email", SchemaNode::string().email()),
//!         ("name", SchemaNode::string().min_length(2)),
//!     ]).into_ref())
//!     .default_values(json!({"email": "", "name": ""}))
//!     .build()?;
//!
//! engine.set_value("email", json!("a@b.com"), SetValueOptions::default());
//! assert!(engine.validate(Some("email")).await);
//! ```

pub mod analyzer;
pub mod array;
pub mod config;
pub mod dirty;
pub mod engine;
pub mod error;
pub mod events;
pub mod hash;
pub mod path;
pub mod schema;
pub mod store;
pub mod timer;
pub mod validation;

pub use analyzer::{Analysis, AnalysisReason, SchemaAnalyzer};
pub use array::{ArrayItem, ArrayOp, ArrayRules, FieldArray, FocusHint, ItemKey};
pub use config::{CriteriaMode, FormOptions, NoDirtyWritePolicy, RevalidateMode, ValidationMode};
pub use engine::{FieldState, FormEngine, FormEngineBuilder, FormState, ResetOptions, SetValueOptions};
pub use error::{FormsError, Result};
pub use events::FormEvent;
pub use path::PathAccessor;
pub use schema::{Schema, SchemaKind, SchemaNode, SchemaRef, Violation};
pub use store::{ErrorTypeValue, FieldError, FieldMeta, ValueStore};
pub use validation::{validator_fn, FieldValidator};
