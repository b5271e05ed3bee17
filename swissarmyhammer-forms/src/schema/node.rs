//! Built-in schema nodes
//!
//! A small builder covering what forms usually need: typed leaves with
//! length/format/range rules, objects, arrays, optional/nullable/default
//! wrappers, and refinements for checks that look across fields.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{Schema, SchemaKind, SchemaRef, Violation};
use crate::error::{FormsError, Result};

/// Email address pattern
pub const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(EMAIL_PATTERN).expect("email pattern compiles"));

static NULL: Value = Value::Null;

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A check that receives the whole value of the node it is attached to, so
/// it can compare sibling fields.
#[derive(Clone)]
pub struct Refinement {
    path: String,
    message: String,
    predicate: Predicate,
}

impl fmt::Debug for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refinement")
            .field("path", &self.path)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
enum Shape {
    Any,
    String,
    Number,
    Boolean,
    Object(IndexMap<String, SchemaRef>),
    Array(SchemaRef),
    Optional(SchemaRef),
    Nullable(SchemaRef),
    Default(SchemaRef, Value),
}

#[derive(Debug, Clone)]
enum Check {
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Email,
    Min(f64),
    Max(f64),
    Step(f64),
    MinItems(usize),
    MaxItems(usize),
}

#[derive(Debug, Clone)]
struct Rule {
    check: Check,
    message: Option<String>,
}

impl Rule {
    /// Kind and default message when `value` fails this rule.
    fn evaluate(&self, value: &Value) -> Option<(&'static str, String)> {
        let failure = match (&self.check, value) {
            (Check::MinLength(min), Value::String(s)) => {
                let len = s.chars().count();
                (len < *min).then(|| {
                    ("too_small", format!("Must be at least {min} characters long"))
                })
            }
            (Check::MaxLength(max), Value::String(s)) => {
                let len = s.chars().count();
                (len > *max)
                    .then(|| ("too_big", format!("Must be at most {max} characters long")))
            }
            (Check::Pattern(regex), Value::String(s)) => (!regex.is_match(s)).then(|| {
                (
                    "invalid_string",
                    format!("Does not match required pattern '{}'", regex.as_str()),
                )
            }),
            (Check::Email, Value::String(s)) => {
                (!EMAIL.is_match(s)).then(|| ("invalid_string", "Invalid email".to_string()))
            }
            (Check::Min(min), Value::Number(n)) => n.as_f64().and_then(|n| {
                (n < *min).then(|| ("too_small", format!("Must be greater than or equal to {min}")))
            }),
            (Check::Max(max), Value::Number(n)) => n.as_f64().and_then(|n| {
                (n > *max).then(|| ("too_big", format!("Must be less than or equal to {max}")))
            }),
            (Check::Step(step), Value::Number(n)) if *step > 0.0 => n.as_f64().and_then(|n| {
                let remainder = (n % step).abs();
                // Epsilon comparison for floating point steps
                (remainder > f64::EPSILON && (step - remainder) > f64::EPSILON)
                    .then(|| ("not_multiple_of", format!("Must be a multiple of {step}")))
            }),
            (Check::MinItems(min), Value::Array(items)) => (items.len() < *min)
                .then(|| ("too_small", format!("Must contain at least {min} item(s)"))),
            (Check::MaxItems(max), Value::Array(items)) => (items.len() > *max)
                .then(|| ("too_big", format!("Must contain at most {max} item(s)"))),
            _ => None,
        };
        failure.map(|(kind, default)| (kind, self.message.clone().unwrap_or(default)))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::Null => "null",
    }
}

fn type_violation(expected: &str, value: &Value) -> Violation {
    let message = if value.is_null() {
        "Required".to_string()
    } else {
        format!("Expected {expected}, received {}", type_name(value))
    };
    Violation::new("", "invalid_type", message)
}

/// Built-in schema node.
///
/// ```rust,ignore
/// let schema = SchemaNode::object([
///     ("email", SchemaNode::string().email()),
///     ("name", SchemaNode::string().min_length(2)),
///     ("tags", SchemaNode::array(SchemaNode::string()).max_items(5)),
/// ]);
/// ```
#[derive(Debug, Clone)]
pub struct SchemaNode {
    shape: Shape,
    rules: Vec<Rule>,
    refinements: Vec<Refinement>,
}

impl SchemaNode {
    fn with_shape(shape: Shape) -> Self {
        Self {
            shape,
            rules: Vec::new(),
            refinements: Vec::new(),
        }
    }

    /// Accepts any value.
    pub fn any() -> Self {
        Self::with_shape(Shape::Any)
    }

    pub fn string() -> Self {
        Self::with_shape(Shape::String)
    }

    pub fn number() -> Self {
        Self::with_shape(Shape::Number)
    }

    pub fn boolean() -> Self {
        Self::with_shape(Shape::Boolean)
    }

    /// Object with named children, validated in declaration order.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaNode)>,
        K: Into<String>,
    {
        Self::object_of(
            fields
                .into_iter()
                .map(|(name, node)| (name, Arc::new(node) as SchemaRef)),
        )
    }

    /// Object whose children are arbitrary schema implementations.
    pub fn object_of<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, SchemaRef)>,
        K: Into<String>,
    {
        Self::with_shape(Shape::Object(
            fields
                .into_iter()
                .map(|(name, node)| (name.into(), node))
                .collect(),
        ))
    }

    pub fn array(element: SchemaNode) -> Self {
        Self::array_of(Arc::new(element))
    }

    pub fn array_of(element: SchemaRef) -> Self {
        Self::with_shape(Shape::Array(element))
    }

    /// Accept absent/`null` values.
    pub fn optional(self) -> Self {
        Self::with_shape(Shape::Optional(Arc::new(self)))
    }

    /// Accept `null` values.
    pub fn nullable(self) -> Self {
        Self::with_shape(Shape::Nullable(Arc::new(self)))
    }

    /// Validate `default` in place of absent/`null` values.
    pub fn with_default(self, default: Value) -> Self {
        Self::with_shape(Shape::Default(Arc::new(self), default))
    }

    fn rule(mut self, check: Check) -> Self {
        self.rules.push(Rule {
            check,
            message: None,
        });
        self
    }

    pub fn min_length(self, min: usize) -> Self {
        self.rule(Check::MinLength(min))
    }

    pub fn max_length(self, max: usize) -> Self {
        self.rule(Check::MaxLength(max))
    }

    /// Require strings to match a regular expression.
    pub fn pattern(self, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|err| FormsError::InvalidPattern {
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;
        Ok(self.rule(Check::Pattern(regex)))
    }

    pub fn email(self) -> Self {
        self.rule(Check::Email)
    }

    pub fn min(self, min: f64) -> Self {
        self.rule(Check::Min(min))
    }

    pub fn max(self, max: f64) -> Self {
        self.rule(Check::Max(max))
    }

    pub fn step(self, step: f64) -> Self {
        self.rule(Check::Step(step))
    }

    pub fn min_items(self, min: usize) -> Self {
        self.rule(Check::MinItems(min))
    }

    pub fn max_items(self, max: usize) -> Self {
        self.rule(Check::MaxItems(max))
    }

    /// Replace the message of the most recently added rule.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        if let Some(rule) = self.rules.last_mut() {
            rule.message = Some(message.into());
        }
        self
    }

    /// Attach a refinement reported at this node.
    pub fn refine<F>(self, predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.refine_at("", predicate, message)
    }

    /// Attach a refinement reported at `path` relative to this node.
    pub fn refine_at<F>(mut self, path: &str, predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.refinements.push(Refinement {
            path: path.to_string(),
            message: message.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    /// Share this node as a schema handle.
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }

    fn check_rules(&self, value: &Value, violations: &mut Vec<Violation>) {
        for rule in &self.rules {
            if let Some((kind, message)) = rule.evaluate(value) {
                violations.push(Violation::new("", kind, message));
            }
        }
    }

    async fn validate_shape(&self, value: &Value) -> Vec<Violation> {
        let mut violations = Vec::new();
        match &self.shape {
            Shape::Optional(inner) | Shape::Nullable(inner) => {
                if !value.is_null() {
                    violations.extend(inner.validate(value).await);
                }
            }
            Shape::Default(inner, default) => {
                let effective = if value.is_null() { default } else { value };
                violations.extend(inner.validate(effective).await);
            }
            Shape::Any => self.check_rules(value, &mut violations),
            Shape::String => match value {
                Value::String(_) => self.check_rules(value, &mut violations),
                _ => violations.push(type_violation("string", value)),
            },
            Shape::Number => match value {
                Value::Number(_) => self.check_rules(value, &mut violations),
                _ => violations.push(type_violation("number", value)),
            },
            Shape::Boolean => match value {
                Value::Bool(_) => self.check_rules(value, &mut violations),
                _ => violations.push(type_violation("boolean", value)),
            },
            Shape::Object(fields) => match value {
                Value::Object(map) => {
                    for (name, schema) in fields {
                        let child = map.get(name).unwrap_or(&NULL);
                        violations.extend(
                            schema
                                .validate(child)
                                .await
                                .into_iter()
                                .map(|v| v.prefixed(name)),
                        );
                    }
                    self.check_rules(value, &mut violations);
                }
                _ => violations.push(type_violation("object", value)),
            },
            Shape::Array(element) => match value {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        let prefix = index.to_string();
                        violations.extend(
                            element
                                .validate(item)
                                .await
                                .into_iter()
                                .map(|v| v.prefixed(&prefix)),
                        );
                    }
                    self.check_rules(value, &mut violations);
                }
                _ => violations.push(type_violation("array", value)),
            },
        }
        violations
    }
}

#[async_trait]
impl Schema for SchemaNode {
    fn kind(&self) -> SchemaKind {
        match self.shape {
            Shape::Any | Shape::String | Shape::Number | Shape::Boolean => SchemaKind::Leaf,
            Shape::Object(_) => SchemaKind::Object,
            Shape::Array(_) => SchemaKind::Array,
            Shape::Optional(_) => SchemaKind::Optional,
            Shape::Nullable(_) => SchemaKind::Nullable,
            Shape::Default(..) => SchemaKind::Default,
        }
    }

    fn child(&self, name: &str) -> Option<SchemaRef> {
        match &self.shape {
            Shape::Object(fields) => fields.get(name).cloned(),
            _ => None,
        }
    }

    fn element(&self) -> Option<SchemaRef> {
        match &self.shape {
            Shape::Array(element) => Some(element.clone()),
            _ => None,
        }
    }

    fn inner(&self) -> Option<SchemaRef> {
        match &self.shape {
            Shape::Optional(inner) | Shape::Nullable(inner) | Shape::Default(inner, _) => {
                Some(inner.clone())
            }
            _ => None,
        }
    }

    fn has_refinement(&self) -> bool {
        !self.refinements.is_empty()
    }

    async fn validate(&self, value: &Value) -> Vec<Violation> {
        let mut violations = self.validate_shape(value).await;
        // Refinements only see values that already passed the structural checks
        if violations.is_empty() {
            for refinement in &self.refinements {
                if !(refinement.predicate)(value) {
                    violations.push(Violation::new(
                        refinement.path.clone(),
                        "custom",
                        refinement.message.clone(),
                    ));
                }
            }
        }
        violations
    }
}
