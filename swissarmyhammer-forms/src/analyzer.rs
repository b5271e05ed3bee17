//! Sub-schema extraction and partial-validation soundness
//!
//! Validating one field against its own sub-schema costs O(field) instead of
//! O(form), but is only correct when nothing validated can read outside that
//! sub-tree. Refinements can, atomic leaf rules cannot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::FormsError;
use crate::path::{is_index, PathAccessor};
use crate::schema::{SchemaKind, SchemaRef};

/// Schema node reached by walking a path.
#[derive(Debug, Clone)]
pub struct SubSchema {
    /// The node at the path, wrappers still attached
    pub schema: SchemaRef,
    /// A refinement was seen on the way down, including the leaf's own
    /// wrapper chain
    pub saw_refinement: bool,
}

/// Peel optional/nullable/default wrappers, noting refinements on each layer.
fn unwrap(node: SchemaRef, saw_refinement: &mut bool) -> Option<SchemaRef> {
    let mut current = node;
    loop {
        *saw_refinement |= current.has_refinement();
        if !current.kind().is_wrapper() {
            return Some(current);
        }
        current = current.inner()?;
    }
}

/// Walk `segments` from `schema`, descending into object children and array
/// elements. Returns `None` when the path leaves the schema.
pub fn extract_sub_schema(schema: &SchemaRef, segments: &[String]) -> Option<SubSchema> {
    let mut saw_refinement = false;
    let mut current = schema.clone();
    for segment in segments {
        let node = unwrap(current, &mut saw_refinement)?;
        current = match node.kind() {
            SchemaKind::Object => node.child(segment)?,
            SchemaKind::Array if is_index(segment) => node.element()?,
            _ => return None,
        };
    }
    // Leaf wrappers only contribute their refinement flags
    unwrap(current.clone(), &mut saw_refinement)?;
    Some(SubSchema {
        schema: current,
        saw_refinement,
    })
}

/// Why a path can or cannot be validated on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisReason {
    /// Sub-schema is self-contained
    Partial,
    /// The schema root carries a refinement
    RootRefinement,
    /// A node on the path, or the leaf itself, carries a refinement
    RefinementOnPath,
    /// The path does not resolve inside the schema
    NotInSchema,
}

/// Outcome of analyzing one path against one schema.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub can_partial_validate: bool,
    pub sub_schema: Option<SchemaRef>,
    pub reason: AnalysisReason,
}

impl Analysis {
    fn full(reason: AnalysisReason, sub_schema: Option<SchemaRef>) -> Self {
        Self {
            can_partial_validate: false,
            sub_schema,
            reason,
        }
    }
}

type MemoKey = (usize, String);

/// Memoized path analysis keyed by schema identity and normalized path.
#[derive(Debug)]
pub struct SchemaAnalyzer {
    paths: Arc<PathAccessor>,
    memo: Mutex<HashMap<MemoKey, (SchemaRef, Analysis)>>,
}

impl SchemaAnalyzer {
    pub fn new(paths: Arc<PathAccessor>) -> Self {
        Self {
            paths,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze `path` against `schema`, reusing a previous answer when the
    /// same schema instance was asked about the same path.
    pub fn analyze(&self, schema: &SchemaRef, path: &str) -> Analysis {
        // Entries keep their schema alive, so the address cannot be reused
        let key = (Arc::as_ptr(schema) as *const () as usize, path.to_string());
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return hit.1.clone();
        }

        let analysis = self.compute(schema, path);
        debug!(path, reason = ?analysis.reason, "analyzed path");
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (schema.clone(), analysis.clone()));
        analysis
    }

    fn compute(&self, schema: &SchemaRef, path: &str) -> Analysis {
        let mut root_refined = false;
        unwrap(schema.clone(), &mut root_refined);
        if root_refined {
            return Analysis::full(AnalysisReason::RootRefinement, Some(schema.clone()));
        }

        let extracted = self
            .paths
            .segments(path)
            .ok()
            .and_then(|segments| extract_sub_schema(schema, &segments));
        match extracted {
            None => {
                let err = FormsError::SchemaMismatch {
                    path: path.to_string(),
                    message: "path does not resolve to a schema node".to_string(),
                };
                warn!(%err, "falling back to whole-form validation");
                Analysis::full(AnalysisReason::NotInSchema, None)
            }
            Some(sub) if sub.saw_refinement => {
                Analysis::full(AnalysisReason::RefinementOnPath, Some(sub.schema))
            }
            Some(sub) => Analysis {
                can_partial_validate: true,
                sub_schema: Some(sub.schema),
                reason: AnalysisReason::Partial,
            },
        }
    }

    /// Number of memoized answers.
    pub fn memoized(&self) -> usize {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn clear(&self) {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaNode;

    fn analyzer() -> SchemaAnalyzer {
        SchemaAnalyzer::new(Arc::new(PathAccessor::default()))
    }

    fn segments(path: &str) -> Vec<String> {
        crate::path::parse_segments(path).unwrap()
    }

    fn form_schema() -> SchemaRef {
        SchemaNode::object([
            ("email", SchemaNode::string().email()),
            (
                "addresses",
                SchemaNode::array(SchemaNode::object([(
                    "city",
                    SchemaNode::string().min_length(2).optional(),
                )]))
                .optional(),
            ),
        ])
        .into_ref()
    }

    #[test]
    fn test_extract_through_wrappers_and_arrays() {
        let schema = form_schema();
        let sub = extract_sub_schema(&schema, &segments("addresses.3.city")).unwrap();
        assert!(!sub.saw_refinement);
        // Leaf keeps its optional wrapper so absent values stay valid
        assert_eq!(sub.schema.kind(), SchemaKind::Optional);

        assert!(extract_sub_schema(&schema, &segments("addresses.x.city")).is_none());
        assert!(extract_sub_schema(&schema, &segments("email.local")).is_none());
        assert!(extract_sub_schema(&schema, &segments("missing")).is_none());
    }

    #[test]
    fn test_leaf_rules_do_not_block_partial_validation() {
        let analysis = analyzer().analyze(&form_schema(), "email");
        assert!(analysis.can_partial_validate);
        assert_eq!(analysis.reason, AnalysisReason::Partial);
    }

    #[test]
    fn test_root_refinement_forces_full_validation() {
        let schema = SchemaNode::object([
            ("password", SchemaNode::string()),
            ("confirm", SchemaNode::string()),
        ])
        .refine(|_| true, "never")
        .into_ref();
        let analysis = analyzer().analyze(&schema, "password");
        assert!(!analysis.can_partial_validate);
        assert_eq!(analysis.reason, AnalysisReason::RootRefinement);
    }

    #[test]
    fn test_refinement_on_path_or_leaf() {
        let schema = SchemaNode::object([
            (
                "range",
                SchemaNode::object([("from", SchemaNode::number()), ("to", SchemaNode::number())])
                    .refine(|_| true, "never"),
            ),
            (
                "code",
                SchemaNode::string().refine(|_| true, "never").optional(),
            ),
            ("name", SchemaNode::string()),
        ])
        .into_ref();
        let analyzer = analyzer();
        assert_eq!(
            analyzer.analyze(&schema, "range.from").reason,
            AnalysisReason::RefinementOnPath
        );
        assert_eq!(
            analyzer.analyze(&schema, "code").reason,
            AnalysisReason::RefinementOnPath
        );
        assert!(analyzer.analyze(&schema, "name").can_partial_validate);
    }

    #[test]
    fn test_unknown_path_is_not_in_schema() {
        let analysis = analyzer().analyze(&form_schema(), "nickname");
        assert!(!analysis.can_partial_validate);
        assert!(analysis.sub_schema.is_none());
        assert_eq!(analysis.reason, AnalysisReason::NotInSchema);
    }

    #[test]
    fn test_memoized_per_schema_instance() {
        let analyzer = analyzer();
        let a = form_schema();
        let b = form_schema();
        analyzer.analyze(&a, "email");
        analyzer.analyze(&a, "email");
        assert_eq!(analyzer.memoized(), 1);
        analyzer.analyze(&b, "email");
        assert_eq!(analyzer.memoized(), 2);
        analyzer.clear();
        assert_eq!(analyzer.memoized(), 0);
    }
}
