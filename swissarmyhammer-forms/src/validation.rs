//! Schema and field-validator runs
//!
//! A run snapshots what it needs under the state lock, awaits the schema or
//! validator without holding it, then re-locks and applies the result only
//! if nothing newer superseded it: the reset generation must be unchanged
//! and the run's request id must still be the latest for its path.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::{CriteriaMode, FieldEvent};
use crate::engine::{EngineState, FormEngine};
use crate::events::FormEvent;
use crate::hash::{optional_hash, value_hash};
use crate::path::{ancestors, is_same_or_descendant};
use crate::schema::Violation;
use crate::store::{ErrorTypeValue, FieldError, ValueStore};
use crate::timer::{spawn_detached, TimerKey};

/// Error kind recorded for field-local validator failures
pub const VALIDATOR_ERROR_KIND: &str = "validate";

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    hash: u64,
    valid: bool,
    generation: u64,
}

/// Last outcome per path, keyed by the hash of what was validated.
#[derive(Debug, Default)]
pub struct ValidationCache {
    entries: HashMap<String, CacheEntry>,
}

impl ValidationCache {
    pub fn lookup(&self, path: &str, hash: u64, generation: u64) -> Option<bool> {
        self.entries
            .get(path)
            .filter(|entry| entry.hash == hash && entry.generation == generation)
            .map(|entry| entry.valid)
    }

    pub fn store(&mut self, path: &str, hash: u64, valid: bool, generation: u64) {
        self.entries.insert(
            path.to_string(),
            CacheEntry {
                hash,
                valid,
                generation,
            },
        );
    }

    /// Drop entries for `path`, its ancestors and its descendants.
    pub fn invalidate(&mut self, path: &str) {
        self.entries.retain(|cached, _| {
            !is_same_or_descendant(cached, path) && !is_same_or_descendant(path, cached)
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Monotonic request ids, per path and for whole-form runs.
#[derive(Debug, Default)]
pub struct RequestIds {
    next: u64,
    latest: HashMap<String, u64>,
    full_latest: u64,
    full_current: Option<u64>,
    /// Prefixes invalidated since the current whole-form run started
    full_stale: Vec<String>,
}

impl RequestIds {
    pub fn issue(&mut self, path: &str) -> u64 {
        self.next += 1;
        self.latest.insert(path.to_string(), self.next);
        self.next
    }

    pub fn issue_full(&mut self) -> u64 {
        self.next += 1;
        self.full_latest = self.next;
        self.full_current = Some(self.next);
        self.full_stale.clear();
        self.next
    }

    /// A field run applies only while it is the newest for its path and no
    /// whole-form run started after it.
    pub fn is_current(&self, path: &str, id: u64) -> bool {
        self.latest.get(path) == Some(&id) && id > self.full_latest
    }

    pub fn is_full_current(&self, id: u64) -> bool {
        self.full_current == Some(id)
    }

    /// True when a field run newer than `full_id` owns `path`.
    pub fn superseded_by_field(&self, path: &str, full_id: u64) -> bool {
        std::iter::once(path)
            .chain(ancestors(path))
            .chain((!path.is_empty()).then_some(""))
            .any(|owner| self.latest.get(owner).is_some_and(|&id| id > full_id))
    }

    /// True when `path` was invalidated after the current whole-form run
    /// read its input.
    pub fn stale_for_full(&self, path: &str) -> bool {
        self.full_stale
            .iter()
            .any(|prefix| is_same_or_descendant(path, prefix))
    }

    /// Make in-flight runs at or under `prefix` stale. A running whole-form
    /// pass keeps applying outside `prefix`; invalidating the root drops it.
    pub fn invalidate_under(&mut self, prefix: &str) {
        self.latest
            .retain(|path, _| !is_same_or_descendant(path, prefix));
        if prefix.is_empty() {
            self.full_current = None;
            self.full_stale.clear();
        } else if self.full_current.is_some() {
            self.full_stale.push(prefix.to_string());
        }
    }

    pub fn clear(&mut self) {
        self.latest.clear();
        self.full_current = None;
        self.full_stale.clear();
    }
}

/// Failing decisions waiting out the error-display delay.
#[derive(Debug, Default)]
pub struct PendingErrors {
    next: u64,
    entries: HashMap<String, (u64, FieldError)>,
}

impl PendingErrors {
    /// Hold `error` for `path`, returning the decision id the timer commits.
    pub fn hold(&mut self, path: &str, error: FieldError) -> u64 {
        self.next += 1;
        self.entries.insert(path.to_string(), (self.next, error));
        self.next
    }

    pub fn get(&self, path: &str) -> Option<&FieldError> {
        self.entries.get(path).map(|(_, error)| error)
    }

    /// Take the pending error if `decision` is still the latest for `path`.
    pub fn take(&mut self, path: &str, decision: u64) -> Option<FieldError> {
        match self.entries.get(path) {
            Some((latest, _)) if *latest == decision => {
                self.entries.remove(path).map(|(_, error)| error)
            }
            _ => None,
        }
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn remove_under(&mut self, prefix: &str) {
        self.entries
            .retain(|path, _| !is_same_or_descendant(path, prefix));
    }

    pub fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|path| is_same_or_descendant(path, prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bookkeeping shared by every validation run.
#[derive(Debug, Default)]
pub struct ValidationState {
    pub cache: ValidationCache,
    pub requests: RequestIds,
    pub custom_requests: RequestIds,
    pub pending: PendingErrors,
}

impl ValidationState {
    /// Forget everything about `path` and below: cached outcomes, in-flight
    /// runs and pending errors.
    pub fn invalidate_under(&mut self, path: &str) {
        self.cache.invalidate(path);
        self.requests.invalidate_under(path);
        self.custom_requests.invalidate_under(path);
        self.pending.remove_under(path);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.requests.clear();
        self.custom_requests.clear();
        self.pending.clear();
    }
}

/// Group violations by exact path.
///
/// First-error mode keeps the first violation's message. Collect-all mode
/// additionally records every message keyed by kind, with repeated kinds
/// collapsed into a list.
pub fn group_violations(
    violations: Vec<Violation>,
    criteria: CriteriaMode,
) -> BTreeMap<String, FieldError> {
    let mut grouped: BTreeMap<String, FieldError> = BTreeMap::new();
    for violation in violations {
        let error = grouped
            .entry(violation.path)
            .or_insert_with(|| FieldError {
                kind: violation.kind.clone(),
                message: violation.message.clone(),
                types: (criteria == CriteriaMode::All).then(BTreeMap::new),
            });
        let Some(types) = error.types.as_mut() else {
            continue;
        };
        match types.remove(&violation.kind) {
            None => {
                types.insert(violation.kind, ErrorTypeValue::Single(violation.message));
            }
            Some(ErrorTypeValue::Single(first)) => {
                types.insert(
                    violation.kind,
                    ErrorTypeValue::Multiple(vec![first, violation.message]),
                );
            }
            Some(ErrorTypeValue::Multiple(mut all)) => {
                all.push(violation.message);
                types.insert(violation.kind, ErrorTypeValue::Multiple(all));
            }
        }
    }
    grouped
}

/// Field-local check supplied by the host, separate from the schema.
#[async_trait]
pub trait FieldValidator: Send + Sync {
    /// Error message when `value` is invalid. `values` is the whole form.
    async fn validate(&self, value: &Value, values: &Value) -> Option<String>;
}

struct FnValidator<F>(F);

#[async_trait]
impl<F, Fut> FieldValidator for FnValidator<F>
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Option<String>> + Send,
{
    async fn validate(&self, value: &Value, values: &Value) -> Option<String> {
        (self.0)(value.clone(), values.clone()).await
    }
}

/// Wrap an async closure as a [`FieldValidator`].
pub fn validator_fn<F, Fut>(validate: F) -> Arc<dyn FieldValidator>
where
    F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    Arc::new(FnValidator(validate))
}

#[derive(Clone)]
pub(crate) struct RegisteredValidator {
    validator: Arc<dyn FieldValidator>,
    debounce: Option<Duration>,
}

/// Field validators by normalized path.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    entries: BTreeMap<String, RegisteredValidator>,
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl ValidatorRegistry {
    pub fn register(
        &mut self,
        path: String,
        validator: Arc<dyn FieldValidator>,
        debounce: Option<Duration>,
    ) {
        self.entries.insert(
            path,
            RegisteredValidator {
                validator,
                debounce,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, path: &str) -> Option<RegisteredValidator> {
        self.entries.get(path).cloned()
    }

    /// Validator paths at or under `prefix`.
    fn under(&self, prefix: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|path| is_same_or_descendant(path, prefix))
            .cloned()
            .collect()
    }

    /// Validators that can observe a change at `path`.
    fn related(&self, path: &str) -> Vec<(String, Option<Duration>)> {
        self.entries
            .iter()
            .filter(|(registered, _)| {
                is_same_or_descendant(registered, path) || is_same_or_descendant(path, registered)
            })
            .map(|(registered, entry)| (registered.clone(), entry.debounce))
            .collect()
    }
}

impl FormEngine {
    /// Validate one path, or the whole form when `path` is `None`.
    ///
    /// Runs the schema and any field validators at or under the path, and
    /// resolves to true when both pass. A malformed path has nothing to
    /// validate and resolves to true.
    pub async fn validate(&self, path: Option<&str>) -> bool {
        let scope = match path {
            None => String::new(),
            Some(path) => match self.inner.paths.normalize(path) {
                Some(path) => path,
                None => return true,
            },
        };
        let (schema_ok, validators_ok) = if path.is_none() {
            futures::join!(self.validate_form(), self.run_validators_under(&scope))
        } else {
            futures::join!(self.validate_field(&scope), self.run_validators_under(&scope))
        };
        schema_ok && validators_ok
    }

    /// Validate several paths concurrently.
    pub async fn validate_paths(&self, paths: &[&str]) -> bool {
        join_all(paths.iter().map(|path| self.validate(Some(*path))))
            .await
            .into_iter()
            .all(|valid| valid)
    }

    /// Register a field-local validator. `debounce` delays change-driven
    /// runs; explicit [`validate`](Self::validate) calls never wait.
    pub fn register_validator(
        &self,
        path: &str,
        validator: Arc<dyn FieldValidator>,
        debounce: Option<Duration>,
    ) -> bool {
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        self.lock().validators.register(path, validator, debounce);
        true
    }

    /// Schema validation of one normalized path.
    pub(crate) async fn validate_field(&self, path: &str) -> bool {
        let Some(schema) = self.inner.schema.clone() else {
            return true;
        };
        let analysis = self.inner.analyzer.analyze(&schema, path);
        let partial = if analysis.can_partial_validate {
            analysis.sub_schema
        } else {
            None
        };

        let (generation, request, token, hash, input) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let generation = state.store.generation();
            let hash = match partial {
                Some(_) => optional_hash(state.store.get(path)),
                None => value_hash(state.store.values()),
            };
            if let Some(valid) = state.validation.cache.lookup(path, hash, generation) {
                debug!(path, valid, "validation cache hit");
                return valid;
            }
            let request = state.validation.requests.issue(path);
            let token = state.store.begin_validating(path);
            let input = match partial {
                Some(_) => state.store.get(path).cloned().unwrap_or(Value::Null),
                None => state.store.values().clone(),
            };
            (generation, request, token, hash, input)
        };
        self.emit(FormEvent::FieldStateChanged {
            path: path.to_string(),
        });

        let violations: Vec<Violation> = match &partial {
            Some(sub_schema) => sub_schema
                .validate(&input)
                .await
                .into_iter()
                .map(|violation| violation.prefixed(path))
                .collect(),
            None => schema
                .validate(&input)
                .await
                .into_iter()
                .filter(|violation| is_same_or_descendant(&violation.path, path))
                .collect(),
        };
        let valid = violations.is_empty();

        let changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.store.end_validating(path, token);
            if state.store.generation() != generation {
                debug!(path, generation, "discarding result from before reset");
                None
            } else if !state.validation.requests.is_current(path, request) {
                debug!(path, request, "discarding superseded result");
                None
            } else {
                state.validation.cache.store(path, hash, valid, generation);
                let errors = group_violations(violations, self.inner.options.criteria_mode);
                Some(self.apply_schema_errors(state, path, errors, None))
            }
        };
        self.emit(FormEvent::FieldStateChanged {
            path: path.to_string(),
        });
        if let Some(changed) = changed {
            self.emit_errors_changed(changed);
        }
        valid
    }

    /// Schema validation of the whole tree.
    pub(crate) async fn validate_form(&self) -> bool {
        let Some(schema) = self.inner.schema.clone() else {
            return true;
        };
        let (generation, request, token, input) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let request = state.validation.requests.issue_full();
            let token = state.store.begin_full_validation();
            (
                state.store.generation(),
                request,
                token,
                state.store.values().clone(),
            )
        };

        let violations = schema.validate(&input).await;
        let valid = violations.is_empty();

        let changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.store.end_full_validation(token);
            if state.store.generation() != generation {
                debug!(generation, "discarding form result from before reset");
                None
            } else if !state.validation.requests.is_full_current(request) {
                debug!(request, "discarding superseded form result");
                None
            } else {
                let errors = group_violations(violations, self.inner.options.criteria_mode);
                Some(self.apply_schema_errors(state, "", errors, Some(request)))
            }
        };
        if let Some(changed) = changed {
            self.emit_errors_changed(changed);
        }
        valid
    }

    /// Decide every path in `scope`: paths in `errors` fail, paths that held
    /// an error or a pending error and are absent from `errors` pass.
    /// Returns the paths whose displayed error changed now.
    fn apply_schema_errors(
        &self,
        state: &mut EngineState,
        scope: &str,
        mut errors: BTreeMap<String, FieldError>,
        full_request: Option<u64>,
    ) -> Vec<String> {
        let mut decided: BTreeSet<String> = errors.keys().cloned().collect();
        decided.extend(state.store.schema_error_paths_under(scope));
        decided.extend(state.validation.pending.paths_under(scope));

        let delay = self.inner.options.delay_error();
        let mut changed = Vec::new();
        for path in decided {
            if full_request.is_some_and(|id| {
                state.validation.requests.superseded_by_field(&path, id)
                    || state.validation.requests.stale_for_full(&path)
            }) {
                trace!(path = %path, "a newer run or write owns this path");
                continue;
            }
            let outcome = errors.remove(&path);
            match delay {
                None => {
                    if state.store.set_schema_error(&path, outcome) {
                        changed.push(path);
                    }
                }
                Some(delay) => self.decide_delayed(state, path, outcome, delay, &mut changed),
            }
        }
        changed
    }

    fn decide_delayed(
        &self,
        state: &mut EngineState,
        path: String,
        outcome: Option<FieldError>,
        delay: Duration,
        changed: &mut Vec<String>,
    ) {
        let key = TimerKey::ErrorDisplay(path.clone());
        match outcome {
            None => {
                state.validation.pending.remove(&path);
                self.inner.timers.cancel(&key);
                if state.store.set_schema_error(&path, None) {
                    changed.push(path);
                }
            }
            Some(error) if state.store.schema_error(&path) == Some(&error) => {
                state.validation.pending.remove(&path);
                self.inner.timers.cancel(&key);
            }
            Some(error) if state.validation.pending.get(&path) == Some(&error) => {
                trace!(path = %path, "same error already pending");
            }
            Some(error) => {
                let decision = state.validation.pending.hold(&path, error.clone());
                let engine = self.clone();
                let pending_path = path.clone();
                let scheduled = self.inner.timers.schedule(key, delay, async move {
                    engine.commit_pending(&pending_path, decision);
                });
                if !scheduled {
                    state.validation.pending.remove(&path);
                    if state.store.set_schema_error(&path, Some(error)) {
                        changed.push(path);
                    }
                }
            }
        }
    }

    fn commit_pending(&self, path: &str, decision: u64) {
        let committed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.validation.pending.take(path, decision) {
                Some(error) => state.store.set_schema_error(path, Some(error)),
                None => false,
            }
        };
        if committed {
            debug!(path, decision, "committed delayed error");
            self.emit_errors_changed(vec![path.to_string()]);
        }
    }

    /// Run the validator registered at exactly `path`.
    async fn run_validator(&self, path: &str) -> bool {
        let (registered, generation, request, token, value, values) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(registered) = state.validators.get(path) else {
                return true;
            };
            let request = state.validation.custom_requests.issue(path);
            let token = state.store.begin_validating(path);
            (
                registered,
                state.store.generation(),
                request,
                token,
                state.store.get(path).cloned().unwrap_or(Value::Null),
                state.store.values().clone(),
            )
        };
        self.emit(FormEvent::FieldStateChanged {
            path: path.to_string(),
        });

        let message = registered.validator.validate(&value, &values).await;
        let valid = message.is_none();

        let changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.store.end_validating(path, token);
            if state.store.generation() != generation {
                debug!(path, generation, "discarding validator result from before reset");
                false
            } else if !state.validation.custom_requests.is_current(path, request) {
                debug!(path, request, "discarding superseded validator result");
                false
            } else {
                let error = message.map(|message| FieldError::new(VALIDATOR_ERROR_KIND, message));
                state.store.set_custom_error(path, error)
            }
        };
        self.emit(FormEvent::FieldStateChanged {
            path: path.to_string(),
        });
        if changed {
            self.emit_errors_changed(vec![path.to_string()]);
        }
        valid
    }

    async fn run_validators_under(&self, prefix: &str) -> bool {
        let paths = self.lock().validators.under(prefix);
        join_all(paths.iter().map(|path| self.run_validator(path)))
            .await
            .into_iter()
            .all(|valid| valid)
    }

    /// Whether an interaction on `path` should validate under the mode policy.
    pub(crate) fn should_validate(&self, store: &ValueStore, path: &str, event: FieldEvent) -> bool {
        self.inner
            .options
            .should_validate(event, store.is_field_touched(path), store.is_submitted)
    }

    /// Change-driven validation: the schema check debounced by the form
    /// options, each related validator debounced by its registration.
    pub(crate) fn schedule_revalidate(&self, path: &str) {
        let engine = self.clone();
        let target = path.to_string();
        let work = async move {
            engine.validate_field(&target).await;
        };
        match self.inner.options.validation_debounce() {
            Some(delay) => {
                self.inner
                    .timers
                    .schedule(TimerKey::Revalidate(path.to_string()), delay, work);
            }
            None => {
                spawn_detached("revalidate", work);
            }
        }

        let related = self.lock().validators.related(path);
        for (validator_path, debounce) in related {
            let engine = self.clone();
            let target = validator_path.clone();
            let work = async move {
                engine.run_validator(&target).await;
            };
            match debounce {
                Some(delay) => {
                    self.inner
                        .timers
                        .schedule(TimerKey::CustomValidator(validator_path), delay, work);
                }
                None => {
                    spawn_detached("field validator", work);
                }
            }
        }
    }

    /// Validate `path` in the background without debounce.
    pub(crate) fn spawn_validation(&self, path: &str) {
        let engine = self.clone();
        let target = path.to_string();
        spawn_detached("validate", async move {
            engine.validate(Some(&target)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(path: &str, kind: &str, message: &str) -> Violation {
        Violation::new(path, kind, message)
    }

    #[test]
    fn test_group_first_error() {
        let grouped = group_violations(
            vec![
                violation("password", "too_small", "too short"),
                violation("password", "invalid_string", "needs a digit"),
                violation("email", "invalid_string", "Invalid email"),
            ],
            CriteriaMode::FirstError,
        );
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["password"].message, "too short");
        assert!(grouped["password"].types.is_none());
    }

    #[test]
    fn test_group_collect_all_collapses_kinds() {
        let grouped = group_violations(
            vec![
                violation("password", "too_small", "too short"),
                violation("password", "invalid_string", "needs a digit"),
                violation("password", "invalid_string", "needs an uppercase letter"),
            ],
            CriteriaMode::All,
        );
        let error = &grouped["password"];
        assert_eq!(error.kind, "too_small");
        let types = error.types.as_ref().unwrap();
        assert_eq!(
            types["too_small"],
            ErrorTypeValue::Single("too short".into())
        );
        assert_eq!(
            types["invalid_string"],
            ErrorTypeValue::Multiple(vec![
                "needs a digit".into(),
                "needs an uppercase letter".into()
            ])
        );
    }

    #[test]
    fn test_cache_invalidation_scope() {
        let mut cache = ValidationCache::default();
        for path in ["user", "user.name", "user.email", "other"] {
            cache.store(path, 1, true, 0);
        }
        cache.invalidate("user.name");
        assert!(cache.lookup("user", 1, 0).is_none());
        assert!(cache.lookup("user.name", 1, 0).is_none());
        assert_eq!(cache.lookup("user.email", 1, 0), Some(true));
        assert_eq!(cache.lookup("other", 1, 0), Some(true));
        // Another hash or generation misses
        assert!(cache.lookup("other", 2, 0).is_none());
        assert!(cache.lookup("other", 1, 1).is_none());
    }

    #[test]
    fn test_request_ids() {
        let mut ids = RequestIds::default();
        let first = ids.issue("email");
        let second = ids.issue("email");
        assert!(!ids.is_current("email", first));
        assert!(ids.is_current("email", second));

        let full = ids.issue_full();
        assert!(!ids.is_current("email", second));
        assert!(ids.is_full_current(full));
        assert!(!ids.superseded_by_field("email", full));

        let newer = ids.issue("user");
        assert!(ids.superseded_by_field("user.name", full));
        assert!(ids.is_current("user", newer));

        ids.invalidate_under("user");
        assert!(!ids.is_current("user", newer));
        assert!(ids.is_full_current(full));
        assert!(ids.stale_for_full("user.name"));
        assert!(!ids.stale_for_full("email"));

        ids.invalidate_under("");
        assert!(!ids.is_full_current(full));
        assert!(!ids.stale_for_full("user.name"));
    }

    #[test]
    fn test_pending_errors_follow_latest_decision() {
        let mut pending = PendingErrors::default();
        let first = pending.hold("email", FieldError::new("invalid_string", "Invalid email"));
        let second = pending.hold("email", FieldError::new("too_small", "Required"));
        assert!(pending.take("email", first).is_none());
        assert_eq!(pending.take("email", second).unwrap().kind, "too_small");
        assert!(pending.is_empty());

        pending.hold("items.0", FieldError::new("custom", "bad"));
        pending.hold("name", FieldError::new("custom", "bad"));
        pending.remove_under("items");
        assert_eq!(pending.paths_under(""), vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn test_validator_fn_adapter() {
        let validator = validator_fn(|value, values| async move {
            (value != values["expected"]).then(|| "mismatch".to_string())
        });
        let values = serde_json::json!({"expected": 1});
        assert!(validator.validate(&serde_json::json!(1), &values).await.is_none());
        assert_eq!(
            validator.validate(&serde_json::json!(2), &values).await.as_deref(),
            Some("mismatch")
        );
    }

    #[test]
    fn test_registry_related_paths() {
        let mut registry = ValidatorRegistry::default();
        let validator = validator_fn(|_, _| async { None });
        registry.register("user.email".into(), validator.clone(), None);
        registry.register("items".into(), validator.clone(), Some(Duration::from_millis(5)));
        registry.register("other".into(), validator, None);

        let related: Vec<String> = registry.related("user").into_iter().map(|(p, _)| p).collect();
        assert_eq!(related, vec!["user.email"]);
        let related = registry.related("items.0.name");
        assert_eq!(related, vec![("items".to_string(), Some(Duration::from_millis(5)))]);
        assert_eq!(registry.under(""), vec!["items", "other", "user.email"]);
    }
}
