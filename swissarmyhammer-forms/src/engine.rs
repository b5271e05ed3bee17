//! Form engine facade
//!
//! [`FormEngine`] is a cheaply cloneable handle. All state sits behind one
//! mutex that is never held across an `.await`; async work snapshots what it
//! needs, releases the lock, and re-checks the reset generation before it
//! writes anything back.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::analyzer::SchemaAnalyzer;
use crate::array::{ArrayField, ArrayRules, FieldArray};
use crate::config::{FieldEvent, FormOptions};
use crate::dirty::DirtyTracker;
use crate::error::{FormsError, Result};
use crate::events::FormEvent;
use crate::path::{is_same_or_descendant, PathAccessor};
use crate::schema::SchemaRef;
use crate::store::{FieldError, ValueStore};
use crate::timer::{spawn_detached, TimerSlots};
use crate::validation::{FieldValidator, ValidationState, ValidatorRegistry};

/// Called when deferred default values fail to load.
pub type LoadErrorHook = Arc<dyn Fn(&FormsError) + Send + Sync>;

/// How a programmatic write treats field state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetValueOptions {
    /// Compare against the defaults and flag the field. When false the
    /// configured [`NoDirtyWritePolicy`](crate::config::NoDirtyWritePolicy)
    /// applies.
    pub should_dirty: bool,
    pub should_touch: bool,
    /// Validate the path after writing, regardless of the validation mode
    pub should_validate: bool,
}

impl Default for SetValueOptions {
    fn default() -> Self {
        Self {
            should_dirty: true,
            should_touch: false,
            should_validate: false,
        }
    }
}

/// What a reset keeps. Everything is replaced by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    pub keep_values: bool,
    pub keep_default_values: bool,
    pub keep_errors: bool,
    /// Keep dirty flags exactly as they were, even where values now equal
    /// the new defaults
    pub keep_dirty: bool,
    pub keep_touched: bool,
    pub keep_submit_count: bool,
    pub keep_is_submitting: bool,
    pub keep_is_submitted: bool,
}

/// Snapshot of one field's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldState {
    /// This path, a leaf under it, or a whole ancestor differs from its
    /// default
    pub dirty: bool,
    pub touched: bool,
    pub validating: bool,
    pub invalid: bool,
    pub error: Option<FieldError>,
}

/// Snapshot of whole-form state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormState {
    pub is_dirty: bool,
    pub dirty_count: usize,
    pub touched_count: usize,
    /// No error is displayed anywhere
    pub is_valid: bool,
    pub is_validating: bool,
    pub is_submitting: bool,
    pub is_submitted: bool,
    pub is_submit_successful: bool,
    pub submit_count: u32,
    pub is_loading: bool,
    pub load_error: Option<String>,
    pub generation: u64,
}

pub(crate) struct EngineState {
    pub(crate) store: ValueStore,
    pub(crate) arrays: HashMap<String, ArrayField>,
    pub(crate) validation: ValidationState,
    pub(crate) validators: ValidatorRegistry,
}

fn array_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map_or(0, Vec::len)
}

impl EngineState {
    /// Fresh keys for every registered array, sized to its current value.
    pub(crate) fn rebuild_arrays(&mut self) {
        for (path, field) in self.arrays.iter_mut() {
            field.rebuild(array_len(self.store.get(path)));
        }
    }

    /// Keep registered arrays in step with a write at `written`. Arrays the
    /// write replaced get fresh keys; arrays it wrote into keep theirs.
    pub(crate) fn sync_arrays(&mut self, written: &str) {
        for (path, field) in self.arrays.iter_mut() {
            let len = array_len(self.store.get(path));
            if is_same_or_descendant(path, written) {
                field.rebuild(len);
            } else if is_same_or_descendant(written, path) {
                field.sync_len(len);
            }
        }
    }
}

pub(crate) struct FormInner {
    pub(crate) options: FormOptions,
    pub(crate) paths: Arc<PathAccessor>,
    pub(crate) schema: Option<SchemaRef>,
    pub(crate) analyzer: SchemaAnalyzer,
    pub(crate) state: Mutex<EngineState>,
    pub(crate) timers: TimerSlots,
    pub(crate) events: broadcast::Sender<FormEvent>,
    pub(crate) loading: watch::Sender<bool>,
    pub(crate) on_load_error: Option<LoadErrorHook>,
}

/// Form state and validation engine.
#[derive(Clone)]
pub struct FormEngine {
    pub(crate) inner: Arc<FormInner>,
}

impl fmt::Debug for FormEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormEngine")
            .field("options", &self.inner.options)
            .field("has_schema", &self.inner.schema.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`FormEngine`].
#[derive(Default)]
pub struct FormEngineBuilder {
    options: FormOptions,
    schema: Option<SchemaRef>,
    defaults: Option<Value>,
    deferred: Option<BoxFuture<'static, std::result::Result<Value, String>>>,
    on_load_error: Option<LoadErrorHook>,
    validators: Vec<(String, Arc<dyn FieldValidator>, Option<Duration>)>,
}

impl FormEngineBuilder {
    pub fn options(mut self, options: FormOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn default_values(mut self, values: Value) -> Self {
        self.defaults = Some(values);
        self
    }

    /// Load default values from a future once the engine is built. The form
    /// reports `is_loading` until it resolves.
    pub fn default_values_async<F, E>(mut self, producer: F) -> Self
    where
        F: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: fmt::Display,
    {
        self.deferred = Some(Box::pin(async move {
            producer.await.map_err(|err| err.to_string())
        }));
        self
    }

    pub fn on_default_values_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FormsError) + Send + Sync + 'static,
    {
        self.on_load_error = Some(Arc::new(hook));
        self
    }

    pub fn validator(
        mut self,
        path: impl Into<String>,
        validator: Arc<dyn FieldValidator>,
        debounce: Option<Duration>,
    ) -> Self {
        self.validators.push((path.into(), validator, debounce));
        self
    }

    pub fn build(self) -> Result<FormEngine> {
        self.options.validate()?;
        let paths = Arc::new(PathAccessor::new(
            self.options.max_array_index,
            self.options.path_cache_capacity,
        ));

        let mut validators = ValidatorRegistry::default();
        for (path, validator, debounce) in self.validators {
            let path = paths.segments(&path)?.join(".");
            validators.register(path, validator, debounce);
        }

        if self.deferred.is_some() && Handle::try_current().is_err() {
            return Err(FormsError::NoRuntime {
                context: "deferred default values".to_string(),
            });
        }

        let deferred = self.deferred.is_some();
        let defaults = self.defaults.unwrap_or_else(|| Value::Object(Map::new()));
        let mut store = ValueStore::new(paths.clone(), defaults);
        store.is_loading = deferred;

        let (events, _) = broadcast::channel(self.options.event_capacity);
        let (loading, _) = watch::channel(deferred);
        let engine = FormEngine {
            inner: Arc::new(FormInner {
                analyzer: SchemaAnalyzer::new(paths.clone()),
                options: self.options,
                paths,
                schema: self.schema,
                state: Mutex::new(EngineState {
                    store,
                    arrays: HashMap::new(),
                    validation: ValidationState::default(),
                    validators,
                }),
                timers: TimerSlots::new(),
                events,
                loading,
                on_load_error: self.on_load_error,
            }),
        };

        if let Some(producer) = self.deferred {
            let loader = engine.clone();
            spawn_detached("default values", async move {
                loader.load_default_values(producer).await;
            });
        }
        debug!(
            mode = ?engine.inner.options.mode,
            deferred,
            "form engine built"
        );
        Ok(engine)
    }
}

impl FormEngine {
    pub fn builder() -> FormEngineBuilder {
        FormEngineBuilder::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dirty_tracker(&self) -> DirtyTracker {
        DirtyTracker::new(self.inner.options.no_dirty_writes)
    }

    pub fn options(&self) -> &FormOptions {
        &self.inner.options
    }

    pub fn schema(&self) -> Option<&SchemaRef> {
        self.inner.schema.as_ref()
    }

    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.lock().store.get(path).cloned()
    }

    /// True when the path exists, even if its value is `null`.
    pub fn has_value(&self, path: &str) -> bool {
        let guard = self.lock();
        self.inner.paths.has(guard.store.values(), path)
    }

    pub fn values(&self) -> Value {
        self.lock().store.values().clone()
    }

    pub fn default_value(&self, path: &str) -> Option<Value> {
        self.lock().store.default_at(path).cloned()
    }

    pub fn default_values(&self) -> Value {
        self.lock().store.defaults().clone()
    }

    /// Write a value. Returns false, leaving everything unchanged, when the
    /// path is malformed or refused by the path guards.
    pub fn set_value(&self, path: &str, value: Value, options: SetValueOptions) -> bool {
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        let flags_changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.store.set(&path, value) {
                return false;
            }
            let mut changed =
                self.dirty_tracker()
                    .track_write(&mut state.store, &path, options.should_dirty);
            if options.should_touch && state.store.mark_touched(&path) {
                changed.push(path.clone());
            }
            state.validation.cache.invalidate(&path);
            state.sync_arrays(&path);
            changed
        };

        self.emit(FormEvent::ValueChanged { path: path.clone() });
        for changed in flags_changed.into_iter().collect::<BTreeSet<_>>() {
            self.emit(FormEvent::FieldStateChanged { path: changed });
        }
        if options.should_validate {
            self.spawn_validation(&path);
        }
        true
    }

    /// Remove the value at `path`. Array positions become `null`.
    pub fn unset_value(&self, path: &str) -> bool {
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        let flags_changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if !state.store.unset(&path) {
                return false;
            }
            let changed = self
                .dirty_tracker()
                .track_write(&mut state.store, &path, true);
            state.validation.cache.invalidate(&path);
            state.sync_arrays(&path);
            changed
        };
        self.emit(FormEvent::ValueChanged { path });
        for changed in flags_changed {
            self.emit(FormEvent::FieldStateChanged { path: changed });
        }
        true
    }

    /// Input event: write, flag dirty, and validate if the mode asks for it.
    pub fn change(&self, path: &str, value: Value) -> bool {
        if !self.set_value(path, value, SetValueOptions::default()) {
            return false;
        }
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        let validate = {
            let guard = self.lock();
            self.should_validate(&guard.store, &path, FieldEvent::Change)
        };
        if validate {
            self.schedule_revalidate(&path);
        }
        true
    }

    /// Focus-lost event: mark touched and validate if the mode asks for it.
    pub fn blur(&self, path: &str) -> bool {
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        let (touched, validate) = {
            let mut guard = self.lock();
            let touched = guard.store.mark_touched(&path);
            (
                touched,
                self.should_validate(&guard.store, &path, FieldEvent::Blur),
            )
        };
        if touched {
            self.emit(FormEvent::FieldStateChanged { path: path.clone() });
        }
        if validate {
            self.spawn_validation(&path);
        }
        true
    }

    pub fn field_state(&self, path: &str) -> FieldState {
        let Some(path) = self.inner.paths.normalize(path) else {
            return FieldState::default();
        };
        let guard = self.lock();
        let store = &guard.store;
        let error = store.error(&path).cloned();
        FieldState {
            dirty: store.is_path_dirty(&path),
            touched: store.is_field_touched(&path),
            validating: store.is_field_validating(&path),
            invalid: error.is_some(),
            error,
        }
    }

    pub fn form_state(&self) -> FormState {
        let guard = self.lock();
        let store = &guard.store;
        FormState {
            is_dirty: store.is_dirty(),
            dirty_count: store.dirty_count(),
            touched_count: store.touched_count(),
            is_valid: !store.has_errors(),
            is_validating: store.is_validating(),
            is_submitting: store.is_submitting,
            is_submitted: store.is_submitted,
            is_submit_successful: store.is_submit_successful,
            submit_count: store.submit_count,
            is_loading: store.is_loading,
            load_error: store.load_error.clone(),
            generation: store.generation(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().store.is_dirty()
    }

    pub fn is_validating(&self) -> bool {
        self.lock().store.is_validating()
    }

    pub fn is_field_validating(&self, path: &str) -> bool {
        match self.inner.paths.normalize(path) {
            Some(path) => self.lock().store.is_field_validating(&path),
            None => false,
        }
    }

    pub fn validating_paths(&self) -> Vec<String> {
        self.lock().store.validating_paths()
    }

    /// Displayed errors by path.
    pub fn errors(&self) -> BTreeMap<String, FieldError> {
        self.lock().store.errors()
    }

    pub fn error(&self, path: &str) -> Option<FieldError> {
        let path = self.inner.paths.normalize(path)?;
        self.lock().store.error(&path).cloned()
    }

    /// Set an error by hand. It holds until the next validation decides the
    /// path.
    pub fn set_error(&self, path: &str, error: FieldError) -> bool {
        let Some(path) = self.inner.paths.normalize(path) else {
            return false;
        };
        let changed = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.validation.pending.remove(&path);
            state.validation.cache.clear();
            state.store.set_schema_error(&path, Some(error))
        };
        if changed {
            self.emit_errors_changed(vec![path]);
        }
        true
    }

    /// Clear engine errors at and under `path`, or everywhere when `None`.
    /// Host-supplied errors are left alone.
    pub fn clear_errors(&self, path: Option<&str>) {
        let prefix = match path {
            Some(path) => match self.inner.paths.normalize(path) {
                Some(path) => path,
                None => return,
            },
            None => String::new(),
        };
        let cleared = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.validation.pending.remove_under(&prefix);
            state.validation.cache.clear();
            state.store.clear_errors_under(&prefix)
        };
        self.emit_errors_changed(cleared);
    }

    /// Replace all values from the host without flagging anything dirty.
    pub fn set_external_values(&self, values: Value) -> bool {
        self.set_value(
            "",
            values,
            SetValueOptions {
                should_dirty: false,
                ..SetValueOptions::default()
            },
        )
    }

    /// Replace the host-supplied errors. They take precedence over engine
    /// errors at the same path.
    pub fn set_external_errors(&self, errors: BTreeMap<String, FieldError>) {
        let errors: BTreeMap<String, FieldError> = errors
            .into_iter()
            .filter_map(|(path, error)| {
                self.inner
                    .paths
                    .normalize(&path)
                    .map(|path| (path, error))
            })
            .collect();
        let changed = {
            let mut guard = self.lock();
            let mut paths: BTreeSet<String> =
                guard.store.external_errors().keys().cloned().collect();
            paths.extend(errors.keys().cloned());
            guard.store.set_external_errors(errors);
            paths
        };
        self.emit_errors_changed(changed.into_iter().collect());
    }

    /// Load default values from `producer`.
    ///
    /// On success the defaults and values are both replaced. On failure the
    /// message is kept in [`FormState::load_error`] and the configured hook
    /// is called; nothing is returned as an error.
    pub async fn load_default_values<F, E>(&self, producer: F) -> bool
    where
        F: Future<Output = std::result::Result<Value, E>>,
        E: fmt::Display,
    {
        {
            let mut guard = self.lock();
            guard.store.is_loading = true;
            guard.store.load_error = None;
        }
        self.inner.loading.send_replace(true);

        match producer.await {
            Ok(values) => {
                {
                    let mut guard = self.lock();
                    let state = &mut *guard;
                    state.store.replace_defaults(values.clone());
                    state.store.replace_values(values);
                    state.store.is_loading = false;
                    self.dirty_tracker().recompute_all(&mut state.store);
                    state.validation.cache.clear();
                    state.rebuild_arrays();
                }
                debug!("default values loaded");
                self.inner.loading.send_replace(false);
                self.emit(FormEvent::DefaultValuesLoaded);
                true
            }
            Err(err) => {
                let message = err.to_string();
                {
                    let mut guard = self.lock();
                    guard.store.is_loading = false;
                    guard.store.load_error = Some(message.clone());
                }
                let error = FormsError::default_values(message.clone());
                warn!(%error, "keeping previous default values");
                if let Some(hook) = &self.inner.on_load_error {
                    hook(&error);
                }
                self.inner.loading.send_replace(false);
                self.emit(FormEvent::DefaultValuesFailed { message });
                false
            }
        }
    }

    /// Wait until no default-value load is pending.
    pub async fn loaded(&self) {
        let mut loading = self.inner.loading.subscribe();
        // The sender lives as long as the engine
        let _ = loading.wait_for(|pending| !*pending).await;
    }

    /// Submit: validate everything and call `on_valid` with the values when
    /// it passes.
    pub async fn handle_submit<F, Fut>(&self, on_valid: F) -> bool
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = ()>,
    {
        {
            let mut guard = self.lock();
            guard.store.submit_count += 1;
            guard.store.is_submitting = true;
        }
        let valid = self.validate(None).await;
        if valid {
            on_valid(self.values()).await;
        }
        {
            let mut guard = self.lock();
            guard.store.is_submitting = false;
            guard.store.is_submitted = true;
            guard.store.is_submit_successful = valid;
        }
        debug!(valid, "form submitted");
        self.emit(FormEvent::Submitted { success: valid });
        valid
    }

    /// Reset values and state.
    ///
    /// Bumps the generation so in-flight validation is discarded, cancels
    /// every pending timer and clears all validation bookkeeping. Values
    /// come from `values` or, when `None`, the current defaults; `values`
    /// also becomes the new defaults unless `keep_default_values` is set.
    pub fn reset(&self, values: Option<Value>, options: ResetOptions) {
        let (generation, cleared) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.inner.timers.cancel_all();
            let generation = state.store.bump_generation();
            state.validation.clear();
            state.store.clear_validating();

            let given = values.is_some();
            let next = values.unwrap_or_else(|| state.store.defaults().clone());
            if given && !options.keep_default_values {
                state.store.replace_defaults(next.clone());
            }
            if !options.keep_values {
                state.store.replace_values(next);
            }

            let cleared = if options.keep_errors {
                Vec::new()
            } else {
                state.store.clear_errors_under("")
            };
            if !options.keep_dirty {
                self.dirty_tracker().recompute_all(&mut state.store);
            }
            if !options.keep_touched {
                state.store.clear_all_touched();
            }
            if !options.keep_submit_count {
                state.store.submit_count = 0;
            }
            if !options.keep_is_submitting {
                state.store.is_submitting = false;
            }
            if !options.keep_is_submitted {
                state.store.is_submitted = false;
                state.store.is_submit_successful = false;
            }
            state.rebuild_arrays();
            (generation, cleared)
        };
        debug!(generation, "form reset");
        self.emit(FormEvent::Reset { generation });
        self.emit_errors_changed(cleared);
    }

    /// Handle for the array at `path`, registering it on first use.
    pub fn field_array(&self, path: &str) -> FieldArray {
        self.register_array(path, None)
    }

    /// Like [`field_array`](Self::field_array), replacing the length rules.
    pub fn field_array_with(&self, path: &str, rules: ArrayRules) -> FieldArray {
        self.register_array(path, Some(rules))
    }

    fn register_array(&self, path: &str, rules: Option<ArrayRules>) -> FieldArray {
        let normalized = self
            .inner
            .paths
            .normalize(path)
            .unwrap_or_else(|| path.to_string());
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            let len = array_len(state.store.get(&normalized));
            let field = state
                .arrays
                .entry(normalized.clone())
                .or_insert_with(|| ArrayField::new(rules.unwrap_or_default(), len));
            if let Some(rules) = rules {
                field.set_rules(rules);
            }
        }
        FieldArray::new(self.clone(), normalized)
    }
}
