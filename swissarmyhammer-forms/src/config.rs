//! Engine options and validation-mode policy
//!
//! Options are plain serde data so hosts can keep them next to the rest of
//! their configuration. [`FormOptions::from_figment`] layers any figment on
//! top of the defaults.

use std::time::Duration;

use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{FormsError, Result};

/// Default ceiling for array indices written through a path
pub const DEFAULT_MAX_ARRAY_INDEX: usize = 10_000;

/// Default number of parsed paths kept in the segment cache
pub const DEFAULT_PATH_CACHE_CAPACITY: usize = 256;

/// Default capacity of the change-broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// When field validation runs before the first submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    OnChange,
    OnBlur,
    /// Validate on blur, then on every change once the field was touched
    OnTouched,
    #[default]
    OnSubmit,
    All,
}

/// When field validation runs after the first submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevalidateMode {
    #[default]
    OnChange,
    OnBlur,
    OnSubmit,
}

/// How multiple violations at one path are reported.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CriteriaMode {
    /// Only the first violation's message
    #[default]
    FirstError,
    /// Every violation, keyed by kind
    All,
}

/// What a write made with `should_dirty = false` does to existing dirty state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoDirtyWritePolicy {
    /// Copy the written value into the default snapshot and clear dirty
    /// flags at the path and below
    #[default]
    Rebaseline,
    /// Leave dirty flags and the snapshot untouched
    Preserve,
}

/// Interaction that may trigger field validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEvent {
    Change,
    Blur,
}

/// Options for a form engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FormOptions {
    pub mode: ValidationMode,
    pub revalidate_mode: RevalidateMode,
    pub criteria_mode: CriteriaMode,
    /// Hold failing decisions this long before displaying them (0 = never hold)
    pub delay_error_ms: u64,
    /// Debounce for validation triggered by value changes (0 = none)
    pub validation_debounce_ms: u64,
    /// Highest array index a path write may create
    pub max_array_index: usize,
    pub path_cache_capacity: usize,
    pub no_dirty_writes: NoDirtyWritePolicy,
    pub event_capacity: usize,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            revalidate_mode: RevalidateMode::default(),
            criteria_mode: CriteriaMode::default(),
            delay_error_ms: 0,
            validation_debounce_ms: 0,
            max_array_index: DEFAULT_MAX_ARRAY_INDEX,
            path_cache_capacity: DEFAULT_PATH_CACHE_CAPACITY,
            no_dirty_writes: NoDirtyWritePolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl FormOptions {
    /// Extract options from a figment layered over the defaults.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let options: FormOptions = Figment::from(Serialized::defaults(FormOptions::default()))
            .merge(figment)
            .extract()?;
        options.validate()?;
        Ok(options)
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::from(Toml::string(toml)))
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.path_cache_capacity == 0 {
            return Err(FormsError::invalid_config(
                "path_cache_capacity",
                "must be at least 1",
            ));
        }
        if self.event_capacity == 0 {
            return Err(FormsError::invalid_config(
                "event_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_revalidate_mode(mut self, mode: RevalidateMode) -> Self {
        self.revalidate_mode = mode;
        self
    }

    pub fn with_criteria_mode(mut self, criteria: CriteriaMode) -> Self {
        self.criteria_mode = criteria;
        self
    }

    pub fn with_delay_error(mut self, delay: Duration) -> Self {
        self.delay_error_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_validation_debounce(mut self, debounce: Duration) -> Self {
        self.validation_debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_no_dirty_writes(mut self, policy: NoDirtyWritePolicy) -> Self {
        self.no_dirty_writes = policy;
        self
    }

    /// Error-display delay, `None` when errors commit immediately.
    pub fn delay_error(&self) -> Option<Duration> {
        (self.delay_error_ms > 0).then(|| Duration::from_millis(self.delay_error_ms))
    }

    /// Debounce for change-driven validation, `None` when it runs immediately.
    pub fn validation_debounce(&self) -> Option<Duration> {
        (self.validation_debounce_ms > 0).then(|| Duration::from_millis(self.validation_debounce_ms))
    }

    /// Decide whether an interaction on a field should validate it.
    pub fn should_validate(&self, event: FieldEvent, touched: bool, submitted: bool) -> bool {
        if submitted {
            return match self.revalidate_mode {
                RevalidateMode::OnChange => event == FieldEvent::Change,
                RevalidateMode::OnBlur => event == FieldEvent::Blur,
                RevalidateMode::OnSubmit => false,
            };
        }
        match self.mode {
            ValidationMode::OnChange => event == FieldEvent::Change,
            ValidationMode::OnBlur => event == FieldEvent::Blur,
            ValidationMode::OnTouched => event == FieldEvent::Blur || touched,
            ValidationMode::OnSubmit => false,
            ValidationMode::All => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = FormOptions::default();
        assert_eq!(options.mode, ValidationMode::OnSubmit);
        assert_eq!(options.max_array_index, 10_000);
        assert_eq!(options.path_cache_capacity, 256);
        assert!(options.delay_error().is_none());
        assert!(options.validation_debounce().is_none());
    }

    #[test]
    fn test_from_toml_overrides_defaults() {
        let options = FormOptions::from_toml_str(
            r#"
            mode = "on_change"
            criteria_mode = "all"
            delay_error_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(options.mode, ValidationMode::OnChange);
        assert_eq!(options.criteria_mode, CriteriaMode::All);
        assert_eq!(options.delay_error(), Some(Duration::from_millis(250)));
        // Untouched keys keep their defaults
        assert_eq!(options.revalidate_mode, RevalidateMode::OnChange);
        assert_eq!(options.max_array_index, DEFAULT_MAX_ARRAY_INDEX);
    }

    #[test]
    fn test_zero_cache_capacity_rejected() {
        let err = FormOptions::from_toml_str("path_cache_capacity = 0").unwrap_err();
        assert!(matches!(err, FormsError::InvalidConfig { .. }));
    }

    #[test]
    fn test_unknown_mode_is_config_error() {
        let err = FormOptions::from_toml_str(r#"mode = "sometimes""#).unwrap_err();
        assert!(matches!(err, FormsError::Config(_)));
    }

    #[test]
    fn test_should_validate_before_submit() {
        let on_change = FormOptions::default().with_mode(ValidationMode::OnChange);
        assert!(on_change.should_validate(FieldEvent::Change, false, false));
        assert!(!on_change.should_validate(FieldEvent::Blur, false, false));

        let on_touched = FormOptions::default().with_mode(ValidationMode::OnTouched);
        assert!(!on_touched.should_validate(FieldEvent::Change, false, false));
        assert!(on_touched.should_validate(FieldEvent::Change, true, false));
        assert!(on_touched.should_validate(FieldEvent::Blur, false, false));

        let on_submit = FormOptions::default();
        assert!(!on_submit.should_validate(FieldEvent::Change, true, false));
        assert!(!on_submit.should_validate(FieldEvent::Blur, true, false));
    }

    #[test]
    fn test_revalidate_mode_applies_after_submit() {
        let options = FormOptions::default()
            .with_mode(ValidationMode::OnSubmit)
            .with_revalidate_mode(RevalidateMode::OnBlur);
        assert!(!options.should_validate(FieldEvent::Change, false, true));
        assert!(options.should_validate(FieldEvent::Blur, false, true));
    }
}
