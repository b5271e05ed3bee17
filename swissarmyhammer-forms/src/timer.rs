//! Cancellable deferred work, one slot per key
//!
//! Debounced validation and delayed error display both need "run this later
//! unless something newer replaces it". Each slot owns at most one sleeping
//! task; scheduling into an occupied slot aborts the previous one.
//! Cancellation only ever interrupts the wait: once the delay elapses the
//! work is handed to its own task, so bookkeeping inside it always finishes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{trace, warn};

use crate::path::is_same_or_descendant;

/// Identifies a timer slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Debounced schema validation of a path
    Revalidate(String),
    /// Debounced field-local validator
    CustomValidator(String),
    /// Pending error waiting out the display delay
    ErrorDisplay(String),
}

impl TimerKey {
    pub fn path(&self) -> &str {
        match self {
            TimerKey::Revalidate(path)
            | TimerKey::CustomValidator(path)
            | TimerKey::ErrorDisplay(path) => path,
        }
    }
}

/// Spawn `work` on the current runtime. Returns false, with a warning, when
/// no tokio runtime is running.
pub fn spawn_detached<F>(context: &str, work: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(work);
            true
        }
        Err(_) => {
            warn!(context, "no tokio runtime running, skipping background work");
            false
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerSlots {
    slots: Mutex<HashMap<TimerKey, AbortHandle>>,
}

impl TimerSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` after `delay` unless the slot is rescheduled or cancelled
    /// first. Returns false when no runtime is available.
    pub fn schedule<F>(&self, key: TimerKey, delay: Duration, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            warn!(?key, "no tokio runtime running, timer not scheduled");
            return false;
        };
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(work);
        });

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, pending| !pending.is_finished());
        if let Some(previous) = slots.insert(key.clone(), task.abort_handle()) {
            trace!(?key, "replacing pending timer");
            previous.abort();
        }
        true
    }

    /// Returns true when a pending timer was aborted.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        let removed = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    /// Abort every timer whose path is `prefix` or lies under it.
    pub fn cancel_under(&self, prefix: &str) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<TimerKey> = slots
            .keys()
            .filter(|key| is_same_or_descendant(key.path(), prefix))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(handle) = slots.remove(key) {
                handle.abort();
            }
        }
        keys.len()
    }

    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in slots.drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &TimerKey) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of timers still waiting.
    pub fn pending(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}
