//! Change broadcast
//!
//! The engine keeps plain state; anything reactive (a UI binding, a logger,
//! a test) listens on a broadcast channel. Sends never block and a missing
//! or lagging receiver never affects the engine.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::array::{ArrayOp, FocusHint};
use crate::engine::FormEngine;

/// Something observable changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormEvent {
    ValueChanged {
        path: String,
    },
    /// Dirty, touched or validating state of a path changed
    FieldStateChanged {
        path: String,
    },
    ErrorsChanged {
        paths: Vec<String>,
    },
    ArrayChanged {
        path: String,
        op: ArrayOp,
        focus: Option<FocusHint>,
    },
    Reset {
        generation: u64,
    },
    DefaultValuesLoaded,
    DefaultValuesFailed {
        message: String,
    },
    Submitted {
        success: bool,
    },
}

impl FormEngine {
    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<FormEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: FormEvent) {
        trace!(?event, "form event");
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn emit_errors_changed(&self, paths: Vec<String>) {
        if !paths.is_empty() {
            self.emit(FormEvent::ErrorsChanged { paths });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = FormEvent::ArrayChanged {
            path: "items".into(),
            op: ArrayOp::Swap,
            focus: Some(FocusHint::Index(1)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "array_changed");
        assert_eq!(json["op"], "swap");
        assert_eq!(json["focus"]["index"], 1);
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let engine = FormEngine::builder().build().unwrap();
        engine.emit(FormEvent::DefaultValuesLoaded);
        let mut rx = engine.subscribe();
        engine.emit(FormEvent::Submitted { success: true });
        assert_eq!(rx.recv().await.unwrap(), FormEvent::Submitted { success: true });
    }
}
