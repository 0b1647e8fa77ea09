//! Message predicates used to guard correlation waiters.
//!
//! A predicate that panics is logged and treated as non-matching, so one
//! broken waiter cannot stop dispatch to the others on its causation id.

use super::envelope::Envelope;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub const EXECUTE_REQUEST: &str = "execute_request";
pub const EXECUTE_RESULT: &str = "execute_result";

type PredicateFn = dyn Fn(&Envelope) -> bool + Send + Sync;

#[derive(Clone)]
pub struct Predicate {
    label: Arc<str>,
    test: Arc<PredicateFn>,
}

impl Predicate {
    pub fn new<F>(label: impl Into<Arc<str>>, test: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            test: Arc::new(test),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Evaluate against one envelope; panics count as `false`.
    pub fn evaluate(&self, envelope: &Envelope) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.test)(envelope))) {
            Ok(matched) => matched,
            Err(_) => {
                tracing::warn!(
                    predicate = %self.label,
                    msg_id = envelope.msg_id(),
                    msg_type = envelope.msg_type(),
                    "predicate panicked; treating as non-matching"
                );
                false
            }
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        let label = format!("{} | {}", self.label, other.label);
        Predicate::new(label, move |envelope| {
            self.evaluate(envelope) || other.evaluate(envelope)
        })
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.label).finish()
    }
}

pub fn always() -> Predicate {
    Predicate::new("always", |_| true)
}

pub fn msg_type(expected: impl Into<String>) -> Predicate {
    let expected = expected.into();
    Predicate::new(format!("msg_type == {expected}"), move |envelope| {
        envelope.msg_type() == expected
    })
}

/// Reply type paired with a request type, e.g. `execute_request` →
/// `execute_reply`.
pub fn reply_type_for(request_type: &str) -> String {
    let base = request_type
        .strip_suffix("_request")
        .unwrap_or(request_type);
    format!("{base}_reply")
}

pub fn reply_for(request_type: &str) -> Predicate {
    msg_type(reply_type_for(request_type))
}

pub fn stream_named(name: &'static str) -> Predicate {
    Predicate::new(format!("stream:{name}"), move |envelope| {
        envelope.msg_type() == "stream" && envelope.content_str("name") == Some(name)
    })
}

pub fn stdout() -> Predicate {
    stream_named("stdout")
}

pub fn stderr() -> Predicate {
    stream_named("stderr")
}

/// Kernel reported `execution_state: idle` for the request.
pub fn execution_idle() -> Predicate {
    Predicate::new("execution_idle", |envelope| {
        envelope.msg_type() == "status" && envelope.content_str("execution_state") == Some("idle")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Session;
    use serde_json::{json, Map, Value};

    fn message(msg_type: &str, content: Value) -> Envelope {
        let content = content.as_object().cloned().unwrap_or_else(Map::new);
        Session::new("kernel").message(msg_type, content)
    }

    #[test]
    fn stream_predicates_check_stream_name() {
        let out = message("stream", json!({"name": "stdout", "text": "1\n"}));
        let err = message("stream", json!({"name": "stderr", "text": "oops\n"}));
        let nameless = message("stream", json!({"text": "?"}));

        assert!(stdout().evaluate(&out));
        assert!(!stdout().evaluate(&err));
        assert!(stderr().evaluate(&err));
        assert!(!stdout().evaluate(&nameless));
        assert!(stdout().or(stderr()).evaluate(&err));
    }

    #[test]
    fn idle_requires_status_message() {
        assert!(execution_idle().evaluate(&message("status", json!({"execution_state": "idle"}))));
        assert!(!execution_idle().evaluate(&message("status", json!({"execution_state": "busy"}))));
        assert!(!execution_idle().evaluate(&message("stream", json!({"execution_state": "idle"}))));
        assert!(!execution_idle().evaluate(&message("status", json!({}))));
    }

    #[test]
    fn reply_type_follows_request_naming() {
        assert_eq!(reply_type_for("execute_request"), "execute_reply");
        assert_eq!(reply_type_for("kernel_info_request"), "kernel_info_reply");
        assert_eq!(reply_type_for("custom"), "custom_reply");
        assert!(reply_for(EXECUTE_REQUEST).evaluate(&message("execute_reply", json!({}))));
    }

    #[test]
    fn panicking_predicate_fails_closed() {
        let broken = Predicate::new("broken", |_| panic!("predicate bug"));
        let envelope = message("stream", json!({}));

        assert!(!broken.evaluate(&envelope));
        assert!(broken.clone().or(always()).evaluate(&envelope));
        assert_eq!(format!("{broken:?}"), "Predicate(\"broken\")");
    }
}
