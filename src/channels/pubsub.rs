use super::ChannelKind;
use crate::correlation::{Latch, Promise, Registry, StreamSubscription};
use crate::message::{predicates, Predicate};
use std::sync::Arc;

/// Publish/subscribe adapter. Nothing is ever sent on this channel; it only
/// hands out waiters on messages the kernel publishes for a request.
#[derive(Debug, Clone)]
pub struct PubSubChannel {
    kind: ChannelKind,
    registry: Arc<Registry>,
}

impl PubSubChannel {
    pub fn new(kind: ChannelKind, registry: Arc<Registry>) -> Self {
        Self { kind, registry }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Waiter for the `execute_result` published on behalf of `causation_id`.
    pub fn await_result(&self, causation_id: &str) -> Promise {
        self.await_message(causation_id, predicates::msg_type(predicates::EXECUTE_RESULT))
    }

    pub fn await_message(&self, causation_id: &str, predicate: Predicate) -> Promise {
        self.registry.register_promise(causation_id, predicate)
    }

    /// Latch set when the kernel reports the request's execution idle.
    pub fn await_idle(&self, causation_id: &str) -> Latch {
        self.registry
            .register_latch(causation_id, predicates::execution_idle())
    }

    /// Stream of published messages matching `match_predicate`, closed by
    /// the first one matching `close_predicate`. Dropping the subscription
    /// early unregisters it.
    pub fn subscribe_stream(
        &self,
        causation_id: &str,
        match_predicate: Predicate,
        close_predicate: Predicate,
    ) -> StreamSubscription {
        self.registry
            .register_stream(causation_id, match_predicate, close_predicate)
    }
}
