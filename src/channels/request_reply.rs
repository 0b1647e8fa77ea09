use super::ChannelKind;
use crate::correlation::{Promise, Registry};
use crate::message::{predicates, Envelope, Session};
use crate::transport::Transport;
use anyhow::Context;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Request/reply adapter: every outgoing request gets a reply waiter keyed
/// on its own id before it can reach the wire.
pub struct RequestReplyChannel {
    kind: ChannelKind,
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
}

impl RequestReplyChannel {
    pub fn new(
        kind: ChannelKind,
        registry: Arc<Registry>,
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            kind,
            registry,
            transport,
            session,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Build a request and register its reply waiter without sending it.
    ///
    /// Callers register any further waiters keyed on the request id, then
    /// [`send`](Self::send). Nothing can be dispatched for the id before
    /// the send, so no reply can outrun its waiter.
    pub fn prepare_request(&self, msg_type: &str, content: Map<String, Value>) -> (Envelope, Promise) {
        let request = self.session.message(msg_type, content);
        let reply = self
            .registry
            .register_promise(request.msg_id(), predicates::reply_for(msg_type));
        (request, reply)
    }

    pub async fn send(&self, request: &Envelope) -> anyhow::Result<()> {
        tracing::debug!(
            channel = %self.kind,
            msg_id = request.msg_id(),
            msg_type = request.msg_type(),
            transport = self.transport.name(),
            "sending request"
        );
        self.transport
            .send(self.kind, request)
            .await
            .with_context(|| format!("failed to send {} on {}", request.msg_type(), self.kind))
    }
}
