use super::envelope::{Envelope, Header};
use crate::config::SessionConfig;
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_PROTOCOL_VERSION: &str = "5.3";

/// Identity stamped on every message this side of the bridge creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    username: String,
    session_id: String,
    protocol_version: String,
}

impl Session {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_id: Uuid::new_v4().to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.username.clone()).with_protocol_version(config.protocol_version.clone())
    }

    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Fresh header with a newly generated message id.
    pub fn header(&self, msg_type: &str) -> Header {
        Header {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.to_string(),
            username: self.username.clone(),
            session: self.session_id.clone(),
            date: Utc::now(),
            version: self.protocol_version.clone(),
        }
    }

    /// A new message that is not in reply to anything.
    pub fn message(&self, msg_type: &str, content: Map<String, Value>) -> Envelope {
        Envelope::new(self.header(msg_type), None, Map::new(), content, Vec::new())
    }

    /// A message sent on behalf of `parent`; its causation id is the
    /// parent's message id.
    pub fn reply(&self, parent: &Envelope, msg_type: &str, content: Map<String, Value>) -> Envelope {
        Envelope::new(
            self.header(msg_type),
            Some(parent.header().clone()),
            Map::new(),
            content,
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_message_gets_a_fresh_id() {
        let session = Session::new("burdock");
        let first = session.message("kernel_info_request", Map::new());
        let second = session.message("kernel_info_request", Map::new());

        assert_ne!(first.msg_id(), second.msg_id());
        assert_eq!(first.header().session, session.session_id());
        assert_eq!(first.header().version, DEFAULT_PROTOCOL_VERSION);
        assert_eq!(first.causation_id(), None);
    }

    #[test]
    fn reply_carries_parent_as_causation() {
        let client = Session::new("burdock");
        let kernel = Session::new("kernel").with_protocol_version("5.4");

        let request = client.message("execute_request", Map::new());
        let content = json!({"status": "ok"}).as_object().cloned().unwrap();
        let reply = kernel.reply(&request, "execute_reply", content);

        assert_eq!(reply.causation_id(), Some(request.msg_id()));
        assert_eq!(reply.parent_header(), Some(request.header()));
        assert_eq!(reply.header().username, "kernel");
        assert_eq!(reply.header().version, "5.4");
    }
}
