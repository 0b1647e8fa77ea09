//! Channel adapters binding a correlation registry to one kernel channel.

pub mod pubsub;
pub mod request_reply;

pub use pubsub::PubSubChannel;
pub use request_reply::RequestReplyChannel;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kernel channels this client speaks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Request/reply channel.
    Shell,
    /// Publish/subscribe broadcast channel.
    #[serde(rename = "iopub")]
    IoPub,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Shell, ChannelKind::IoPub];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::IoPub => "iopub",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
