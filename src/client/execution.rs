//! Per-request execution state and reply status decoding.

use crate::errors::ExecutionFailure;
use crate::message::Envelope;
use serde_json::Value;
use std::fmt;

/// Lifecycle of one execute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Sent,
    AwaitingReply,
    ReplyOk,
    ReplyError,
    ReplyAbort,
    AwaitingResult,
    Resolved,
    Failed,
}

impl ExecutionState {
    /// `AwaitingReply -> Resolved` covers a result published before the
    /// reply lands on the other channel.
    pub fn can_advance_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Sent, AwaitingReply)
                | (AwaitingReply, ReplyOk | ReplyError | ReplyAbort | Resolved)
                | (ReplyOk, AwaitingResult | Resolved)
                | (AwaitingResult, Resolved)
                | (ReplyError | ReplyAbort, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sent => "sent",
            Self::AwaitingReply => "awaiting_reply",
            Self::ReplyOk => "reply_ok",
            Self::ReplyError => "reply_error",
            Self::ReplyAbort => "reply_abort",
            Self::AwaitingResult => "awaiting_result",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs the state of one request.
#[derive(Debug)]
pub(crate) struct Execution {
    msg_id: String,
    state: ExecutionState,
}

impl Execution {
    pub(crate) fn new(msg_id: &str) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            state: ExecutionState::Sent,
        }
    }

    pub(crate) fn state(&self) -> ExecutionState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: ExecutionState) {
        if !self.state.can_advance_to(next) {
            tracing::warn!(msg_id = %self.msg_id, from = %self.state, to = %next, "unexpected execution transition");
        }
        tracing::debug!(msg_id = %self.msg_id, from = %self.state, to = %next, "execution state");
        self.state = next;
    }

    /// Move through the reply state decided by `status` and, for failures,
    /// on to `Failed`.
    pub(crate) fn observe_reply(&mut self, status: &ReplyStatus) {
        match status {
            ReplyStatus::Ok => self.advance(ExecutionState::ReplyOk),
            ReplyStatus::Failed(failure) => {
                self.advance(if failure.is_abort() {
                    ExecutionState::ReplyAbort
                } else {
                    ExecutionState::ReplyError
                });
                self.advance(ExecutionState::Failed);
            }
        }
    }
}

/// Outcome carried by an `execute_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Failed(ExecutionFailure),
}

impl ReplyStatus {
    /// Decode the reply's `status`. Anything unreadable counts as an abort so
    /// a malformed reply never leaves the caller waiting.
    pub fn read(reply: &Envelope) -> Self {
        match reply.content_str("status") {
            Some("ok") => Self::Ok,
            Some("error") => Self::Failed(read_error(reply).unwrap_or(ExecutionFailure::Abort)),
            Some("abort" | "aborted") => Self::Failed(ExecutionFailure::Abort),
            other => {
                tracing::warn!(
                    msg_id = reply.msg_id(),
                    status = ?other,
                    "unreadable execute reply status; treating as abort"
                );
                Self::Failed(ExecutionFailure::Abort)
            }
        }
    }

    pub fn into_result(self) -> Result<(), ExecutionFailure> {
        match self {
            Self::Ok => Ok(()),
            Self::Failed(failure) => Err(failure),
        }
    }
}

fn read_error(reply: &Envelope) -> Option<ExecutionFailure> {
    let name = reply.content_str("ename")?.to_string();
    let value = reply.content_str("evalue")?.to_string();
    let traceback = match reply.content().get("traceback") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| line.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        Some(_) => return None,
    };
    Some(ExecutionFailure::Error {
        name,
        value,
        traceback,
    })
}
