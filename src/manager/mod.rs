//! Host integration surface: one manager per kernel, results as JSON values
//! the host serializes verbatim.

pub mod registry;

pub use registry::ManagerRegistry;

use crate::client::{ClientError, KernelClient};
use crate::errors::{ExecutionFailure, StreamIntegrityError};
use crate::message::literal::{parse_str_literal, parse_str_tuple};
use crate::message::{predicates, Envelope};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

const INSTALL_CODE: &str = "from IPython.core.getipython import get_ipython\n\
                            from burdock.lab.agent import BurdockAgent\n\
                            BurdockAgent(get_ipython())\n";
const PING_CODE: &str = "'po' + 'ng'";
const STREAMED_PING_CODE: &str = "_ = [print(i) for i in [1,2,3]]";
const STREAMED_PING_LINES: [&str; 3] = ["1", "2", "3"];
const DATA_FRAME_VARIABLES_CODE: &str = "__burdock__.data_frame_variables";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Burdock instance for id {kernel_id} not found.")]
    NotFound { kernel_id: String },
    #[error("Burdock instance for id {kernel_id} already exists.")]
    AlreadyExists { kernel_id: String },
    #[error("Kernel id {kernel_id} is not a valid kernel id.")]
    InvalidKernelId { kernel_id: String },
    #[error("`{name}` is not a valid variable name.")]
    InvalidVariable { name: String },
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
    #[error(transparent)]
    StreamIntegrity(#[from] StreamIntegrityError),
    #[error("output stream overflowed and dropped {dropped} messages")]
    StreamOverflow { dropped: usize },
    #[error("unexpected kernel result: {0}")]
    UnexpectedResult(String),
    #[error("kernel did not answer within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Client(ClientError),
}

impl From<ClientError> for ManagerError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Execution(failure) => Self::Execution(failure),
            other => Self::Client(other),
        }
    }
}

impl ManagerError {
    /// HTTP status a host should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::InvalidKernelId { .. } | Self::InvalidVariable { .. } => 400,
            Self::Timeout(_) => 504,
            Self::Execution(_)
            | Self::StreamIntegrity(_)
            | Self::StreamOverflow { .. }
            | Self::UnexpectedResult(_)
            | Self::Client(_) => 500,
        }
    }
}

/// Paths written by the agent's data frame analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaikonInputs {
    pub decls_path: String,
    pub dtrace_path: String,
}

/// Tracks one kernel and whether the agent has been installed into it.
pub struct BurdockManager {
    client: KernelClient,
    installed: AtomicBool,
    request_timeout: Option<Duration>,
}

impl BurdockManager {
    pub fn new(client: KernelClient) -> Self {
        Self {
            client,
            installed: AtomicBool::new(false),
            request_timeout: None,
        }
    }

    /// Bound every operation; on expiry the operation's waiters are dropped
    /// and unregister themselves.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn client(&self) -> &KernelClient {
        &self.client
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Bootstrap the agent in the kernel.
    pub async fn install(&self) -> Result<Value, ManagerError> {
        let response = self.execute(INSTALL_CODE).await?;
        self.installed.store(true, Ordering::Release);
        tracing::info!(session = self.client.session().session_id(), "agent installed");
        Ok(response.to_value())
    }

    pub async fn ping(&self) -> Result<Value, ManagerError> {
        Ok(self.execute(PING_CODE).await?.to_value())
    }

    /// Print three lines and check they come back on the output stream, in
    /// order, before the kernel goes idle. Returns the collected lines.
    pub async fn streamed_ping(&self) -> Result<Value, ManagerError> {
        let outputs = self
            .within(async {
                let stream = self
                    .client
                    .execute_output(
                        self.client.request(STREAMED_PING_CODE),
                        predicates::stdout().or(predicates::stderr()),
                        Some(predicates::execution_idle()),
                    )
                    .await?;

                let mut outputs = Vec::new();
                while let Some(message) = stream.next().await.map_err(|error| {
                    ManagerError::UnexpectedResult(format!("output stream failed: {error}"))
                })? {
                    let text = message.content_str("text").unwrap_or_default();
                    outputs.extend(text.lines().map(str::to_string));
                    check_stream_overflow(stream.dropped())?;
                    check_streamed_ping_prefix(&outputs)?;
                }
                stream.join().await;
                check_stream_overflow(stream.dropped())?;
                Ok(outputs)
            })
            .await?;

        if outputs.len() < STREAMED_PING_LINES.len() {
            return Err(StreamIntegrityError {
                collected_outputs: outputs,
            }
            .into());
        }
        Ok(Value::from(outputs))
    }

    /// Run `code` and return the published result envelope.
    pub async fn execute_for_value(&self, code: &str) -> Result<Value, ManagerError> {
        Ok(self.execute(code).await?.to_value())
    }

    /// Text rendering of `code`'s result, decoded as a string literal when
    /// it is one.
    pub async fn evaluate_text(&self, code: &str) -> Result<String, ManagerError> {
        let result = self.execute(code).await?;
        let text = plain_text(&result)?;
        Ok(parse_str_literal(text).unwrap_or_else(|| text.to_string()))
    }

    pub async fn data_frame_variables(&self) -> Result<Value, ManagerError> {
        Ok(self.execute(DATA_FRAME_VARIABLES_CODE).await?.to_value())
    }

    pub async fn analyze_data_frame(&self, variable: &str) -> Result<DaikonInputs, ManagerError> {
        if !IDENTIFIER_RE.is_match(variable) {
            return Err(ManagerError::InvalidVariable {
                name: variable.to_string(),
            });
        }
        let result = self
            .execute(&format!("__burdock__.analyze(\"{variable}\")"))
            .await?;
        let text = plain_text(&result)?;
        match parse_str_tuple(text).as_deref() {
            Some([decls_path, dtrace_path]) => Ok(DaikonInputs {
                decls_path: decls_path.clone(),
                dtrace_path: dtrace_path.clone(),
            }),
            _ => Err(ManagerError::UnexpectedResult(format!(
                "expected a pair of paths, got {text}"
            ))),
        }
    }

    async fn execute(&self, code: &str) -> Result<Arc<Envelope>, ManagerError> {
        self.within(async {
            Ok(self
                .client
                .execute_retval(self.client.request(code))
                .await?)
        })
        .await
    }

    async fn within<T, F>(&self, operation: F) -> Result<T, ManagerError>
    where
        F: Future<Output = Result<T, ManagerError>>,
    {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| ManagerError::Timeout(limit))?,
            None => operation.await,
        }
    }
}

/// Gaps left by a full stream are reported as overflow, never as
/// misordered output.
fn check_stream_overflow(dropped: usize) -> Result<(), ManagerError> {
    if dropped > 0 {
        return Err(ManagerError::StreamOverflow { dropped });
    }
    Ok(())
}

fn check_streamed_ping_prefix(outputs: &[String]) -> Result<(), StreamIntegrityError> {
    let expected = STREAMED_PING_LINES.len();
    if outputs.len() >= expected && outputs[..expected] != STREAMED_PING_LINES {
        return Err(StreamIntegrityError {
            collected_outputs: outputs.to_vec(),
        });
    }
    Ok(())
}

fn plain_text(result: &Envelope) -> Result<&str, ManagerError> {
    result
        .plain_text()
        .ok_or_else(|| ManagerError::UnexpectedResult("result has no text/plain rendering".into()))
}
