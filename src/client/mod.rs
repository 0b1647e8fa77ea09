//! Execution orchestrator: request/reply/result correlation for one kernel.

pub mod execution;
pub mod request;

pub use execution::{ExecutionState, ReplyStatus};
pub use request::{ExecuteRequest, RequestError};

use crate::channels::{ChannelKind, PubSubChannel, RequestReplyChannel};
use crate::config::{Config, ExecuteConfig};
use crate::correlation::{Registry, RegistryError, StreamSubscription};
use crate::errors::ExecutionFailure;
use crate::message::predicates::{self, EXECUTE_REQUEST};
use crate::message::{Envelope, Predicate, Session};
use crate::transport::{spawn_delivery, Inbound, Transport};
use execution::Execution;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Waiter(#[from] RegistryError),
    #[error("transport failure")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    fn transport(error: anyhow::Error) -> Self {
        Self::Transport(error.into())
    }
}

/// Client bound to one kernel session: a shell adapter, an iopub adapter and
/// the delivery task feeding each registry.
pub struct KernelClient {
    shell: RequestReplyChannel,
    iopub: PubSubChannel,
    defaults: ExecuteConfig,
    delivery: Vec<JoinHandle<()>>,
}

impl KernelClient {
    /// Must be called inside a tokio runtime; spawns one delivery task per
    /// channel.
    pub fn start(transport: Arc<dyn Transport>, inbound: Inbound, session: Session) -> Self {
        Self::start_with(transport, inbound, session, ExecuteConfig::default(), None)
    }

    pub fn from_config(transport: Arc<dyn Transport>, inbound: Inbound, config: &Config) -> Self {
        Self::start_with(
            transport,
            inbound,
            Session::from_config(&config.session),
            config.execute.clone(),
            config.streams.stream_capacity(),
        )
    }

    pub fn start_with(
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        session: Session,
        defaults: ExecuteConfig,
        stream_capacity: Option<usize>,
    ) -> Self {
        let shell_registry = Registry::with_stream_capacity(ChannelKind::Shell, stream_capacity);
        let iopub_registry = Registry::with_stream_capacity(ChannelKind::IoPub, stream_capacity);

        let delivery = vec![
            spawn_delivery(ChannelKind::Shell, Arc::clone(&shell_registry), inbound.shell),
            spawn_delivery(ChannelKind::IoPub, Arc::clone(&iopub_registry), inbound.iopub),
        ];
        tracing::debug!(
            transport = transport.name(),
            session = session.session_id(),
            "kernel client started"
        );

        Self {
            shell: RequestReplyChannel::new(ChannelKind::Shell, shell_registry, transport, Arc::new(session)),
            iopub: PubSubChannel::new(ChannelKind::IoPub, iopub_registry),
            defaults,
            delivery,
        }
    }

    pub fn shell(&self) -> &RequestReplyChannel {
        &self.shell
    }

    pub fn iopub(&self) -> &PubSubChannel {
        &self.iopub
    }

    pub fn session(&self) -> &Session {
        self.shell.session()
    }

    /// An execute request carrying this client's configured defaults.
    pub fn request(&self, code: impl Into<String>) -> ExecuteRequest {
        ExecuteRequest::with_defaults(code, &self.defaults)
    }

    /// Single-result execution.
    ///
    /// Resolves with the `execute_result` for the request, or with the
    /// failure carried by an `error`/`abort` reply, whichever decides the
    /// outcome first.
    pub async fn execute_retval(&self, request: ExecuteRequest) -> Result<Arc<Envelope>, ClientError> {
        let (envelope, mut reply) = self.shell.prepare_request(EXECUTE_REQUEST, request.to_content());
        let mut result = self.iopub.await_result(envelope.msg_id());
        let mut execution = Execution::new(envelope.msg_id());

        self.shell.send(&envelope).await.map_err(ClientError::transport)?;
        execution.advance(ExecutionState::AwaitingReply);

        let reply = tokio::select! {
            biased;
            reply = &mut reply => reply?,
            result = &mut result => {
                let result = result?;
                execution.advance(ExecutionState::Resolved);
                return Ok(result);
            }
        };

        let status = ReplyStatus::read(&reply);
        execution.observe_reply(&status);
        // A failed request drops `result` here, which unregisters it.
        status.into_result()?;

        execution.advance(ExecutionState::AwaitingResult);
        let result = result.await?;
        execution.advance(ExecutionState::Resolved);
        Ok(result)
    }

    /// Reply-then-result execution: fail fast on an `error`/`abort` reply,
    /// then wait for the published result.
    pub async fn execute_interactive(&self, request: ExecuteRequest) -> Result<Arc<Envelope>, ClientError> {
        let (envelope, reply) = self.shell.prepare_request(EXECUTE_REQUEST, request.to_content());
        let result = self.iopub.await_result(envelope.msg_id());
        let mut execution = Execution::new(envelope.msg_id());

        self.shell.send(&envelope).await.map_err(ClientError::transport)?;
        execution.advance(ExecutionState::AwaitingReply);

        let reply = reply.await?;
        let status = ReplyStatus::read(&reply);
        execution.observe_reply(&status);
        status.into_result()?;

        execution.advance(ExecutionState::AwaitingResult);
        let result = result.await?;
        execution.advance(ExecutionState::Resolved);
        Ok(result)
    }

    /// Streamed execution. Published messages matching `filter` are queued
    /// until one matches `close`, which defaults to the kernel going idle.
    /// The reply is not awaited. Dropping the returned subscription before
    /// it closes unregisters it.
    pub async fn execute_output(
        &self,
        request: ExecuteRequest,
        filter: Predicate,
        close: Option<Predicate>,
    ) -> Result<StreamSubscription, ClientError> {
        let (envelope, _reply) = self.shell.prepare_request(EXECUTE_REQUEST, request.to_content());
        let close = close.unwrap_or_else(predicates::execution_idle);
        let subscription = self.iopub.subscribe_stream(envelope.msg_id(), filter, close);

        self.shell.send(&envelope).await.map_err(ClientError::transport)?;
        tracing::debug!(msg_id = envelope.msg_id(), "streaming execution output");
        Ok(subscription)
    }

    /// Execute for side effects: wait for a successful reply and for the
    /// kernel to report the request idle.
    pub async fn run(&self, request: ExecuteRequest) -> Result<Arc<Envelope>, ClientError> {
        let (envelope, reply) = self.shell.prepare_request(EXECUTE_REQUEST, request.to_content());
        let idle = self.iopub.await_idle(envelope.msg_id());
        let mut execution = Execution::new(envelope.msg_id());

        self.shell.send(&envelope).await.map_err(ClientError::transport)?;
        execution.advance(ExecutionState::AwaitingReply);

        let reply = reply.await?;
        let status = ReplyStatus::read(&reply);
        execution.observe_reply(&status);
        status.into_result()?;

        idle.await?;
        execution.advance(ExecutionState::Resolved);
        Ok(reply)
    }
}

impl Drop for KernelClient {
    fn drop(&mut self) {
        for handle in &self.delivery {
            handle.abort();
        }
    }
}
