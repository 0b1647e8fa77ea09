//! Newline-delimited JSON transport.
//!
//! Each line is one frame: `{"channel": "shell" | "iopub", "message": {...}}`.
//! A reader task routes frames into the per-channel inbound queues until the
//! stream ends or the transport is dropped.

use super::{inbound_channels, Inbound, InboundSenders, Transport};
use crate::channels::ChannelKind;
use crate::message::Envelope;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    channel: ChannelKind,
    message: Value,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct JsonLinesTransport {
    writer: Mutex<BoxedWriter>,
    shutdown: CancellationToken,
}

impl JsonLinesTransport {
    pub fn spawn<R, W>(reader: R, writer: W, buffer: usize) -> (Arc<Self>, Inbound)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (senders, inbound) = inbound_channels(buffer);
        let shutdown = CancellationToken::new();
        tokio::spawn(read_frames(reader, senders, shutdown.clone()));

        let transport = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            shutdown,
        });
        (transport, inbound)
    }

    pub async fn connect_tcp(address: &str, buffer: usize) -> anyhow::Result<(Arc<Self>, Inbound)> {
        let stream = TcpStream::connect(address)
            .await
            .with_context(|| format!("failed to connect to kernel at {address}"))?;
        stream.set_nodelay(true).context("failed to set TCP_NODELAY")?;
        tracing::info!(address, "connected to kernel");
        let (reader, writer) = stream.into_split();
        Ok(Self::spawn(reader, writer, buffer))
    }
}

impl Drop for JsonLinesTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl Transport for JsonLinesTransport {
    fn name(&self) -> &str {
        "json-lines"
    }

    async fn send(&self, channel: ChannelKind, envelope: &Envelope) -> anyhow::Result<()> {
        let frame = Frame {
            channel,
            message: envelope.to_value(),
        };
        let mut line = serde_json::to_string(&frame).context("failed to encode frame")?;
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write frame")?;
        writer.flush().await.context("failed to flush frame")
    }
}

async fn read_frames<R>(reader: R, senders: InboundSenders, shutdown: CancellationToken)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("kernel connection closed");
                break;
            }
            Err(error) => {
                tracing::warn!(%error, "kernel connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let frame = match serde_json::from_str::<Frame>(&line) {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(%error, "dropping undecodable line");
                continue;
            }
        };
        if let Err(error) = senders.route(frame.channel, frame.message).await {
            tracing::debug!(%error, "inbound queue closed; stopping reader");
            break;
        }
    }
}
