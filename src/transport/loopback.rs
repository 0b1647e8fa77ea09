//! In-memory transport. The far end stands in for a kernel: it reads what
//! the client sent and pushes raw frames back into the client's inbound
//! queues.

use super::{inbound_channels, Inbound, InboundSenders, Transport};
use crate::channels::ChannelKind;
use crate::message::Envelope;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    outbound: mpsc::Sender<(ChannelKind, Envelope)>,
}

/// Kernel side of a [`loopback`] pair.
#[derive(Debug)]
pub struct KernelEnd {
    requests: mpsc::Receiver<(ChannelKind, Envelope)>,
    inbound: InboundSenders,
}

pub fn loopback(buffer: usize) -> (LoopbackTransport, Inbound, KernelEnd) {
    let (outbound, requests) = mpsc::channel(buffer.max(1));
    let (senders, inbound) = inbound_channels(buffer);
    (
        LoopbackTransport { outbound },
        inbound,
        KernelEnd {
            requests,
            inbound: senders,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &str {
        "loopback"
    }

    async fn send(&self, channel: ChannelKind, envelope: &Envelope) -> anyhow::Result<()> {
        self.outbound
            .send((channel, envelope.clone()))
            .await
            .context("loopback kernel end is gone")
    }
}

impl KernelEnd {
    /// Next envelope the client sent, or `None` once every transport
    /// handle is dropped.
    pub async fn next_request(&mut self) -> Option<(ChannelKind, Envelope)> {
        self.requests.recv().await
    }

    pub fn try_next_request(&mut self) -> Option<(ChannelKind, Envelope)> {
        self.requests.try_recv().ok()
    }

    pub async fn deliver(&self, channel: ChannelKind, envelope: &Envelope) -> anyhow::Result<()> {
        self.deliver_raw(channel, envelope.to_value()).await
    }

    pub async fn deliver_raw(&self, channel: ChannelKind, frame: Value) -> anyhow::Result<()> {
        self.inbound.route(channel, frame).await
    }

    /// A cloneable handle for delivering from several tasks.
    pub fn senders(&self) -> InboundSenders {
        self.inbound.clone()
    }
}
