//! Transports carrying envelopes between the client and a kernel.

pub mod delivery;
pub mod json_lines;
pub mod loopback;
pub mod traits;

pub use delivery::spawn_delivery;
pub use json_lines::JsonLinesTransport;
pub use loopback::{loopback, KernelEnd, LoopbackTransport};
pub use traits::Transport;

use crate::channels::ChannelKind;
use anyhow::Context;
use serde_json::Value;
use tokio::sync::mpsc;

/// Raw inbound frames, one ordered queue per channel.
#[derive(Debug)]
pub struct Inbound {
    pub shell: mpsc::Receiver<Value>,
    pub iopub: mpsc::Receiver<Value>,
}

/// Producer side of [`Inbound`], held by whatever reads from the kernel.
#[derive(Debug, Clone)]
pub struct InboundSenders {
    shell: mpsc::Sender<Value>,
    iopub: mpsc::Sender<Value>,
}

impl InboundSenders {
    pub fn sender(&self, channel: ChannelKind) -> &mpsc::Sender<Value> {
        match channel {
            ChannelKind::Shell => &self.shell,
            ChannelKind::IoPub => &self.iopub,
        }
    }

    /// Queue one raw frame for `channel`'s delivery path.
    pub async fn route(&self, channel: ChannelKind, frame: Value) -> anyhow::Result<()> {
        self.sender(channel)
            .send(frame)
            .await
            .with_context(|| format!("{channel} delivery path is closed"))
    }
}

pub fn inbound_channels(buffer: usize) -> (InboundSenders, Inbound) {
    let buffer = buffer.max(1);
    let (shell_tx, shell_rx) = mpsc::channel(buffer);
    let (iopub_tx, iopub_rx) = mpsc::channel(buffer);
    (
        InboundSenders {
            shell: shell_tx,
            iopub: iopub_tx,
        },
        Inbound {
            shell: shell_rx,
            iopub: iopub_rx,
        },
    )
}
