use crate::channels::ChannelKind;
use crate::message::Envelope;
use async_trait::async_trait;

/// Outbound half of a kernel connection.
///
/// Inbound traffic does not go through this trait: each transport hands out
/// an [`Inbound`](super::Inbound) pair of queues when it is created, and the
/// client drains those on one delivery task per channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name
    fn name(&self) -> &str;

    /// Write one envelope on `channel`
    async fn send(&self, channel: ChannelKind, envelope: &Envelope) -> anyhow::Result<()>;
}
