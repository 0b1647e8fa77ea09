use crate::channels::ChannelKind;
use crate::correlation::Registry;
use crate::message::Envelope;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Spawn the single delivery path for one channel.
///
/// Frames are parsed and dispatched strictly in arrival order, one at a
/// time. Malformed frames are logged and skipped. The task ends when every
/// sender for `inbound` is gone.
pub fn spawn_delivery(
    channel: ChannelKind,
    registry: Arc<Registry>,
    mut inbound: mpsc::Receiver<Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut delivered = 0u64;
        while let Some(frame) = inbound.recv().await {
            match Envelope::from_value(frame) {
                Ok(envelope) => {
                    registry.dispatch(&Arc::new(envelope));
                    delivered += 1;
                }
                Err(error) => {
                    tracing::warn!(%channel, %error, "dropping malformed frame");
                }
            }
        }
        tracing::debug!(%channel, delivered, "delivery path closed");
    })
}
