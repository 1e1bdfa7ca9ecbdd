//! Zero-capacity handoff channel between stages.
//!
//! `Outbox::emit` completes only after the receiving stage has taken the
//! item, so a slow consumer stalls every producer feeding it. Internally each
//! item travels with a oneshot acknowledgement the receiver fires on pickup.
//!
//! The channel closes when the last `Outbox` clone is dropped. Stages never
//! hold the original: the orchestrator's driver does, and drops it once the
//! stage has returned.

use tokio::sync::{mpsc, oneshot};

use crate::error::PipelineError;
use crate::pipeline::types::Item;

/// An item in transit plus the acknowledgement its sender is waiting on.
struct Handoff {
    item: Item,
    taken: oneshot::Sender<()>,
}

/// Create a connected `(Outbox, Inbox)` pair.
pub fn handoff() -> (Outbox, Inbox) {
    // One slot for the item being handed over; senders still wait for the ack.
    let (tx, rx) = mpsc::channel(1);
    (Outbox { tx }, Inbox { rx })
}

/// Sending half. Cheap to clone for fan-out children.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Handoff>,
}

impl Outbox {
    /// Hand `item` to the downstream stage and wait until it has been taken.
    ///
    /// Fails with [`PipelineError::ChannelClosed`] if the receiver is gone.
    pub async fn emit(&self, item: impl Into<Item>) -> Result<(), PipelineError> {
        let (taken, ack) = oneshot::channel();
        self.tx
            .send(Handoff {
                item: item.into(),
                taken,
            })
            .await
            .map_err(|_| PipelineError::ChannelClosed)?;
        ack.await.map_err(|_| PipelineError::ChannelClosed)
    }
}

/// Receiving half. Single consumer.
pub struct Inbox {
    rx: mpsc::Receiver<Handoff>,
}

impl Inbox {
    /// Take the next item, or `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<Item> {
        let Handoff { item, taken } = self.rx.recv().await?;
        // The sender may have given up (e.g. its task was aborted); the item is still ours.
        let _ = taken.send(());
        Some(item)
    }

    /// Drain everything until the channel closes.
    pub async fn collect(mut self) -> Vec<Item> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}
