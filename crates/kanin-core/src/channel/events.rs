use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

use crate::channel::pending::DeliveryState;
use crate::channel::ChannelId;

/// A manual-ack delivery that was never settled before its channel closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedDelivery {
    pub channel_id: ChannelId,
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub queue: String,
}

/// Things that happen on a channel that are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One ack/nack/reject call settled these tags (ascending).
    Settled {
        channel_id: ChannelId,
        delivery_tags: Vec<u64>,
        state: DeliveryState,
    },
    Abandoned(AbandonedDelivery),
    /// Requeued messages are held because the queue has no consumer.
    RedeliveryPending {
        channel_id: ChannelId,
        queue: String,
        held: usize,
    },
    /// The broker delivered to a consumer tag that is not registered.
    DeliveryDropped {
        channel_id: ChannelId,
        consumer_tag: String,
        delivery_tag: u64,
    },
}

/// Bounded event queue. Publishing never blocks: when nobody drains the
/// queue, new events are dropped with a warning. Capacity 0 disables events.
pub(crate) struct EventSink {
    tx: Sender<ChannelEvent>,
    rx: Receiver<ChannelEvent>,
    enabled: bool,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            tx,
            rx,
            enabled: capacity > 0,
        }
    }

    pub(crate) fn publish(&self, event: ChannelEvent) {
        if !self.enabled {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(?event, "channel event queue full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub(crate) fn receiver(&self) -> Receiver<ChannelEvent> {
        self.rx.clone()
    }
}
