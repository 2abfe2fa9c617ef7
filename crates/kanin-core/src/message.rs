use crate::channel::ChannelId;

/// A message handed to a consumer's handler. Immutable once built; the
/// pending-ack table keeps its own copy of the body until settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub queue: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// A decoded `basic.deliver` as handed over by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFrame {
    pub channel_id: ChannelId,
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
}

/// A message held by a logical queue, waiting to be offered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub body: Vec<u8>,
    pub redelivered: bool,
}

impl QueuedMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            redelivered: false,
        }
    }

    /// Mark the message as a retry. The flag is sticky.
    pub fn mark_redelivered(&mut self) {
        self.redelivered = true;
    }
}
