use crate::channel::ChannelId;
use crate::error::TransportError;

/// A settlement the transport must encode and send to the broker
/// (`basic.ack`, `basic.nack`, `basic.reject`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolIntent {
    Ack {
        channel_id: ChannelId,
        delivery_tag: u64,
        multiple: bool,
    },
    Nack {
        channel_id: ChannelId,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },
    Reject {
        channel_id: ChannelId,
        delivery_tag: u64,
        requeue: bool,
    },
}

impl ProtocolIntent {
    pub fn channel_id(&self) -> ChannelId {
        match *self {
            ProtocolIntent::Ack { channel_id, .. }
            | ProtocolIntent::Nack { channel_id, .. }
            | ProtocolIntent::Reject { channel_id, .. } => channel_id,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        match *self {
            ProtocolIntent::Ack { delivery_tag, .. }
            | ProtocolIntent::Nack { delivery_tag, .. }
            | ProtocolIntent::Reject { delivery_tag, .. } => delivery_tag,
        }
    }
}

/// Outbound half of the transport collaborator. Intents arrive one at a
/// time in the order the pending table changed, so implementations should
/// hand the intent off rather than block. Settling on the same channel from
/// inside `emit` deadlocks.
pub trait FrameSender: Send + Sync {
    fn emit(&self, intent: ProtocolIntent) -> Result<(), TransportError>;
}

impl FrameSender for crossbeam_channel::Sender<ProtocolIntent> {
    fn emit(&self, intent: ProtocolIntent) -> Result<(), TransportError> {
        self.send(intent).map_err(|_| TransportError::Disconnected)
    }
}
