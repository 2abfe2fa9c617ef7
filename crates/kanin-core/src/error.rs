use crate::channel::{ChannelId, DeliverySource};

/// Errors returned by `Channel::subscribe`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("consumer tag already active on channel: {0}")]
    DuplicateConsumerTag(String),

    #[error("exclusive consume conflict on queue {queue}")]
    ExclusiveConsumeConflict { queue: String },

    #[error("automatic and manual ack modes are mutually exclusive")]
    ConflictingAckModes,

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),

    #[error("failed to spawn consumer worker: {0}")]
    WorkerSpawn(String),
}

/// Errors returned by ack, nack and reject.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SettleError {
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(u64),

    #[error("delivery tag {0} belongs to an automatic-ack consumer")]
    AckModeMismatch(u64),

    #[error("delivery tag {tag} was never issued (last issued: {last})")]
    PreconditionFailed { tag: u64, last: u64 },

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),
}

/// Errors returned by `Channel::on_delivery_frame` and `Channel::publish`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no consumer with tag {0}")]
    UnknownConsumer(String),

    #[error("frame for channel {frame} delivered to channel {channel}")]
    WrongChannel { frame: ChannelId, channel: ChannelId },

    #[error("delivery tag {tag} is not greater than last tag {last}")]
    TagNotIncreasing { tag: u64, last: u64 },

    #[error("channel {channel} is already fed by {fed_by:?} deliveries")]
    MixedDeliverySource {
        channel: ChannelId,
        fed_by: DeliverySource,
    },

    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),
}

/// Raised by the router when a queue has no consumer to offer messages to.
/// The channel turns this into a `ChannelEvent::RedeliveryPending`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RedeliveryError {
    #[error("no active consumer on queue {0}")]
    NoActiveConsumer(String),
}

/// Errors from the outbound transport collaborator.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
