pub mod channel;
pub mod error;
pub mod message;
pub mod telemetry;

pub use channel::config::{ChannelConfig, DispatcherConfig, EngineConfig, RedeliveryMode};
pub use channel::events::{AbandonedDelivery, ChannelEvent};
pub use channel::options::{
    AckMode, AckOptions, NackOptions, RejectOptions, SubscribeOption, SubscribeOptions,
};
pub use channel::outbound::{FrameSender, ProtocolIntent};
pub use channel::{Channel, ChannelId, Consumer, DeliverySource, Settlement};
pub use error::{
    ConfigError, DispatchError, RedeliveryError, SettleError, SubscribeError, TransportError,
};
pub use message::{Delivery, DeliveryFrame};
