use std::fmt::Debug;
use std::time::Duration;

use super::*;

pub(super) const WAIT: Duration = Duration::from_secs(5);

pub(super) fn test_setup() -> (Channel, Receiver<ProtocolIntent>) {
    test_setup_with(EngineConfig::default())
}

pub(super) fn test_setup_with(config: EngineConfig) -> (Channel, Receiver<ProtocolIntent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let channel = Channel::open(1, &config, Arc::new(tx));
    (channel, rx)
}

/// Helper: a handler that forwards every delivery to the returned receiver.
pub(super) fn forwarding_handler() -> (impl FnMut(Delivery) + Send + 'static, Receiver<Delivery>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let handler = move |d: Delivery| {
        let _ = tx.send(d);
    };
    (handler, rx)
}

/// Helper: subscribe with a forwarding handler.
pub(super) fn subscribe_forwarding(
    channel: &Channel,
    queue: &str,
    options: SubscribeOptions,
) -> (Consumer, Receiver<Delivery>) {
    let (handler, rx) = forwarding_handler();
    let consumer = channel.subscribe(queue, options, handler).unwrap();
    (consumer, rx)
}

/// Helper: a broker delivery for `consumer` on channel 1.
pub(super) fn frame(consumer: &Consumer, delivery_tag: u64) -> DeliveryFrame {
    DeliveryFrame {
        channel_id: 1,
        consumer_tag: consumer.tag().to_string(),
        delivery_tag,
        redelivered: false,
        body: format!("m{delivery_tag}").into_bytes(),
    }
}

pub(super) fn recv(rx: &Receiver<Delivery>) -> Delivery {
    rx.recv_timeout(WAIT).expect("timed out waiting for delivery")
}

pub(super) fn recv_n(rx: &Receiver<Delivery>, n: usize) -> Vec<Delivery> {
    (0..n).map(|_| recv(rx)).collect()
}

/// Assert nothing arrives within a short grace period.
pub(super) fn assert_quiet<T: Debug>(rx: &Receiver<T>) {
    if let Ok(item) = rx.recv_timeout(Duration::from_millis(100)) {
        panic!("expected nothing, got {item:?}");
    }
}

pub(super) fn drain_events(channel: &Channel) -> Vec<ChannelEvent> {
    channel.events().try_iter().collect()
}
