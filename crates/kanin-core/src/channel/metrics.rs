use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

use crate::channel::ChannelId;

/// OTel instruments for delivery settlement. Counters are labelled by queue,
/// the pending gauge by channel.
pub struct Metrics {
    pub deliveries_dispatched: Counter<u64>,
    pub deliveries_acked: Counter<u64>,
    pub deliveries_nacked: Counter<u64>,
    pub deliveries_rejected: Counter<u64>,
    pub deliveries_requeued: Counter<u64>,
    pub deliveries_abandoned: Counter<u64>,
    pub acks_pending: Gauge<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. Without a configured
    /// provider the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("kanin");
        Self::from_meter(&meter)
    }

    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            deliveries_dispatched: meter
                .u64_counter("kanin.deliveries.dispatched")
                .with_description("Deliveries handed to consumer handlers")
                .build(),
            deliveries_acked: meter
                .u64_counter("kanin.deliveries.acked")
                .with_description("Deliveries acknowledged by the application")
                .build(),
            deliveries_nacked: meter
                .u64_counter("kanin.deliveries.nacked")
                .with_description("Deliveries negatively acknowledged")
                .build(),
            deliveries_rejected: meter
                .u64_counter("kanin.deliveries.rejected")
                .with_description("Deliveries rejected")
                .build(),
            deliveries_requeued: meter
                .u64_counter("kanin.deliveries.requeued")
                .with_description("Nacked or rejected deliveries returned to their queue")
                .build(),
            deliveries_abandoned: meter
                .u64_counter("kanin.deliveries.abandoned")
                .with_description("Unsettled deliveries force-settled on channel close")
                .build(),
            acks_pending: meter
                .u64_gauge("kanin.acks.pending")
                .with_description("Deliveries awaiting acknowledgment on a channel")
                .build(),
        }
    }

    fn queue_attr(queue: &str) -> [KeyValue; 1] {
        [KeyValue::new("queue", queue.to_string())]
    }

    pub fn record_dispatch(&self, queue: &str) {
        self.deliveries_dispatched.add(1, &Self::queue_attr(queue));
    }

    pub fn record_ack(&self, queue: &str, count: u64) {
        self.deliveries_acked.add(count, &Self::queue_attr(queue));
    }

    pub fn record_nack(&self, queue: &str, count: u64) {
        self.deliveries_nacked.add(count, &Self::queue_attr(queue));
    }

    pub fn record_reject(&self, queue: &str, count: u64) {
        self.deliveries_rejected.add(count, &Self::queue_attr(queue));
    }

    pub fn record_requeue(&self, queue: &str, count: u64) {
        self.deliveries_requeued.add(count, &Self::queue_attr(queue));
    }

    pub fn record_abandoned(&self, queue: &str, count: u64) {
        self.deliveries_abandoned.add(count, &Self::queue_attr(queue));
    }

    pub fn set_pending(&self, channel_id: ChannelId, count: u64) {
        self.acks_pending.record(
            count,
            &[KeyValue::new("channel_id", i64::from(channel_id))],
        );
    }
}
