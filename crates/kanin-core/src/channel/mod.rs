pub mod ack;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod metrics;
pub mod options;
pub mod outbound;
pub mod pending;
pub mod registry;
pub mod router;
pub mod tag;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DispatchError, RedeliveryError, SettleError, SubscribeError};
use crate::message::{Delivery, DeliveryFrame, QueuedMessage};

use self::ack::{AckOutcome, AcknowledgmentEngine};
use self::config::{ChannelConfig, DispatcherConfig, EngineConfig, RedeliveryMode};
use self::dispatch::{join_workers, ConsumerWorker, DeliveryDispatcher};
use self::events::{AbandonedDelivery, ChannelEvent, EventSink};
use self::metrics::Metrics;
use self::options::{AckMode, AckOptions, NackOptions, RejectOptions, SubscribeOptions};
use self::outbound::{FrameSender, ProtocolIntent};
use self::pending::{PendingAckEntry, PendingAckTable};
use self::registry::{ConsumerEntry, ConsumerRegistry};
use self::router::RedeliveryRouter;
use self::tag::DeliveryTagAllocator;

/// AMQP channel number.
pub type ChannelId = u16;

/// Where a channel's deliveries come from. Fixed by the first delivery after
/// the channel opens, since broker tags and locally allocated tags cannot
/// share one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    /// `basic.deliver` frames handed to [`Channel::on_delivery_frame`].
    Broker,
    /// Messages handed to [`Channel::publish`].
    Loopback,
}

/// Everything mutable about a channel. Guarded by one mutex; the lock is held
/// for table updates and non-blocking queue sends only.
struct ChannelState {
    open: bool,
    source: Option<DeliverySource>,
    tags: DeliveryTagAllocator,
    consumers: ConsumerRegistry,
    pending: PendingAckTable,
    acks: AcknowledgmentEngine,
    router: RedeliveryRouter,
    dispatcher: DeliveryDispatcher,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            open: true,
            source: None,
            tags: DeliveryTagAllocator::new(),
            consumers: ConsumerRegistry::new(),
            pending: PendingAckTable::new(),
            acks: AcknowledgmentEngine::new(),
            router: RedeliveryRouter::new(),
            dispatcher: DeliveryDispatcher::new(),
        }
    }

    fn accept_source(
        &mut self,
        channel: ChannelId,
        source: DeliverySource,
    ) -> Result<(), DispatchError> {
        match self.source {
            Some(fed_by) if fed_by != source => {
                Err(DispatchError::MixedDeliverySource { channel, fed_by })
            }
            _ => {
                self.source = Some(source);
                Ok(())
            }
        }
    }
}

struct ChannelShared {
    id: ChannelId,
    config: ChannelConfig,
    dispatcher_config: DispatcherConfig,
    state: Mutex<ChannelState>,
    /// Held while emitting settlement intents. Taken before the state lock
    /// is released so intents leave in the order the table changed.
    outbound: Mutex<()>,
    sender: Arc<dyn FrameSender>,
    events: EventSink,
    metrics: Metrics,
}

/// The outcome of one successful ack/nack/reject call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub outcome: AckOutcome,
    /// Tags removed from the pending table, ascending.
    pub delivery_tags: Vec<u64>,
    /// The intent handed to the frame sender, if any tag was removed.
    pub intent: Option<ProtocolIntent>,
}

/// One AMQP channel's consumer-side delivery engine.
///
/// Cloning is cheap and every clone drives the same channel. Handlers often
/// capture a clone to settle their own deliveries; such a clone keeps the
/// channel alive until [`Channel::close`] retires the handlers.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn open(id: ChannelId, config: &EngineConfig, sender: Arc<dyn FrameSender>) -> Self {
        Self::open_with_metrics(id, config, sender, Metrics::new())
    }

    pub fn open_with_metrics(
        id: ChannelId,
        config: &EngineConfig,
        sender: Arc<dyn FrameSender>,
        metrics: Metrics,
    ) -> Self {
        info!(channel_id = id, redelivery = ?config.channel.redelivery, "channel opened");
        Self {
            shared: Arc::new(ChannelShared {
                id,
                config: config.channel.clone(),
                dispatcher_config: config.dispatcher.clone(),
                state: Mutex::new(ChannelState::new()),
                outbound: Mutex::new(()),
                sender,
                events: EventSink::new(config.channel.event_capacity),
                metrics,
            }),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn is_open(&self) -> bool {
        self.shared.state().open
    }

    /// Register a consumer on `queue`. The handler runs on a dedicated
    /// worker thread; deliveries already held for the queue are offered
    /// right away.
    pub fn subscribe<F>(
        &self,
        queue: &str,
        options: SubscribeOptions,
        handler: F,
    ) -> Result<Consumer, SubscribeError>
    where
        F: FnMut(Delivery) + Send + 'static,
    {
        let shared = &self.shared;
        let tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(generate_consumer_tag);

        if !shared.state().open {
            return Err(SubscribeError::ChannelClosed(shared.id));
        }
        let worker =
            ConsumerWorker::spawn(shared.id, &shared.dispatcher_config, &tag, Box::new(handler))?;

        let mut state = shared.state();
        let registered = if state.open {
            state
                .consumers
                .register(&tag, queue, options.ack_mode, options.exclusive)
        } else {
            Err(SubscribeError::ChannelClosed(shared.id))
        };
        let entry = match registered {
            Ok(entry) => entry,
            Err(e) => {
                drop(state);
                join_workers(vec![worker.retire()]);
                return Err(e);
            }
        };
        let replaced = state.dispatcher.attach(&tag, worker);
        info!(
            channel_id = shared.id,
            consumer_tag = %tag,
            queue,
            ack_mode = ?entry.ack_mode,
            exclusive = entry.exclusive,
            "consumer registered"
        );
        // Cannot fail: the consumer was registered under this lock.
        let _ = shared.offer_held(&mut state, queue);
        drop(state);
        if let Some(handle) = replaced {
            join_workers(vec![handle]);
        }

        Ok(Consumer {
            tag,
            queue: entry.queue,
            ack_mode: entry.ack_mode,
            exclusive: entry.exclusive,
            channel: Arc::downgrade(shared),
        })
    }

    /// Unregister a consumer. Pending acks stay pending and remain settleable.
    pub fn cancel(&self, consumer: &Consumer) -> bool {
        self.shared.cancel_tag(&consumer.tag)
    }

    pub fn cancel_tag(&self, consumer_tag: &str) -> bool {
        self.shared.cancel_tag(consumer_tag)
    }

    pub fn ack(&self, delivery_tag: u64, options: AckOptions) -> Result<Settlement, SettleError> {
        self.settle(delivery_tag, AckOutcome::Ack, options.multiple)
    }

    pub fn nack(&self, delivery_tag: u64, options: NackOptions) -> Result<Settlement, SettleError> {
        self.settle(
            delivery_tag,
            AckOutcome::Nack {
                requeue: options.requeue,
            },
            options.multiple,
        )
    }

    pub fn reject(
        &self,
        delivery_tag: u64,
        options: RejectOptions,
    ) -> Result<Settlement, SettleError> {
        self.settle(
            delivery_tag,
            AckOutcome::Reject {
                requeue: options.requeue,
            },
            false,
        )
    }

    fn settle(
        &self,
        delivery_tag: u64,
        outcome: AckOutcome,
        multiple: bool,
    ) -> Result<Settlement, SettleError> {
        let shared = &self.shared;
        let (result, sending) = {
            let mut guard = shared.state();
            let state = &mut *guard;
            let last_issued = state.tags.last();
            let result = state.acks.settle(
                shared.id,
                state.open,
                &mut state.pending,
                last_issued,
                delivery_tag,
                outcome,
                multiple,
            )?;

            shared.record_settlement(outcome, &result.entries);
            if outcome.requeue() && shared.redelivers_locally(state) {
                shared.redeliver(state, &result.entries);
            }
            shared.metrics.set_pending(shared.id, state.pending.len() as u64);
            (result, shared.outbound())
        };

        let delivery_tags: Vec<u64> = result.entries.iter().map(|e| e.delivery_tag).collect();
        debug!(
            channel_id = shared.id,
            delivery_tag,
            multiple,
            ?outcome,
            settled = delivery_tags.len(),
            "settled deliveries"
        );

        if let Some(intent) = result.intent {
            if let Err(e) = shared.sender.emit(intent) {
                warn!(channel_id = shared.id, delivery_tag, error = %e, "failed to emit settlement");
            }
        }
        if !delivery_tags.is_empty() {
            shared.events.publish(ChannelEvent::Settled {
                channel_id: shared.id,
                delivery_tags: delivery_tags.clone(),
                state: outcome.settled_state(),
            });
        }
        drop(sending);

        Ok(Settlement {
            outcome,
            delivery_tags,
            intent: result.intent,
        })
    }

    /// Transport entry point for a broker `basic.deliver` on this channel.
    /// Refused on a channel already fed by [`Channel::publish`].
    pub fn on_delivery_frame(&self, frame: DeliveryFrame) -> Result<(), DispatchError> {
        let shared = &self.shared;
        if frame.channel_id != shared.id {
            return Err(DispatchError::WrongChannel {
                frame: frame.channel_id,
                channel: shared.id,
            });
        }

        let mut state = shared.state();
        if !state.open {
            return Err(DispatchError::ChannelClosed(shared.id));
        }
        state.accept_source(shared.id, DeliverySource::Broker)?;
        state.tags.observe(frame.delivery_tag)?;

        let Some(entry) = state.consumers.lookup(&frame.consumer_tag).cloned() else {
            drop(state);
            warn!(
                channel_id = shared.id,
                consumer_tag = %frame.consumer_tag,
                delivery_tag = frame.delivery_tag,
                "delivery for unknown consumer dropped"
            );
            shared.events.publish(ChannelEvent::DeliveryDropped {
                channel_id: shared.id,
                consumer_tag: frame.consumer_tag.clone(),
                delivery_tag: frame.delivery_tag,
            });
            return Err(DispatchError::UnknownConsumer(frame.consumer_tag));
        };

        shared.deliver(
            &mut state,
            &entry,
            frame.delivery_tag,
            frame.body,
            frame.redelivered,
        )
    }

    /// Loopback publish: append to the channel's own model of `queue` and
    /// offer it to the queue's consumers, allocating tags locally. Refused on
    /// a channel already fed by broker frames.
    pub fn publish(&self, queue: &str, body: impl Into<Vec<u8>>) -> Result<(), DispatchError> {
        let shared = &self.shared;
        let mut state = shared.state();
        if !state.open {
            return Err(DispatchError::ChannelClosed(shared.id));
        }
        state.accept_source(shared.id, DeliverySource::Loopback)?;
        state.router.enqueue(queue, QueuedMessage::new(body));
        if shared.offer_held(&mut state, queue).is_err() {
            debug!(
                channel_id = shared.id,
                queue,
                held = state.router.held(queue),
                "no consumer, message held"
            );
        }
        Ok(())
    }

    /// Close the channel. Every unsettled manual-ack delivery is reported as
    /// abandoned, consumers are dropped and their workers joined once
    /// in-flight handlers return. Closing twice is a no-op.
    pub fn close(&self) -> Vec<AbandonedDelivery> {
        let shared = &self.shared;
        let (entries, handles, consumers) = {
            let mut state = shared.state();
            if !state.open {
                return Vec::new();
            }
            state.open = false;
            let consumers = state.consumers.drain();
            let handles = state.dispatcher.retire_all();
            let entries = state.pending.drain_all();
            state.router.clear();
            shared.metrics.set_pending(shared.id, 0);
            (entries, handles, consumers)
        };

        let abandoned: Vec<AbandonedDelivery> = entries
            .into_iter()
            .map(|e| AbandonedDelivery {
                channel_id: shared.id,
                delivery_tag: e.delivery_tag,
                consumer_tag: e.consumer_tag,
                queue: e.queue,
            })
            .collect();
        for delivery in &abandoned {
            shared.metrics.record_abandoned(&delivery.queue, 1);
            shared
                .events
                .publish(ChannelEvent::Abandoned(delivery.clone()));
        }
        info!(
            channel_id = shared.id,
            consumers = consumers.len(),
            abandoned = abandoned.len(),
            "channel closed"
        );

        join_workers(handles);
        abandoned
    }

    /// Reopen a closed channel with fresh delivery tags. Returns `false` if
    /// the channel was already open.
    pub fn reopen(&self) -> bool {
        let mut state = self.shared.state();
        if state.open {
            return false;
        }
        state.tags.reset();
        state.acks.reset();
        state.source = None;
        state.open = true;
        info!(channel_id = self.shared.id, "channel reopened");
        true
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state().pending.len()
    }

    /// Unsettled tags of one consumer, ascending.
    pub fn pending_for(&self, consumer_tag: &str) -> Vec<u64> {
        self.shared.state().pending.pending_for(consumer_tag)
    }

    /// Messages held for `queue` with no consumer to take them.
    pub fn held_count(&self, queue: &str) -> usize {
        self.shared.state().router.held(queue)
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.state().consumers.len()
    }

    /// Highest delivery tag issued or observed since the channel opened.
    pub fn last_delivery_tag(&self) -> u64 {
        self.shared.state().tags.last()
    }

    pub fn events(&self) -> Receiver<ChannelEvent> {
        self.shared.events.receiver()
    }
}

impl ChannelShared {
    fn state(&self) -> MutexGuard<'_, ChannelState> {
        // Handlers never run under the lock, so a poisoned guard still holds
        // consistent tables.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbound(&self) -> MutexGuard<'_, ()> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requeued messages are re-offered by the channel itself only on a
    /// loopback-fed channel in local mode. Broker-fed channels get them back
    /// as new frames.
    fn redelivers_locally(&self, state: &ChannelState) -> bool {
        self.config.redelivery == RedeliveryMode::Local
            && state.source == Some(DeliverySource::Loopback)
    }

    fn cancel_tag(&self, consumer_tag: &str) -> bool {
        let mut state = self.state();
        let Some(entry) = state.consumers.unregister(consumer_tag) else {
            return false;
        };
        // The worker finishes what is queued and exits on its own; joining
        // here could block on a long-running handler.
        let _ = state.dispatcher.retire(consumer_tag);
        if state.consumers.candidates_for(&entry.queue).is_empty()
            && state.router.held(&entry.queue) == 0
        {
            state.router.forget(&entry.queue);
        }
        let pending = state.pending.pending_for(consumer_tag).len();
        drop(state);
        info!(
            channel_id = self.id,
            consumer_tag,
            queue = %entry.queue,
            pending,
            "consumer cancelled"
        );
        true
    }

    /// Hand one delivery to a consumer's worker. Manual-ack deliveries are
    /// recorded as pending before the handler can see them.
    fn deliver(
        &self,
        state: &mut ChannelState,
        consumer: &ConsumerEntry,
        delivery_tag: u64,
        body: Vec<u8>,
        redelivered: bool,
    ) -> Result<(), DispatchError> {
        match consumer.ack_mode {
            AckMode::Manual => {
                state.pending.record(
                    AckMode::Manual,
                    PendingAckEntry::new(
                        delivery_tag,
                        &consumer.tag,
                        &consumer.queue,
                        body.clone(),
                        redelivered,
                    ),
                );
            }
            AckMode::Automatic => state.acks.remember_auto_ack(delivery_tag),
        }

        state.dispatcher.submit(Delivery {
            delivery_tag,
            consumer_tag: consumer.tag.clone(),
            queue: consumer.queue.clone(),
            body,
            redelivered,
        })?;
        state.pending.mark_dispatched(delivery_tag);
        self.metrics.record_dispatch(&consumer.queue);
        if consumer.ack_mode == AckMode::Manual {
            self.metrics.set_pending(self.id, state.pending.len() as u64);
        }
        debug!(
            channel_id = self.id,
            consumer_tag = %consumer.tag,
            delivery_tag,
            queue = %consumer.queue,
            redelivered,
            "delivery dispatched"
        );
        Ok(())
    }

    /// Offer every message held for `queue` to its current consumers.
    fn offer_held(&self, state: &mut ChannelState, queue: &str) -> Result<(), RedeliveryError> {
        let candidates: Vec<String> = state
            .consumers
            .candidates_for(queue)
            .into_iter()
            .map(|c| c.tag.clone())
            .collect();
        let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();

        let offers = state.router.take_offers(queue, &candidates)?;
        for (consumer_tag, message) in offers {
            let Some(consumer) = state.consumers.lookup(&consumer_tag).cloned() else {
                continue;
            };
            let delivery_tag = state.tags.next();
            if let Err(e) =
                self.deliver(state, &consumer, delivery_tag, message.body, message.redelivered)
            {
                warn!(
                    channel_id = self.id,
                    %consumer_tag,
                    delivery_tag,
                    queue,
                    error = %e,
                    "failed to offer held message"
                );
            }
        }
        Ok(())
    }

    /// Return requeued entries to their queues and re-offer them.
    fn redeliver(&self, state: &mut ChannelState, entries: &[PendingAckEntry]) {
        for (queue, messages) in group_by_queue(entries) {
            let count = messages.len() as u64;
            state.router.requeue(&queue, messages);
            self.metrics.record_requeue(&queue, count);

            if self.offer_held(state, &queue).is_err() {
                let held = state.router.held(&queue);
                debug!(channel_id = self.id, queue = %queue, held, "redelivery pending, no consumer");
                self.events.publish(ChannelEvent::RedeliveryPending {
                    channel_id: self.id,
                    queue,
                    held,
                });
            }
        }
    }

    fn record_settlement(&self, outcome: AckOutcome, entries: &[PendingAckEntry]) {
        for (queue, count) in count_by_queue(entries) {
            match outcome {
                AckOutcome::Ack => self.metrics.record_ack(queue, count),
                AckOutcome::Nack { .. } => self.metrics.record_nack(queue, count),
                AckOutcome::Reject { .. } => self.metrics.record_reject(queue, count),
            }
        }
    }
}

/// Requeue groups in first-seen queue order, each ascending by tag.
fn group_by_queue(entries: &[PendingAckEntry]) -> Vec<(String, Vec<QueuedMessage>)> {
    let mut groups: Vec<(String, Vec<QueuedMessage>)> = Vec::new();
    for entry in entries {
        let message = QueuedMessage {
            body: entry.body.clone(),
            redelivered: entry.redelivered,
        };
        match groups.iter_mut().find(|(q, _)| *q == entry.queue) {
            Some((_, messages)) => messages.push(message),
            None => groups.push((entry.queue.clone(), vec![message])),
        }
    }
    groups
}

fn count_by_queue(entries: &[PendingAckEntry]) -> Vec<(&str, u64)> {
    let mut counts: Vec<(&str, u64)> = Vec::new();
    for entry in entries {
        match counts.iter_mut().find(|(q, _)| *q == entry.queue) {
            Some((_, n)) => *n += 1,
            None => counts.push((entry.queue.as_str(), 1)),
        }
    }
    counts
}

fn generate_consumer_tag() -> String {
    format!("amq.ctag-{}", Uuid::now_v7().simple())
}

/// Application handle for a registered consumer.
///
/// Holds only a weak reference to its channel, so keeping a `Consumer`
/// around does not keep a closed channel alive.
pub struct Consumer {
    tag: String,
    queue: String,
    ack_mode: AckMode,
    exclusive: bool,
    channel: Weak<ChannelShared>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .field("ack_mode", &self.ack_mode)
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn uses_automatic_ack_mode(&self) -> bool {
        self.ack_mode == AckMode::Automatic
    }

    pub fn uses_manual_ack_mode(&self) -> bool {
        self.ack_mode == AckMode::Manual
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// The owning channel, if it still exists.
    pub fn channel(&self) -> Option<Channel> {
        self.channel.upgrade().map(|shared| Channel { shared })
    }

    /// Cancel this consumer. `false` if it was already gone.
    pub fn cancel(&self) -> bool {
        self.channel
            .upgrade()
            .is_some_and(|shared| shared.cancel_tag(&self.tag))
    }
}
