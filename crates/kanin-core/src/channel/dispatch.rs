use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error};

use crate::channel::config::DispatcherConfig;
use crate::channel::ChannelId;
use crate::error::{DispatchError, SubscribeError};
use crate::message::Delivery;

/// Application callback for a consumer. Runs on the consumer's own worker
/// thread, so it may block or call back into the channel.
pub type DeliveryHandler = Box<dyn FnMut(Delivery) + Send + 'static>;

/// A consumer's worker thread and the queue feeding it.
pub struct ConsumerWorker {
    tx: Sender<Delivery>,
    handle: thread::JoinHandle<()>,
}

impl ConsumerWorker {
    /// Start the worker thread for `consumer_tag`. Done before taking the
    /// channel lock; the worker is attached once registration succeeds.
    pub fn spawn(
        channel_id: ChannelId,
        config: &DispatcherConfig,
        consumer_tag: &str,
        handler: DeliveryHandler,
    ) -> Result<Self, SubscribeError> {
        let (tx, rx) = crossbeam_channel::unbounded::<Delivery>();
        let tag = consumer_tag.to_string();
        let handle = thread::Builder::new()
            .name(format!(
                "{}-{}-{}",
                config.thread_name_prefix, channel_id, consumer_tag
            ))
            .spawn(move || run_worker(channel_id, &tag, rx, handler))
            .map_err(|e| {
                error!(channel_id, %consumer_tag, error = %e, "failed to spawn consumer worker");
                SubscribeError::WorkerSpawn(e.to_string())
            })?;
        Ok(Self { tx, handle })
    }

    /// Close the queue; the thread exits after its queued deliveries.
    pub fn retire(self) -> thread::JoinHandle<()> {
        drop(self.tx);
        self.handle
    }
}

/// Runs consumer handlers off the caller's thread.
///
/// Each consumer gets a dedicated worker thread fed by an unbounded queue,
/// which gives FIFO handler execution per consumer while different
/// consumers run concurrently. Submitting never blocks, so it is safe to do
/// while holding the channel lock.
#[derive(Default)]
pub struct DeliveryDispatcher {
    workers: HashMap<String, ConsumerWorker>,
}

impl DeliveryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a worker for a freshly registered consumer. An existing worker
    /// under the same tag is retired and its handle returned.
    pub fn attach(
        &mut self,
        consumer_tag: &str,
        worker: ConsumerWorker,
    ) -> Option<thread::JoinHandle<()>> {
        self.workers
            .insert(consumer_tag.to_string(), worker)
            .map(ConsumerWorker::retire)
    }

    /// Queue a delivery for its consumer's handler.
    pub fn submit(&self, delivery: Delivery) -> Result<(), DispatchError> {
        let worker = self
            .workers
            .get(&delivery.consumer_tag)
            .ok_or_else(|| DispatchError::UnknownConsumer(delivery.consumer_tag.clone()))?;

        let consumer_tag = delivery.consumer_tag.clone();
        worker
            .tx
            .send(delivery)
            .map_err(|_| DispatchError::UnknownConsumer(consumer_tag))
    }

    #[cfg(test)]
    pub(crate) fn has_worker(&self, consumer_tag: &str) -> bool {
        self.workers.contains_key(consumer_tag)
    }

    /// Stop feeding a consumer. Deliveries already queued still run; the
    /// worker exits after the last one. The caller decides whether to join.
    pub fn retire(&mut self, consumer_tag: &str) -> Option<thread::JoinHandle<()>> {
        self.workers.remove(consumer_tag).map(ConsumerWorker::retire)
    }

    pub fn retire_all(&mut self) -> Vec<thread::JoinHandle<()>> {
        self.workers.drain().map(|(_, w)| w.retire()).collect()
    }
}

fn run_worker(
    channel_id: ChannelId,
    consumer_tag: &str,
    rx: Receiver<Delivery>,
    mut handler: DeliveryHandler,
) {
    debug!(channel_id, %consumer_tag, "consumer worker started");
    for delivery in rx.iter() {
        let delivery_tag = delivery.delivery_tag;
        if panic::catch_unwind(AssertUnwindSafe(|| handler(delivery))).is_err() {
            error!(channel_id, %consumer_tag, delivery_tag, "consumer handler panicked");
        }
    }
    debug!(channel_id, %consumer_tag, "consumer worker stopped");
}

/// Join worker threads, skipping the calling thread (a handler may close or
/// cancel its own channel).
pub(crate) fn join_workers(handles: Vec<thread::JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        if handle.thread().id() == current {
            continue;
        }
        if handle.join().is_err() {
            error!("consumer worker panicked outside handler");
        }
    }
}
