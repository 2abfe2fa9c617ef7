use std::collections::HashMap;

use crate::channel::options::AckMode;
use crate::error::SubscribeError;

/// Subscription state for one consumer on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerEntry {
    pub tag: String,
    pub queue: String,
    pub ack_mode: AckMode,
    pub exclusive: bool,
}

/// Active consumers of a channel, in registration order.
///
/// Registration order is the candidate order for redelivery, so it is kept
/// explicitly rather than relying on map iteration order.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    consumers: HashMap<String, ConsumerEntry>,
    order: Vec<String>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: &str,
        queue: &str,
        ack_mode: AckMode,
        exclusive: bool,
    ) -> Result<ConsumerEntry, SubscribeError> {
        if self.consumers.contains_key(tag) {
            return Err(SubscribeError::DuplicateConsumerTag(tag.to_string()));
        }

        let mut on_queue = self.consumers.values().filter(|c| c.queue == queue);
        let conflict = if exclusive {
            on_queue.next().is_some()
        } else {
            on_queue.any(|c| c.exclusive)
        };
        if conflict {
            return Err(SubscribeError::ExclusiveConsumeConflict {
                queue: queue.to_string(),
            });
        }

        let entry = ConsumerEntry {
            tag: tag.to_string(),
            queue: queue.to_string(),
            ack_mode,
            exclusive,
        };
        self.consumers.insert(tag.to_string(), entry.clone());
        self.order.push(tag.to_string());
        Ok(entry)
    }

    /// Remove a consumer. Absent tags are a no-op: cancellation races with
    /// broker-initiated cancels are expected.
    pub fn unregister(&mut self, tag: &str) -> Option<ConsumerEntry> {
        let entry = self.consumers.remove(tag)?;
        self.order.retain(|t| t != tag);
        Some(entry)
    }

    pub fn lookup(&self, tag: &str) -> Option<&ConsumerEntry> {
        self.consumers.get(tag)
    }

    /// Consumers eligible to receive messages from `queue`, in registration
    /// order. An exclusive consumer is always the only one.
    pub fn candidates_for(&self, queue: &str) -> Vec<&ConsumerEntry> {
        let candidates: Vec<&ConsumerEntry> = self
            .order
            .iter()
            .filter_map(|tag| self.consumers.get(tag))
            .filter(|c| c.queue == queue)
            .collect();

        if let Some(exclusive) = candidates.iter().copied().find(|c| c.exclusive) {
            return vec![exclusive];
        }
        candidates
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Remove every consumer, returning them in registration order.
    pub fn drain(&mut self) -> Vec<ConsumerEntry> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|tag| self.consumers.remove(&tag))
            .collect()
    }
}
