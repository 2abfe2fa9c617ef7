use std::collections::{HashMap, VecDeque};

use crate::error::RedeliveryError;
use crate::message::QueuedMessage;

/// Client-side model of the logical queues a channel consumes from.
///
/// Holds messages that have no consumer yet (published or requeued) and
/// decides which consumer gets each one. A per-queue round-robin cursor
/// persists across calls so competing consumers take turns even when the
/// candidate set changes between offers.
#[derive(Debug, Default)]
pub struct RedeliveryRouter {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    rr_idx: HashMap<String, usize>,
}

impl RedeliveryRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh message to the tail of a queue.
    pub fn enqueue(&mut self, queue: &str, message: QueuedMessage) {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    /// Return nacked/rejected messages to the head of a queue, preserving
    /// their ascending tag order, and flag them as redelivered.
    pub fn requeue(&mut self, queue: &str, messages: Vec<QueuedMessage>) {
        let held = self.queues.entry(queue.to_string()).or_default();
        for mut message in messages.into_iter().rev() {
            message.mark_redelivered();
            held.push_front(message);
        }
    }

    /// Pick the next consumer for `queue` from `candidates` (registration
    /// order), advancing the queue's cursor.
    pub fn next_candidate(
        &mut self,
        queue: &str,
        candidates: &[&str],
    ) -> Result<String, RedeliveryError> {
        if candidates.is_empty() {
            return Err(RedeliveryError::NoActiveConsumer(queue.to_string()));
        }
        let idx = self.rr_idx.entry(queue.to_string()).or_insert(0);
        let chosen = candidates[*idx % candidates.len()];
        *idx = idx.wrapping_add(1);
        Ok(chosen.to_string())
    }

    /// Drain every held message of `queue`, pairing each with the consumer it
    /// should be offered to. With no candidates the messages stay held.
    pub fn take_offers(
        &mut self,
        queue: &str,
        candidates: &[&str],
    ) -> Result<Vec<(String, QueuedMessage)>, RedeliveryError> {
        if self.held(queue) == 0 {
            return Ok(Vec::new());
        }
        if candidates.is_empty() {
            return Err(RedeliveryError::NoActiveConsumer(queue.to_string()));
        }

        let held: Vec<QueuedMessage> = self
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();

        let mut offers = Vec::with_capacity(held.len());
        for message in held {
            let consumer = self.next_candidate(queue, candidates)?;
            offers.push((consumer, message));
        }
        Ok(offers)
    }

    /// Messages held by `queue` awaiting a consumer.
    pub fn held(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, VecDeque::len)
    }

    #[cfg(test)]
    pub(crate) fn tracks(&self, queue: &str) -> bool {
        self.queues.contains_key(queue) || self.rr_idx.contains_key(queue)
    }

    /// Drop all state for a queue.
    pub fn forget(&mut self, queue: &str) {
        self.queues.remove(queue);
        self.rr_idx.remove(queue);
    }

    pub fn clear(&mut self) {
        self.queues.clear();
        self.rr_idx.clear();
    }
}
