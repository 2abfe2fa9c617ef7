use std::collections::BTreeMap;
use std::time::Instant;

use crate::channel::options::AckMode;
use crate::error::SettleError;

/// Lifecycle of a single delivery on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Dispatched,
    Acked,
    Nacked,
    Rejected,
    Abandoned,
}

/// A manual-ack delivery awaiting settlement. Keeps the body so the message
/// can be requeued on nack/reject.
#[derive(Debug, Clone)]
pub struct PendingAckEntry {
    pub delivery_tag: u64,
    pub consumer_tag: String,
    pub queue: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    pub enqueued_at: Instant,
    pub state: DeliveryState,
}

impl PendingAckEntry {
    pub fn new(
        delivery_tag: u64,
        consumer_tag: &str,
        queue: &str,
        body: Vec<u8>,
        redelivered: bool,
    ) -> Self {
        Self {
            delivery_tag,
            consumer_tag: consumer_tag.to_string(),
            queue: queue.to_string(),
            body,
            redelivered,
            enqueued_at: Instant::now(),
            state: DeliveryState::Received,
        }
    }
}

/// Unsettled deliveries of one channel, ordered by delivery tag.
///
/// Ordering matters for cumulative ("multiple") settlement, which removes
/// every entry up to and including a tag in ascending order.
#[derive(Debug, Default)]
pub struct PendingAckTable {
    entries: BTreeMap<u64, PendingAckEntry>,
}

impl PendingAckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a delivery. Automatic-ack deliveries are never tracked; returns
    /// whether an entry was inserted.
    pub fn record(&mut self, ack_mode: AckMode, entry: PendingAckEntry) -> bool {
        if ack_mode == AckMode::Automatic {
            return false;
        }
        self.entries.insert(entry.delivery_tag, entry);
        true
    }

    pub fn mark_dispatched(&mut self, delivery_tag: u64) {
        if let Some(entry) = self.entries.get_mut(&delivery_tag) {
            entry.state = DeliveryState::Dispatched;
        }
    }

    /// Remove acknowledged entries, returning their tags in ascending order.
    pub fn ack(&mut self, delivery_tag: u64, multiple: bool) -> Result<Vec<u64>, SettleError> {
        let removed = self.remove_settled(delivery_tag, multiple, DeliveryState::Acked)?;
        Ok(removed.into_iter().map(|e| e.delivery_tag).collect())
    }

    /// Remove negatively acknowledged entries in ascending tag order. When
    /// `requeue` is false the message is discarded, so the bodies are
    /// released here and only the bookkeeping fields are returned.
    pub fn nack_or_reject(
        &mut self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<Vec<PendingAckEntry>, SettleError> {
        let mut removed = self.remove_settled(delivery_tag, multiple, DeliveryState::Nacked)?;
        if !requeue {
            for entry in &mut removed {
                entry.body = Vec::new();
            }
        }
        Ok(removed)
    }

    /// Selection shared by every settlement: exactly `delivery_tag`, or with
    /// `multiple` every entry up to it. `multiple` with tag 0 selects
    /// everything outstanding. Removed entries are moved to `state`.
    pub fn remove_settled(
        &mut self,
        delivery_tag: u64,
        multiple: bool,
        state: DeliveryState,
    ) -> Result<Vec<PendingAckEntry>, SettleError> {
        let mut removed: Vec<PendingAckEntry> = if !multiple {
            let entry = self
                .entries
                .remove(&delivery_tag)
                .ok_or(SettleError::UnknownDeliveryTag(delivery_tag))?;
            vec![entry]
        } else if delivery_tag == 0 || delivery_tag == u64::MAX {
            std::mem::take(&mut self.entries).into_values().collect()
        } else {
            let above = self.entries.split_off(&(delivery_tag + 1));
            std::mem::replace(&mut self.entries, above)
                .into_values()
                .collect()
        };

        for entry in &mut removed {
            entry.state = state;
        }
        Ok(removed)
    }

    pub fn contains(&self, delivery_tag: u64) -> bool {
        self.entries.contains_key(&delivery_tag)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, delivery_tag: u64) -> Option<&PendingAckEntry> {
        self.entries.get(&delivery_tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending tags belonging to a consumer, ascending.
    pub fn pending_for(&self, consumer_tag: &str) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| e.consumer_tag == consumer_tag)
            .map(|e| e.delivery_tag)
            .collect()
    }

    /// Force every entry to `Abandoned` and empty the table (channel close).
    pub fn drain_all(&mut self) -> Vec<PendingAckEntry> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|mut e| {
                e.state = DeliveryState::Abandoned;
                e
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(tags: &[u64]) -> PendingAckTable {
        let mut table = PendingAckTable::new();
        for &tag in tags {
            let consumer = if tag % 2 == 0 { "even" } else { "odd" };
            table.record(
                AckMode::Manual,
                PendingAckEntry::new(tag, consumer, "q", vec![tag as u8], false),
            );
        }
        table
    }

    fn remaining(table: &PendingAckTable) -> Vec<u64> {
        (0..=20).filter(|t| table.contains(*t)).collect()
    }

    #[test]
    fn automatic_mode_is_never_recorded() {
        let mut table = PendingAckTable::new();
        let inserted = table.record(
            AckMode::Automatic,
            PendingAckEntry::new(1, "c", "q", vec![], false),
        );
        assert!(!inserted);
        assert!(table.is_empty());
    }

    #[test]
    fn single_ack_removes_exactly_one() {
        let mut table = table_with(&[1, 2, 3]);
        assert_eq!(table.ack(2, false).unwrap(), vec![2]);
        assert_eq!(remaining(&table), vec![1, 3]);
    }

    #[test]
    fn single_ack_of_absent_tag_fails() {
        let mut table = table_with(&[1]);
        table.ack(1, false).unwrap();
        assert_eq!(table.ack(1, false), Err(SettleError::UnknownDeliveryTag(1)));
        assert_eq!(table.ack(7, false), Err(SettleError::UnknownDeliveryTag(7)));
    }

    #[test]
    fn multiple_ack_removes_everything_up_to_tag_in_order() {
        let mut table = table_with(&[1, 2, 4, 5, 8]);
        assert_eq!(table.ack(5, true).unwrap(), vec![1, 2, 4, 5]);
        assert_eq!(remaining(&table), vec![8]);
    }

    #[test]
    fn multiple_ack_with_tag_between_entries() {
        let mut table = table_with(&[2, 4, 6]);
        assert_eq!(table.ack(5, true).unwrap(), vec![2, 4]);
        assert_eq!(remaining(&table), vec![6]);
    }

    #[test]
    fn multiple_ack_with_nothing_below_is_empty_not_error() {
        let mut table = table_with(&[10, 11]);
        assert_eq!(table.ack(9, true).unwrap(), Vec::<u64>::new());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn multiple_with_tag_zero_selects_all() {
        let mut table = table_with(&[3, 9, 12]);
        assert_eq!(table.ack(0, true).unwrap(), vec![3, 9, 12]);
        assert!(table.is_empty());
    }

    #[test]
    fn nack_keeps_body_only_when_requeueing() {
        let mut table = table_with(&[1, 2, 3]);
        let requeued = table.nack_or_reject(2, true, true).unwrap();
        assert_eq!(requeued.len(), 2);
        assert_eq!(requeued[0].body, vec![1]);
        assert_eq!(requeued[1].body, vec![2]);
        assert!(requeued.iter().all(|e| e.state == DeliveryState::Nacked));

        let dropped = table.nack_or_reject(3, false, false).unwrap();
        assert_eq!(dropped[0].delivery_tag, 3);
        assert_eq!(dropped[0].consumer_tag, "odd");
        assert!(dropped[0].body.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn pending_for_filters_by_consumer() {
        let table = table_with(&[1, 2, 3, 4]);
        assert_eq!(table.pending_for("even"), vec![2, 4]);
        assert_eq!(table.pending_for("odd"), vec![1, 3]);
        assert!(table.pending_for("nobody").is_empty());
    }

    #[test]
    fn drain_all_abandons_in_tag_order() {
        let mut table = table_with(&[5, 1, 3]);
        table.mark_dispatched(3);
        assert_eq!(table.get(3).map(|e| e.state), Some(DeliveryState::Dispatched));

        let drained = table.drain_all();
        let tags: Vec<u64> = drained.iter().map(|e| e.delivery_tag).collect();
        assert_eq!(tags, vec![1, 3, 5]);
        assert!(drained.iter().all(|e| e.state == DeliveryState::Abandoned));
        assert!(table.is_empty());
    }
}
