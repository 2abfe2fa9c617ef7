use std::collections::BTreeMap;

use crate::channel::outbound::ProtocolIntent;
use crate::channel::pending::{DeliveryState, PendingAckEntry, PendingAckTable};
use crate::channel::ChannelId;
use crate::error::SettleError;

/// What the application decided to do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Ack,
    Nack { requeue: bool },
    Reject { requeue: bool },
}

impl AckOutcome {
    pub fn requeue(&self) -> bool {
        match *self {
            AckOutcome::Ack => false,
            AckOutcome::Nack { requeue } | AckOutcome::Reject { requeue } => requeue,
        }
    }

    pub fn settled_state(&self) -> DeliveryState {
        match self {
            AckOutcome::Ack => DeliveryState::Acked,
            AckOutcome::Nack { .. } => DeliveryState::Nacked,
            AckOutcome::Reject { .. } => DeliveryState::Rejected,
        }
    }

    fn intent(&self, channel_id: ChannelId, delivery_tag: u64, multiple: bool) -> ProtocolIntent {
        match *self {
            AckOutcome::Ack => ProtocolIntent::Ack {
                channel_id,
                delivery_tag,
                multiple,
            },
            AckOutcome::Nack { requeue } => ProtocolIntent::Nack {
                channel_id,
                delivery_tag,
                multiple,
                requeue,
            },
            AckOutcome::Reject { requeue } => ProtocolIntent::Reject {
                channel_id,
                delivery_tag,
                requeue,
            },
        }
    }
}

/// Result of one settlement call: at most one outbound intent and the
/// entries it removed, ascending by tag.
#[derive(Debug)]
pub struct SettleResult {
    pub intent: Option<ProtocolIntent>,
    pub entries: Vec<PendingAckEntry>,
}

/// Validates settlement requests and applies them to the pending table.
///
/// Also remembers every automatic-ack tag issued since the channel opened so
/// an attempt to settle one is reported as `AckModeMismatch` rather than an
/// unknown tag. Tags are kept as merged inclusive ranges keyed by their first
/// tag; a channel carried by automatic consumers only stays at one range.
#[derive(Debug, Default)]
pub struct AcknowledgmentEngine {
    auto_acked: BTreeMap<u64, u64>,
}

impl AcknowledgmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember_auto_ack(&mut self, delivery_tag: u64) {
        let mut start = delivery_tag;
        if let Some((&first, end)) = self.auto_acked.range_mut(..=delivery_tag).next_back() {
            if *end >= delivery_tag {
                return;
            }
            if *end + 1 == delivery_tag {
                *end = delivery_tag;
                start = first;
            }
        }
        if start == delivery_tag {
            self.auto_acked.insert(delivery_tag, delivery_tag);
        }

        // Join the following range when this tag closed the gap.
        if let Some(next_end) = delivery_tag
            .checked_add(1)
            .and_then(|next| self.auto_acked.remove(&next))
        {
            self.auto_acked.insert(start, next_end);
        }
    }

    pub fn is_auto_acked(&self, delivery_tag: u64) -> bool {
        self.auto_acked
            .range(..=delivery_tag)
            .next_back()
            .is_some_and(|(_, &end)| end >= delivery_tag)
    }

    /// Number of disjoint tag ranges remembered.
    #[cfg(test)]
    pub(crate) fn auto_ack_ranges(&self) -> usize {
        self.auto_acked.len()
    }

    /// Apply `outcome` to `delivery_tag`. `last_issued` is the channel's tag
    /// high-water mark, used to refuse cumulative settlement of tags that
    /// never existed.
    #[allow(clippy::too_many_arguments)]
    pub fn settle(
        &mut self,
        channel_id: ChannelId,
        open: bool,
        table: &mut PendingAckTable,
        last_issued: u64,
        delivery_tag: u64,
        outcome: AckOutcome,
        multiple: bool,
    ) -> Result<SettleResult, SettleError> {
        if !open {
            return Err(SettleError::ChannelClosed(channel_id));
        }

        if !table.contains(delivery_tag) {
            if self.is_auto_acked(delivery_tag) {
                return Err(SettleError::AckModeMismatch(delivery_tag));
            }
            if !multiple {
                return Err(SettleError::UnknownDeliveryTag(delivery_tag));
            }
            if delivery_tag > last_issued {
                return Err(SettleError::PreconditionFailed {
                    tag: delivery_tag,
                    last: last_issued,
                });
            }
        }

        let mut entries = match outcome {
            AckOutcome::Ack => table.remove_settled(delivery_tag, multiple, DeliveryState::Acked)?,
            AckOutcome::Nack { requeue } | AckOutcome::Reject { requeue } => {
                table.nack_or_reject(delivery_tag, multiple, requeue)?
            }
        };
        let state = outcome.settled_state();
        for entry in &mut entries {
            entry.state = state;
        }

        let intent = if entries.is_empty() {
            None
        } else {
            Some(outcome.intent(channel_id, delivery_tag, multiple))
        };

        Ok(SettleResult { intent, entries })
    }

    pub fn reset(&mut self) {
        self.auto_acked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::options::AckMode;

    fn table_with(tags: &[u64]) -> PendingAckTable {
        let mut table = PendingAckTable::new();
        for &tag in tags {
            table.record(
                AckMode::Manual,
                PendingAckEntry::new(tag, "c1", "q", b"msg".to_vec(), false),
            );
        }
        table
    }

    #[test]
    fn ack_emits_one_intent_per_call() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = table_with(&[1, 2, 3]);

        let result = engine
            .settle(1, true, &mut table, 3, 3, AckOutcome::Ack, true)
            .unwrap();
        assert_eq!(result.entries.len(), 3);
        assert!(result.entries.iter().all(|e| e.state == DeliveryState::Acked));
        assert_eq!(
            result.intent,
            Some(ProtocolIntent::Ack {
                channel_id: 1,
                delivery_tag: 3,
                multiple: true,
            })
        );
        assert!(table.is_empty());
    }

    #[test]
    fn closed_channel_refuses_settlement() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = table_with(&[1]);
        let err = engine
            .settle(4, false, &mut table, 1, 1, AckOutcome::Ack, false)
            .unwrap_err();
        assert_eq!(err, SettleError::ChannelClosed(4));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn auto_ack_tags_report_mode_mismatch() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = PendingAckTable::new();
        engine.remember_auto_ack(1);

        for outcome in [
            AckOutcome::Ack,
            AckOutcome::Nack { requeue: true },
            AckOutcome::Reject { requeue: false },
        ] {
            let err = engine
                .settle(1, true, &mut table, 1, 1, outcome, false)
                .unwrap_err();
            assert_eq!(err, SettleError::AckModeMismatch(1));
        }
    }

    #[test]
    fn consecutive_auto_ack_tags_share_one_range() {
        let mut engine = AcknowledgmentEngine::new();
        for tag in 1..=50_000 {
            engine.remember_auto_ack(tag);
        }
        assert_eq!(engine.auto_ack_ranges(), 1);
        assert!(engine.is_auto_acked(1));
        assert!(engine.is_auto_acked(50_000));
        assert!(!engine.is_auto_acked(50_001));

        let mut table = PendingAckTable::new();
        let err = engine
            .settle(1, true, &mut table, 50_000, 1, AckOutcome::Ack, false)
            .unwrap_err();
        assert_eq!(err, SettleError::AckModeMismatch(1));
    }

    #[test]
    fn manual_tags_split_auto_ack_ranges() {
        let mut engine = AcknowledgmentEngine::new();
        // 3 and 6 went to a manual consumer
        for tag in [1, 2, 4, 5, 7] {
            engine.remember_auto_ack(tag);
        }
        assert_eq!(engine.auto_ack_ranges(), 3);
        for tag in [1, 2, 4, 5, 7] {
            assert!(engine.is_auto_acked(tag), "tag {tag}");
        }
        for tag in [0, 3, 6, 8] {
            assert!(!engine.is_auto_acked(tag), "tag {tag}");
        }
    }

    #[test]
    fn filling_a_gap_joins_neighbouring_ranges() {
        let mut engine = AcknowledgmentEngine::new();
        for tag in [1, 2, 4, 5, 3, 3] {
            engine.remember_auto_ack(tag);
        }
        assert_eq!(engine.auto_ack_ranges(), 1);
        assert!((1..=5).all(|tag| engine.is_auto_acked(tag)));

        engine.reset();
        assert_eq!(engine.auto_ack_ranges(), 0);
        assert!(!engine.is_auto_acked(1));
    }

    #[test]
    fn multiple_beyond_last_issued_is_precondition_failed() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = table_with(&[1, 2]);
        let err = engine
            .settle(1, true, &mut table, 2, 5, AckOutcome::Ack, true)
            .unwrap_err();
        assert_eq!(err, SettleError::PreconditionFailed { tag: 5, last: 2 });
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn empty_multiple_selection_emits_nothing() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = table_with(&[4]);
        let result = engine
            .settle(1, true, &mut table, 4, 3, AckOutcome::Nack { requeue: false }, true)
            .unwrap();
        assert!(result.entries.is_empty());
        assert!(result.intent.is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn reject_marks_entries_rejected_and_keeps_body_for_requeue() {
        let mut engine = AcknowledgmentEngine::new();
        let mut table = table_with(&[7]);
        let result = engine
            .settle(2, true, &mut table, 7, 7, AckOutcome::Reject { requeue: true }, false)
            .unwrap();
        assert_eq!(result.entries[0].state, DeliveryState::Rejected);
        assert_eq!(result.entries[0].body, b"msg".to_vec());
        assert_eq!(
            result.intent,
            Some(ProtocolIntent::Reject {
                channel_id: 2,
                delivery_tag: 7,
                requeue: true,
            })
        );
    }
}
