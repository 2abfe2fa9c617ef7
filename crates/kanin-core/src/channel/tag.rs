use crate::error::DispatchError;

/// Per-channel delivery tag source. Tags start at 1 and only move forward
/// until the channel is reopened.
///
/// Tags come from two places: locally originated deliveries (loopback
/// publish and local redelivery) call `next()`, while deliveries decoded
/// from broker frames carry their own tag and go through `observe()`.
/// Both advance the same high-water mark, so the channel-wide ordering
/// invariant holds regardless of origin.
#[derive(Debug, Default)]
pub struct DeliveryTagAllocator {
    last: u64,
}

impl DeliveryTagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Accept a broker-assigned tag if it is greater than every tag seen so far.
    pub fn observe(&mut self, tag: u64) -> Result<(), DispatchError> {
        if tag <= self.last {
            return Err(DispatchError::TagNotIncreasing {
                tag,
                last: self.last,
            });
        }
        self.last = tag;
        Ok(())
    }

    /// Highest tag issued or observed; 0 before the first delivery.
    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn reset(&mut self) {
        self.last = 0;
    }
}
