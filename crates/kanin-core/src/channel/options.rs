use crate::error::SubscribeError;

/// How deliveries to a consumer are settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Settled at dispatch time; the application never acknowledges.
    #[default]
    Automatic,
    /// The application must ack, nack or reject every delivery.
    Manual,
}

/// Individual subscribe flags, in the shape callers usually pass them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOption {
    AutomaticAckMode,
    ManualAckMode,
    Exclusive,
}

/// Validated subscribe options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub ack_mode: AckMode,
    pub exclusive: bool,
    /// Client-chosen consumer tag. When `None` the channel generates one.
    pub consumer_tag: Option<String>,
}

impl SubscribeOptions {
    pub fn automatic() -> Self {
        Self::default()
    }

    pub fn manual() -> Self {
        Self {
            ack_mode: AckMode::Manual,
            ..Self::default()
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }
}

impl TryFrom<&[SubscribeOption]> for SubscribeOptions {
    type Error = SubscribeError;

    fn try_from(flags: &[SubscribeOption]) -> Result<Self, Self::Error> {
        let automatic = flags.contains(&SubscribeOption::AutomaticAckMode);
        let manual = flags.contains(&SubscribeOption::ManualAckMode);
        if automatic && manual {
            return Err(SubscribeError::ConflictingAckModes);
        }

        Ok(Self {
            ack_mode: if manual {
                AckMode::Manual
            } else {
                AckMode::Automatic
            },
            exclusive: flags.contains(&SubscribeOption::Exclusive),
            consumer_tag: None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOptions {
    pub multiple: bool,
}

impl AckOptions {
    pub fn multiple() -> Self {
        Self { multiple: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NackOptions {
    pub multiple: bool,
    pub requeue: bool,
}

impl NackOptions {
    pub fn multiple() -> Self {
        Self {
            multiple: true,
            requeue: false,
        }
    }

    pub fn requeue() -> Self {
        Self {
            multiple: false,
            requeue: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectOptions {
    pub requeue: bool,
}

impl RejectOptions {
    pub fn requeue() -> Self {
        Self { requeue: true }
    }
}
