//! Dispatch - one batch of outreach
//!
//! A dispatch run walks the recipient source in order, skips anyone the ledger
//! already considers contacted, and drafts then sends until the batch is full,
//! the source is exhausted, business hours close, or the daily cap is hit.
//!
//! ```text
//! Admission ──► DispatchRunner ──► Drafter ──► Transport
//!                     │                              │
//!                     └────────── Ledger ◄───────────┘
//!                                   │
//!                           RecipientQueue (projection)
//! ```

pub mod admission;
pub mod collaborators;
pub mod drafter;
pub mod mock;
pub mod relay;
pub mod runner;

pub use admission::{Admission, DispatchOutcome, DispatchTicket};
pub use collaborators::{Draft, Drafter, Recipient, RecipientSource, ReplyPoller, Transport};
pub use drafter::TemplateDrafter;
pub use relay::RelayClient;
pub use runner::DispatchRunner;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::StorageError;
use collaborators::SourceError;

/// What started a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Scheduled,
    Cli,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Cli => "cli",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Maximum successful sends this run
    pub batch_size: u32,
    /// Pause between successful sends
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    /// Ignore the business-hours window
    pub force_bypass_business_hours: bool,
    /// Poll for replies before sending
    pub check_replies: bool,
    /// Record TEST instead of delivering
    pub test_mode: bool,
}

impl DispatchRequest {
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size,
            delay: Duration::ZERO,
            force_bypass_business_hours: false,
            check_replies: false,
            test_mode: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force_bypass_business_hours = force;
        self
    }

    pub fn with_reply_check(mut self, check: bool) -> Self {
        self.check_replies = check;
        self
    }

    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every candidate was visited
    Exhausted,
    BatchLimit,
    OutsideBusinessHours,
    DailyCapReached,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    /// Recipients a draft was attempted for
    pub attempted: u32,
    pub sent: u32,
    pub test: u32,
    pub failed_send: u32,
    pub failed_generation: u32,
    /// Already-contacted recipients passed over
    pub skipped: u32,
    pub replies_marked: u32,
    pub stop_reason: StopReason,
}

impl DispatchReport {
    /// Successful sends (real or test) counted against the batch size.
    pub fn successes(&self) -> u32 {
        self.sent + self.test
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch {active} already in progress")]
    Busy { active: Uuid },

    #[error(transparent)]
    SourceUnavailable(#[from] SourceError),

    #[error("Ledger write failed: {0}")]
    Ledger(#[from] StorageError),
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
