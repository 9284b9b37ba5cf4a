//! outreach-controller: scheduling and dispatch for personalized outreach
//!
//! Decides whether, when, and how many outreach messages may be sent:
//! - Ledger of every attempt, the source of truth for "already contacted"
//! - Recipient queue of leads awaiting first contact
//! - Gate deciding eligibility from schedule, run state, and daily volume
//! - Single-flight dispatch of bounded, rate-limited batches
//! - Scheduler loop that re-reads configuration on every tick
//!
//! Drafting, transport, and reply detection are collaborators behind the
//! traits in [`dispatch::collaborators`].

pub mod api;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod history;
pub mod ledger;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControllerConfig, FileScheduleProvider, ScheduleConfig, ScheduleProvider};
pub use dispatch::{Admission, DispatchReport, DispatchRequest, DispatchRunner, Trigger};
pub use error::{ConfigError, StorageError};
pub use gate::{BlockReason, GateDecision};
pub use history::SendHistory;
pub use ledger::{Ledger, LedgerEntry, LedgerStatus};
pub use queue::{Lead, QueueEntry, QueueStatus, RecipientQueue};
pub use scheduler::{SchedulerLoop, SchedulerState, SchedulerStatus};
