//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Local, TimeZone};
use tempfile::TempDir;

use outreach_controller::config::StaticScheduleProvider;
use outreach_controller::dispatch::mock::{MockDrafter, MockReplyPoller, MockTransport};
use outreach_controller::queue::Lead;
use outreach_controller::{DispatchRunner, Ledger, ManualClock, RecipientQueue, ScheduleConfig};

pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<Ledger>,
    pub queue: Arc<RecipientQueue>,
    pub schedule: Arc<StaticScheduleProvider>,
    pub drafter: Arc<MockDrafter>,
    pub transport: Arc<MockTransport>,
}

impl Harness {
    /// Stores at 2026-03-02 `hour`:00 local with the given leads queued.
    pub async fn new(hour: u32, emails: &[&str]) -> Self {
        Self::with_collaborators(hour, emails, MockDrafter::new(), MockTransport::new()).await
    }

    pub async fn with_collaborators(
        hour: u32,
        emails: &[&str],
        drafter: MockDrafter,
        transport: MockTransport,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(
            Ledger::open(dir.path().join("outreach_log.jsonl"), clock.clone(), Vec::new()).unwrap(),
        );
        let queue = Arc::new(RecipientQueue::new(
            dir.path().join("leads_queue.json"),
            clock.clone(),
        ));
        for email in emails {
            queue.add_lead(lead(email)).await.unwrap();
        }

        Self {
            dir,
            clock,
            ledger,
            queue,
            schedule: Arc::new(StaticScheduleProvider::new(ScheduleConfig::default())),
            drafter: Arc::new(drafter),
            transport: Arc::new(transport),
        }
    }

    pub fn set_schedule(&self, schedule: ScheduleConfig) {
        self.schedule.set(schedule);
    }

    /// Runner reading recipients from the queue and mirroring into it.
    pub fn runner(&self) -> DispatchRunner {
        DispatchRunner::new(
            self.ledger.clone(),
            self.queue.clone(),
            self.drafter.clone(),
            self.transport.clone(),
            self.schedule.clone(),
            self.clock.clone(),
        )
        .with_queue(self.queue.clone())
    }

    pub fn runner_with_replies(&self, poller: Arc<MockReplyPoller>) -> DispatchRunner {
        self.runner().with_reply_poller(poller)
    }
}

pub fn lead(email: &str) -> Lead {
    let name = email.split('@').next().unwrap_or("friend");
    Lead {
        first_name: name.to_string(),
        email: email.to_string(),
        company: format!("{} Corp", name),
        role_hiring_for: "Engineer".to_string(),
        linkedin: None,
        phone: None,
    }
}
