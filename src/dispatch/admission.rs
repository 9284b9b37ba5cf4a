//! Single-flight admission for dispatch runs.
//!
//! At most one dispatch executes at a time, whatever triggered it. The check
//! and the spawn happen under one lock, so two concurrent `try_start` calls can
//! never both succeed.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{DispatchError, DispatchReport, DispatchRequest, DispatchRunner, Trigger};

/// Identity of an admitted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchTicket {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Local>,
}

/// How the most recent run ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Completed(DispatchReport),
    Failed { run_id: Uuid, error: String },
}

struct ActiveDispatch {
    ticket: DispatchTicket,
    handle: JoinHandle<()>,
    done: watch::Receiver<bool>,
}

impl ActiveDispatch {
    fn is_running(&self) -> bool {
        !*self.done.borrow() && !self.handle.is_finished()
    }
}

pub struct Admission {
    runner: Arc<DispatchRunner>,
    slot: Mutex<Option<ActiveDispatch>>,
    last_outcome: Arc<RwLock<Option<DispatchOutcome>>>,
}

impl Admission {
    pub fn new(runner: Arc<DispatchRunner>) -> Self {
        Self {
            runner,
            slot: Mutex::new(None),
            last_outcome: Arc::new(RwLock::new(None)),
        }
    }

    /// Start a run in the background, or report the run already in flight.
    pub async fn try_start(
        &self,
        trigger: Trigger,
        request: DispatchRequest,
    ) -> Result<DispatchTicket, DispatchError> {
        let mut slot = self.slot.lock().await;

        if let Some(active) = slot.as_ref() {
            if active.is_running() {
                warn!(
                    active = %active.ticket.run_id,
                    trigger = %trigger,
                    "Dispatch rejected, another run is active"
                );
                return Err(DispatchError::Busy {
                    active: active.ticket.run_id,
                });
            }
        }

        let ticket = DispatchTicket {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: self.runner.clock().now(),
        };

        let (done_tx, done_rx) = watch::channel(false);
        let runner = self.runner.clone();
        let last_outcome = self.last_outcome.clone();
        let run_id = ticket.run_id;

        let handle = tokio::spawn(async move {
            let outcome = match runner.run(run_id, trigger, request).await {
                Ok(report) => DispatchOutcome::Completed(report),
                Err(e) => {
                    error!(%run_id, error = %e, "Dispatch failed");
                    DispatchOutcome::Failed {
                        run_id,
                        error: e.to_string(),
                    }
                }
            };
            *last_outcome.write().await = Some(outcome);
            let _ = done_tx.send(true);
        });

        info!(run_id = %ticket.run_id, trigger = %trigger, "Dispatch admitted");
        *slot = Some(ActiveDispatch {
            ticket: ticket.clone(),
            handle,
            done: done_rx,
        });

        Ok(ticket)
    }

    /// The run currently executing, if any.
    pub async fn active(&self) -> Option<DispatchTicket> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|a| a.is_running())
            .map(|a| a.ticket.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.active().await.is_some()
    }

    pub async fn last_outcome(&self) -> Option<DispatchOutcome> {
        self.last_outcome.read().await.clone()
    }

    /// Wait until no run is executing.
    pub async fn wait_idle(&self) {
        let done = {
            let slot = self.slot.lock().await;
            slot.as_ref().map(|a| a.done.clone())
        };

        if let Some(mut done) = done {
            // A dropped sender means the task ended without reporting
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Let the active run finish within `grace`, then abort it.
    ///
    /// Returns `true` when the run had to be aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if !self.is_running().await {
            return false;
        }

        info!(grace_secs = grace.as_secs(), "Waiting for active dispatch to finish");
        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return false;
        }

        let slot = self.slot.lock().await;
        if let Some(active) = slot.as_ref() {
            warn!(run_id = %active.ticket.run_id, "Aborting dispatch after grace period");
            active.handle.abort();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{ScheduleConfig, StaticScheduleProvider};
    use crate::dispatch::collaborators::Recipient;
    use crate::dispatch::mock::{MockDrafter, MockTransport, StaticSource};
    use crate::ledger::Ledger;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn admission(dir: &TempDir, transport: MockTransport) -> Admission {
        let clock = Arc::new(ManualClock::new(
            Local.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap(),
        ));
        let ledger = Arc::new(
            Ledger::open(dir.path().join("log.jsonl"), clock.clone(), Vec::new()).unwrap(),
        );
        let source = StaticSource::new(vec![Recipient {
            email: "a@x.test".into(),
            first_name: "Sam".into(),
            company: "Acme".into(),
            role: "Engineer".into(),
            linkedin: None,
        }]);
        let runner = DispatchRunner::new(
            ledger,
            Arc::new(source),
            Arc::new(MockDrafter::new()),
            Arc::new(transport),
            Arc::new(StaticScheduleProvider::new(ScheduleConfig::default())),
            clock,
        );
        Admission::new(Arc::new(runner))
    }

    #[tokio::test]
    async fn test_second_start_is_busy() {
        let dir = TempDir::new().unwrap();
        let admission =
            admission(&dir, MockTransport::new().with_delay(Duration::from_millis(200)));

        let first = admission
            .try_start(Trigger::Manual, DispatchRequest::new(1))
            .await
            .unwrap();
        let second = admission
            .try_start(Trigger::Scheduled, DispatchRequest::new(1))
            .await;

        match second {
            Err(DispatchError::Busy { active }) => assert_eq!(active, first.run_id),
            other => panic!("expected busy, got {other:?}"),
        }

        admission.wait_idle().await;
        assert!(!admission.is_running().await);
        assert!(matches!(
            admission.last_outcome().await,
            Some(DispatchOutcome::Completed(report)) if report.sent == 1
        ));

        // Slot frees up once the first run finishes
        admission
            .try_start(Trigger::Manual, DispatchRequest::new(1))
            .await
            .unwrap();
        admission.wait_idle().await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace() {
        let dir = TempDir::new().unwrap();
        let admission = admission(&dir, MockTransport::new().with_delay(Duration::from_secs(30)));

        admission
            .try_start(Trigger::Manual, DispatchRequest::new(1))
            .await
            .unwrap();

        assert!(admission.shutdown(Duration::from_millis(50)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!admission.is_running().await);
    }

    #[tokio::test]
    async fn test_shutdown_idle_is_noop() {
        let dir = TempDir::new().unwrap();
        let admission = admission(&dir, MockTransport::new());
        assert!(!admission.shutdown(Duration::from_millis(10)).await);
    }
}
