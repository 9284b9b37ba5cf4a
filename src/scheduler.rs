//! Scheduler loop
//!
//! Re-reads the schedule every tick, asks the gate for a decision, and hands
//! due batches to [`Admission`]. Sleeps between ticks depend on the state:
//!
//! | State       | Next tick after          |
//! |-------------|--------------------------|
//! | Disabled    | `disabled_poll_secs`     |
//! | Waiting     | `waiting_poll_secs`      |
//! | Dispatching | `waiting_poll_secs`      |
//! | Blocked     | `waiting_poll_secs`      |
//! | Error       | `error_cooldown_secs`    |
//!
//! The last-run time lives in memory only, so a restart schedules the first
//! batch from the configured start time (or immediately) again.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{SchedulerConfig, ScheduleProvider};
use crate::dispatch::{
    Admission, DispatchError, DispatchOutcome, DispatchRequest, DispatchTicket, Trigger,
};
use crate::error::ConfigError;
use crate::gate::{self, GateDecision, RunSnapshot};
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Starting,
    Disabled,
    Waiting,
    Dispatching,
    Blocked,
    Error,
    Stopped,
}

/// Snapshot shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub message: String,
    pub next_run: Option<NaiveDateTime>,
    pub last_run: Option<NaiveDateTime>,
    pub last_check: Option<NaiveDateTime>,
    pub active_dispatch: Option<DispatchTicket>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            state: SchedulerState::Starting,
            message: "Scheduler starting".to_string(),
            next_run: None,
            last_run: None,
            last_check: None,
            active_dispatch: None,
        }
    }
}

pub struct SchedulerLoop {
    schedule: Arc<dyn ScheduleProvider>,
    ledger: Arc<Ledger>,
    admission: Arc<Admission>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    test_mode: bool,
    last_run: Mutex<Option<NaiveDateTime>>,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl SchedulerLoop {
    pub fn new(
        schedule: Arc<dyn ScheduleProvider>,
        ledger: Arc<Ledger>,
        admission: Arc<Admission>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedule,
            ledger,
            admission,
            clock,
            config,
            test_mode: false,
            last_run: Mutex::new(None),
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
        }
    }

    /// Scheduled runs record TEST entries instead of sending.
    pub fn with_test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Shared handle for readers outside the loop.
    pub fn status_handle(&self) -> Arc<RwLock<SchedulerStatus>> {
        self.status.clone()
    }

    /// Run the loop on a background task.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        SchedulerHandle { shutdown_tx, join }
    }

    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            disabled_poll_secs = self.config.disabled_poll_secs,
            waiting_poll_secs = self.config.waiting_poll_secs,
            "Scheduler started"
        );

        loop {
            let pause = match self.tick().await {
                Ok(pause) => pause,
                Err(e) => {
                    error!(error = %e, "Scheduler tick failed");
                    self.set_status(SchedulerState::Error, format!("Error: {}", e), None)
                        .await;
                    Duration::from_secs(self.config.error_cooldown_secs)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_rx.recv() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }

        self.set_status(SchedulerState::Stopped, "Scheduler stopped".to_string(), None)
            .await;
    }

    /// One evaluation. Returns how long to sleep before the next.
    pub async fn tick(&self) -> Result<Duration, ConfigError> {
        let now = self.clock.now().naive_local();
        let waiting_poll = Duration::from_secs(self.config.waiting_poll_secs);
        let active = self.admission.active().await;
        {
            let mut status = self.status.write().await;
            status.last_check = Some(now);
            status.active_dispatch = active.clone();
        }

        let schedule = self.schedule.load()?;

        if !schedule.auto_enabled {
            self.set_status(SchedulerState::Disabled, "Auto-sending disabled".to_string(), None)
                .await;
            return Ok(Duration::from_secs(self.config.disabled_poll_secs));
        }

        // Surface a bad start time but keep scheduling as if unset
        let start_warning = match schedule.start_at() {
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable start time");
                Some(e.to_string())
            }
        };
        // A failed run stays visible until the next one replaces it
        let last_failure = match self.admission.last_outcome().await {
            Some(DispatchOutcome::Failed { run_id, error }) => {
                Some(format!("last run {} failed: {}", run_id, error))
            }
            _ => None,
        };
        let notes: Vec<String> = [start_warning, last_failure].into_iter().flatten().collect();
        let annotate = |message: String| {
            if notes.is_empty() {
                message
            } else {
                format!("{} ({})", message, notes.join("; "))
            }
        };

        let last_run = *self.last_run.lock().await;
        let snapshot = RunSnapshot {
            last_run,
            active_dispatch: active.as_ref().map(|t| t.run_id),
        };
        let sent_today = self.ledger.sent_on(now.date()).await;

        match gate::evaluate(now, &schedule, &snapshot, sent_today) {
            GateDecision::Disabled => {
                self.set_status(SchedulerState::Disabled, "Auto-sending disabled".to_string(), None)
                    .await;
                Ok(Duration::from_secs(self.config.disabled_poll_secs))
            }
            GateDecision::Wait { until } => {
                let message = annotate(countdown(now, until));
                debug!(next_run = %until, "Waiting for next run");
                self.set_status(SchedulerState::Waiting, message, Some(until)).await;
                Ok(waiting_poll)
            }
            GateDecision::Blocked(reason) => {
                debug!(reason = %reason, "Scheduled run blocked");
                self.set_status(
                    SchedulerState::Blocked,
                    annotate(reason.to_string()),
                    Some(gate::next_run(now, &schedule, last_run)),
                )
                .await;
                Ok(waiting_poll)
            }
            GateDecision::RunNow { batch_size } => {
                let request = DispatchRequest::new(batch_size)
                    .with_delay(Duration::from_secs(schedule.delay_seconds))
                    .with_reply_check(self.config.check_replies)
                    .with_test_mode(self.test_mode);

                match self.admission.try_start(Trigger::Scheduled, request).await {
                    Ok(ticket) => {
                        *self.last_run.lock().await = Some(now);
                        info!(run_id = %ticket.run_id, batch_size, "Scheduled batch started");
                        {
                            let mut status = self.status.write().await;
                            status.last_run = Some(now);
                            status.active_dispatch = Some(ticket);
                        }
                        self.set_status(
                            SchedulerState::Dispatching,
                            format!("Running batch ({} emails)", batch_size),
                            Some(gate::next_run(now, &schedule, Some(now))),
                        )
                        .await;
                    }
                    Err(DispatchError::Busy { active }) => {
                        self.set_status(
                            SchedulerState::Blocked,
                            format!("Dispatch {} already in progress", active),
                            Some(now),
                        )
                        .await;
                    }
                    Err(e) => {
                        self.set_status(SchedulerState::Error, format!("Error: {}", e), None)
                            .await;
                        return Ok(Duration::from_secs(self.config.error_cooldown_secs));
                    }
                }
                Ok(waiting_poll)
            }
        }
    }

    async fn set_status(
        &self,
        state: SchedulerState,
        message: String,
        next_run: Option<NaiveDateTime>,
    ) {
        let mut status = self.status.write().await;
        status.state = state;
        status.message = message;
        status.next_run = next_run;
    }
}

/// Handle to a spawned scheduler loop.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

/// "Next run in 1h 5m at 2026-03-02 11:05"
fn countdown(now: NaiveDateTime, until: NaiveDateTime) -> String {
    let minutes = (until - now).num_minutes().max(0);
    format!(
        "Next run in {}h {}m at {}",
        minutes / 60,
        minutes % 60,
        until.format("%Y-%m-%d %H:%M")
    )
}
