//! The dispatch loop itself.

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::collaborators::{Drafter, Recipient, RecipientSource, ReplyPoller, Transport};
use super::{DispatchError, DispatchReport, DispatchRequest, StopReason, Trigger};
use crate::clock::Clock;
use crate::config::ScheduleProvider;
use crate::gate;
use crate::ledger::{Ledger, LedgerEntry, LedgerStatus};
use crate::queue::{QueueStatus, RecipientQueue, StatusDetail};

enum Attempt {
    Sent,
    Test,
    FailedSend,
    FailedGeneration,
}

/// Runs dispatch batches against a ledger and a set of collaborators.
///
/// The ledger is authoritative. The optional queue only mirrors outcomes for
/// display, so failures writing it are logged and otherwise ignored.
pub struct DispatchRunner {
    ledger: Arc<Ledger>,
    source: Arc<dyn RecipientSource>,
    drafter: Arc<dyn Drafter>,
    transport: Arc<dyn Transport>,
    replies: Option<Arc<dyn ReplyPoller>>,
    queue: Option<Arc<RecipientQueue>>,
    schedule: Arc<dyn ScheduleProvider>,
    clock: Arc<dyn Clock>,
}

impl DispatchRunner {
    pub fn new(
        ledger: Arc<Ledger>,
        source: Arc<dyn RecipientSource>,
        drafter: Arc<dyn Drafter>,
        transport: Arc<dyn Transport>,
        schedule: Arc<dyn ScheduleProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            source,
            drafter,
            transport,
            replies: None,
            queue: None,
            schedule,
            clock,
        }
    }

    pub fn with_reply_poller(mut self, poller: Arc<dyn ReplyPoller>) -> Self {
        self.replies = Some(poller);
        self
    }

    /// Mirror outcomes into this queue.
    pub fn with_queue(mut self, queue: Arc<RecipientQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Execute one batch.
    ///
    /// Per-recipient draft and send failures are recorded and the run moves
    /// on. A source that cannot be read or a ledger that cannot be appended
    /// to ends the run with an error.
    pub async fn run(
        &self,
        run_id: Uuid,
        trigger: Trigger,
        request: DispatchRequest,
    ) -> Result<DispatchReport, DispatchError> {
        let started_at = self.clock.now();
        info!(
            %run_id,
            trigger = %trigger,
            batch_size = request.batch_size,
            test_mode = request.test_mode,
            force = request.force_bypass_business_hours,
            "Dispatch started"
        );

        let mut report = DispatchReport {
            run_id,
            trigger,
            started_at,
            finished_at: started_at,
            attempted: 0,
            sent: 0,
            test: 0,
            failed_send: 0,
            failed_generation: 0,
            skipped: 0,
            replies_marked: 0,
            stop_reason: StopReason::Exhausted,
        };

        if request.check_replies {
            report.replies_marked = self.check_replies().await;
        }

        let recipients = self.source.load_recipients().await.map_err(|e| {
            error!(%run_id, error = %e, "Could not load recipients");
            e
        })?;
        debug!(%run_id, candidates = recipients.len(), "Recipients loaded");

        // Set by a success, slept off just before the next real attempt
        let mut delay_pending = false;
        for recipient in &recipients {
            if report.successes() >= request.batch_size {
                report.stop_reason = StopReason::BatchLimit;
                break;
            }

            if self.ledger.has_been_contacted(&recipient.email).await {
                report.skipped += 1;
                continue;
            }

            if delay_pending && !request.delay.is_zero() {
                debug!(%run_id, delay_secs = request.delay.as_secs(), "Pausing between sends");
                tokio::time::sleep(request.delay).await;
            }
            delay_pending = false;

            if let Some(reason) = self.restriction(&request).await {
                info!(%run_id, reason = ?reason, "Stopping dispatch");
                report.stop_reason = reason;
                break;
            }

            report.attempted += 1;
            let outcome = self.attempt(recipient, run_id, trigger, request.test_mode).await?;
            delay_pending = match outcome {
                Attempt::Sent => {
                    report.sent += 1;
                    true
                }
                Attempt::Test => {
                    report.test += 1;
                    true
                }
                Attempt::FailedSend => {
                    report.failed_send += 1;
                    false
                }
                Attempt::FailedGeneration => {
                    report.failed_generation += 1;
                    false
                }
            };
        }

        if report.stop_reason == StopReason::Exhausted && report.successes() >= request.batch_size {
            report.stop_reason = StopReason::BatchLimit;
        }

        report.finished_at = self.clock.now();
        info!(
            %run_id,
            sent = report.sent,
            test = report.test,
            failed_send = report.failed_send,
            failed_generation = report.failed_generation,
            skipped = report.skipped,
            stop_reason = ?report.stop_reason,
            "Dispatch finished"
        );
        Ok(report)
    }

    /// Mark replies reported by the poller. Poll failures are non-fatal.
    async fn check_replies(&self) -> u32 {
        let Some(poller) = &self.replies else {
            return 0;
        };

        let addresses = match poller.poll_replies().await {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(error = %e, "Reply check failed, continuing without it");
                return 0;
            }
        };

        let mut marked = 0;
        for email in addresses {
            match self.ledger.mark_replied(&email).await {
                Ok(true) => {
                    marked += 1;
                    self.project(&email, QueueStatus::Replied, None).await;
                }
                Ok(false) => {}
                Err(e) => warn!(email = %email, error = %e, "Failed to record reply"),
            }
        }

        if marked > 0 {
            info!(marked, "Replies recorded");
        }
        marked
    }

    /// Business-hours and daily-cap checks, re-read before every recipient.
    async fn restriction(&self, request: &DispatchRequest) -> Option<StopReason> {
        let schedule = match self.schedule.load() {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(error = %e, "Schedule unreadable, using defaults");
                Default::default()
            }
        };
        let now = self.clock.now().naive_local();

        if !request.force_bypass_business_hours && !gate::within_business_hours(now, &schedule) {
            return Some(StopReason::OutsideBusinessHours);
        }

        if let Some(cap) = schedule.daily_cap() {
            if self.ledger.sent_on(now.date()).await >= cap {
                return Some(StopReason::DailyCapReached);
            }
        }

        None
    }

    async fn attempt(
        &self,
        recipient: &Recipient,
        run_id: Uuid,
        trigger: Trigger,
        test_mode: bool,
    ) -> Result<Attempt, DispatchError> {
        let base = |status: LedgerStatus| {
            LedgerEntry::new(recipient.email.as_str(), recipient.company.as_str(), status)
                .with_run(run_id, trigger.as_str())
        };

        let draft = match self.drafter.draft(recipient).await {
            Ok(draft) => draft,
            Err(e) => {
                warn!(email = %recipient.email, error = %e, "Draft failed");
                self.ledger
                    .record(base(LedgerStatus::FailedGeneration).with_error(e.to_string()))
                    .await?;
                self.project(
                    &recipient.email,
                    QueueStatus::Failed,
                    Some(StatusDetail {
                        error: Some(e.to_string()),
                        ..Default::default()
                    }),
                )
                .await;
                return Ok(Attempt::FailedGeneration);
            }
        };

        let entry = |status: LedgerStatus| {
            base(status)
                .with_subject(draft.subject.as_str())
                .with_attachment(draft.attachment.is_some())
                .with_template(draft.template_id.as_str())
        };

        if test_mode {
            self.ledger.record(entry(LedgerStatus::Test)).await?;
            info!(email = %recipient.email, subject = %draft.subject, "Test mode, not sent");
            return Ok(Attempt::Test);
        }

        match self.transport.send(recipient, &draft).await {
            Ok(()) => {
                self.ledger.record(entry(LedgerStatus::Sent)).await?;
                info!(email = %recipient.email, company = %recipient.company, "Sent");
                self.project(
                    &recipient.email,
                    QueueStatus::Sent,
                    Some(StatusDetail {
                        subject: Some(draft.subject.clone()),
                        template_used: Some(draft.template_id.clone()),
                        ..Default::default()
                    }),
                )
                .await;
                Ok(Attempt::Sent)
            }
            Err(e) => {
                warn!(email = %recipient.email, error = %e, "Send failed");
                self.ledger
                    .record(entry(LedgerStatus::FailedSend).with_error(e.to_string()))
                    .await?;
                self.project(
                    &recipient.email,
                    QueueStatus::Failed,
                    Some(StatusDetail {
                        subject: Some(draft.subject.clone()),
                        error: Some(e.to_string()),
                        template_used: Some(draft.template_id.clone()),
                    }),
                )
                .await;
                Ok(Attempt::FailedSend)
            }
        }
    }

    async fn project(&self, email: &str, status: QueueStatus, detail: Option<StatusDetail>) {
        let Some(queue) = &self.queue else {
            return;
        };
        if let Err(e) = queue.update_status(email, status, detail).await {
            warn!(email = %email, error = %e, "Queue update failed");
        }
    }
}
