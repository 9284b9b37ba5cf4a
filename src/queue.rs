//! Recipient queue
//!
//! Ordered list of leads persisted as a JSON array. Email is the key
//! (case-insensitive); inserting a lead that already exists in any status is a
//! no-op reported as a duplicate.
//!
//! The queue is a projection: the ledger decides who was contacted, and
//! [`RecipientQueue::reconcile`] rebuilds queue statuses from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::dispatch::collaborators::{Recipient, RecipientSource, SourceError};
use crate::error::StorageError;
use crate::ledger::{Ledger, LedgerStatus};
use crate::store;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid lead: {0}")]
    InvalidLead(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Pending,
    Sent,
    Replied,
    Failed,
}

impl QueueStatus {
    /// Projection of a ledger status onto the queue, if it has one.
    pub fn from_ledger(status: LedgerStatus) -> Option<Self> {
        match status {
            LedgerStatus::Sent => Some(Self::Sent),
            LedgerStatus::Replied => Some(Self::Replied),
            LedgerStatus::FailedSend | LedgerStatus::FailedGeneration => Some(Self::Failed),
            LedgerStatus::Pending | LedgerStatus::Test => None,
        }
    }
}

/// Contact details supplied on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub first_name: String,
    pub email: String,
    #[serde(alias = "company_name")]
    pub company: String,
    #[serde(alias = "position")]
    pub role_hiring_for: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Lead {
    pub fn validate(&self) -> Result<(), QueueError> {
        let required = [
            ("first_name", &self.first_name),
            ("email", &self.email),
            ("company", &self.company),
            ("role_hiring_for", &self.role_hiring_for),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(QueueError::InvalidLead(format!("missing {field}")));
        }
        if !self.email.contains('@') {
            return Err(QueueError::InvalidLead(format!("malformed email '{}'", self.email)));
        }
        Ok(())
    }
}

/// A lead plus its outreach lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    #[serde(flatten)]
    pub lead: Lead,
    #[serde(default)]
    pub status: QueueStatus,
    pub added_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_used: Option<String>,
}

impl QueueEntry {
    pub fn email(&self) -> &str {
        &self.lead.email
    }

    fn matches(&self, email: &str) -> bool {
        self.lead.email.trim().eq_ignore_ascii_case(email.trim())
    }

    pub fn to_recipient(&self) -> Recipient {
        Recipient {
            email: self.lead.email.trim().to_string(),
            first_name: self.lead.first_name.clone(),
            company: self.lead.company.clone(),
            role: self.lead.role_hiring_for.clone(),
            linkedin: self.lead.linkedin.clone(),
        }
    }
}

/// Optional detail attached to a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusDetail {
    pub subject: Option<String>,
    pub error: Option<String>,
    pub template_used: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub duplicates: usize,
    pub invalid: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub sent: usize,
    pub replied: usize,
    pub failed: usize,
}

/// JSON-file-backed lead queue.
pub struct RecipientQueue {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl RecipientQueue {
    pub fn new(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in insertion order. A missing or corrupt file reads as empty.
    pub async fn all(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    pub async fn add_lead(&self, lead: Lead) -> Result<AddOutcome, QueueError> {
        lead.validate()?;

        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;

        if entries.iter().any(|e| e.matches(&lead.email)) {
            debug!(recipient = %lead.email, "Lead already queued");
            return Ok(AddOutcome::Duplicate);
        }

        entries.push(self.new_entry(lead));
        self.save(&entries)?;
        Ok(AddOutcome::Added)
    }

    /// Add many leads in one write. Duplicates are detected against the queue
    /// and within the batch; invalid leads are counted and skipped.
    pub async fn import_many(&self, leads: Vec<Lead>) -> Result<ImportSummary, QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let mut summary = ImportSummary::default();

        for lead in leads {
            if lead.validate().is_err() {
                summary.invalid += 1;
                continue;
            }
            if entries.iter().any(|e| e.matches(&lead.email)) {
                summary.duplicates += 1;
                continue;
            }
            entries.push(self.new_entry(lead));
            summary.imported += 1;
        }

        if summary.imported > 0 {
            self.save(&entries)?;
        }

        info!(
            imported = summary.imported,
            duplicates = summary.duplicates,
            invalid = summary.invalid,
            "Leads imported"
        );
        Ok(summary)
    }

    /// Update the first entry matching `email`. Returns `false` when no entry
    /// matches, which is not an error.
    pub async fn update_status(
        &self,
        email: &str,
        status: QueueStatus,
        detail: Option<StatusDetail>,
    ) -> Result<bool, QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let now = self.clock.now().with_timezone(&Utc);

        let Some(entry) = entries.iter_mut().find(|e| e.matches(email)) else {
            return Ok(false);
        };

        entry.status = status;
        entry.last_updated = now;
        if let Some(detail) = detail {
            if detail.subject.is_some() {
                entry.last_subject = detail.subject;
            }
            entry.last_error = detail.error;
            if detail.template_used.is_some() {
                entry.template_used = detail.template_used;
            }
        }

        self.save(&entries)?;
        Ok(true)
    }

    pub async fn pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|e| e.status == QueueStatus::Pending)
            .collect())
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let entries = self.all().await?;
        let mut stats = QueueStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Sent => stats.sent += 1,
                QueueStatus::Replied => stats.replied += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Drop every entry still `pending`; contacted entries stay as history.
    pub async fn clear_pending(&self) -> Result<usize, QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.status != QueueStatus::Pending);
        let removed = before - entries.len();

        if removed > 0 {
            self.save(&entries)?;
        }
        info!(removed, "Cleared pending leads");
        Ok(removed)
    }

    /// Remove a single lead by email.
    pub async fn remove(&self, email: &str) -> Result<bool, QueueError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let Some(index) = entries.iter().position(|e| e.matches(email)) else {
            return Ok(false);
        };
        entries.remove(index);
        self.save(&entries)?;
        Ok(true)
    }

    /// Rebuild entry statuses from the ledger's latest status per recipient.
    /// Returns the number of entries changed.
    pub async fn reconcile(&self, ledger: &Ledger) -> Result<usize, QueueError> {
        let latest = ledger.latest_statuses().await;

        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let now = self.clock.now().with_timezone(&Utc);
        let mut changed = 0;

        for entry in entries.iter_mut() {
            let projected = latest
                .get(&entry.lead.email.trim().to_lowercase())
                .and_then(|status| QueueStatus::from_ledger(*status));
            if let Some(status) = projected.filter(|s| *s != entry.status) {
                entry.status = status;
                entry.last_updated = now;
                changed += 1;
            }
        }

        if changed > 0 {
            self.save(&entries)?;
            info!(changed, "Queue reconciled with ledger");
        }
        Ok(changed)
    }

    fn new_entry(&self, lead: Lead) -> QueueEntry {
        let now = self.clock.now().with_timezone(&Utc);
        QueueEntry {
            lead,
            status: QueueStatus::Pending,
            added_at: now,
            last_updated: now,
            last_subject: None,
            last_error: None,
            template_used: None,
        }
    }

    fn load(&self) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(store::read_json_or_default(&self.path)?)
    }

    fn save(&self, entries: &[QueueEntry]) -> Result<(), QueueError> {
        Ok(store::write_json(&self.path, entries)?)
    }
}

#[async_trait]
impl RecipientSource for RecipientQueue {
    async fn load_recipients(&self) -> Result<Vec<Recipient>, SourceError> {
        let entries = self
            .all()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(entries.iter().map(QueueEntry::to_recipient).collect())
    }
}
