//! Outreach ledger
//!
//! Append-only JSONL record of every outreach attempt. The ledger is the
//! source of truth for "already contacted": a recipient with any `SENT` or
//! `REPLIED` entry is never contacted again for first contact.
//!
//! Entries are only ever appended, except for reply detection flipping a
//! `SENT` entry to `REPLIED`, which rewrites the file atomically.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::store;

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Pending,
    Sent,
    FailedSend,
    #[serde(alias = "FAILED_LLM")]
    FailedGeneration,
    Test,
    Replied,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::FailedSend => "FAILED_SEND",
            Self::FailedGeneration => "FAILED_GENERATION",
            Self::Test => "TEST",
            Self::Replied => "REPLIED",
        }
    }

    /// Statuses that mark a recipient as contacted.
    pub fn is_contacted(&self) -> bool {
        matches!(self, Self::Sent | Self::Replied)
    }

    pub fn is_failure(&self) -> bool {
        self.as_str().contains("FAILED")
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt. Recipients may have many entries over time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Utc>,
    pub email: String,
    pub company: String,
    pub status: LedgerStatus,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default)]
    pub template_used: Option<String>,
    /// What started the run that produced this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

impl LedgerEntry {
    /// Start a new entry; the timestamp is assigned by [`Ledger::record`].
    pub fn new(email: impl Into<String>, company: impl Into<String>, status: LedgerStatus) -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            email: email.into(),
            company: company.into(),
            status,
            subject: None,
            error: None,
            has_attachment: false,
            template_used: None,
            trigger: None,
            run_id: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_attachment(mut self, has_attachment: bool) -> Self {
        self.has_attachment = has_attachment;
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_used = Some(template_id.into());
        self
    }

    pub fn with_run(mut self, run_id: Uuid, trigger: impl Into<String>) -> Self {
        self.run_id = Some(run_id);
        self.trigger = Some(trigger.into());
        self
    }

    fn matches(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

/// Aggregate counts for the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub replied: usize,
}

/// Per-template performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateStats {
    pub total: usize,
    pub sent: usize,
    pub replied: usize,
    /// Percentage of sent messages that got a reply
    pub reply_rate: f64,
}

struct LedgerInner {
    entries: Vec<LedgerEntry>,
    /// The file ends in a torn line; the next append must start a fresh one
    needs_newline: bool,
}

/// JSONL-backed attempt ledger.
pub struct Ledger {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    bypass: HashSet<String>,
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// Open (or create on first append) the ledger at `path`.
    ///
    /// Lines that fail to parse are skipped with a warning; only I/O failures
    /// are errors.
    pub fn open(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        bypass: impl IntoIterator<Item = String>,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let (entries, needs_newline) = load_entries(&path)?;

        info!(path = %path.display(), entries = entries.len(), "Ledger opened");

        Ok(Self {
            path,
            clock,
            bypass: bypass.into_iter().map(|e| e.trim().to_lowercase()).collect(),
            inner: Mutex::new(LedgerInner { entries, needs_newline }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an attempt stamped with the current time.
    ///
    /// Timestamps never go backwards relative to the previous entry.
    pub async fn record(&self, mut entry: LedgerEntry) -> Result<LedgerEntry, StorageError> {
        let mut inner = self.inner.lock().await;

        let now = self.clock.now().with_timezone(&Utc);
        entry.timestamp = match inner.entries.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        if inner.needs_newline {
            line.insert(0, '\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StorageError::io(&self.path, e))?;
        file.sync_data().map_err(|e| StorageError::io(&self.path, e))?;

        inner.needs_newline = false;
        inner.entries.push(entry.clone());

        debug!(recipient = %entry.email, status = %entry.status, "Ledger entry recorded");
        Ok(entry)
    }

    /// Flip the most recent `SENT` entry for `email` to `REPLIED`.
    ///
    /// Returns `false` without writing when the recipient already replied or
    /// was never sent to.
    ///
    /// The rewrite starts from the file on disk, not the in-memory copy, so
    /// entries appended by anyone else since [`Ledger::open`] are kept.
    pub async fn mark_replied(&self, email: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;

        let (mut entries, needs_newline) = load_entries(&self.path)?;
        inner.entries = entries.clone();
        inner.needs_newline = needs_newline;

        if entries
            .iter()
            .any(|e| e.matches(email) && e.status == LedgerStatus::Replied)
        {
            return Ok(false);
        }

        let Some(index) = entries
            .iter()
            .rposition(|e| e.matches(email) && e.status == LedgerStatus::Sent)
        else {
            return Ok(false);
        };

        entries[index].status = LedgerStatus::Replied;
        self.rewrite(&entries)?;
        inner.entries = entries;
        inner.needs_newline = false;

        info!(recipient = %email, "Marked as replied");
        Ok(true)
    }

    /// Whether `email` has a `SENT` or `REPLIED` entry. Bypass-listed
    /// recipients are never considered contacted.
    pub async fn has_been_contacted(&self, email: &str) -> bool {
        if self.bypass.contains(&email.trim().to_lowercase()) {
            return false;
        }

        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .any(|e| e.matches(email) && e.status.is_contacted())
    }

    pub async fn stats(&self) -> LedgerStats {
        let inner = self.inner.lock().await;
        let mut stats = LedgerStats {
            total: inner.entries.len(),
            ..Default::default()
        };

        for entry in &inner.entries {
            match entry.status {
                LedgerStatus::Sent => stats.sent += 1,
                LedgerStatus::Replied => stats.replied += 1,
                status if status.is_failure() => stats.failed += 1,
                _ => {}
            }
        }

        stats
    }

    /// Newest entries first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<LedgerEntry> {
        let inner = self.inner.lock().await;
        inner.entries.iter().rev().take(limit).cloned().collect()
    }

    /// `SENT` entries at least `days` old with no reply yet. A threshold
    /// reaching past the representable calendar yields nothing.
    pub async fn pending_follow_ups(&self, days: i64) -> Vec<LedgerEntry> {
        let now = self.clock.now().with_timezone(&Utc);
        let Some(cutoff) = chrono::Duration::try_days(days).and_then(|age| now.checked_sub_signed(age))
        else {
            return Vec::new();
        };
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|e| e.status == LedgerStatus::Sent && e.timestamp <= cutoff)
            .cloned()
            .collect()
    }

    /// Messages that went out on the given local calendar day.
    pub async fn sent_on(&self, day: NaiveDate) -> u32 {
        let inner = self.inner.lock().await;
        inner
            .entries
            .iter()
            .filter(|e| e.status.is_contacted())
            .filter(|e| e.timestamp.with_timezone(&Local).date_naive() == day)
            .count() as u32
    }

    pub async fn template_stats(&self) -> BTreeMap<String, TemplateStats> {
        let inner = self.inner.lock().await;
        let mut stats: BTreeMap<String, TemplateStats> = BTreeMap::new();

        for entry in &inner.entries {
            let Some(template) = &entry.template_used else {
                continue;
            };
            let s = stats.entry(template.clone()).or_default();
            s.total += 1;
            match entry.status {
                LedgerStatus::Sent => s.sent += 1,
                LedgerStatus::Replied => s.replied += 1,
                _ => {}
            }
        }

        for s in stats.values_mut() {
            s.reply_rate = if s.sent > 0 {
                s.replied as f64 / s.sent as f64 * 100.0
            } else {
                0.0
            };
        }

        stats
    }

    /// Status of the newest entry per recipient, keyed by lowercased email.
    pub async fn latest_statuses(&self) -> HashMap<String, LedgerStatus> {
        let inner = self.inner.lock().await;
        let mut latest = HashMap::new();
        for entry in &inner.entries {
            latest.insert(entry.email.trim().to_lowercase(), entry.status);
        }
        latest
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn rewrite(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        store::write_atomic(&self.path, buf.as_bytes())
    }
}

fn load_entries(path: &Path) -> Result<(Vec<LedgerEntry>, bool), StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let needs_newline = !content.is_empty() && !content.ends_with('\n');
    let mut entries = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unreadable ledger line"
            ),
        }
    }

    Ok((entries, needs_newline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Local.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()))
    }

    fn open(dir: &TempDir, clock: Arc<ManualClock>, bypass: &[&str]) -> Ledger {
        Ledger::open(
            dir.path().join("outreach_log.jsonl"),
            clock,
            bypass.iter().map(|s| s.to_string()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sent_marks_contacted_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);

        assert!(!ledger.has_been_contacted("ada@example.com").await);
        ledger
            .record(LedgerEntry::new("Ada@Example.com", "Analytical", LedgerStatus::Sent))
            .await
            .unwrap();

        assert!(ledger.has_been_contacted("ada@example.com").await);
        assert!(ledger.has_been_contacted("ADA@EXAMPLE.COM").await);
    }

    #[tokio::test]
    async fn test_failed_and_test_entries_do_not_mark_contacted() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);

        for status in [LedgerStatus::FailedSend, LedgerStatus::FailedGeneration, LedgerStatus::Test] {
            ledger
                .record(LedgerEntry::new("grace@example.com", "Navy", status))
                .await
                .unwrap();
        }

        assert!(!ledger.has_been_contacted("grace@example.com").await);
    }

    #[tokio::test]
    async fn test_bypass_list_never_contacted() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &["Me@Example.com"]);

        ledger
            .record(LedgerEntry::new("me@example.com", "Self", LedgerStatus::Sent))
            .await
            .unwrap();

        assert!(!ledger.has_been_contacted("me@example.com").await);
    }

    #[tokio::test]
    async fn test_mark_replied_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);

        ledger
            .record(LedgerEntry::new("linus@example.com", "Kernel", LedgerStatus::FailedSend))
            .await
            .unwrap();
        ledger
            .record(LedgerEntry::new("linus@example.com", "Kernel", LedgerStatus::Sent))
            .await
            .unwrap();

        assert!(ledger.mark_replied("linus@example.com").await.unwrap());
        assert!(!ledger.mark_replied("linus@example.com").await.unwrap());

        let entries = ledger.recent_activity(10).await;
        let replied = entries.iter().filter(|e| e.status == LedgerStatus::Replied).count();
        assert_eq!(replied, 1);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, LedgerStatus::FailedSend);
    }

    #[tokio::test]
    async fn test_mark_replied_without_send_is_noop() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);

        ledger
            .record(LedgerEntry::new("x@example.com", "X", LedgerStatus::FailedGeneration))
            .await
            .unwrap();

        assert!(!ledger.mark_replied("x@example.com").await.unwrap());
        assert!(!ledger.mark_replied("nobody@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        {
            let ledger = open(&dir, clock.clone(), &[]);
            ledger
                .record(LedgerEntry::new("a@example.com", "A", LedgerStatus::Sent).with_template("t1"))
                .await
                .unwrap();
            ledger.mark_replied("a@example.com").await.unwrap();
            ledger
                .record(LedgerEntry::new("b@example.com", "B", LedgerStatus::Sent))
                .await
                .unwrap();
        }

        let reopened = open(&dir, clock, &[]);
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.has_been_contacted("a@example.com").await);
        assert_eq!(reopened.stats().await.replied, 1);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped_and_next_append_is_clean() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outreach_log.jsonl");
        let good = serde_json::to_string(
            &LedgerEntry::new("a@example.com", "A", LedgerStatus::Sent),
        )
        .unwrap();
        std::fs::write(&path, format!("{good}\n{{\"timestamp\": \"2026-")).unwrap();

        let clock = clock();
        let ledger = open(&dir, clock.clone(), &[]);
        assert_eq!(ledger.len().await, 1);

        ledger
            .record(LedgerEntry::new("b@example.com", "B", LedgerStatus::Sent))
            .await
            .unwrap();

        let reopened = open(&dir, clock, &[]);
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.has_been_contacted("b@example.com").await);
    }

    #[tokio::test]
    async fn test_stats_and_recent_activity() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let ledger = open(&dir, clock.clone(), &[]);

        let statuses = [
            ("a@example.com", LedgerStatus::Sent),
            ("b@example.com", LedgerStatus::FailedSend),
            ("c@example.com", LedgerStatus::FailedGeneration),
            ("d@example.com", LedgerStatus::Sent),
            ("e@example.com", LedgerStatus::Test),
        ];
        for (email, status) in statuses {
            ledger.record(LedgerEntry::new(email, "Co", status)).await.unwrap();
            clock.advance(Duration::seconds(1));
        }
        ledger.mark_replied("d@example.com").await.unwrap();

        let stats = ledger.stats().await;
        assert_eq!(stats, LedgerStats { total: 5, sent: 1, failed: 2, replied: 1 });

        let recent = ledger.recent_activity(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].email, "e@example.com");
        assert_eq!(recent[1].email, "d@example.com");
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let ledger = open(&dir, clock.clone(), &[]);

        let first = ledger
            .record(LedgerEntry::new("a@example.com", "A", LedgerStatus::Sent))
            .await
            .unwrap();
        clock.advance(Duration::minutes(-5));
        let second = ledger
            .record(LedgerEntry::new("b@example.com", "B", LedgerStatus::Sent))
            .await
            .unwrap();

        assert!(second.timestamp >= first.timestamp);
    }

    #[tokio::test]
    async fn test_pending_follow_ups_by_age() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let ledger = open(&dir, clock.clone(), &[]);

        ledger.record(LedgerEntry::new("old@example.com", "O", LedgerStatus::Sent)).await.unwrap();
        clock.advance(Duration::days(2));
        ledger.record(LedgerEntry::new("new@example.com", "N", LedgerStatus::Sent)).await.unwrap();
        clock.advance(Duration::days(1));

        let due = ledger.pending_follow_ups(3).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].email, "old@example.com");
    }

    #[tokio::test]
    async fn test_pending_follow_ups_out_of_range_threshold() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);
        ledger.record(LedgerEntry::new("a@example.com", "A", LedgerStatus::Sent)).await.unwrap();

        assert!(ledger.pending_follow_ups(1_000_000_000).await.is_empty());
        assert!(ledger.pending_follow_ups(i64::MAX).await.is_empty());
        assert!(ledger.pending_follow_ups(i64::MIN).await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_replied_keeps_entries_written_by_another_handle() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let first = open(&dir, clock.clone(), &[]);
        first
            .record(LedgerEntry::new("y@example.com", "Y", LedgerStatus::Sent))
            .await
            .unwrap();

        let second = open(&dir, clock.clone(), &[]);
        second
            .record(LedgerEntry::new("x@example.com", "X", LedgerStatus::Sent))
            .await
            .unwrap();

        assert!(first.mark_replied("y@example.com").await.unwrap());

        // The rewrite refreshed this handle too
        assert!(first.has_been_contacted("x@example.com").await);

        let reopened = open(&dir, clock, &[]);
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.has_been_contacted("x@example.com").await);
        assert_eq!(reopened.stats().await.replied, 1);
    }

    #[tokio::test]
    async fn test_sent_on_counts_local_day() {
        let dir = TempDir::new().unwrap();
        let clock = clock();
        let ledger = open(&dir, clock.clone(), &[]);

        ledger.record(LedgerEntry::new("a@example.com", "A", LedgerStatus::Sent)).await.unwrap();
        ledger.record(LedgerEntry::new("b@example.com", "B", LedgerStatus::FailedSend)).await.unwrap();
        clock.advance(Duration::days(1));
        ledger.record(LedgerEntry::new("c@example.com", "C", LedgerStatus::Sent)).await.unwrap();

        let today = clock.now().date_naive();
        assert_eq!(ledger.sent_on(today).await, 1);
        assert_eq!(ledger.sent_on(today - Duration::days(1)).await, 1);
    }

    #[tokio::test]
    async fn test_template_stats_reply_rate() {
        let dir = TempDir::new().unwrap();
        let ledger = open(&dir, clock(), &[]);

        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            ledger
                .record(LedgerEntry::new(email, "Co", LedgerStatus::Sent).with_template("warm"))
                .await
                .unwrap();
        }
        ledger.mark_replied("a@example.com").await.unwrap();

        let stats = ledger.template_stats().await;
        let warm = &stats["warm"];
        assert_eq!(warm.total, 3);
        assert_eq!(warm.sent, 2);
        assert_eq!(warm.replied, 1);
        assert!((warm.reply_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_legacy_failed_llm_status_parses() {
        let status: LedgerStatus = serde_json::from_str("\"FAILED_LLM\"").unwrap();
        assert_eq!(status, LedgerStatus::FailedGeneration);
        assert!(status.is_failure());
    }
}
