//! In-memory collaborators for tests and dry runs.
//!
//! `MockTransport` doubles as the test-mode transport when no relay is
//! configured.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::collaborators::*;

/// Drafter with configurable failures.
pub struct MockDrafter {
    fail_for: HashSet<String>,
    call_count: AtomicU32,
}

impl MockDrafter {
    pub fn new() -> Self {
        Self {
            fail_for: HashSet::new(),
            call_count: AtomicU32::new(0),
        }
    }

    /// Fail drafting for this address.
    pub fn failing_for(mut self, email: impl Into<String>) -> Self {
        self.fail_for.insert(email.into().to_lowercase());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockDrafter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Drafter for MockDrafter {
    async fn draft(&self, recipient: &Recipient) -> Result<Draft, DraftError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_for.contains(&recipient.email.to_lowercase()) {
            return Err(DraftError::Generation("mock drafter failure".to_string()));
        }

        Ok(Draft {
            subject: format!("Hello {}", recipient.company),
            body: format!("Hi {},", recipient.first_name),
            template_id: "mock".to_string(),
            attachment: None,
        })
    }
}

/// Transport that records deliveries instead of sending them.
pub struct MockTransport {
    fail_for: HashSet<String>,
    delay: Duration,
    sent: Mutex<Vec<String>>,
    call_count: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            fail_for: HashSet::new(),
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Reject delivery to this address.
    pub fn failing_for(mut self, email: impl Into<String>) -> Self {
        self.fail_for.insert(email.into().to_lowercase());
        self
    }

    /// Hold each send for `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Addresses delivered so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, recipient: &Recipient, _draft: &Draft) -> Result<(), SendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_for.contains(&recipient.email.to_lowercase()) {
            return Err(SendError::Rejected("mock transport failure".to_string()));
        }

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(recipient.email.clone());
        }
        Ok(())
    }
}

/// Reply poller returning a fixed list, or failing.
pub struct MockReplyPoller {
    replies: Vec<String>,
    available: AtomicBool,
    call_count: AtomicU32,
}

impl MockReplyPoller {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies,
            available: AtomicBool::new(true),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplyPoller for MockReplyPoller {
    async fn poll_replies(&self) -> Result<Vec<String>, ReplyPollError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            return Err(ReplyPollError::Unavailable("mock poller disabled".to_string()));
        }
        Ok(self.replies.clone())
    }
}

/// Recipient source backed by a fixed list.
pub struct StaticSource {
    recipients: Vec<Recipient>,
    available: bool,
}

impl StaticSource {
    pub fn new(recipients: Vec<Recipient>) -> Self {
        Self {
            recipients,
            available: true,
        }
    }

    /// A source whose every load fails.
    pub fn unavailable() -> Self {
        Self {
            recipients: Vec::new(),
            available: false,
        }
    }
}

#[async_trait]
impl RecipientSource for StaticSource {
    async fn load_recipients(&self) -> Result<Vec<Recipient>, SourceError> {
        if !self.available {
            return Err(SourceError::Unavailable("static source offline".to_string()));
        }
        Ok(self.recipients.clone())
    }
}
