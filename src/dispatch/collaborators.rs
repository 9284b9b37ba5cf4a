//! Collaborator seams for the dispatch runner.
//!
//! The runner only talks to drafting, delivery, reply detection, and the
//! recipient source through these traits. Production implementations live in
//! [`super::drafter`] and [`super::relay`]; test doubles in [`super::mock`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A lead as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
    pub company: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
}

/// A drafted message ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub subject: String,
    pub body: String,
    pub template_id: String,
    /// Opaque attachment reference understood by the transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft generation failed: {0}")]
    Generation(String),

    /// Template references a field the recipient lacks
    #[error("Missing field for template: {0}")]
    MissingField(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Relay answered but refused the message
    #[error("Send rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReplyPollError {
    #[error("Reply source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid reply response: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Recipient source unavailable: {0}")]
    Unavailable(String),
}

/// Produces a personalized message for one recipient.
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn draft(&self, recipient: &Recipient) -> Result<Draft, DraftError>;
}

/// Delivers a drafted message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &Recipient, draft: &Draft) -> Result<(), SendError>;
}

/// Reports addresses that have replied since they were contacted.
#[async_trait]
pub trait ReplyPoller: Send + Sync {
    async fn poll_replies(&self) -> Result<Vec<String>, ReplyPollError>;
}

/// Ordered candidate recipients for a dispatch run.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn load_recipients(&self) -> Result<Vec<Recipient>, SourceError>;
}
