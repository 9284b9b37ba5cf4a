//! Manual dispatch request history
//!
//! Every operator "send now" request is recorded with its outcome, including
//! the ones that were refused, as `{"clicks": [...]}` in a JSON file.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::store;

/// Oldest requests are dropped past this many.
pub const MAX_CLICKS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickStatus {
    /// A dispatch was started
    Accepted,
    /// Another dispatch was running
    Busy,
    /// Nobody left to contact
    NoLeads,
    /// Count out of bounds
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendClick {
    pub timestamp: DateTime<Local>,
    pub count: u32,
    pub status: ClickStatus,
    /// The started run, or the run that was in the way
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendHistoryDoc {
    #[serde(default)]
    pub clicks: Vec<SendClick>,
}

pub struct SendHistory {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl SendHistory {
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

    pub async fn record(
        &self,
        count: u32,
        status: ClickStatus,
        run_id: Option<Uuid>,
    ) -> Result<SendClick, StorageError> {
        let _guard = self.lock.lock().await;
        let mut doc: SendHistoryDoc = store::read_json_or_default(&self.path)?;

        let click = SendClick {
            timestamp: self.clock.now(),
            count,
            status,
            run_id,
        };
        doc.clicks.push(click.clone());
        if doc.clicks.len() > MAX_CLICKS {
            let excess = doc.clicks.len() - MAX_CLICKS;
            doc.clicks.drain(..excess);
        }

        store::write_json(&self.path, &doc)?;
        Ok(click)
    }

    /// Oldest first. A missing or corrupt file reads as empty.
    pub async fn load(&self) -> Result<SendHistoryDoc, StorageError> {
        let _guard = self.lock.lock().await;
        store::read_json_or_default(&self.path)
    }
}
