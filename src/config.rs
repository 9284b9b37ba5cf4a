//! Controller and schedule configuration
//!
//! Two layers:
//! - [`ControllerConfig`]: TOML file read once at startup (paths, poll
//!   intervals, transport, API port).
//! - [`ScheduleConfig`]: the operator-editable JSON schedule, re-read through a
//!   [`ScheduleProvider`] on every gate evaluation so edits apply without a
//!   restart.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use crate::error::ConfigError;
use crate::store;

// =============================================================================
// Controller configuration (TOML)
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub drafting: DraftingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

impl ControllerConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the ledger, queue, and schedule files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_ledger_file")]
    pub ledger_file: String,

    #[serde(default = "default_queue_file")]
    pub queue_file: String,

    #[serde(default = "default_schedule_file")]
    pub schedule_file: String,

    /// Manual "send now" request history
    #[serde(default = "default_history_file")]
    pub history_file: String,
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(&self.queue_file)
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join(&self.schedule_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(&self.history_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ledger_file: default_ledger_file(),
            queue_file: default_queue_file(),
            schedule_file: default_schedule_file(),
            history_file: default_history_file(),
        }
    }
}

/// Scheduler loop timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Poll interval while auto-dispatch is disabled
    #[serde(default = "default_disabled_poll")]
    pub disabled_poll_secs: u64,

    /// Poll interval while waiting for the next run
    #[serde(default = "default_waiting_poll")]
    pub waiting_poll_secs: u64,

    /// Pause after a failed tick
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_secs: u64,

    /// Poll for replies at the start of scheduled runs
    #[serde(default = "default_true")]
    pub check_replies: bool,

    /// How long shutdown waits for an in-flight dispatch before aborting it
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            disabled_poll_secs: default_disabled_poll(),
            waiting_poll_secs: default_waiting_poll(),
            error_cooldown_secs: default_error_cooldown(),
            check_replies: true,
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound for manual "send now" requests
    #[serde(default = "default_manual_max")]
    pub manual_max_count: u32,

    /// Delay between messages for manual runs
    #[serde(default = "default_delay_seconds")]
    pub manual_delay_secs: u64,

    /// Recipients never treated as already contacted (test inboxes)
    #[serde(default)]
    pub bypass_recipients: Vec<String>,

    /// Record TEST entries instead of sending
    #[serde(default)]
    pub test_mode: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            manual_max_count: default_manual_max(),
            manual_delay_secs: default_delay_seconds(),
            bypass_recipients: Vec::new(),
            test_mode: false,
        }
    }
}

/// Template used by the built-in drafter. Placeholders: `{first_name}`,
/// `{company}`, `{role}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftingConfig {
    #[serde(default = "default_template_id")]
    pub template_id: String,

    #[serde(default = "default_subject")]
    pub subject: String,

    #[serde(default = "default_body")]
    pub body: String,

    /// Attachment reference passed through to the transport
    #[serde(default)]
    pub attachment: Option<String>,
}

impl Default for DraftingConfig {
    fn default() -> Self {
        Self {
            template_id: default_template_id(),
            subject: default_subject(),
            body: default_body(),
            attachment: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the mail relay; without it the controller runs in test mode
    #[serde(default)]
    pub relay_url: Option<String>,

    /// Bearer token for the relay
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_token: None,
            timeout_secs: default_transport_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            http_port: default_http_port(),
        }
    }
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_ledger_file() -> String { "outreach_log.jsonl".to_string() }
fn default_queue_file() -> String { "leads_queue.json".to_string() }
fn default_schedule_file() -> String { "schedule.json".to_string() }
fn default_history_file() -> String { "send_history.json".to_string() }
fn default_disabled_poll() -> u64 { 60 }
fn default_waiting_poll() -> u64 { 30 }
fn default_error_cooldown() -> u64 { 60 }
fn default_shutdown_grace() -> u64 { 120 }
fn default_true() -> bool { true }
fn default_manual_max() -> u32 { 30 }
fn default_delay_seconds() -> u64 { 30 }
fn default_template_id() -> String { "default".to_string() }
fn default_subject() -> String { "Interest in the {role} role at {company}".to_string() }
fn default_body() -> String {
    "Hi {first_name},\n\nI saw that {company} is hiring for {role} and would love to connect.\n".to_string()
}
fn default_transport_timeout() -> u64 { 30 }
fn default_bind() -> String { "127.0.0.1".to_string() }
fn default_http_port() -> u16 { 5001 }

// =============================================================================
// Schedule configuration (JSON, hot-reloadable)
// =============================================================================

/// Fully resolved schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub auto_enabled: bool,
    /// Operator start time, controller-local
    pub start_time: Option<String>,
    /// Minutes between automatic runs
    pub batch_interval: u32,
    /// Max sends per automatic run
    pub batch_size: u32,
    pub delay_seconds: u64,
    /// 0 disables the cap
    pub daily_limit: u32,
    pub business_hours_only: bool,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            auto_enabled: false,
            start_time: None,
            batch_interval: 60,
            batch_size: 5,
            delay_seconds: 30,
            daily_limit: 30,
            business_hours_only: false,
            start_hour: 9,
            end_hour: 17,
        }
    }
}

impl ScheduleConfig {
    /// Parsed start time. `Ok(None)` when unset or blank.
    pub fn start_at(&self) -> Result<Option<NaiveDateTime>, ConfigError> {
        match self.start_time.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_start_time(raw).map(Some),
        }
    }

    pub fn daily_cap(&self) -> Option<u32> {
        (self.daily_limit > 0).then_some(self.daily_limit)
    }

    /// Apply operator overrides on top of these settings.
    pub fn apply(&self, overrides: ScheduleOverrides) -> Self {
        let mut next = self.clone();
        if let Some(v) = overrides.auto_enabled { next.auto_enabled = v; }
        if let Some(v) = overrides.start_time { next.start_time = Some(v).filter(|s| !s.trim().is_empty()); }
        if let Some(v) = overrides.batch_interval { next.batch_interval = v; }
        if let Some(v) = overrides.batch_size { next.batch_size = v; }
        if let Some(v) = overrides.delay_seconds { next.delay_seconds = v; }
        if let Some(v) = overrides.daily_limit { next.daily_limit = v; }
        if let Some(v) = overrides.business_hours_only { next.business_hours_only = v; }
        if let Some(v) = overrides.start_hour { next.start_hour = v; }
        if let Some(v) = overrides.end_hour { next.end_hour = v; }
        next
    }

    /// Reject settings an operator should not be able to save.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be between 1 and 100, got {}",
                self.batch_size
            )));
        }
        if self.batch_interval == 0 {
            return Err(ConfigError::Invalid("batch_interval must be at least 1 minute".into()));
        }
        if self.end_hour > 24 || self.start_hour >= self.end_hour {
            return Err(ConfigError::Invalid(format!(
                "business hours must satisfy start_hour < end_hour <= 24, got {}-{}",
                self.start_hour, self.end_hour
            )));
        }
        self.start_at()?;
        Ok(())
    }
}

/// Persisted schedule document: every field optional, resolved against
/// [`ScheduleConfig::default`]. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_hours_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_hour: Option<u32>,
}

impl ScheduleOverrides {
    pub fn resolve(self) -> ScheduleConfig {
        ScheduleConfig::default().apply(self)
    }
}

impl From<&ScheduleConfig> for ScheduleOverrides {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            auto_enabled: Some(config.auto_enabled),
            start_time: config.start_time.clone(),
            batch_interval: Some(config.batch_interval),
            batch_size: Some(config.batch_size),
            delay_seconds: Some(config.delay_seconds),
            daily_limit: Some(config.daily_limit),
            business_hours_only: Some(config.business_hours_only),
            start_hour: Some(config.start_hour),
            end_hour: Some(config.end_hour),
        }
    }
}

/// Accepts `YYYY-MM-DD HH:MM[:SS]`, the `T`-separated form, or a bare date
/// (midnight).
pub fn parse_start_time(raw: &str) -> Result<NaiveDateTime, ConfigError> {
    let normalized = raw.trim().replace('T', " ");

    for format in ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Ok(parsed);
        }
    }

    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::StartTime(raw.to_string()))
}

/// Read/write access to the current schedule. Implementations must not cache:
/// every `load` reflects the latest saved settings.
pub trait ScheduleProvider: Send + Sync {
    fn load(&self) -> Result<ScheduleConfig, ConfigError>;
    fn save(&self, config: &ScheduleConfig) -> Result<(), ConfigError>;
}

/// Schedule stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileScheduleProvider {
    path: PathBuf,
}

impl FileScheduleProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScheduleProvider for FileScheduleProvider {
    fn load(&self) -> Result<ScheduleConfig, ConfigError> {
        let overrides: ScheduleOverrides = store::read_json_or_default(&self.path)?;
        Ok(overrides.resolve())
    }

    fn save(&self, config: &ScheduleConfig) -> Result<(), ConfigError> {
        store::write_json(&self.path, &ScheduleOverrides::from(config))?;
        Ok(())
    }
}

/// In-memory schedule, for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct StaticScheduleProvider {
    config: RwLock<ScheduleConfig>,
}

impl StaticScheduleProvider {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the current settings.
    pub fn set(&self, config: ScheduleConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl ScheduleProvider for StaticScheduleProvider {
    fn load(&self) -> Result<ScheduleConfig, ConfigError> {
        Ok(self.config.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, config: &ScheduleConfig) -> Result<(), ConfigError> {
        self.set(config.clone());
        Ok(())
    }
}
