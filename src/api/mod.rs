//! Operator API
//!
//! JSON endpoints for manual dispatch, lead management, schedule editing, and
//! status. All handlers share one [`ApiState`].

pub mod error;
pub mod routes;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::config::{DispatchConfig, ScheduleProvider};
use crate::dispatch::Admission;
use crate::history::SendHistory;
use crate::ledger::Ledger;
use crate::queue::RecipientQueue;
use crate::scheduler::SchedulerStatus;

pub use error::ApiError;

/// State shared across handlers
pub struct ApiState {
    pub ledger: Arc<Ledger>,
    pub queue: Arc<RecipientQueue>,
    pub schedule: Arc<dyn ScheduleProvider>,
    pub admission: Arc<Admission>,
    pub history: Arc<SendHistory>,
    pub scheduler: Arc<RwLock<SchedulerStatus>>,
    pub clock: Arc<dyn Clock>,
    pub dispatch: DispatchConfig,
}

pub type SharedState = Arc<ApiState>;

/// Create the operator API router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        // Dispatch
        .route("/api/send-now", post(routes::api_send_now))
        .route("/api/send-history", get(routes::api_send_history))
        // Reporting
        .route("/api/stats", get(routes::api_stats))
        .route("/api/follow-ups", get(routes::api_follow_ups))
        // Leads
        .route("/api/queue", get(routes::api_queue))
        .route("/api/queue/stats", get(routes::api_queue_stats))
        .route("/api/leads", post(routes::api_add_lead))
        .route("/api/leads/import", post(routes::api_import_leads))
        .route("/api/leads/remove", post(routes::api_remove_lead))
        .route("/api/leads/clear-pending", post(routes::api_clear_pending))
        // Schedule
        .route(
            "/api/schedule",
            get(routes::api_get_schedule).post(routes::api_update_schedule),
        )
        .route("/api/scheduler/toggle", post(routes::api_toggle_scheduler))
        .route("/api/scheduler/status", get(routes::api_scheduler_status))
        // Health check
        .route("/health", get(routes::health))
        .with_state(state)
}
