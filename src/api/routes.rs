//! Operator API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::SharedState;
use crate::config::{ScheduleConfig, ScheduleOverrides};
use crate::dispatch::{DispatchError, DispatchOutcome, DispatchRequest, DispatchTicket, Trigger};
use crate::history::{ClickStatus, SendHistoryDoc};
use crate::ledger::{LedgerEntry, LedgerStats, TemplateStats};
use crate::queue::{AddOutcome, ImportSummary, Lead, QueueEntry, QueueStats};
use crate::scheduler::SchedulerStatus;

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

// === Dispatch ===

#[derive(Debug, Deserialize)]
pub struct SendNowRequest {
    #[serde(default = "default_send_count")]
    pub count: u32,
}

fn default_send_count() -> u32 {
    5
}

#[derive(Debug, Serialize)]
pub struct SendNowResponse {
    pub status: String,
    pub run_id: Uuid,
    pub message: String,
}

/// POST /api/send-now
///
/// Every request is appended to the send history, refused ones included.
pub async fn api_send_now(
    State(state): State<SharedState>,
    Json(req): Json<SendNowRequest>,
) -> ApiResult<(StatusCode, Json<SendNowResponse>)> {
    let max = state.dispatch.manual_max_count;
    if req.count < 1 || req.count > max {
        log_click(&state, req.count, ClickStatus::Invalid, None).await;
        return Err(ApiError::BadRequest(format!(
            "Count must be between 1 and {}",
            max
        )));
    }

    if let Some(active) = state.admission.active().await {
        log_click(&state, req.count, ClickStatus::Busy, Some(active.run_id)).await;
        return Err(busy(active.run_id));
    }

    let mut has_candidates = false;
    for entry in state.queue.all().await? {
        if !state.ledger.has_been_contacted(entry.email()).await {
            has_candidates = true;
            break;
        }
    }
    if !has_candidates {
        log_click(&state, req.count, ClickStatus::NoLeads, None).await;
        return Err(ApiError::BadRequest(
            "No uncontacted leads in the queue".to_string(),
        ));
    }

    let request = DispatchRequest::new(req.count)
        .with_delay(Duration::from_secs(state.dispatch.manual_delay_secs))
        .with_force(true)
        .with_test_mode(state.dispatch.test_mode);

    let ticket = match state.admission.try_start(Trigger::Manual, request).await {
        Ok(ticket) => ticket,
        Err(DispatchError::Busy { active }) => {
            log_click(&state, req.count, ClickStatus::Busy, Some(active)).await;
            return Err(busy(active));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };
    log_click(&state, req.count, ClickStatus::Accepted, Some(ticket.run_id)).await;

    info!(run_id = %ticket.run_id, count = req.count, "Manual dispatch requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(SendNowResponse {
            status: "started".to_string(),
            run_id: ticket.run_id,
            message: format!("Sending to the next {} pending leads", req.count),
        }),
    ))
}

fn busy(active: Uuid) -> ApiError {
    ApiError::Conflict {
        message: "A dispatch is already running".to_string(),
        active_run_id: Some(active),
    }
}

/// History is informational; a failed write never changes the response.
async fn log_click(state: &SharedState, count: u32, status: ClickStatus, run_id: Option<Uuid>) {
    if let Err(e) = state.history.record(count, status, run_id).await {
        warn!(error = %e, "Could not record send history");
    }
}

/// GET /api/send-history
pub async fn api_send_history(
    State(state): State<SharedState>,
) -> ApiResult<Json<SendHistoryDoc>> {
    state
        .history
        .load()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// === Reporting ===

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: LedgerStats,
    pub templates: BTreeMap<String, TemplateStats>,
    pub recent_activity: Vec<LedgerEntry>,
    pub last_dispatch: Option<DispatchOutcome>,
    pub current_time: DateTime<Local>,
}

/// GET /api/stats
pub async fn api_stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: state.ledger.stats().await,
        templates: state.ledger.template_stats().await,
        recent_activity: state.ledger.recent_activity(20).await,
        last_dispatch: state.admission.last_outcome().await,
        current_time: state.clock.now(),
    })
}

#[derive(Debug, Deserialize)]
pub struct FollowUpQuery {
    #[serde(default = "default_follow_up_days")]
    pub days: i64,
}

fn default_follow_up_days() -> i64 {
    3
}

#[derive(Debug, Serialize)]
pub struct FollowUpResponse {
    pub days: i64,
    pub count: usize,
    pub follow_ups: Vec<LedgerEntry>,
}

/// Largest accepted follow-up age.
pub const MAX_FOLLOW_UP_DAYS: i64 = 3650;

/// GET /api/follow-ups?days=N
pub async fn api_follow_ups(
    State(state): State<SharedState>,
    Query(query): Query<FollowUpQuery>,
) -> ApiResult<Json<FollowUpResponse>> {
    if !(0..=MAX_FOLLOW_UP_DAYS).contains(&query.days) {
        return Err(ApiError::BadRequest(format!(
            "days must be between 0 and {}",
            MAX_FOLLOW_UP_DAYS
        )));
    }

    let follow_ups = state.ledger.pending_follow_ups(query.days).await;
    Ok(Json(FollowUpResponse {
        days: query.days,
        count: follow_ups.len(),
        follow_ups,
    }))
}

// === Leads ===

/// GET /api/queue
pub async fn api_queue(State(state): State<SharedState>) -> ApiResult<Json<Vec<QueueEntry>>> {
    Ok(Json(state.queue.all().await?))
}

/// GET /api/queue/stats
pub async fn api_queue_stats(State(state): State<SharedState>) -> ApiResult<Json<QueueStats>> {
    Ok(Json(state.queue.stats().await?))
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

impl MessageResponse {
    fn success(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            status: "success".to_string(),
            message: message.into(),
        })
    }
}

/// POST /api/leads
pub async fn api_add_lead(
    State(state): State<SharedState>,
    Json(lead): Json<Lead>,
) -> ApiResult<Json<MessageResponse>> {
    let email = lead.email.trim().to_string();
    match state.queue.add_lead(lead).await? {
        AddOutcome::Added => Ok(MessageResponse::success(format!("Added {}", email))),
        AddOutcome::Duplicate => Err(ApiError::Conflict {
            message: format!("Lead {} already exists", email),
            active_run_id: None,
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub leads: Vec<Lead>,
}

/// POST /api/leads/import
pub async fn api_import_leads(
    State(state): State<SharedState>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportSummary>> {
    Ok(Json(state.queue.import_many(req.leads).await?))
}

#[derive(Debug, Deserialize)]
pub struct RemoveRequest {
    pub email: String,
}

/// POST /api/leads/remove
pub async fn api_remove_lead(
    State(state): State<SharedState>,
    Json(req): Json<RemoveRequest>,
) -> ApiResult<Json<MessageResponse>> {
    if state.queue.remove(&req.email).await? {
        Ok(MessageResponse::success(format!("Removed {}", req.email)))
    } else {
        Err(ApiError::NotFound(format!("Lead {} not found", req.email)))
    }
}

#[derive(Debug, Serialize)]
pub struct ClearPendingResponse {
    pub removed: usize,
}

/// POST /api/leads/clear-pending - drop pending leads, keep contacted history
pub async fn api_clear_pending(
    State(state): State<SharedState>,
) -> ApiResult<Json<ClearPendingResponse>> {
    let removed = state.queue.clear_pending().await?;
    Ok(Json(ClearPendingResponse { removed }))
}

// === Schedule ===

/// GET /api/schedule
pub async fn api_get_schedule(State(state): State<SharedState>) -> ApiResult<Json<ScheduleConfig>> {
    Ok(Json(state.schedule.load()?))
}

/// POST /api/schedule - merge the given fields into the saved schedule
pub async fn api_update_schedule(
    State(state): State<SharedState>,
    Json(overrides): Json<ScheduleOverrides>,
) -> ApiResult<Json<ScheduleConfig>> {
    let next = state.schedule.load()?.apply(overrides);
    next.validate()?;
    state.schedule.save(&next)?;

    info!(
        auto_enabled = next.auto_enabled,
        batch_size = next.batch_size,
        batch_interval = next.batch_interval,
        "Schedule updated"
    );
    Ok(Json(next))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// POST /api/scheduler/toggle
pub async fn api_toggle_scheduler(
    State(state): State<SharedState>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<Json<ScheduleConfig>> {
    let mut next = state.schedule.load()?;
    next.auto_enabled = req.enabled;
    state.schedule.save(&next)?;

    info!(enabled = req.enabled, "Auto-sending toggled");
    Ok(Json(next))
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatusResponse {
    pub scheduler: SchedulerStatus,
    pub active_dispatch: Option<DispatchTicket>,
    pub last_dispatch: Option<DispatchOutcome>,
    pub schedule: ScheduleConfig,
}

/// GET /api/scheduler/status
pub async fn api_scheduler_status(
    State(state): State<SharedState>,
) -> ApiResult<Json<SchedulerStatusResponse>> {
    Ok(Json(SchedulerStatusResponse {
        scheduler: state.scheduler.read().await.clone(),
        active_dispatch: state.admission.active().await,
        last_dispatch: state.admission.last_outcome().await,
        schedule: state.schedule.load()?,
    }))
}
