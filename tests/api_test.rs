//! Operator API requests through the router without a socket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use common::Harness;
use outreach_controller::api::{create_router, ApiState};
use outreach_controller::config::DispatchConfig;
use outreach_controller::dispatch::mock::{MockDrafter, MockTransport};
use outreach_controller::scheduler::SchedulerStatus;
use outreach_controller::{Admission, LedgerEntry, LedgerStatus, ScheduleProvider, SendHistory};

struct TestApp {
    h: Harness,
    admission: Arc<Admission>,
    router: Router,
}

fn app(h: Harness) -> TestApp {
    let admission = Arc::new(Admission::new(Arc::new(h.runner())));
    let state = Arc::new(ApiState {
        ledger: h.ledger.clone(),
        queue: h.queue.clone(),
        schedule: h.schedule.clone(),
        admission: admission.clone(),
        history: Arc::new(SendHistory::new(
            h.dir.path().join("send_history.json"),
            h.clock.clone(),
        )),
        scheduler: Arc::new(RwLock::new(SchedulerStatus::default())),
        clock: h.clock.clone(),
        dispatch: DispatchConfig {
            manual_delay_secs: 0,
            ..Default::default()
        },
    });
    TestApp {
        h,
        admission,
        router: create_router(state),
    }
}

async fn request(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, parsed)
}

#[tokio::test]
async fn test_health() {
    let t = app(Harness::new(10, &[]).await);
    let (status, body) = request(&t.router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".into()));
}

#[tokio::test]
async fn test_send_now_count_bounds() {
    let t = app(Harness::new(10, &["a@x.test"]).await);

    for count in [0, 31] {
        let (status, body) =
            request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": count }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "count {count}");
        assert!(body["error"].as_str().unwrap().contains("between 1 and 30"));
    }
    assert!(t.h.ledger.is_empty().await);
}

#[tokio::test]
async fn test_send_now_starts_dispatch() {
    let t = app(Harness::new(10, &["a@x.test", "b@x.test"]).await);

    let (status, body) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["run_id"].is_string());

    t.admission.wait_idle().await;
    assert_eq!(t.h.transport.sent(), vec!["a@x.test"]);
}

#[tokio::test]
async fn test_send_now_conflict_while_running() {
    let h = Harness::with_collaborators(
        10,
        &["a@x.test", "b@x.test"],
        MockDrafter::new(),
        MockTransport::new().with_delay(Duration::from_millis(200)),
    )
    .await;
    let t = app(h);

    let (first, body) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(first, StatusCode::ACCEPTED);
    let run_id = body["run_id"].clone();

    let (second, body) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["active_run_id"], run_id);

    t.admission.wait_idle().await;
    assert_eq!(t.h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_send_now_without_pending_leads() {
    let t = app(Harness::new(10, &["a@x.test"]).await);
    t.h.ledger
        .record(LedgerEntry::new("a@x.test", "a Corp", LedgerStatus::Sent))
        .await
        .unwrap();

    let (status, _) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!t.admission.is_running().await);
}

#[tokio::test]
async fn test_add_duplicate_and_invalid_lead() {
    let t = app(Harness::new(10, &["a@x.test"]).await);
    let lead = json!({
        "first_name": "Ana",
        "email": "b@x.test",
        "company": "Beta",
        "role_hiring_for": "SRE"
    });

    let (status, _) = request(&t.router, Method::POST, "/api/leads", Some(lead.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(&t.router, Method::POST, "/api/leads", Some(lead)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = request(
        &t.router,
        Method::POST,
        "/api/leads",
        Some(json!({ "first_name": "X", "email": "not-an-email", "company": "C", "role_hiring_for": "R" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = request(&t.router, Method::GET, "/api/queue/stats", None).await;
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["pending"], 2);
}

#[tokio::test]
async fn test_import_remove_and_clear_pending() {
    let t = app(Harness::new(10, &["a@x.test"]).await);

    let (status, summary) = request(
        &t.router,
        Method::POST,
        "/api/leads/import",
        Some(json!({ "leads": [
            common::lead("a@x.test"),
            common::lead("b@x.test"),
            common::lead("c@x.test"),
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["imported"], 2);
    assert_eq!(summary["duplicates"], 1);

    let (status, _) = request(
        &t.router,
        Method::POST,
        "/api/leads/remove",
        Some(json!({ "email": "B@x.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = request(
        &t.router,
        Method::POST,
        "/api/leads/remove",
        Some(json!({ "email": "missing@x.test" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    t.h.queue
        .update_status("a@x.test", outreach_controller::QueueStatus::Sent, None)
        .await
        .unwrap();
    let (_, cleared) = request(&t.router, Method::POST, "/api/leads/clear-pending", None).await;
    assert_eq!(cleared["removed"], 1);

    let (_, queue) = request(&t.router, Method::GET, "/api/queue", None).await;
    let queue = queue.as_array().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0]["email"], "a@x.test");
}

#[tokio::test]
async fn test_schedule_update_validates_and_persists() {
    let t = app(Harness::new(10, &[]).await);

    let (status, body) = request(
        &t.router,
        Method::POST,
        "/api/schedule",
        Some(json!({ "batch_size": 10, "start_time": "2026-03-02 14:30" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch_size"], 10);
    assert_eq!(body["batch_interval"], 60);
    assert_eq!(t.h.schedule.load().unwrap().batch_size, 10);

    let (status, _) = request(
        &t.router,
        Method::POST,
        "/api/schedule",
        Some(json!({ "batch_size": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = request(
        &t.router,
        Method::POST,
        "/api/schedule",
        Some(json!({ "start_time": "tomorrow-ish" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(t.h.schedule.load().unwrap().batch_size, 10);

    let (status, body) = request(
        &t.router,
        Method::POST,
        "/api/scheduler/toggle",
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["auto_enabled"], true);

    let (status, body) = request(&t.router, Method::GET, "/api/scheduler/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["auto_enabled"], true);
    assert_eq!(body["scheduler"]["state"], "starting");
    assert!(body["active_dispatch"].is_null());
}

#[tokio::test]
async fn test_stats_and_follow_ups() {
    let t = app(Harness::new(10, &[]).await);
    t.h.ledger
        .record(LedgerEntry::new("old@x.test", "Old", LedgerStatus::Sent).with_template("intro"))
        .await
        .unwrap();
    t.h.clock.advance(chrono::Duration::days(4));
    t.h.ledger
        .record(LedgerEntry::new("new@x.test", "New", LedgerStatus::Sent).with_template("intro"))
        .await
        .unwrap();

    let (status, body) = request(&t.router, Method::GET, "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["sent"], 2);
    assert_eq!(body["templates"]["intro"]["total"], 2);
    assert_eq!(body["recent_activity"][0]["email"], "new@x.test");

    let (_, body) = request(&t.router, Method::GET, "/api/follow-ups", None).await;
    assert_eq!(body["days"], 3);
    assert_eq!(body["count"], 1);
    assert_eq!(body["follow_ups"][0]["email"], "old@x.test");

    let (_, body) = request(&t.router, Method::GET, "/api/follow-ups?days=7", None).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_follow_ups_rejects_out_of_range_days() {
    let t = app(Harness::new(10, &[]).await);
    t.h.ledger
        .record(LedgerEntry::new("a@x.test", "A", LedgerStatus::Sent))
        .await
        .unwrap();

    for days in ["1000000000", "-1", "9223372036854775807"] {
        let (status, body) =
            request(&t.router, Method::GET, &format!("/api/follow-ups?days={days}"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "days {days}");
        assert!(body["error"].as_str().unwrap().contains("between 0 and"));
    }

    let (status, body) = request(&t.router, Method::GET, "/api/follow-ups?days=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_send_history_records_every_request() {
    let t = app(Harness::new(10, &["a@x.test"]).await);

    let (status, _) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, started) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    t.admission.wait_idle().await;

    // The only lead was just contacted
    let (status, _) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(&t.router, Method::GET, "/api/send-history", None).await;
    assert_eq!(status, StatusCode::OK);
    let clicks = body["clicks"].as_array().unwrap();
    let statuses: Vec<&str> = clicks.iter().map(|c| c["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["invalid", "accepted", "no_leads"]);
    assert_eq!(clicks[1]["run_id"], started["run_id"]);
    assert_eq!(clicks[1]["count"], 1);

    // Persisted for the next process
    let reopened = SendHistory::new(t.h.dir.path().join("send_history.json"), t.h.clock.clone());
    assert_eq!(reopened.load().await.unwrap().clicks.len(), 3);
}

#[tokio::test]
async fn test_send_history_records_busy_request() {
    let h = Harness::with_collaborators(
        10,
        &["a@x.test", "b@x.test"],
        MockDrafter::new(),
        MockTransport::new().with_delay(Duration::from_millis(200)),
    )
    .await;
    let t = app(h);

    let (_, started) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 1 }))).await;
    let (status, _) =
        request(&t.router, Method::POST, "/api/send-now", Some(json!({ "count": 2 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    t.admission.wait_idle().await;

    let (_, body) = request(&t.router, Method::GET, "/api/send-history", None).await;
    let clicks = body["clicks"].as_array().unwrap();
    assert_eq!(clicks.len(), 2);
    assert_eq!(clicks[1]["status"], "busy");
    assert_eq!(clicks[1]["count"], 2);
    assert_eq!(clicks[1]["run_id"], started["run_id"]);
}
