//! Route tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use cadence_scheduler::{
    ContentGenerator, ConversationMessage, ConversationState, FixedClock, Notifier, Phase,
    PhaseHandlers, SchedulerManager,
};
use cadence_web::create_router;
use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

fn at(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

struct SilentNotifier;

#[async_trait]
impl Notifier for SilentNotifier {
    async fn send(&self, _message: &str) -> bool {
        true
    }
}

struct EchoGenerator;

#[async_trait]
impl ContentGenerator for EchoGenerator {
    async fn generate(
        &self,
        phase: Phase,
        _conversation: &ConversationState,
        message: &str,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        Ok(format!("[{phase}] {message}"))
    }
}

fn handlers() -> PhaseHandlers {
    PhaseHandlers::for_every_phase(|phase, mut conversation: ConversationState| async move {
        conversation.push(ConversationMessage::assistant(
            format!("{phase} message"),
            phase,
            at(13, 30),
        ));
        Ok::<_, String>(conversation)
    })
}

fn app(dir: &TempDir) -> (Router, Arc<SchedulerManager>) {
    let manager = Arc::new(
        SchedulerManager::new(
            dir.path(),
            handlers(),
            Arc::new(SilentNotifier),
            Arc::new(EchoGenerator),
        )
        .with_clock(Arc::new(FixedClock::new(at(13, 30)))),
    );
    (create_router(Arc::clone(&manager)), manager)
}

async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, body) = send(router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "cadence");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_status_registers_user() {
    let dir = TempDir::new().unwrap();
    let (router, manager) = app(&dir);

    let (status, body) = send(router, Method::GET, "/users/alex/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_phase"], "morning_planning");
    assert_eq!(body["expected_phase"], "midday_checkin");
    assert_eq!(body["is_on_schedule"], false);
    assert_eq!(body["schedule"]["evening_checkin"], "18:00");
    assert_eq!(body["next_phase_info"]["phase"], "evening_checkin");
    assert_eq!(body["next_phase_info"]["minutes_until"], 270);
    assert_eq!(body["scheduler"], "stopped");

    assert_eq!(manager.users().await, vec!["alex".to_string()]);
}

#[tokio::test]
async fn test_invalid_user_id_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (router, manager) = app(&dir);

    let (status, body) = send(router, Method::GET, "/users/a%20b/status", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("a b"));
    assert!(manager.users().await.is_empty());
}

#[tokio::test]
async fn test_message_is_answered_as_interrupt() {
    let dir = TempDir::new().unwrap();
    let (router, manager) = app(&dir);

    let (status, body) = send(
        router.clone(),
        Method::POST,
        "/users/alex/messages",
        Some(json!({"text": "I'm stuck on the report"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "[morning_planning] I'm stuck on the report");
    assert_eq!(body["phase"], "morning_planning");
    assert_eq!(body["interrupted"], true);

    // The interrupt does not advance the phase
    let status = manager.status("alex").await.unwrap();
    assert_eq!(status.current_phase, Phase::MorningPlanning);

    let (status, body) = send(router.clone(), Method::POST, "/users/alex/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"resumed": true, "interrupted_phase": "morning_planning"}));

    let (_, body) = send(router, Method::POST, "/users/alex/resume", None).await;
    assert_eq!(body, json!({"resumed": false, "interrupted_phase": null}));
}

#[tokio::test]
async fn test_empty_message_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, _) = send(
        router,
        Method::POST,
        "/users/alex/messages",
        Some(json!({"text": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_plan_is_empty_for_new_user() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, body) = send(router, Method::GET, "/users/alex/plan", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"plan": null}));
}

#[tokio::test]
async fn test_update_schedule_persists_override() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, body) = send(
        router,
        Method::PUT,
        "/users/alex/schedule/midday_checkin",
        Some(json!({"time": "12:15"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["schedule"]["midday_checkin"], "12:15");

    let raw = std::fs::read_to_string(dir.path().join("users/alex/schedule.json")).unwrap();
    let saved: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(saved["midday_checkin"], "12:15");
    assert_eq!(saved["morning_planning"], "07:00");
}

#[tokio::test]
async fn test_update_schedule_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, _) = send(
        router.clone(),
        Method::PUT,
        "/users/alex/schedule/brunch",
        Some(json!({"time": "11:00"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        router,
        Method::PUT,
        "/users/alex/schedule/midday_checkin",
        Some(json!({"time": "25:99"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!dir.path().join("users/alex/schedule.json").exists());
}

#[tokio::test]
async fn test_scheduler_start_and_stop() {
    let dir = TempDir::new().unwrap();
    let (router, manager) = app(&dir);

    let (status, body) = send(
        router.clone(),
        Method::POST,
        "/users/alex/scheduler/start",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"changed": true, "scheduler": "running"}));

    let (_, body) = send(
        router.clone(),
        Method::POST,
        "/users/alex/scheduler/start",
        None,
    )
    .await;
    assert_eq!(body["changed"], false);

    let (status, body) = send(
        router.clone(),
        Method::POST,
        "/users/alex/scheduler/stop",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"changed": true, "scheduler": "stopped"}));

    let (_, body) = send(router, Method::GET, "/users", None).await;
    assert_eq!(body, json!({"users": ["alex"]}));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_unknown_user_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (router, _) = app(&dir);

    let (status, body) = send(router, Method::POST, "/users/sam/scheduler/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("sam"));
}
