//! Web routes.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
};
use cadence_scheduler::{
    DailyPlan, InboundReply, LoopState, Phase, ScheduleStatus, SchedulerManager,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::WebError;

/// Shared state for the web server.
pub struct AppState {
    pub manager: Arc<SchedulerManager>,
}

/// Create the web router.
pub fn create_router(manager: Arc<SchedulerManager>) -> Router {
    let state = Arc::new(AppState { manager });

    Router::new()
        .route("/health", get(health))
        .route("/users", get(list_users))
        .route("/users/{user_id}/status", get(status))
        .route("/users/{user_id}/plan", get(plan))
        .route("/users/{user_id}/messages", post(message))
        .route("/users/{user_id}/resume", post(resume))
        .route("/users/{user_id}/schedule/{phase}", put(update_schedule))
        .route("/users/{user_id}/scheduler/start", post(start_scheduler))
        .route("/users/{user_id}/scheduler/stop", post(stop_scheduler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), WebError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "web server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "cadence",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn list_users(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "users": state.manager.users().await }))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: ScheduleStatus,
    scheduler: LoopState,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<StatusResponse>, WebError> {
    let status = state.manager.status(&user_id).await?;
    let scheduler = state.manager.loop_state(&user_id).await?;
    Ok(Json(StatusResponse { status, scheduler }))
}

#[derive(Serialize)]
struct PlanResponse {
    plan: Option<DailyPlan>,
}

async fn plan(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<PlanResponse>, WebError> {
    let plan = state.manager.plan(&user_id).await?;
    Ok(Json(PlanResponse { plan }))
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

async fn message(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<InboundReply>, WebError> {
    if request.text.trim().is_empty() {
        return Err(WebError::BadRequest("message text is empty".to_string()));
    }
    let reply = state.manager.handle_message(&user_id, &request.text).await?;
    Ok(Json(reply))
}

#[derive(Serialize)]
struct ResumeResponse {
    resumed: bool,
    interrupted_phase: Option<Phase>,
}

async fn resume(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<ResumeResponse>, WebError> {
    let context = state.manager.resume(&user_id).await?;
    Ok(Json(ResumeResponse {
        resumed: context.is_some(),
        interrupted_phase: context.map(|c| c.interrupted_phase),
    }))
}

#[derive(Deserialize)]
struct ScheduleRequest {
    time: String,
}

async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Path((user_id, phase)): Path<(String, String)>,
    Json(request): Json<ScheduleRequest>,
) -> Result<Json<ScheduleStatus>, WebError> {
    state
        .manager
        .update_schedule(&user_id, &phase, &request.time)
        .await?;
    Ok(Json(state.manager.status(&user_id).await?))
}

#[derive(Serialize)]
struct LifecycleResponse {
    changed: bool,
    scheduler: LoopState,
}

async fn start_scheduler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<LifecycleResponse>, WebError> {
    let changed = state.manager.start(&user_id).await?;
    let scheduler = state.manager.loop_state(&user_id).await?;
    Ok(Json(LifecycleResponse { changed, scheduler }))
}

async fn stop_scheduler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<LifecycleResponse>, WebError> {
    let changed = state.manager.stop(&user_id).await?;
    let scheduler = state.manager.loop_state(&user_id).await?;
    Ok(Json(LifecycleResponse { changed, scheduler }))
}
