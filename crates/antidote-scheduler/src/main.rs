//! Antidote Lesson Scheduler - live lab service
//!
//! This is the main entry point for the scheduler service. It runs the
//! lesson scheduler against the Kubernetes cluster, sweeps expired labs,
//! and provides a small HTTP API for enqueuing requests.
//!
//! # HTTP Endpoints
//!
//! ## Health & Readiness
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check (cluster API reachable)
//!
//! ## Live Lessons
//! - `GET /v1/livelessons` - List live labs
//! - `POST /v1/livelessons` - Request a new lab
//! - `GET /v1/livelessons/:lab_id` - Get a live lab
//! - `DELETE /v1/livelessons/:lab_id` - Tear down a lab
//! - `PUT /v1/livelessons/:lab_id/stage` - Move a lab to another stage
//! - `POST /v1/livelessons/:lab_id/verify` - Probe a lab's presentations
//!
//! ## GC Whitelist
//! - `GET /v1/gc-whitelist` - List exempt sessions
//! - `PUT /v1/gc-whitelist/:session_id` - Exempt a session from GC
//! - `DELETE /v1/gc-whitelist/:session_id` - Lift a session's exemption

use std::sync::Arc;

use antidote_core::{CoreError, Curriculum, LabId, LessonId, SessionId};
use antidote_scheduler::{
    Cluster, KubeCluster, LessonScheduleRequest, LessonScheduler, NetworkProber, Operation,
    SchedulerConfig, SchedulerError,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    scheduler: Arc<LessonScheduler>,
    cluster: Arc<KubeCluster>,
    requests: mpsc::Sender<LessonScheduleRequest>,
    curriculum: Arc<Curriculum>,
}

// ============================================================================
// Health Endpoints
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "antidote-scheduler",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.cluster.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "cluster unreachable")
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Error response format.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16(),
        }),
    )
        .into_response()
}

fn scheduler_error_response(e: &SchedulerError) -> Response {
    let status = match e {
        SchedulerError::Core(CoreError::LessonNotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::from_u16(e.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };
    error_response(status, e.to_string())
}

fn parse_lab_id(raw: &str) -> Result<LabId, Response> {
    raw.parse()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid lab ID: {e}")))
}

fn parse_session_id(raw: &str) -> Result<SessionId, Response> {
    raw.parse()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid session ID: {e}")))
}

/// Acknowledgement for an enqueued request.
#[derive(Debug, Serialize)]
struct AcceptedResponse {
    lab_id: LabId,
    operation: Operation,
}

async fn enqueue(state: &AppState, request: LessonScheduleRequest) -> Response {
    let accepted = AcceptedResponse {
        lab_id: request.uuid,
        operation: request.operation,
    };
    if state.requests.send(request).await.is_err() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Scheduler is not running");
    }
    tracing::info!(
        lab_id = %accepted.lab_id,
        operation = ?accepted.operation,
        "Enqueued schedule request via HTTP API"
    );
    (StatusCode::ACCEPTED, Json(accepted)).into_response()
}

/// Enqueue a follow-up request against an existing lab.
async fn enqueue_follow_up(
    state: &AppState,
    raw_lab_id: &str,
    operation: Operation,
    stage: Option<u32>,
) -> Response {
    let lab_id = match parse_lab_id(raw_lab_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let Some(lab) = state.scheduler.lab(&lab_id) else {
        return scheduler_error_response(&SchedulerError::LabNotFound(lab_id));
    };
    let stage = stage.unwrap_or(lab.current_stage);
    enqueue(state, lab.create_request.follow_up(operation, stage)).await
}

// ============================================================================
// Live Lesson Endpoints
// ============================================================================

/// Request body for a new lab.
#[derive(Debug, Deserialize)]
struct CreateLabRequest {
    lesson_id: LessonId,
    session_id: String,
    #[serde(default)]
    stage: u32,
}

/// Request body for a stage change.
#[derive(Debug, Deserialize)]
struct StageRequest {
    stage: u32,
}

/// GET /v1/livelessons
async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.list_live_lessons())
}

/// POST /v1/livelessons
async fn create_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateLabRequest>,
) -> Response {
    let session_id = match parse_session_id(&req.session_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let lesson = match state.curriculum.lesson(req.lesson_id) {
        Ok(lesson) => lesson,
        Err(e) => return scheduler_error_response(&SchedulerError::from(e)),
    };
    enqueue(
        &state,
        LessonScheduleRequest::create(lesson, session_id, req.stage),
    )
    .await
}

/// GET /v1/livelessons/:lab_id
async fn get_handler(State(state): State<AppState>, Path(lab_id): Path<String>) -> Response {
    let lab_id = match parse_lab_id(&lab_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.scheduler.live_lesson(&lab_id) {
        Some(live) => Json(live).into_response(),
        None => scheduler_error_response(&SchedulerError::LabNotFound(lab_id)),
    }
}

/// DELETE /v1/livelessons/:lab_id
async fn delete_handler(State(state): State<AppState>, Path(lab_id): Path<String>) -> Response {
    enqueue_follow_up(&state, &lab_id, Operation::Delete, None).await
}

/// PUT /v1/livelessons/:lab_id/stage
async fn stage_handler(
    State(state): State<AppState>,
    Path(lab_id): Path<String>,
    Json(req): Json<StageRequest>,
) -> Response {
    enqueue_follow_up(&state, &lab_id, Operation::Modify, Some(req.stage)).await
}

/// POST /v1/livelessons/:lab_id/verify
async fn verify_handler(State(state): State<AppState>, Path(lab_id): Path<String>) -> Response {
    enqueue_follow_up(&state, &lab_id, Operation::Verify, None).await
}

// ============================================================================
// GC Whitelist Endpoints
// ============================================================================

/// GET /v1/gc-whitelist
async fn whitelist_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.gc_whitelist())
}

/// PUT /v1/gc-whitelist/:session_id
async fn whitelist_add_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match parse_session_id(&session_id) {
        Ok(id) => {
            state.scheduler.add_session_to_gc_whitelist(id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(response) => response,
    }
}

/// DELETE /v1/gc-whitelist/:session_id
async fn whitelist_remove_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match parse_session_id(&session_id) {
        Ok(id) => {
            state.scheduler.remove_session_from_gc_whitelist(&id);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(response) => response,
    }
}

// ============================================================================
// Router
// ============================================================================

fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & readiness
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        // Live lessons
        .route("/v1/livelessons", get(list_handler).post(create_handler))
        .route("/v1/livelessons/:lab_id", get(get_handler).delete(delete_handler))
        .route("/v1/livelessons/:lab_id/stage", put(stage_handler))
        .route("/v1/livelessons/:lab_id/verify", post(verify_handler))
        // GC whitelist
        .route("/v1/gc-whitelist", get(whitelist_handler))
        .route(
            "/v1/gc-whitelist/:session_id",
            put(whitelist_add_handler).delete(whitelist_remove_handler),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,antidote=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Antidote Lesson Scheduler");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = SchedulerConfig::from_env();

    tracing::info!(
        lesson_ttl_secs = config.lesson_ttl.as_secs(),
        gc_interval_secs = config.gc_interval.as_secs(),
        disable_gc = config.disable_gc,
        domain = %config.domain,
        "Loaded scheduler configuration"
    );

    let curriculum = match std::env::var("CURRICULUM_PATH") {
        Ok(path) => {
            let curriculum = Curriculum::from_json_file(&path)?;
            tracing::info!(path = %path, lessons = curriculum.len(), "Loaded curriculum");
            curriculum
        }
        Err(_) => {
            tracing::warn!("CURRICULUM_PATH not set, no lessons can be scheduled");
            Curriculum::default()
        }
    };

    let cluster = Arc::new(KubeCluster::new().await?);
    let prober = Arc::new(NetworkProber::new(config.probe_timeout));

    let (request_tx, request_rx) = mpsc::channel(config.request_queue_depth);
    let (result_tx, mut result_rx) = mpsc::channel(config.request_queue_depth);

    let scheduler = Arc::new(LessonScheduler::new(
        config.clone(),
        cluster.clone(),
        prober,
        result_tx,
    ));

    // Start the scheduler; it fails fast if the cluster is unreachable
    let mut control_loop = tokio::spawn(Arc::clone(&scheduler).start(request_rx));

    // Log results; callers poll live lesson state over HTTP
    tokio::spawn(async move {
        while let Some(result) = result_rx.recv().await {
            match &result.error {
                None => tracing::info!(
                    lab_id = %result.uuid,
                    operation = ?result.operation,
                    "Schedule request completed"
                ),
                Some(failure) => tracing::warn!(
                    lab_id = %result.uuid,
                    operation = ?result.operation,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "Schedule request failed"
                ),
            }
        }
    });

    if config.disable_gc {
        tracing::warn!("Lab GC disabled");
    } else {
        tokio::spawn(Arc::clone(&scheduler).run_gc());
    }

    let state = AppState {
        scheduler,
        cluster,
        requests: request_tx,
        curriculum: Arc::new(curriculum),
    };
    let app = create_router(state);

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;

    tokio::select! {
        served = axum::serve(listener, app) => served?,
        stopped = &mut control_loop => {
            stopped??;
            tracing::warn!("Lesson scheduler stopped");
        }
    }

    Ok(())
}
