use crate::infra::{AppState, KioskState};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use hr_attendance::error::AppError;
use hr_attendance::session::Session;
use hr_attendance::workflows::attendance::{
    AttendancePipeline, AttendanceSaga, FlowKind, FormInput, IdentityToken, MatchOutcome,
    PipelineView, SagaOutcome, SlotError, SubmissionError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const PIPELINE_PATH: &str = "/api/v1/attendance/pipeline";

#[derive(Debug, Deserialize)]
pub(crate) struct StartRequest {
    pub(crate) company_id: String,
    pub(crate) employee_id: String,
    #[serde(default)]
    pub(crate) display_name: String,
    pub(crate) flow: FlowKind,
}

#[derive(Debug, Serialize)]
pub(crate) struct VerifyResponse {
    pub(crate) outcome: MatchOutcome,
    pub(crate) pipeline: PipelineView,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanResponse {
    pub(crate) token: IdentityToken,
    pub(crate) pipeline: PipelineView,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) outcome: SagaOutcome,
    pub(crate) message: String,
    /// The flow was replaced or cancelled while this submission was in flight.
    pub(crate) stale: bool,
    pub(crate) saga: AttendanceSaga,
    pub(crate) pipeline: PipelineView,
}

pub(crate) fn with_application_routes(state: KioskState) -> Router {
    attendance_router(state)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) fn attendance_router(state: KioskState) -> Router {
    Router::new()
        .route(
            PIPELINE_PATH,
            post(start_pipeline).get(pipeline_view).delete(cancel_pipeline),
        )
        .route(&format!("{PIPELINE_PATH}/verify"), post(verify_face))
        .route(&format!("{PIPELINE_PATH}/scan"), post(scan_identity))
        .route(&format!("{PIPELINE_PATH}/form"), patch(update_form))
        .route(&format!("{PIPELINE_PATH}/submit"), post(submit_form))
        .with_state(state)
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Replaces any running flow; the old one releases the camera before the new one opens it.
pub(crate) async fn start_pipeline(
    State(state): State<KioskState>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<PipelineView>), AppError> {
    let session = Session::new(
        request.company_id,
        request.employee_id,
        request.display_name,
    )?;

    if let Some(previous) = state.slot.retire().await {
        info!(previous, "replacing attendance pipeline");
    }
    let pipeline = AttendancePipeline::start(state.deps.clone(), session, request.flow).await?;
    let view = pipeline.view();
    state.slot.install(pipeline);

    Ok((StatusCode::CREATED, Json(view)))
}

pub(crate) async fn pipeline_view(
    State(state): State<KioskState>,
) -> Result<Json<PipelineView>, AppError> {
    let handle = state.slot.current()?;
    let pipeline = handle.pipeline().lock().await;
    Ok(Json(pipeline.view()))
}

pub(crate) async fn cancel_pipeline(
    State(state): State<KioskState>,
) -> Result<StatusCode, AppError> {
    state.slot.retire().await.ok_or(SlotError::Empty)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn verify_face(
    State(state): State<KioskState>,
) -> Result<Json<VerifyResponse>, AppError> {
    let handle = state.slot.current()?;
    let mut pipeline = handle.pipeline().lock().await;
    let outcome = pipeline.verify_face().await?;
    let view = pipeline.view();
    drop(pipeline);

    let outcome = state.slot.accept(handle.id(), outcome)?;
    Ok(Json(VerifyResponse {
        outcome,
        pipeline: view,
    }))
}

pub(crate) async fn scan_identity(
    State(state): State<KioskState>,
) -> Result<Json<ScanResponse>, AppError> {
    let handle = state.slot.current()?;
    let mut pipeline = handle.pipeline().lock().await;
    let token = pipeline.scan_identity().await?;
    let view = pipeline.view();
    drop(pipeline);

    let token = state.slot.accept(handle.id(), token)?;
    Ok(Json(ScanResponse {
        token,
        pipeline: view,
    }))
}

pub(crate) async fn update_form(
    State(state): State<KioskState>,
    Json(input): Json<FormInput>,
) -> Result<Json<PipelineView>, AppError> {
    let handle = state.slot.current()?;
    let mut pipeline = handle.pipeline().lock().await;
    pipeline.update_form(input)?;
    Ok(Json(pipeline.view()))
}

pub(crate) async fn submit_form(
    State(state): State<KioskState>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let handle = state.slot.current()?;
    let mut pipeline = handle.pipeline().lock().await;
    let saga = pipeline.submit().await?;
    let view = pipeline.view();
    drop(pipeline);

    // Remote writes already happened; the caller still has to learn what was recorded.
    if !state.slot.is_current(handle.id()) {
        warn!(
            pipeline = handle.id(),
            outcome = ?saga.outcome(),
            "submission finished after its pipeline was replaced"
        );
        return Ok((
            StatusCode::CONFLICT,
            Json(SubmitResponse {
                outcome: saga.outcome(),
                message: format!(
                    "This attendance flow was replaced while submitting. {}",
                    saga.user_message()
                ),
                stale: true,
                saga,
                pipeline: view,
            }),
        ));
    }

    Ok((
        submission_status(&saga),
        Json(SubmitResponse {
            outcome: saga.outcome(),
            message: saga.user_message(),
            stale: false,
            saga,
            pipeline: view,
        }),
    ))
}

fn submission_status(saga: &AttendanceSaga) -> StatusCode {
    match saga.outcome() {
        SagaOutcome::Completed => StatusCode::CREATED,
        SagaOutcome::EntryOnly => StatusCode::MULTI_STATUS,
        SagaOutcome::NothingRecorded => match saga.first_error() {
            Some(SubmissionError::Network { .. }) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        },
    }
}
