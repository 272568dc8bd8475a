//! Job submission, status, artifact, and metadata endpoints.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use transcribe_common::model::{Instrument, JobId, JobOptions, Metadata, Source};

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/transcribe", post(submit_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/artifact/:filename", get(get_artifact))
        .route("/jobs/:job_id/metadata", get(get_metadata))
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub source: Source,
    pub instruments: Vec<String>,
    #[serde(default)]
    pub options: SubmitOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub vocal_substitute_program: Option<u8>,
    #[serde(default)]
    pub enable_tta: bool,
    #[serde(default)]
    pub enable_refiner: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: &'static str,
    pub websocket_url: String,
}

/// `POST /transcribe`: creates the job record and hands it to the
/// single worker loop (one job at a time per process). Unknown
/// instrument tags are silently ignored, per the external interface
/// contract; a request with no recognized tags is a 400.
async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Response> {
    let instruments: Vec<Instrument> = request
        .instruments
        .iter()
        .filter_map(|tag| Instrument::parse_tag(tag))
        .collect();
    if instruments.is_empty() {
        return Err(ApiError::BadRequest("no recognized instrument tags in request".to_string()));
    }

    let options = JobOptions {
        instruments,
        vocal_substitute_program: request.options.vocal_substitute_program.unwrap_or(0),
        enable_tta: request.options.enable_tta,
        enable_refiner: request.options.enable_refiner,
    };

    let job_id = uuid::Uuid::new_v4();
    state
        .job_store
        .create(job_id, request.source.clone(), options)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state
        .job_queue
        .enqueue(job_id, request.source)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body = SubmitResponse {
        job_id,
        status: "queued",
        websocket_url: format!("/jobs/{job_id}/stream"),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

async fn get_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> ApiResult<Response> {
    let record = state
        .job_store
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(record).into_response())
}

async fn get_metadata(State(state): State<AppState>, Path(job_id): Path<JobId>) -> ApiResult<Response> {
    let record = state
        .job_store
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    let metadata: Metadata = record.metadata;
    Ok(Json(metadata).into_response())
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((job_id, filename)): Path<(JobId, String)>,
) -> ApiResult<Response> {
    let instrument_tag = filename
        .strip_suffix(".mid")
        .ok_or_else(|| ApiError::BadRequest("artifact path must end in .mid".to_string()))?;
    let instrument = Instrument::parse_tag(instrument_tag)
        .ok_or_else(|| ApiError::BadRequest(format!("unrecognized instrument tag: {instrument_tag}")))?;

    let record = state
        .job_store
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    let artifact = record
        .artifacts
        .get(instrument.as_tag())
        .ok_or_else(|| ApiError::NotFound(format!("artifact for {instrument} not yet produced")))?;

    let bytes = tokio::fs::read(&artifact.midi_path)
        .await
        .map_err(|e| ApiError::NotFound(format!("artifact file missing: {e}")))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "audio/midi")
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(e.to_string()))?)
}
