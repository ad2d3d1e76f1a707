//! Client-facing surface: submit-and-poll over the scheduler, plus artifact
//! retrieval.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::{
    domain::{error::DomainError, types::OutputFormat},
    infra::artifacts::ArtifactStoreError,
};

use super::error::{ApiError, codes};
use super::models::{JobStatusResponse, RenderQuery, SubmitResponse};
use super::state::ApiState;

pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `POST /maps/{map_id}/render?format=F[&version=V]`
pub async fn submit_render(
    State(state): State<ApiState>,
    Path(map_id): Path<String>,
    Query(query): Query<RenderQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = parse_format(&query.format)?;

    let submission = state
        .scheduler
        .submit(&map_id, format, query.version)
        .await
        .map_err(map_submit_error)?;

    let response = SubmitResponse {
        outcome: submission.outcome,
        job: JobStatusResponse::from_record(&submission.job),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `GET /jobs/{job_id}`
pub async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .scheduler
        .status(job_id)
        .map_err(|_| ApiError::not_found("Unknown job"))?;
    Ok(Json(JobStatusResponse::from_record(&job)))
}

/// `GET /maps/{map_id}/status/{version}/{format}`
///
/// Status by render target. Falls back to the artifact store for targets
/// rendered before the current process started.
pub async fn target_status(
    State(state): State<ApiState>,
    Path((map_id, version, format)): Path<(String, u64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let format = parse_format(&format)?;

    match state.scheduler.status_by_target(&map_id, format, version) {
        Ok(job) => Ok(Json(JobStatusResponse::from_record(&job)).into_response()),
        Err(DomainError::NotFound { .. }) => {
            if state.artifacts.exists(&map_id, format, version).await {
                let body = serde_json::json!({
                    "map_id": map_id,
                    "format": format.extension(),
                    "version": version,
                    "status": "ready",
                    "url": format!("/maps/{map_id}/artifacts/{version}.{}", format.extension()),
                });
                Ok(Json(body).into_response())
            } else {
                Err(ApiError::not_found("No render recorded for this target"))
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// `GET /maps/{map_id}/artifacts/{version}.{format}`
pub async fn download_artifact(
    State(state): State<ApiState>,
    Path((map_id, artifact)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let (version, format) = parse_artifact_name(&artifact)?;

    // A live-but-unfinished job is "not ready", never "not found". Failed
    // jobs fall through: their artifact genuinely does not exist.
    if let Ok(job) = state.scheduler.status_by_target(&map_id, format, version)
        && !job.state.is_terminal()
    {
        return Err(ApiError::not_ready(Some(format!(
            "job {} is {}",
            job.id,
            job.state.as_client_str()
        ))));
    }

    let bytes = state
        .artifacts
        .get_target(&map_id, format, version)
        .await
        .map_err(|err| match err {
            ArtifactStoreError::NotFound => ApiError::not_found("Artifact not found"),
            other => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::SCHEDULER,
                "Failed to read artifact",
                Some(other.to_string()),
            ),
        })?;

    let mut response = bytes.into_response();
    if let Ok(value) = header::HeaderValue::from_str(format.mime_type().essence_str()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// `POST /jobs/{job_id}/cancel`
///
/// Best-effort: a queued job fails with a cancellation error; a running or
/// terminal job is returned unchanged.
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.scheduler.cancel(job_id).map_err(ApiError::from)?;
    Ok(Json(JobStatusResponse::from_record(&job)))
}

fn parse_format(raw: &str) -> Result<OutputFormat, ApiError> {
    OutputFormat::try_from(raw).map_err(|()| {
        ApiError::bad_request(
            "Unsupported output format",
            Some(format!("`{raw}` is not one of png, svg, pdf")),
        )
    })
}

/// Split `{version}.{format}` as used in artifact download paths.
fn parse_artifact_name(name: &str) -> Result<(u64, OutputFormat), ApiError> {
    let (version, extension) = name
        .rsplit_once('.')
        .ok_or_else(|| ApiError::bad_request("Malformed artifact name", None))?;
    let version = version
        .parse::<u64>()
        .map_err(|err| ApiError::bad_request("Malformed artifact version", Some(err.to_string())))?;
    let format = parse_format(extension)?;
    Ok((version, format))
}

fn map_submit_error(err: DomainError) -> ApiError {
    match err {
        DomainError::NotFound { .. } => ApiError::not_found("Unknown map"),
        other => other.into(),
    }
}
