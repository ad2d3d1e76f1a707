use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{application::scheduler::SubmitOutcome, domain::jobs::JobRecord};

#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    /// Output format: `png`, `svg`, or `pdf`.
    pub format: String,
    /// Content version to render; defaults to the map's current version.
    pub version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub outcome: SubmitOutcome,
    #[serde(flatten)]
    pub job: JobStatusResponse,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub map_id: String,
    pub format: String,
    pub version: u64,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Download path, present once the job is ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<OffsetDateTime>,
}

impl JobStatusResponse {
    pub fn from_record(job: &JobRecord) -> Self {
        let url = job.result_ref.as_ref().map(|artifact| {
            format!(
                "/maps/{}/artifacts/{}.{}",
                artifact.map_id,
                artifact.version,
                artifact.format.extension()
            )
        });

        Self {
            job_id: job.id,
            map_id: job.map_id.clone(),
            format: job.format.extension().to_string(),
            version: job.version,
            status: job.state.as_client_str(),
            error: job.error.clone(),
            url,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}
