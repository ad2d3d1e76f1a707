//! Job entities and the render-job state machine.
//!
//! A [`JobRecord`] is one asynchronous unit of render work. Its [`JobKey`] is
//! derived deterministically from the render target (map, format, content
//! version) so identical requests for the same map state collapse onto the
//! same key; the ledger guarantees at most one non-terminal job per key.

use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    error::DomainError,
    types::{JobState, OutputFormat},
};

/// Deduplication key for a render target.
///
/// `job_id` is the opaque handle returned to clients; the key is the
/// canonical dedup unit. The two must never be conflated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobKey(String);

impl JobKey {
    pub fn derive(map_id: &str, format: OutputFormat, version: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(map_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(format.extension().as_bytes());
        hasher.update([0u8]);
        hasher.update(version.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference into the artifact store, recorded on a succeeded job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactRef {
    pub map_id: String,
    pub format: OutputFormat,
    pub version: u64,
    /// Path relative to the artifact store root.
    pub stored_path: String,
    /// Hex-encoded SHA-256 of the payload.
    pub checksum: String,
    pub size_bytes: u64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub key: JobKey,
    pub map_id: String,
    pub format: OutputFormat,
    pub version: u64,
    pub state: JobState,
    pub created_at: OffsetDateTime,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    /// Present only when `state` is `Failed`.
    pub error: Option<String>,
    /// Present only when `state` is `Succeeded`.
    pub result_ref: Option<ArtifactRef>,
}

impl JobRecord {
    /// Create a fresh queued job for the given render target.
    pub fn queued(map_id: impl Into<String>, format: OutputFormat, version: u64) -> Self {
        let map_id = map_id.into();
        let key = JobKey::derive(&map_id, format, version);
        Self {
            id: Uuid::new_v4(),
            key,
            map_id,
            format,
            version,
            state: JobState::Queued,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            finished_at: None,
            error: None,
            result_ref: None,
        }
    }
}

/// A requested move through the state machine, carrying the data the target
/// state requires.
#[derive(Debug, Clone)]
pub enum JobTransition {
    /// Worker claims a queued job.
    Claim,
    /// Render completed; the artifact reference becomes the job result.
    Succeed { result: ArtifactRef },
    /// Render failed; the error text is retained on the job.
    Fail { error: String },
    /// Cancellation before a worker claim.
    Cancel { reason: String },
}

impl JobTransition {
    pub fn target_state(&self) -> JobState {
        match self {
            JobTransition::Claim => JobState::Running,
            JobTransition::Succeed { .. } => JobState::Succeeded,
            JobTransition::Fail { .. } | JobTransition::Cancel { .. } => JobState::Failed,
        }
    }

    /// Apply the transition to a job, enforcing the state machine.
    ///
    /// `Fail` is only legal from `Running` and `Cancel` only from `Queued`,
    /// even though both land on `Failed`.
    pub fn apply(self, job: &mut JobRecord) -> Result<(), DomainError> {
        let now = OffsetDateTime::now_utc();
        let illegal = |job: &JobRecord, to: JobState| DomainError::InvalidTransition {
            from: job.state,
            to,
        };

        match self {
            JobTransition::Claim => {
                if job.state != JobState::Queued {
                    return Err(illegal(job, JobState::Running));
                }
                job.state = JobState::Running;
                job.started_at = Some(now);
            }
            JobTransition::Succeed { result } => {
                if job.state != JobState::Running {
                    return Err(illegal(job, JobState::Succeeded));
                }
                job.state = JobState::Succeeded;
                job.finished_at = Some(now);
                job.result_ref = Some(result);
            }
            JobTransition::Fail { error } => {
                if job.state != JobState::Running {
                    return Err(illegal(job, JobState::Failed));
                }
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.error = Some(error);
            }
            JobTransition::Cancel { reason } => {
                if job.state != JobState::Queued {
                    return Err(illegal(job, JobState::Failed));
                }
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.error = Some(DomainError::cancelled(reason).to_string());
            }
        }

        Ok(())
    }
}
