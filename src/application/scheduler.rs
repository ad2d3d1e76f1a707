//! The scheduler: turns render requests into deduplicated, idempotent jobs.
//!
//! `submit` is the single dispatch path. It resolves the requested content
//! version, derives the job key, and decides between three outcomes: reuse a
//! satisfied job (cache hit), attach to an in-flight job (coalesced), or
//! create and enqueue a new one. The lookup-then-insert runs under a submit
//! mutex; render work never holds it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::info;
use uuid::Uuid;

use crate::{
    application::{ledger::JobLedger, queue::WorkQueue},
    domain::{
        error::DomainError,
        jobs::{JobKey, JobRecord, JobTransition},
        types::{JobState, OutputFormat},
    },
    infra::artifacts::ArtifactStore,
    render::MapStore,
};

const METRIC_JOBS_SUBMITTED: &str = "mapforge_jobs_submitted_total";
const METRIC_JOBS_CACHE_HIT: &str = "mapforge_jobs_cache_hit_total";
const METRIC_JOBS_COALESCED: &str = "mapforge_jobs_coalesced_total";
const METRIC_JOBS_CANCELLED: &str = "mapforge_jobs_cancelled_total";

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a submit call was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A new job was created and enqueued.
    Created,
    /// An in-flight job for the same key was reused.
    Coalesced,
    /// A succeeded job with a live artifact was reused; nothing rendered.
    CacheHit,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub job: JobRecord,
    pub outcome: SubmitOutcome,
}

pub struct RenderScheduler {
    ledger: Arc<JobLedger>,
    artifacts: Arc<ArtifactStore>,
    maps: Arc<dyn MapStore>,
    queue: WorkQueue,
    submit_lock: Mutex<()>,
}

impl RenderScheduler {
    pub fn new(
        ledger: Arc<JobLedger>,
        artifacts: Arc<ArtifactStore>,
        maps: Arc<dyn MapStore>,
        queue: WorkQueue,
    ) -> Self {
        Self {
            ledger,
            artifacts,
            maps,
            queue,
            submit_lock: Mutex::new(()),
        }
    }

    /// Submit a render request for (map, format, version).
    ///
    /// `version = None` resolves to the map's current content version.
    pub async fn submit(
        &self,
        map_id: &str,
        format: OutputFormat,
        version: Option<u64>,
    ) -> Result<Submission, DomainError> {
        let version = match version {
            Some(version) => version,
            None => self.maps.current_version(map_id).await?,
        };
        let key = JobKey::derive(map_id, format, version);

        let _guard = self.submit_lock.lock().await;

        match self.ledger.find_by_key(&key) {
            Ok(existing) => match existing.state {
                JobState::Succeeded => {
                    // Only a cache hit while the artifact is still present;
                    // an evicted artifact means re-render.
                    if self.artifacts.exists(map_id, format, version).await {
                        counter!(METRIC_JOBS_CACHE_HIT).increment(1);
                        return Ok(Submission {
                            job: existing,
                            outcome: SubmitOutcome::CacheHit,
                        });
                    }
                }
                JobState::Queued | JobState::Running => {
                    counter!(METRIC_JOBS_COALESCED).increment(1);
                    return Ok(Submission {
                        job: existing,
                        outcome: SubmitOutcome::Coalesced,
                    });
                }
                JobState::Failed => {}
            },
            Err(DomainError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        let job = JobRecord::queued(map_id, format, version);
        let job_id = job.id;
        self.ledger.create(job.clone())?;
        self.queue
            .enqueue(job_id)
            .map_err(|err| DomainError::conflict(err.to_string()))?;
        counter!(METRIC_JOBS_SUBMITTED).increment(1);

        info!(
            target = "application::scheduler",
            job_id = %job_id,
            job_key = %job.key,
            map_id = %map_id,
            format = %format,
            version,
            "render job enqueued"
        );

        Ok(Submission {
            job,
            outcome: SubmitOutcome::Created,
        })
    }

    /// Current snapshot of a job. Pure read.
    pub fn status(&self, job_id: Uuid) -> Result<JobRecord, DomainError> {
        self.ledger.get(job_id)
    }

    /// Most recent job for a render target.
    pub fn status_by_target(
        &self,
        map_id: &str,
        format: OutputFormat,
        version: u64,
    ) -> Result<JobRecord, DomainError> {
        self.ledger
            .find_by_key(&JobKey::derive(map_id, format, version))
    }

    /// Best-effort cancellation: only a still-queued job is failed. A running
    /// or terminal job is returned unchanged; renders are not preemptible.
    pub fn cancel(&self, job_id: Uuid) -> Result<JobRecord, DomainError> {
        match self.ledger.update_state(
            job_id,
            JobTransition::Cancel {
                reason: "cancelled by client request".into(),
            },
        ) {
            Ok(job) => {
                counter!(METRIC_JOBS_CANCELLED).increment(1);
                info!(
                    target = "application::scheduler",
                    job_id = %job_id,
                    "queued job cancelled"
                );
                Ok(job)
            }
            Err(DomainError::InvalidTransition { .. }) => self.ledger.get(job_id),
            Err(err) => Err(err),
        }
    }

    /// Block until the job reaches a terminal state or the timeout elapses,
    /// returning the final snapshot.
    pub async fn wait_for_terminal(
        &self,
        job_id: Uuid,
        timeout: Duration,
    ) -> Result<JobRecord, DomainError> {
        let deadline = Instant::now() + timeout;

        loop {
            let job = self.ledger.get(job_id)?;
            if job.state.is_terminal() {
                return Ok(job);
            }
            if Instant::now() >= deadline {
                return Err(DomainError::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}
