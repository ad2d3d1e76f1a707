//! The worker pool: fixed set of consumers draining the work queue.
//!
//! Each worker claims a job through the ledger (exclusive), fetches the map
//! snapshot, invokes the rendering collaborator under the configured timeout,
//! writes the artifact, and finalises the ledger entry as the last step so a
//! job's outcome is never lost between render and record. Render failures are
//! data, not worker failures: the job goes to `Failed` with its error text
//! and the worker moves on. Nothing is ever retried automatically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::{ledger::JobLedger, queue::WorkConsumer},
    domain::{
        error::DomainError,
        jobs::{ArtifactRef, JobRecord, JobTransition},
    },
    infra::artifacts::{ArtifactStore, ArtifactStoreError},
    render::{MapRenderer, MapStore},
};

const METRIC_JOBS_SUCCEEDED: &str = "mapforge_jobs_succeeded_total";
const METRIC_JOBS_FAILED: &str = "mapforge_jobs_failed_total";
const METRIC_RENDER_MS: &str = "mapforge_render_ms";

/// Everything a worker needs, passed in at construction. The renderer handle
/// is an explicit dependency, never a process-wide singleton.
#[derive(Clone)]
pub struct WorkerContext {
    pub ledger: Arc<JobLedger>,
    pub artifacts: Arc<ArtifactStore>,
    pub maps: Arc<dyn MapStore>,
    pub renderer: Arc<dyn MapRenderer>,
    pub queue: WorkConsumer,
    pub render_timeout: Duration,
}

pub struct RenderWorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl RenderWorkerPool {
    /// Spawn `workers` consumers over the shared queue.
    pub fn spawn(workers: usize, context: WorkerContext) -> Self {
        let handles = (0..workers)
            .map(|worker_id| {
                let context = context.clone();
                tokio::spawn(run_worker(worker_id, context))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker to drain out after the queue closes.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(
                    target = "application::worker",
                    error = %err,
                    "worker task panicked"
                );
            }
        }
    }
}

async fn run_worker(worker_id: usize, context: WorkerContext) {
    info!(
        target = "application::worker",
        worker_id, "render worker started"
    );
    while let Some(job_id) = context.queue.dequeue().await {
        process_job(worker_id, &context, job_id).await;
    }
    info!(
        target = "application::worker",
        worker_id, "work queue closed; render worker exiting"
    );
}

async fn process_job(worker_id: usize, context: &WorkerContext, job_id: Uuid) {
    // Exclusive claim. A job cancelled while queued loses its claim here and
    // is simply skipped.
    let job = match context.ledger.update_state(job_id, JobTransition::Claim) {
        Ok(job) => job,
        Err(DomainError::InvalidTransition { from, .. }) => {
            info!(
                target = "application::worker",
                worker_id,
                job_id = %job_id,
                state = from.as_str(),
                "skipping unclaimable job"
            );
            return;
        }
        Err(err) => {
            warn!(
                target = "application::worker",
                worker_id,
                job_id = %job_id,
                error = %err,
                "failed to claim job"
            );
            return;
        }
    };

    let started_at = Instant::now();
    let outcome = render_job(context, &job).await;
    let elapsed_ms = started_at.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => {
            if let Err(err) = context
                .ledger
                .update_state(job_id, JobTransition::Succeed { result })
            {
                error!(
                    target = "application::worker",
                    worker_id,
                    job_id = %job_id,
                    error = %err,
                    "failed to record job success"
                );
                return;
            }
            // Counted only once the ledger agrees the job succeeded.
            histogram!(METRIC_RENDER_MS).record(elapsed_ms as f64);
            counter!(METRIC_JOBS_SUCCEEDED).increment(1);
            info!(
                target = "application::worker",
                worker_id,
                job_id = %job_id,
                map_id = %job.map_id,
                format = %job.format,
                version = job.version,
                elapsed_ms,
                "render job succeeded"
            );
        }
        Err(err) => {
            let message = err.to_string();
            if let Err(update_err) = context.ledger.update_state(
                job_id,
                JobTransition::Fail {
                    error: message.clone(),
                },
            ) {
                error!(
                    target = "application::worker",
                    worker_id,
                    job_id = %job_id,
                    error = %update_err,
                    "failed to record job failure"
                );
                return;
            }
            counter!(METRIC_JOBS_FAILED).increment(1);
            warn!(
                target = "application::worker",
                worker_id,
                job_id = %job_id,
                map_id = %job.map_id,
                format = %job.format,
                version = job.version,
                elapsed_ms,
                error = %message,
                "render job failed"
            );
        }
    }
}

async fn render_job(context: &WorkerContext, job: &JobRecord) -> Result<ArtifactRef, DomainError> {
    let snapshot = context.maps.snapshot(&job.map_id, job.version).await?;

    let rendered = match tokio::time::timeout(
        context.render_timeout,
        context.renderer.render(&snapshot, job.format),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            return Err(DomainError::Timeout {
                seconds: context.render_timeout.as_secs(),
            });
        }
    };

    context
        .artifacts
        .put(&job.map_id, job.format, job.version, rendered)
        .await
        .map_err(|err| match err {
            ArtifactStoreError::Conflict { path } => {
                DomainError::conflict(format!("artifact `{path}` already exists"))
            }
            ArtifactStoreError::NotFound => DomainError::not_found("artifact"),
            ArtifactStoreError::Io(err) => {
                DomainError::render(format!("failed to store artifact: {err}"))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use metrics_util::debugging::DebuggingRecorder;
    use serde_json::json;

    use crate::{
        application::queue::work_queue,
        domain::{
            jobs::JobKey,
            types::{JobState, OutputFormat},
        },
        render::{
            MapSnapshot,
            store::{InMemoryMapStore, MapDocument},
        },
    };

    /// Fails the job through the ledger mid-render, then reports success, so
    /// the worker's own `Succeed` update loses the race.
    struct SupersedingRenderer {
        ledger: Arc<JobLedger>,
    }

    #[async_trait::async_trait]
    impl MapRenderer for SupersedingRenderer {
        async fn render(
            &self,
            snapshot: &MapSnapshot,
            format: OutputFormat,
        ) -> Result<Bytes, DomainError> {
            let job = self
                .ledger
                .find_by_key(&JobKey::derive(&snapshot.map_id, format, snapshot.version))?;
            self.ledger.update_state(
                job.id,
                JobTransition::Fail {
                    error: "superseded by operator".into(),
                },
            )?;
            Ok(Bytes::from_static(b"late result"))
        }
    }

    #[test]
    fn success_metrics_require_the_ledger_to_record_the_success() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).unwrap());
                let maps = Arc::new(InMemoryMapStore::new());
                maps.upsert(MapDocument {
                    map_id: "m1".to_string(),
                    name: "Karte".to_string(),
                    bbox: [0.0, 0.0, 1.0, 1.0],
                    features: json!({"type": "FeatureCollection", "features": []}),
                    style: json!({}),
                });

                let ledger = Arc::new(JobLedger::new());
                let (_queue, consumer) = work_queue();
                let context = WorkerContext {
                    ledger: Arc::clone(&ledger),
                    artifacts,
                    maps,
                    renderer: Arc::new(SupersedingRenderer {
                        ledger: Arc::clone(&ledger),
                    }),
                    queue: consumer,
                    render_timeout: Duration::from_secs(2),
                };

                let job = JobRecord::queued("m1", OutputFormat::Svg, 1);
                let job_id = job.id;
                ledger.create(job).unwrap();

                process_job(0, &context, job_id).await;

                let record = ledger.get(job_id).unwrap();
                assert_eq!(record.state, JobState::Failed);
                assert_eq!(record.error.as_deref(), Some("superseded by operator"));
            });
        });

        let recorded: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();
        assert!(!recorded.contains(&METRIC_JOBS_SUCCEEDED.to_string()));
        assert!(!recorded.contains(&METRIC_RENDER_MS.to_string()));
    }
}
