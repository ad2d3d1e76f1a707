//! End-to-end pipeline tests: scheduler, ledger, worker pool, and artifact
//! store wired together with a scripted renderer standing in for the
//! cartographic engine.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Mutex;

use mapforge::{
    application::{
        ledger::JobLedger,
        queue::work_queue,
        scheduler::{RenderScheduler, SubmitOutcome},
        worker::{RenderWorkerPool, WorkerContext},
    },
    domain::{
        error::DomainError,
        types::{JobState, OutputFormat},
    },
    infra::artifacts::ArtifactStore,
    render::{
        MapRenderer, MapSnapshot,
        store::{InMemoryMapStore, MapDocument},
    },
};

const WAIT: Duration = Duration::from_secs(5);

/// Renderer double: plays back scripted outcomes, then defaults to
/// rendering `"<map>:<version>:<format>"` as the payload. Optionally sleeps
/// before answering so tests can pin jobs in `Running`.
struct ScriptedRenderer {
    outcomes: Mutex<VecDeque<Result<Bytes, String>>>,
    delay: Option<Duration>,
    invocations: AtomicUsize,
}

impl ScriptedRenderer {
    fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            delay: None,
            invocations: AtomicUsize::new(0),
        }
    }

    fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    async fn script(&self, outcome: Result<Bytes, String>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MapRenderer for ScriptedRenderer {
    async fn render(
        &self,
        snapshot: &MapSnapshot,
        format: OutputFormat,
    ) -> Result<Bytes, DomainError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.outcomes.lock().await.pop_front() {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(message)) => Err(DomainError::render(message)),
            None => Ok(Bytes::from(format!(
                "{}:{}:{}",
                snapshot.map_id, snapshot.version, format
            ))),
        }
    }
}

struct Pipeline {
    scheduler: Arc<RenderScheduler>,
    artifacts: Arc<ArtifactStore>,
    renderer: Arc<ScriptedRenderer>,
    dir: tempfile::TempDir,
    _workers: RenderWorkerPool,
}

fn seed_map(store: &InMemoryMapStore, map_id: &str, versions: u64) {
    for _ in 0..versions {
        store.upsert(MapDocument {
            map_id: map_id.to_string(),
            name: "Kiezplan".to_string(),
            bbox: [13.3, 52.4, 13.5, 52.6],
            features: json!({"type": "FeatureCollection", "features": []}),
            style: json!({}),
        });
    }
}

fn pipeline_with(renderer: ScriptedRenderer, workers: usize) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).unwrap());
    let maps = Arc::new(InMemoryMapStore::new());
    seed_map(&maps, "m1", 3);

    let renderer = Arc::new(renderer);
    let ledger = Arc::new(JobLedger::new());
    let (queue, consumer) = work_queue();
    let scheduler = Arc::new(RenderScheduler::new(
        Arc::clone(&ledger),
        Arc::clone(&artifacts),
        maps.clone(),
        queue,
    ));

    let pool = RenderWorkerPool::spawn(
        workers,
        WorkerContext {
            ledger,
            artifacts: Arc::clone(&artifacts),
            maps,
            renderer: renderer.clone(),
            queue: consumer,
            render_timeout: Duration::from_secs(2),
        },
    );

    Pipeline {
        scheduler,
        artifacts,
        renderer,
        dir,
        _workers: pool,
    }
}

#[tokio::test]
async fn submit_renders_and_records_the_artifact() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);

    let submission = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();
    assert_eq!(submission.outcome, SubmitOutcome::Created);
    assert_eq!(submission.job.state, JobState::Queued);

    let job = pipeline
        .scheduler
        .wait_for_terminal(submission.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());

    let result = job.result_ref.expect("succeeded job carries a result ref");
    assert_eq!(result.map_id, "m1");
    assert_eq!(result.format, OutputFormat::Svg);
    assert_eq!(result.version, 3);

    let bytes = pipeline.artifacts.get(&result).await.unwrap();
    assert_eq!(bytes, Bytes::from_static(b"m1:3:svg"));
}

#[tokio::test]
async fn omitted_version_resolves_to_the_current_one() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);

    let submission = pipeline
        .scheduler
        .submit("m1", OutputFormat::Png, None)
        .await
        .unwrap();
    assert_eq!(submission.job.version, 3);
}

#[tokio::test]
async fn concurrent_identical_submits_render_exactly_once() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 4);

    let mut submits = Vec::new();
    for _ in 0..10 {
        let scheduler = Arc::clone(&pipeline.scheduler);
        submits.push(tokio::spawn(async move {
            scheduler.submit("m1", OutputFormat::Svg, Some(3)).await
        }));
    }

    let mut job_ids = Vec::new();
    let mut created = 0usize;
    for submit in submits {
        let submission = submit.await.unwrap().unwrap();
        if submission.outcome == SubmitOutcome::Created {
            created += 1;
        }
        job_ids.push(submission.job.id);
    }

    assert_eq!(created, 1, "only one submit may create a job");
    job_ids.dedup();
    assert_eq!(job_ids.len(), 1, "all submits share the in-flight job");

    pipeline
        .scheduler
        .wait_for_terminal(job_ids[0], WAIT)
        .await
        .unwrap();
    assert_eq!(pipeline.renderer.invocations(), 1);
}

#[tokio::test]
async fn succeeded_job_is_a_cache_hit_and_skips_the_renderer() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);

    let first = pipeline
        .scheduler
        .submit("m1", OutputFormat::Pdf, Some(3))
        .await
        .unwrap();
    pipeline
        .scheduler
        .wait_for_terminal(first.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(pipeline.renderer.invocations(), 1);

    let second = pipeline
        .scheduler
        .submit("m1", OutputFormat::Pdf, Some(3))
        .await
        .unwrap();
    assert_eq!(second.outcome, SubmitOutcome::CacheHit);
    assert_eq!(second.job.id, first.job.id);
    assert_eq!(pipeline.renderer.invocations(), 1);
}

#[tokio::test]
async fn evicted_artifact_forces_a_fresh_render() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);

    let first = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();
    let done = pipeline
        .scheduler
        .wait_for_terminal(first.job.id, WAIT)
        .await
        .unwrap();
    let result = done.result_ref.expect("succeeded job carries a result ref");
    assert_eq!(pipeline.renderer.invocations(), 1);

    // Evict the artifact out from under the succeeded job; the ledger entry
    // alone is no longer good enough for a cache hit.
    std::fs::remove_file(pipeline.dir.path().join(&result.stored_path)).unwrap();
    assert!(!pipeline.artifacts.exists("m1", OutputFormat::Svg, 3).await);

    let second = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();
    assert_eq!(second.outcome, SubmitOutcome::Created);
    assert_ne!(second.job.id, first.job.id);

    let redone = pipeline
        .scheduler
        .wait_for_terminal(second.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(redone.state, JobState::Succeeded);
    assert_eq!(pipeline.renderer.invocations(), 2);
}

#[tokio::test]
async fn failed_job_preserves_error_and_resubmit_renders_again() {
    let renderer = ScriptedRenderer::new();
    let pipeline = pipeline_with(renderer, 1);
    pipeline
        .renderer
        .script(Err("projection blew up".to_string()))
        .await;

    let first = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();
    let failed = pipeline
        .scheduler
        .wait_for_terminal(first.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(
        failed.error.as_deref().unwrap().contains("projection blew up"),
        "failure detail must survive: {:?}",
        failed.error
    );
    assert!(failed.result_ref.is_none());

    // A terminal failure never retries by itself; a fresh submit creates a
    // new job under the same key and does invoke the renderer.
    let second = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();
    assert_eq!(second.outcome, SubmitOutcome::Created);
    assert_ne!(second.job.id, first.job.id);
    assert_eq!(second.job.key, first.job.key);

    let retried = pipeline
        .scheduler
        .wait_for_terminal(second.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(retried.state, JobState::Succeeded);
    assert_eq!(pipeline.renderer.invocations(), 2);
}

#[tokio::test]
async fn render_timeout_fails_the_job_and_keeps_the_worker_alive() {
    // Wired by hand so the ceiling can be shorter than the renderer's delay.
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).unwrap());
    let maps = Arc::new(InMemoryMapStore::new());
    seed_map(&maps, "m1", 1);

    let renderer = Arc::new(ScriptedRenderer::with_delay(Duration::from_millis(200)));
    let ledger = Arc::new(JobLedger::new());
    let (queue, consumer) = work_queue();
    let scheduler = Arc::new(RenderScheduler::new(
        Arc::clone(&ledger),
        Arc::clone(&artifacts),
        maps.clone(),
        queue,
    ));
    let _workers = RenderWorkerPool::spawn(
        1,
        WorkerContext {
            ledger,
            artifacts,
            maps,
            renderer: renderer.clone(),
            queue: consumer,
            render_timeout: Duration::from_millis(50),
        },
    );

    let first = scheduler
        .submit("m1", OutputFormat::Png, Some(1))
        .await
        .unwrap();
    let failed = scheduler.wait_for_terminal(first.job.id, WAIT).await.unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.error.as_deref().unwrap().contains("timed out"));

    // The worker must survive a hung render and pick up the next job.
    let second = scheduler
        .submit("m1", OutputFormat::Svg, Some(1))
        .await
        .unwrap();
    let second_final = scheduler
        .wait_for_terminal(second.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(second_final.state, JobState::Failed);
    assert_eq!(renderer.invocations(), 2);
}

#[tokio::test]
async fn cancel_before_claim_fails_the_job_and_the_worker_skips_it() {
    // No workers yet: the job stays claimable until we decide.
    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::new(dir.path().to_path_buf()).unwrap());
    let maps = Arc::new(InMemoryMapStore::new());
    seed_map(&maps, "m1", 1);

    let renderer = Arc::new(ScriptedRenderer::new());
    let ledger = Arc::new(JobLedger::new());
    let (queue, consumer) = work_queue();
    let scheduler = Arc::new(RenderScheduler::new(
        Arc::clone(&ledger),
        Arc::clone(&artifacts),
        maps.clone(),
        queue,
    ));

    let submission = scheduler
        .submit("m1", OutputFormat::Svg, Some(1))
        .await
        .unwrap();
    let cancelled = scheduler.cancel(submission.job.id).unwrap();
    assert_eq!(cancelled.state, JobState::Failed);
    assert!(cancelled.error.as_deref().unwrap().contains("cancelled"));

    // Start the pool afterwards; the queued id is still in the channel but
    // the claim fails and nothing is rendered.
    let _workers = RenderWorkerPool::spawn(
        1,
        WorkerContext {
            ledger: Arc::clone(&ledger),
            artifacts,
            maps,
            renderer: renderer.clone(),
            queue: consumer,
            render_timeout: Duration::from_secs(2),
        },
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(renderer.invocations(), 0);
    assert_eq!(
        ledger.get(submission.job.id).unwrap().state,
        JobState::Failed
    );
}

#[tokio::test]
async fn cancel_on_running_or_terminal_jobs_changes_nothing() {
    let pipeline = pipeline_with(
        ScriptedRenderer::with_delay(Duration::from_millis(300)),
        1,
    );

    let submission = pipeline
        .scheduler
        .submit("m1", OutputFormat::Svg, Some(3))
        .await
        .unwrap();

    // Wait for the claim, then try to cancel mid-render.
    let running = wait_for_state(&pipeline.scheduler, submission.job.id, JobState::Running).await;
    assert_eq!(running.state, JobState::Running);
    let after_cancel = pipeline.scheduler.cancel(submission.job.id).unwrap();
    assert_eq!(after_cancel.state, JobState::Running);

    let done = pipeline
        .scheduler
        .wait_for_terminal(submission.job.id, WAIT)
        .await
        .unwrap();
    assert_eq!(done.state, JobState::Succeeded);

    // Terminal jobs are frozen too.
    let after_terminal_cancel = pipeline.scheduler.cancel(submission.job.id).unwrap();
    assert_eq!(after_terminal_cancel.state, JobState::Succeeded);
}

#[tokio::test]
async fn status_on_unknown_job_is_not_found() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);
    let err = pipeline.scheduler.status(uuid::Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

#[tokio::test]
async fn submit_for_unknown_map_is_not_found() {
    let pipeline = pipeline_with(ScriptedRenderer::new(), 1);
    let err = pipeline
        .scheduler
        .submit("no-such-map", OutputFormat::Svg, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
}

async fn wait_for_state(
    scheduler: &RenderScheduler,
    job_id: uuid::Uuid,
    state: JobState,
) -> mapforge::domain::jobs::JobRecord {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let job = scheduler.status(job_id).unwrap();
        if job.state == state || job.state.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
