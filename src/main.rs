use std::{process, sync::Arc};

use tracing::{error, info};

use mapforge::{
    application::{
        error::AppError,
        ledger::JobLedger,
        queue::work_queue,
        scheduler::RenderScheduler,
        worker::{RenderWorkerPool, WorkerContext},
    },
    config,
    infra::{
        artifacts::ArtifactStore,
        error::InfraError,
        http::{ApiState, build_router},
        telemetry,
    },
    render::{
        cli::CliRenderer,
        store::{InMemoryMapStore, MapDocument},
    },
};

#[tokio::main]
async fn main() {
    let (cli, settings) = match config::load_with_cli() {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("mapforge: {err}");
            process::exit(1);
        }
    };

    if let Err(err) = telemetry::init(&settings.logging) {
        eprintln!("mapforge: {err}");
        process::exit(1);
    }

    let result = match cli.command {
        Some(config::Command::Serve(_)) | None => run_serve(settings).await,
    };

    if let Err(err) = result {
        error!(target = "main", error = %err, "mapforge terminated with error");
        process::exit(1);
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let artifacts = Arc::new(
        ArtifactStore::new(settings.storage.artifact_dir.clone())
            .map_err(|err| InfraError::storage(settings.storage.artifact_dir.clone(), err))?,
    );
    let maps = Arc::new(InMemoryMapStore::new());
    if let Some(path) = settings.storage.maps_file.as_ref() {
        let loaded = load_map_documents(path, &maps)?;
        info!(target = "main", maps = loaded, file = %path.display(), "map documents loaded");
    }

    let renderer = Arc::new(
        CliRenderer::new(
            settings.render.renderer_path.clone(),
            settings.render.work_dir.clone(),
        )
        .map_err(|err| InfraError::storage(settings.render.work_dir.clone(), err))?,
    );

    let ledger = Arc::new(JobLedger::new());
    let (queue, consumer) = work_queue();
    let scheduler = Arc::new(RenderScheduler::new(
        Arc::clone(&ledger),
        Arc::clone(&artifacts),
        maps.clone(),
        queue,
    ));

    let workers = RenderWorkerPool::spawn(
        settings.render.workers.get() as usize,
        WorkerContext {
            ledger,
            artifacts: Arc::clone(&artifacts),
            maps,
            renderer,
            queue: consumer,
            render_timeout: settings.render.timeout,
        },
    );

    let router = build_router(ApiState {
        scheduler,
        artifacts,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    info!(
        target = "main",
        addr = %settings.server.addr,
        workers = settings.render.workers.get(),
        "mapforge listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    // Dropping the scheduler closes the queue; workers drain and exit.
    info!(target = "main", "shutting down; draining render workers");
    tokio::time::timeout(settings.server.graceful_shutdown, workers.join())
        .await
        .map_err(|_| AppError::unexpected("render workers did not drain before the deadline"))?;

    Ok(())
}

fn load_map_documents(
    path: &std::path::Path,
    store: &InMemoryMapStore,
) -> Result<usize, AppError> {
    let raw = std::fs::read_to_string(path).map_err(|err| InfraError::storage(path, err))?;
    let documents: Vec<MapDocument> = serde_json::from_str(&raw).map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "invalid maps file `{}`: {err}",
            path.display()
        )))
    })?;

    let count = documents.len();
    for document in documents {
        store.upsert(document);
    }
    Ok(count)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "main", error = %err, "failed to listen for shutdown signal");
    }
}
