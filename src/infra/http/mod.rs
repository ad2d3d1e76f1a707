pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/maps/{map_id}/render", post(handlers::submit_render))
        .route(
            "/maps/{map_id}/status/{version}/{format}",
            get(handlers::target_status),
        )
        .route(
            "/maps/{map_id}/artifacts/{artifact}",
            get(handlers::download_artifact),
        )
        .route("/jobs/{job_id}", get(handlers::job_status))
        .route("/jobs/{job_id}/cancel", post(handlers::cancel_job))
        .with_state(state)
}
