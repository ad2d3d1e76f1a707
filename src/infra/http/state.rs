use std::sync::Arc;

use crate::{application::scheduler::RenderScheduler, infra::artifacts::ArtifactStore};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<RenderScheduler>,
    pub artifacts: Arc<ArtifactStore>,
}
