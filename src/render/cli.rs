//! Renderer collaborator that shells out to an external renderer binary.
//!
//! The binary receives the map snapshot as a GeoJSON-carrying JSON document
//! and writes the rendered output to a file:
//!
//! ```text
//! <binary> --input <snapshot.json> --output <out.<ext>> --format <ext>
//! ```

use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{error::DomainError, types::OutputFormat};

use super::{MapRenderer, MapSnapshot};

#[derive(Debug, Clone)]
pub struct CliRenderer {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl CliRenderer {
    pub fn new(binary: PathBuf, work_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&work_dir)?;
        Ok(Self { binary, work_dir })
    }
}

#[async_trait]
impl MapRenderer for CliRenderer {
    async fn render(
        &self,
        snapshot: &MapSnapshot,
        format: OutputFormat,
    ) -> Result<Bytes, DomainError> {
        let started_at = Instant::now();

        let mut input_file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile_in(&self.work_dir)
            .map_err(|err| DomainError::render(format!("failed to stage snapshot: {err}")))?;
        let payload = serde_json::to_vec(snapshot)
            .map_err(|err| DomainError::render(format!("failed to encode snapshot: {err}")))?;
        input_file
            .write_all(&payload)
            .and_then(|()| input_file.flush())
            .map_err(|err| DomainError::render(format!("failed to stage snapshot: {err}")))?;

        let output_path = self
            .work_dir
            .join(format!("{}.{}", Uuid::new_v4(), format.extension()));

        // kill_on_drop so a timed-out render does not leave the engine running.
        let output = Command::new(&self.binary)
            .arg("--input")
            .arg(input_file.path())
            .arg("--output")
            .arg(&output_path)
            .arg("--format")
            .arg(format.extension())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = "render::cli",
                    map_id = %snapshot.map_id,
                    version = snapshot.version,
                    error = %err,
                    "failed to spawn renderer"
                );
                if err.kind() == ErrorKind::NotFound {
                    DomainError::render(format!(
                        "renderer binary `{}` not found",
                        self.binary.display()
                    ))
                } else {
                    DomainError::render(format!("failed to spawn renderer: {err}"))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = tokio::fs::remove_file(&output_path).await;
            return Err(DomainError::render(format!(
                "renderer exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|err| DomainError::render(format!("failed to read rendered output: {err}")))?;
        let _ = tokio::fs::remove_file(&output_path).await;

        info!(
            target = "render::cli",
            map_id = %snapshot.map_id,
            version = snapshot.version,
            format = %format,
            output_bytes = bytes.len(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "render completed"
        );

        Ok(Bytes::from(bytes))
    }
}
