//! Shared domain enumerations for the render pipeline.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a render job.
///
/// The only legal transitions are `Queued -> Running` (worker claim),
/// `Running -> Succeeded`, `Running -> Failed`, and `Queued -> Failed`
/// (cancellation before a claim). Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "Queued",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }

    /// Status label exposed on the client-facing surface.
    pub fn as_client_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "processing",
            JobState::Succeeded => "ready",
            JobState::Failed => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// Output formats the rendering engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Png,
    Svg,
    Pdf,
}

impl OutputFormat {
    /// File extension, also used as the wire name of the format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> mime_guess::mime::Mime {
        mime_guess::from_ext(self.extension()).first_or_octet_stream()
    }
}

impl TryFrom<&str> for OutputFormat {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "png" => Ok(OutputFormat::Png),
            "svg" => Ok(OutputFormat::Svg),
            "pdf" => Ok(OutputFormat::Pdf),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
