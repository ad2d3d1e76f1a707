use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while standing up the process's infrastructure: storage
/// roots, the renderer work area, the listener, telemetry, and startup files.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to prepare storage path `{path}`: {source}", path = .path.display())]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("telemetry initialization failed: {message}")]
    Telemetry { message: String },
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl InfraError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
