//! Collaborator boundaries of the render pipeline.
//!
//! The cartographic engine and the feature/style store are external systems;
//! the core only speaks to them through the [`MapRenderer`] and [`MapStore`]
//! traits. [`cli::CliRenderer`] shells out to a renderer binary and
//! [`store::InMemoryMapStore`] backs the server and tests.

pub mod cli;
pub mod store;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain::{error::DomainError, types::OutputFormat};

/// Immutable view of a map's features and style at one content version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub map_id: String,
    pub version: u64,
    pub name: String,
    /// `[min_lon, min_lat, max_lon, max_lat]` in WGS84.
    pub bbox: [f64; 4],
    /// GeoJSON FeatureCollection.
    pub features: serde_json::Value,
    pub style: serde_json::Value,
}

/// External cartographic rendering engine.
///
/// Treated as a pure, possibly slow, function of snapshot and format. The
/// worker bounds every invocation with a timeout.
#[async_trait]
pub trait MapRenderer: Send + Sync {
    async fn render(
        &self,
        snapshot: &MapSnapshot,
        format: OutputFormat,
    ) -> Result<Bytes, DomainError>;
}

/// Feature/style store collaborator.
///
/// Ownership of map documents lives outside the core; workers only read
/// version counters and immutable snapshots.
#[async_trait]
pub trait MapStore: Send + Sync {
    /// Current content version of a map, bumped on any feature or style change.
    async fn current_version(&self, map_id: &str) -> Result<u64, DomainError>;

    /// Snapshot of the map's features and style at a specific version.
    async fn snapshot(&self, map_id: &str, version: u64) -> Result<MapSnapshot, DomainError>;
}
