//! In-memory map document store.
//!
//! The feature/style CRUD surface is outside the core; this store carries
//! just enough of it to resolve "latest" versions and hand workers immutable
//! snapshots. Every mutation bumps the map's content version, which is what
//! separates artifacts that must be re-rendered from those still valid.

use dashmap::DashMap;
use serde::Deserialize;

use crate::domain::error::DomainError;

use super::{MapSnapshot, MapStore};

/// Mutable document payload; versioning is the store's concern.
#[derive(Debug, Clone, Deserialize)]
pub struct MapDocument {
    pub map_id: String,
    pub name: String,
    pub bbox: [f64; 4],
    pub features: serde_json::Value,
    #[serde(default)]
    pub style: serde_json::Value,
}

#[derive(Debug)]
struct VersionedDocument {
    version: u64,
    document: MapDocument,
}

#[derive(Debug, Default)]
pub struct InMemoryMapStore {
    maps: DashMap<String, VersionedDocument>,
}

impl InMemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a map document, bumping its content version.
    ///
    /// Returns the version the document now carries.
    pub fn upsert(&self, document: MapDocument) -> u64 {
        let mut entry = self
            .maps
            .entry(document.map_id.clone())
            .or_insert_with(|| VersionedDocument {
                version: 0,
                document: document.clone(),
            });
        entry.version += 1;
        entry.document = document;
        entry.version
    }

}

#[async_trait::async_trait]
impl MapStore for InMemoryMapStore {
    async fn current_version(&self, map_id: &str) -> Result<u64, DomainError> {
        self.maps
            .get(map_id)
            .map(|entry| entry.version)
            .ok_or_else(|| DomainError::not_found("map"))
    }

    async fn snapshot(&self, map_id: &str, version: u64) -> Result<MapSnapshot, DomainError> {
        let entry = self
            .maps
            .get(map_id)
            .ok_or_else(|| DomainError::not_found("map"))?;

        // Only the current version is materialised; older snapshots are gone
        // once the document moves on.
        if entry.version != version {
            return Err(DomainError::not_found("map version"));
        }

        Ok(MapSnapshot {
            map_id: entry.document.map_id.clone(),
            version: entry.version,
            name: entry.document.name.clone(),
            bbox: entry.document.bbox,
            features: entry.document.features.clone(),
            style: entry.document.style.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(map_id: &str) -> MapDocument {
        MapDocument {
            map_id: map_id.to_string(),
            name: "Kiezplan".to_string(),
            bbox: [13.3, 52.4, 13.5, 52.6],
            features: json!({"type": "FeatureCollection", "features": []}),
            style: json!({}),
        }
    }

    #[tokio::test]
    async fn upsert_bumps_content_version() {
        let store = InMemoryMapStore::new();
        assert_eq!(store.upsert(document("m1")), 1);
        assert_eq!(store.upsert(document("m1")), 2);
        assert_eq!(store.current_version("m1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn snapshot_requires_the_current_version() {
        let store = InMemoryMapStore::new();
        store.upsert(document("m1"));
        store.upsert(document("m1"));

        let snapshot = store.snapshot("m1", 2).await.unwrap();
        assert_eq!(snapshot.version, 2);

        let err = store.snapshot("m1", 1).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unknown_map_is_not_found() {
        let store = InMemoryMapStore::new();
        assert!(matches!(
            store.current_version("nope").await.unwrap_err(),
            DomainError::NotFound { .. }
        ));
    }
}
