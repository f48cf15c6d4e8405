//! NameCache — redb-backed image ⇄ source-identity store.
//!
//! Two tables: the artifact table maps an image name to its build record
//! (upserted, the metadata row), and the source table maps a canonical
//! source-identity string to the image that realizes it (inserted only if
//! absent, so replays of the same build are no-ops).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use convoy_core::{
    ArtifactRegistry, BuildArtifact, Quality, RegistryError, SourceId, SourceLocation,
};

use convoy_core::labels::source_id_from_labels;

/// Image name → JSON `BuildRecord`.
const ARTIFACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("artifacts");

/// Canonical source-identity string → image name.
const SOURCE_IMAGES: TableDefinition<&str, &str> = TableDefinition::new("source_images");

/// Cached knowledge about one built image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub source_id: String,
    #[serde(default)]
    pub qualities: Vec<Quality>,
}

/// Errors from the cache backend.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to open name cache: {0}")]
    Open(String),

    #[error("cache transaction: {0}")]
    Transaction(String),

    #[error("cache table: {0}")]
    Table(String),

    #[error("cache read: {0}")]
    Read(String),

    #[error("cache write: {0}")]
    Write(String),

    #[error("cache codec: {0}")]
    Codec(String),
}

impl From<CacheError> for RegistryError {
    fn from(err: CacheError) -> Self {
        RegistryError::Backend {
            message: err.to_string(),
        }
    }
}

macro_rules! map_err {
    ($variant:ident) => {
        |e| CacheError::$variant(e.to_string())
    };
}

/// The lower-level image registry the cache consults for labels.
///
/// This is the external collaborator boundary; convoy only needs label
/// retrieval from it.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn image_labels(
        &self,
        image: &str,
    ) -> Result<BTreeMap<String, String>, RegistryError>;
}

/// Image-name cache with an explicit lifetime, owned by the composition
/// root and passed in as a dependency.
#[derive(Clone)]
pub struct NameCache {
    db: Arc<Database>,
    api: Arc<dyn RegistryApi>,
}

impl NameCache {
    /// Open (or create) a persistent cache at the given path.
    pub fn open(path: &Path, api: Arc<dyn RegistryApi>) -> Result<Self, CacheError> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let cache = Self {
            db: Arc::new(db),
            api,
        };
        cache.ensure_tables()?;
        debug!(?path, "name cache opened");
        Ok(cache)
    }

    /// Create an ephemeral in-memory cache (for testing).
    pub fn open_in_memory(api: Arc<dyn RegistryApi>) -> Result<Self, CacheError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let cache = Self {
            db: Arc::new(db),
            api,
        };
        cache.ensure_tables()?;
        Ok(cache)
    }

    fn ensure_tables(&self) -> Result<(), CacheError> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(ARTIFACTS).map_err(map_err!(Table))?;
        txn.open_table(SOURCE_IMAGES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Record a built image for a source identity.
    ///
    /// The artifact row is upserted; the source-identity row is only
    /// written when absent, so the first image recorded for an identity
    /// wins and replays are no-ops.
    pub fn insert(
        &self,
        source_id: &SourceId,
        image: &str,
        qualities: Vec<Quality>,
    ) -> Result<(), CacheError> {
        let canonical = source_id.to_string();
        let record = BuildRecord {
            source_id: canonical.clone(),
            qualities,
        };
        let value = serde_json::to_vec(&record).map_err(map_err!(Codec))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut artifacts = txn.open_table(ARTIFACTS).map_err(map_err!(Table))?;
            artifacts
                .insert(image, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut sources = txn.open_table(SOURCE_IMAGES).map_err(map_err!(Table))?;
            let existing = sources
                .get(canonical.as_str())
                .map_err(map_err!(Read))?
                .map(|g| g.value().to_string());
            match existing {
                Some(current) if current != image => {
                    // Identity row conflict: keep the first mapping.
                    debug!(%canonical, %current, %image, "source already mapped, keeping first");
                }
                Some(_) => {}
                None => {
                    sources
                        .insert(canonical.as_str(), image)
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%canonical, %image, "image recorded");
        Ok(())
    }

    /// The image recorded for a source identity, if any.
    pub fn image_for(&self, source_id: &SourceId) -> Result<Option<String>, CacheError> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let sources = txn.open_table(SOURCE_IMAGES).map_err(map_err!(Table))?;
        Ok(sources
            .get(source_id.to_string().as_str())
            .map_err(map_err!(Read))?
            .map(|g| g.value().to_string()))
    }

    /// The build record for an image, if known.
    pub fn record_for(&self, image: &str) -> Result<Option<BuildRecord>, CacheError> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let artifacts = txn.open_table(ARTIFACTS).map_err(map_err!(Table))?;
        match artifacts.get(image).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: BuildRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Every source identity known for one source location.
    pub fn source_ids_for_location(
        &self,
        location: &SourceLocation,
    ) -> Result<Vec<SourceId>, CacheError> {
        Ok(self
            .list_source_ids()?
            .into_iter()
            .filter(|id| &id.location == location)
            .collect())
    }

    /// Every source identity in the cache.
    pub fn list_source_ids(&self) -> Result<Vec<SourceId>, CacheError> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let sources = txn.open_table(SOURCE_IMAGES).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in sources.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            match SourceId::parse(key.value()) {
                Ok(id) => ids.push(id),
                Err(e) => warn!(key = key.value(), error = %e, "unparseable cache key"),
            }
        }
        Ok(ids)
    }

    /// Harvest the source identity from an image's labels into the cache.
    async fn harvest(
        &self,
        image: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        let source_id = source_id_from_labels(image, labels)?;
        self.insert(&source_id, image, Vec::new())?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for NameCache {
    async fn get_artifact(&self, id: &SourceId) -> Result<BuildArtifact, RegistryError> {
        let image = self
            .image_for(id)?
            .ok_or_else(|| RegistryError::NoImageNameFound {
                source_id: id.to_string(),
            })?;
        let qualities = self
            .record_for(&image)?
            .map(|r| r.qualities)
            .unwrap_or_default();
        Ok(BuildArtifact {
            name: image,
            qualities,
        })
    }

    async fn image_labels(
        &self,
        image: &str,
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let labels = self.api.image_labels(image).await?;
        // Opportunistically learn the mapping; a label set without a
        // source identity is still returned to the caller.
        if let Err(e) = self.harvest(image, &labels).await {
            debug!(%image, error = %e, "labels carry no source identity");
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use convoy_core::labels::labels_for;
    use convoy_core::parse_version;

    use super::*;

    struct MapApi {
        labels: BTreeMap<String, BTreeMap<String, String>>,
    }

    #[async_trait]
    impl RegistryApi for MapApi {
        async fn image_labels(
            &self,
            image: &str,
        ) -> Result<BTreeMap<String, String>, RegistryError> {
            self.labels
                .get(image)
                .cloned()
                .ok_or_else(|| RegistryError::Backend {
                    message: format!("unknown image {image}"),
                })
        }
    }

    fn empty_api() -> Arc<dyn RegistryApi> {
        Arc::new(MapApi {
            labels: BTreeMap::new(),
        })
    }

    fn source_id(repo: &str, version: &str) -> SourceId {
        SourceId::new(
            SourceLocation::new(repo, ""),
            parse_version(version).unwrap(),
        )
    }

    #[tokio::test]
    async fn insert_then_get_artifact() {
        let cache = NameCache::open_in_memory(empty_api()).unwrap();
        let id = source_id("github.com/example/widget", "1.0.0");
        cache
            .insert(
                &id,
                "registry.example.com/widget:1.0.0",
                vec![Quality::advisory("dirty-workspace")],
            )
            .unwrap();

        let artifact = cache.get_artifact(&id).await.unwrap();
        assert_eq!(artifact.name, "registry.example.com/widget:1.0.0");
        assert_eq!(artifact.qualities.len(), 1);
    }

    #[tokio::test]
    async fn unknown_source_is_no_image_found() {
        let cache = NameCache::open_in_memory(empty_api()).unwrap();
        let err = cache
            .get_artifact(&source_id("github.com/example/ghost", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoImageNameFound { .. }));
    }

    #[test]
    fn identity_row_keeps_first_mapping() {
        let cache = NameCache::open_in_memory(empty_api()).unwrap();
        let id = source_id("github.com/example/widget", "1.0.0");

        cache.insert(&id, "img:first", vec![]).unwrap();
        cache.insert(&id, "img:second", vec![]).unwrap();

        assert_eq!(cache.image_for(&id).unwrap().as_deref(), Some("img:first"));
        // The metadata row for the second image still exists.
        assert!(cache.record_for("img:second").unwrap().is_some());
    }

    #[test]
    fn metadata_row_upserts() {
        let cache = NameCache::open_in_memory(empty_api()).unwrap();
        let id = source_id("github.com/example/widget", "1.0.0");

        cache.insert(&id, "img:v1", vec![]).unwrap();
        cache
            .insert(&id, "img:v1", vec![Quality::advisory("dirty-workspace")])
            .unwrap();

        let record = cache.record_for("img:v1").unwrap().unwrap();
        assert_eq!(record.qualities.len(), 1);
    }

    #[test]
    fn list_and_filter_source_ids() {
        let cache = NameCache::open_in_memory(empty_api()).unwrap();
        let widget = SourceLocation::new("github.com/example/widget", "");
        cache
            .insert(&source_id("github.com/example/widget", "1.0.0"), "w:1", vec![])
            .unwrap();
        cache
            .insert(&source_id("github.com/example/widget", "1.1.0"), "w:2", vec![])
            .unwrap();
        cache
            .insert(&source_id("github.com/example/other", "0.1.0"), "o:1", vec![])
            .unwrap();

        assert_eq!(cache.list_source_ids().unwrap().len(), 3);
        assert_eq!(cache.source_ids_for_location(&widget).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn image_labels_harvests_mapping() {
        let id = source_id("github.com/example/widget", "2.0.0");
        let mut labels = BTreeMap::new();
        labels.insert("img:2".to_string(), labels_for(&id, ""));
        let cache = NameCache::open_in_memory(Arc::new(MapApi { labels })).unwrap();

        assert!(cache.image_for(&id).unwrap().is_none());
        cache.image_labels("img:2").await.unwrap();
        assert_eq!(cache.image_for(&id).unwrap().as_deref(), Some("img:2"));
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.redb");
        let id = source_id("github.com/example/widget", "1.0.0");

        {
            let cache = NameCache::open(&path, empty_api()).unwrap();
            cache.insert(&id, "img:1", vec![]).unwrap();
        }

        let cache = NameCache::open(&path, empty_api()).unwrap();
        assert_eq!(cache.image_for(&id).unwrap().as_deref(), Some("img:1"));
    }
}
