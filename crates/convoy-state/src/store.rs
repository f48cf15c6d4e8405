//! StateStore — redb-backed GDM persistence.
//!
//! Manifests and defs are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing). Writes are conditional on the etag captured at
//! read time.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info};

use convoy_core::User;

use crate::error::{StateError, StateResult};
use crate::manager::{StateReader, StateWriter};
use crate::tables::{DEFS, MANIFESTS};
use crate::types::{Defs, Manifest, State};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const DEFS_KEY: &str = "defs";

/// Thread-safe GDM store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MANIFESTS).map_err(map_err!(Table))?;
        txn.open_table(DEFS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn load(&self) -> StateResult<State> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;

        let mut state = State::default();
        let manifests = txn.open_table(MANIFESTS).map_err(map_err!(Table))?;
        for entry in manifests.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let manifest: Manifest =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            state.set_manifest(manifest);
        }

        let defs = txn.open_table(DEFS).map_err(map_err!(Table))?;
        if let Some(guard) = defs.get(DEFS_KEY).map_err(map_err!(Read))? {
            state.defs =
                serde_json::from_slice::<Defs>(guard.value()).map_err(map_err!(Deserialize))?;
        }

        Ok(state)
    }
}

impl StateReader for StateStore {
    fn read_state(&self) -> StateResult<State> {
        let mut state = self.load()?;
        state.etag = Some(state.compute_etag()?);
        Ok(state)
    }
}

impl StateWriter for StateStore {
    /// Write the full state, conditional on the etag captured at read.
    ///
    /// A state with no etag is written unconditionally (initial import).
    fn write_state(&self, state: &State, user: &User) -> StateResult<()> {
        let current = self.load()?.compute_etag()?;
        if let Some(expected) = &state.etag {
            if expected != &current {
                return Err(StateError::Conflict {
                    expected: expected.clone(),
                    actual: current,
                });
            }
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut manifests = txn.open_table(MANIFESTS).map_err(map_err!(Table))?;
            // Replace wholesale; the state is the unit of persistence.
            let stale: Vec<String> = manifests
                .iter()
                .map_err(map_err!(Read))?
                .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            for key in stale {
                manifests.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (id, manifest) in &state.manifests {
                let value =
                    serde_json::to_vec(manifest).map_err(map_err!(Serialize))?;
                manifests
                    .insert(id.to_string().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            let mut defs = txn.open_table(DEFS).map_err(map_err!(Table))?;
            let value = serde_json::to_vec(&state.defs).map_err(map_err!(Serialize))?;
            defs.insert(DEFS_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        info!(
            manifests = state.manifests.len(),
            user = %user,
            "state written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use convoy_core::{
        parse_version, Cluster, DeployConfig, DeploymentKind, SourceLocation,
    };

    use super::*;
    use crate::types::DeploySpec;

    fn test_user() -> User {
        User {
            name: "tester".to_string(),
            email: "tester@example.com".to_string(),
        }
    }

    fn test_manifest(repo: &str) -> Manifest {
        let mut manifest = Manifest {
            source: SourceLocation::new(repo, ""),
            flavor: String::new(),
            kind: DeploymentKind::Service,
            owners: Default::default(),
            deployments: BTreeMap::new(),
        };
        let mut config = DeployConfig::default();
        config.num_instances = 1;
        config.startup.skip_check = true;
        manifest.deployments.insert(
            "main".to_string(),
            DeploySpec {
                version: parse_version("1.0.0").unwrap(),
                config,
            },
        );
        manifest
    }

    fn populated_state() -> State {
        let mut state = State::default();
        state.defs.clusters.insert(
            "main".to_string(),
            Cluster {
                name: "main".to_string(),
                base_url: "http://sched.main".to_string(),
                allowed_advisories: vec![],
                env: BTreeMap::new(),
            },
        );
        state.set_manifest(test_manifest("github.com/example/widget"));
        state
    }

    #[test]
    fn empty_store_reads_empty_state() {
        let store = StateStore::open_in_memory().unwrap();
        let state = store.read_state().unwrap();
        assert!(state.manifests.is_empty());
        assert!(state.defs.clusters.is_empty());
        assert!(state.etag.is_some());
    }

    #[test]
    fn write_then_read_round_trips() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_state(&populated_state(), &test_user()).unwrap();

        let state = store.read_state().unwrap();
        assert_eq!(state.manifests.len(), 1);
        assert_eq!(state.defs.clusters.len(), 1);

        // Round trip preserves deployments: diff against the original is
        // all-same.
        let before = populated_state().deployments().unwrap();
        let after = state.deployments().unwrap();
        for (id, dep) in before.iter() {
            assert!(dep.equal(after.get(id).unwrap()));
        }
    }

    #[test]
    fn conditional_write_rejects_stale_etag() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_state(&populated_state(), &test_user()).unwrap();

        // Two readers snapshot the same state.
        let mut first = store.read_state().unwrap();
        let mut second = store.read_state().unwrap();

        first.set_manifest(test_manifest("github.com/example/other"));
        store.write_state(&first, &test_user()).unwrap();

        // The second writer's etag is now stale.
        second.set_manifest(test_manifest("github.com/example/racing"));
        assert!(matches!(
            store.write_state(&second, &test_user()),
            Err(StateError::Conflict { .. })
        ));
    }

    #[test]
    fn write_after_reread_succeeds() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_state(&populated_state(), &test_user()).unwrap();

        let mut state = store.read_state().unwrap();
        state.set_manifest(test_manifest("github.com/example/other"));
        store.write_state(&state, &test_user()).unwrap();

        let reread = store.read_state().unwrap();
        assert_eq!(reread.manifests.len(), 2);
    }

    #[test]
    fn removed_manifests_stay_removed() {
        let store = StateStore::open_in_memory().unwrap();
        store.write_state(&populated_state(), &test_user()).unwrap();

        let mut state = store.read_state().unwrap();
        let id = state.manifests.keys().next().unwrap().clone();
        assert!(state.remove_manifest(&id));
        store.write_state(&state, &test_user()).unwrap();

        let reread = store.read_state().unwrap();
        assert!(reread.manifests.is_empty());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.write_state(&populated_state(), &test_user()).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let state = store.read_state().unwrap();
        assert_eq!(state.manifests.len(), 1);
    }
}
