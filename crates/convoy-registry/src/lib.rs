//! Image-name cache and artifact registry.
//!
//! Maps source identities to the container images that realize them, and
//! back. The cache is fed by the build pipeline (keyed inserts with dedup
//! semantics) and by label harvesting during actual-state assembly.

pub mod cache;

pub use cache::{BuildRecord, CacheError, NameCache, RegistryApi};
pub use convoy_core::labels::{
    flavor_from_labels, labels_for, source_id_from_labels, LABEL_DIR, LABEL_FLAVOR,
    LABEL_REPO, LABEL_VERSION,
};
