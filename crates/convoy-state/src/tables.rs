//! redb table definitions for the state store.

use redb::TableDefinition;

/// Manifest identity string → JSON-serialized `Manifest`.
pub const MANIFESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("manifests");

/// Singleton row ("defs") → JSON-serialized `Defs`.
pub const DEFS: TableDefinition<&str, &[u8]> = TableDefinition::new("defs");
