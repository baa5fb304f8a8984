//! SQLite schema for the key/value backend and its migration list

/// Applied in order; a database at version `n` runs every later entry
pub const MIGRATION_VERSIONS: &[i32] = &[1];

/// Key/value table holding records and the sync queue
pub const CREATE_KV_STORE: &str = "CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

pub const CREATE_SCHEMA_MIGRATIONS: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

/// Migrations a database at `applied` still needs
pub fn pending_migrations(applied: i32) -> impl Iterator<Item = i32> {
    MIGRATION_VERSIONS.iter().copied().filter(move |&version| version > applied)
}
