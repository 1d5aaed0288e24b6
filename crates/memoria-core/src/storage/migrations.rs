//! Schema & Migrator (C1).
//!
//! Migrations are additive-only and idempotent: each step checks for
//! column/table presence before applying, so the same migration set can be
//! run against a fresh database or an existing one without error. A failure
//! anywhere in a step aborts that step's transaction; the file is never left
//! half-migrated.

use rusqlite::Connection;

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "core notes table, FTS5 shadow, schema_version",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "graph tables: graph_nodes, graph_edges, clusters",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "pattern tables: identity_patterns, pattern_examples",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "profile registry and archive entries",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "event log for the dashboard live stream",
        up: MIGRATION_V5_UP,
    },
    Migration {
        version: 6,
        description: "graph build timestamps, for status reporting",
        up: MIGRATION_V6_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS notes (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    profile         TEXT NOT NULL DEFAULT 'default',
    content         TEXT NOT NULL,
    summary         TEXT,
    content_hash    TEXT NOT NULL,
    tags_json       TEXT NOT NULL DEFAULT '[]',
    category        TEXT,
    project_name    TEXT,
    project_path    TEXT,
    importance      INTEGER NOT NULL DEFAULT 5,
    memory_type     TEXT NOT NULL DEFAULT 'session',
    parent_id       INTEGER,
    tree_path       TEXT NOT NULL DEFAULT '/',
    depth           INTEGER NOT NULL DEFAULT 0,
    tier            INTEGER NOT NULL DEFAULT 1,
    cluster_id      INTEGER,
    created_at      TEXT NOT NULL,
    last_accessed   TEXT NOT NULL,
    access_count    INTEGER NOT NULL DEFAULT 0,
    UNIQUE(profile, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_notes_profile ON notes(profile);
CREATE INDEX IF NOT EXISTS idx_notes_tree_path ON notes(tree_path);
CREATE INDEX IF NOT EXISTS idx_notes_parent ON notes(parent_id);
CREATE INDEX IF NOT EXISTS idx_notes_created ON notes(profile, created_at);
CREATE INDEX IF NOT EXISTS idx_notes_accessed ON notes(profile, last_accessed);
CREATE INDEX IF NOT EXISTS idx_notes_importance ON notes(profile, importance);

CREATE VIRTUAL TABLE IF NOT EXISTS notes_fts USING fts5(
    content,
    content='notes',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS notes_ai AFTER INSERT ON notes BEGIN
    INSERT INTO notes_fts(rowid, content)
    VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS notes_ad AFTER DELETE ON notes BEGIN
    INSERT INTO notes_fts(notes_fts, rowid, content)
    VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS notes_au AFTER UPDATE ON notes BEGIN
    INSERT INTO notes_fts(notes_fts, rowid, content)
    VALUES ('delete', old.id, old.content);
    INSERT INTO notes_fts(rowid, content)
    VALUES (new.id, new.content);
END;

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_nodes (
    memory_id       INTEGER NOT NULL,
    profile         TEXT NOT NULL,
    entities_json   TEXT NOT NULL,
    PRIMARY KEY (profile, memory_id)
);

CREATE TABLE IF NOT EXISTS graph_edges (
    profile             TEXT NOT NULL,
    source_memory_id    INTEGER NOT NULL,
    target_memory_id    INTEGER NOT NULL,
    similarity          REAL NOT NULL,
    relationship_type   TEXT NOT NULL DEFAULT 'similarity',
    shared_entities_json TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (profile, source_memory_id, target_memory_id)
);

CREATE INDEX IF NOT EXISTS idx_graph_edges_source ON graph_edges(profile, source_memory_id);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(profile, target_memory_id);

CREATE TABLE IF NOT EXISTS clusters (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    profile             TEXT NOT NULL,
    cluster_name        TEXT NOT NULL,
    description         TEXT NOT NULL DEFAULT '',
    memory_count        INTEGER NOT NULL DEFAULT 0,
    avg_importance      REAL NOT NULL DEFAULT 0,
    top_entities_json   TEXT NOT NULL DEFAULT '[]',
    summary             TEXT NOT NULL DEFAULT '',
    parent_cluster_id   INTEGER,
    depth               INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_clusters_profile ON clusters(profile);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (2, datetime('now'));
"#;

const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS identity_patterns (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    profile         TEXT NOT NULL,
    pattern_type    TEXT NOT NULL,
    pattern_key     TEXT NOT NULL,
    pattern_value   TEXT NOT NULL,
    confidence      REAL NOT NULL,
    frequency       INTEGER NOT NULL DEFAULT 0,
    last_seen       TEXT NOT NULL,
    pinned          INTEGER NOT NULL DEFAULT 0,
    UNIQUE(profile, pattern_type, pattern_key)
);

CREATE INDEX IF NOT EXISTS idx_patterns_profile ON identity_patterns(profile);

CREATE TABLE IF NOT EXISTS pattern_examples (
    pattern_id  INTEGER NOT NULL,
    memory_id   INTEGER NOT NULL,
    context     TEXT NOT NULL,
    PRIMARY KEY (pattern_id, memory_id)
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (3, datetime('now'));
"#;

const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    name        TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL,
    description TEXT
);

INSERT OR IGNORE INTO profiles (name, created_at, description)
VALUES ('default', datetime('now'), 'Default profile');

CREATE TABLE IF NOT EXISTS archive_entries (
    original_memory_id INTEGER PRIMARY KEY,
    compressed_blob     BLOB NOT NULL,
    original_size       INTEGER NOT NULL,
    compressed_size     INTEGER NOT NULL,
    archived_at         TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (4, datetime('now'));
"#;

const MIGRATION_V5_UP: &str = r#"
CREATE TABLE IF NOT EXISTS event_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    profile     TEXT NOT NULL,
    operation   TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    detail      TEXT,
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_log_occurred ON event_log(occurred_at);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (5, datetime('now'));
"#;

const MIGRATION_V6_UP: &str = r#"
CREATE TABLE IF NOT EXISTS graph_builds (
    profile     TEXT PRIMARY KEY,
    built_at    TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (6, datetime('now'));
"#;

pub fn get_current_version(conn: &Connection) -> rusqlite::Result<u32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !table_exists {
        return Ok(0);
    }
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Applies every migration whose version exceeds the database's current
/// version, in order. Returns the number of migrations applied.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn fresh_database_starts_at_version_zero() {
        let conn = fresh_conn();
        assert_eq!(get_current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn applying_migrations_twice_is_idempotent() {
        let conn = fresh_conn();
        let first = apply_migrations(&conn).unwrap();
        assert_eq!(first, MIGRATIONS.len() as u32);
        let second = apply_migrations(&conn).unwrap();
        assert_eq!(second, 0);
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn notes_table_and_fts_shadow_exist_after_migration() {
        let conn = fresh_conn();
        apply_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO notes (profile, content, content_hash, created_at, last_accessed) \
             VALUES ('default', 'hello world', 'abc123', datetime('now'), datetime('now'))",
            [],
        )
        .unwrap();
        let matched: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notes_fts WHERE notes_fts MATCH 'hello'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(matched, 1);
    }
}
