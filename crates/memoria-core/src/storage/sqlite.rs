//! Storage Engine (C2).
//!
//! SQLite-backed note store: CRUD, tag/project metadata, dedup by content
//! hash, FTS-backed keyword search. A reader `Mutex<Connection>` and a
//! writer `Mutex<Connection>` sit over the same file so every method takes
//! `&self`, letting callers share a `Storage` behind an `Arc` without an
//! outer `Mutex`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::model::{AddInput, Filters, Note, SortOrder, StorageStats, Tier};

use super::migrations::apply_migrations;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("initialization error: {0}")]
    Init(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

const MAX_CONTENT_BYTES: usize = 1024 * 1024;
const MAX_TAGS: usize = 50;
const MAX_PROJECT_NAME_LEN: usize = 64;
const FULL_DISPLAY_THRESHOLD: usize = 5000;
const TRUNCATED_DISPLAY_LEN: usize = 2000;

pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    db_path: PathBuf,
}

impl Storage {
    /// Opens (creating if necessary) the database at `db_path`, applying
    /// every pending migration. Directory and file permissions are
    /// hardened to `0o700`/`0o600` on Unix.
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
            harden_dir_permissions(parent)?;
        }

        let writer = Connection::open(&db_path)?;
        Self::configure_connection(&writer)?;
        apply_migrations(&writer)?;

        let reader = Connection::open(&db_path)?;
        Self::configure_connection(&reader)?;

        harden_file_permissions(&db_path)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    }

    pub(crate) fn writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn reader(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn validate_add(input: &AddInput) -> Result<()> {
        if input.content.trim().is_empty() {
            return Err(StorageError::Validation("content must not be empty".into()));
        }
        if input.content.len() > MAX_CONTENT_BYTES {
            return Err(StorageError::Validation(format!(
                "content exceeds {MAX_CONTENT_BYTES} bytes"
            )));
        }
        if let Some(importance) = input.importance {
            if !(1..=10).contains(&importance) {
                return Err(StorageError::Validation(
                    "importance must be between 1 and 10".into(),
                ));
            }
        }
        if input.tags.len() > MAX_TAGS {
            return Err(StorageError::Validation(format!(
                "at most {MAX_TAGS} tags are allowed"
            )));
        }
        if let Some(project) = &input.project_name {
            if project.len() > MAX_PROJECT_NAME_LEN {
                return Err(StorageError::Validation(format!(
                    "project name exceeds {MAX_PROJECT_NAME_LEN} characters"
                )));
            }
        }
        Ok(())
    }

    /// Inserts a note, or returns the existing id if `(profile,
    /// content_hash)` already exists (bumping `last_accessed`).
    pub fn add(&self, profile: &str, input: AddInput) -> Result<Note> {
        Self::validate_add(&input)?;

        let content_hash = content_hash(&input.content);
        let now = Utc::now();
        let mut writer = self.writer();

        if let Some(existing_id) = writer
            .query_row(
                "SELECT id FROM notes WHERE profile = ?1 AND content_hash = ?2",
                params![profile, content_hash],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        {
            writer.execute(
                "UPDATE notes SET last_accessed = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), existing_id],
            )?;
            drop(writer);
            return self
                .get(profile, existing_id)?
                .ok_or_else(|| StorageError::Integrity("inserted note vanished".into()));
        }

        let (tree_path, depth) = if let Some(parent_id) = input.parent_id {
            let (parent_path, parent_depth): (String, i32) = writer
                .query_row(
                    "SELECT tree_path, depth FROM notes WHERE id = ?1 AND profile = ?2",
                    params![parent_id, profile],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("parent {parent_id} not found")))?;
            (parent_path, parent_depth + 1)
        } else {
            ("/".to_string(), 0)
        };

        let tags_json = serde_json::to_string(&input.tags)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        // The insert and the tree_path finalization (which embeds the row's
        // own id, known only after the insert) commit as one transaction so
        // a reader never observes a note with tree_path still at "/".
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO notes (
                profile, content, content_hash, tags_json, category, project_name,
                project_path, importance, memory_type, parent_id, tree_path, depth,
                tier, created_at, last_accessed, access_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 1, ?13, ?13, 0)",
            params![
                profile,
                input.content,
                content_hash,
                tags_json,
                input.category,
                input.project_name,
                input.project_path,
                input.importance.unwrap_or(5),
                input.memory_type.as_deref().unwrap_or("session"),
                input.parent_id,
                tree_path,
                depth,
                now.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let final_path = format!("{tree_path}{id}/");
        tx.execute(
            "UPDATE notes SET tree_path = ?1 WHERE id = ?2",
            params![final_path, id],
        )?;
        tx.commit()?;
        drop(writer);

        self.get(profile, id)?
            .ok_or_else(|| StorageError::Integrity("inserted note vanished".into()))
    }

    /// Fetches a note by id scoped to `profile`, bumping
    /// `access_count`/`last_accessed` in the same transaction. Does not
    /// increment access stats if absent. Scoping by profile keeps a caller
    /// in profile A from reading a note that belongs to profile B merely by
    /// guessing its id (§8 invariant 2, profile isolation).
    pub fn get(&self, profile: &str, id: i64) -> Result<Option<Note>> {
        let mut writer = self.writer();
        let now = Utc::now();
        let tx = writer.transaction()?;
        let updated = tx.execute(
            "UPDATE notes SET access_count = access_count + 1, last_accessed = ?1 \
             WHERE id = ?2 AND profile = ?3",
            params![now.to_rfc3339(), id, profile],
        )?;
        if updated == 0 {
            tx.commit()?;
            return Ok(None);
        }
        let note = tx
            .query_row(
                "SELECT * FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| row_to_note(row),
            )
            .optional()?;
        tx.commit()?;
        Ok(note)
    }

    /// Fetches a note scoped to `profile` without mutating access statistics
    /// (used internally by other components that shouldn't skew recency
    /// signals).
    pub fn peek(&self, profile: &str, id: i64) -> Result<Option<Note>> {
        let reader = self.reader();
        reader
            .query_row(
                "SELECT * FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| row_to_note(row),
            )
            .optional()
            .map_err(StorageError::from)
    }

    /// Deletes a note scoped to `profile`, cascading to graph rows, pattern
    /// examples, and any archive entry for it, all in one transaction so a
    /// failure partway through never orphans rows in the other tables.
    pub fn delete(&self, profile: &str, id: i64) -> Result<()> {
        let mut writer = self.writer();
        let tx = writer.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM notes WHERE id = ?1 AND profile = ?2",
            params![id, profile],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound(format!("note {id} not found")));
        }
        tx.execute("DELETE FROM graph_nodes WHERE memory_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM graph_edges WHERE source_memory_id = ?1 OR target_memory_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM pattern_examples WHERE memory_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM archive_entries WHERE original_memory_id = ?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Lists notes for `profile` in the requested order.
    pub fn list(&self, profile: &str, sort: SortOrder, limit: i64, offset: i64) -> Result<Vec<Note>> {
        let reader = self.reader();
        let sql = format!(
            "SELECT * FROM notes WHERE profile = ?1 ORDER BY {} DESC LIMIT ?2 OFFSET ?3",
            sort.column()
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt
            .query_map(params![profile, limit, offset], |row| row_to_note(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// FTS-backed keyword search, filtered and limited.
    pub fn search_keyword(
        &self,
        profile: &str,
        query: &str,
        limit: i64,
        filters: &Filters,
    ) -> Result<Vec<(Note, f64)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader();
        let mut sql = String::from(
            "SELECT n.*, bm25(notes_fts) AS rank FROM notes n \
             JOIN notes_fts ON n.id = notes_fts.rowid \
             WHERE notes_fts MATCH ?1 AND n.profile = ?2",
        );
        if let Some(min_importance) = filters.min_importance {
            sql.push_str(&format!(" AND n.importance >= {min_importance}"));
        }
        if let Some(category) = &filters.category {
            sql.push_str(&format!(" AND n.category = '{}'", escape_sql_literal(category)));
        }
        if let Some(project) = &filters.project {
            sql.push_str(&format!(" AND n.project_name = '{}'", escape_sql_literal(project)));
        }
        sql.push_str(" ORDER BY rank LIMIT ?3");

        let mut stmt = reader.prepare(&sql)?;
        let rows: Vec<(Note, f64)> = stmt
            .query_map(params![sanitized, profile, limit], |row| {
                let note = row_to_note(row)?;
                // bm25() returns a negative value where more negative = better match.
                let rank: f64 = row.get("rank")?;
                Ok((note, rank))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if filters.tags.is_empty() {
            return Ok(normalize_bm25(rows));
        }
        let filtered = rows
            .into_iter()
            .filter(|(note, _)| filters.tags.iter().all(|t| note.tags.contains(t)))
            .collect();
        Ok(normalize_bm25(filtered))
    }

    /// Aggregate counts, db size, last backup timestamp.
    pub fn stats(&self, profile: &str) -> Result<StorageStats> {
        let reader = self.reader();
        let total_notes: i64 = reader.query_row(
            "SELECT COUNT(*) FROM notes WHERE profile = ?1",
            params![profile],
            |row| row.get(0),
        )?;

        let mut by_category = std::collections::BTreeMap::new();
        let mut stmt = reader.prepare(
            "SELECT COALESCE(category, 'uncategorized'), COUNT(*) FROM notes \
             WHERE profile = ?1 GROUP BY category",
        )?;
        let rows = stmt.query_map(params![profile], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (k, v) = row?;
            by_category.insert(k, v);
        }

        let mut by_project = std::collections::BTreeMap::new();
        let mut stmt = reader.prepare(
            "SELECT COALESCE(project_name, 'none'), COUNT(*) FROM notes \
             WHERE profile = ?1 GROUP BY project_name",
        )?;
        let rows = stmt.query_map(params![profile], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (k, v) = row?;
            by_project.insert(k, v);
        }
        drop(reader);

        let db_size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0);
        let last_backup = super::backup::get_last_backup_timestamp(&self.db_path);

        Ok(StorageStats {
            total_notes,
            by_category,
            by_project,
            db_size_bytes,
            last_backup,
        })
    }

    /// Display helper: content shorter than 5000 chars is always shown in
    /// full; longer content is truncated to 2000 chars unless `always_full`.
    pub fn format_content(content: &str, always_full: bool) -> String {
        if always_full || content.chars().count() < FULL_DISPLAY_THRESHOLD {
            content.to_string()
        } else {
            let truncated: String = content.chars().take(TRUNCATED_DISPLAY_LEN).collect();
            format!("{truncated}...")
        }
    }
}

fn normalize_bm25(rows: Vec<(Note, f64)>) -> Vec<(Note, f64)> {
    // bm25() is negative-is-better; flip sign and normalize to [0, 1] by the
    // best (most negative) score in this result set.
    let best = rows
        .iter()
        .map(|(_, rank)| rank.abs())
        .fold(0.0_f64, f64::max)
        .max(0.001);
    rows.into_iter()
        .map(|(note, rank)| (note, (rank.abs() / best).min(1.0)))
        .collect()
}

pub(crate) fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").unwrap();
    }
    s
}

fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Sanitizes free-text input before it is embedded in an FTS5 `MATCH`
/// expression: strips the characters FTS5 treats as query-syntax operators
/// (`" * ^ ( ) : -`) and drops tokens that would otherwise be interpreted as
/// bare operators, then quotes each remaining token so the match is a plain
/// AND of literal terms.
pub(crate) fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{token}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod sanitize_tests {
    use super::sanitize_fts5_query;

    #[test]
    fn strips_operator_characters() {
        assert_eq!(sanitize_fts5_query("foo* \"bar\" -baz"), "\"foo\" \"bar\" \"baz\"");
    }

    #[test]
    fn empty_query_sanitizes_to_empty() {
        assert_eq!(sanitize_fts5_query("   "), "");
    }
}

pub(crate) fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid {field_name} timestamp: {value}").into(),
            )
        })
}

pub(crate) fn row_to_note(row: &rusqlite::Row) -> rusqlite::Result<Note> {
    let tags_json: String = row.get("tags_json")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let created_at: String = row.get("created_at")?;
    let last_accessed: String = row.get("last_accessed")?;
    let tier: i32 = row.get("tier")?;

    Ok(Note {
        id: row.get("id")?,
        profile: row.get("profile")?,
        content: row.get("content")?,
        summary: row.get("summary")?,
        content_hash: row.get("content_hash")?,
        tags,
        category: row.get("category")?,
        project_name: row.get("project_name")?,
        project_path: row.get("project_path")?,
        importance: row.get("importance")?,
        memory_type: row.get("memory_type")?,
        parent_id: row.get("parent_id")?,
        tree_path: row.get("tree_path")?,
        depth: row.get("depth")?,
        tier: Tier::from_i32(tier),
        cluster_id: row.get("cluster_id")?,
        created_at: parse_timestamp(&created_at, "created_at")?,
        last_accessed: parse_timestamp(&last_accessed, "last_accessed")?,
        access_count: row.get("access_count")?,
    })
}

#[cfg(unix)]
fn harden_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn harden_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        (storage, dir)
    }

    fn input(content: &str) -> AddInput {
        AddInput {
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn add_then_get_round_trips_content() {
        let (storage, _dir) = storage();
        let note = storage.add("default", input("hello")).unwrap();
        let fetched = storage.get("default", note.id).unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.access_count, 1);
    }

    #[test]
    fn duplicate_content_hash_dedups_to_same_id() {
        let (storage, _dir) = storage();
        let first = storage.add("default", input("same content")).unwrap();
        let second = storage.add("default", input("same content")).unwrap();
        assert_eq!(first.id, second.id);
        let stats = storage.stats("default").unwrap();
        assert_eq!(stats.total_notes, 1);
    }

    #[test]
    fn profile_isolation_holds_across_list_and_search() {
        let (storage, _dir) = storage();
        storage.add("work", input("client X secrets")).unwrap();
        let default_notes = storage.list("default", SortOrder::Recent, 10, 0).unwrap();
        assert!(default_notes.is_empty());
        let hits = storage
            .search_keyword("default", "client", 10, &Filters::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn rejects_empty_content() {
        let (storage, _dir) = storage();
        let err = storage.add("default", input("   ")).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn rejects_importance_out_of_range() {
        let (storage, _dir) = storage();
        let mut i = input("x");
        i.importance = Some(11);
        let err = storage.add("default", i).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn delete_cascades_and_removes_note() {
        let (storage, _dir) = storage();
        let note = storage.add("default", input("to delete")).unwrap();
        storage.delete("default", note.id).unwrap();
        assert!(storage.get("default", note.id).unwrap().is_none());
    }

    #[test]
    fn get_and_delete_do_not_cross_profiles() {
        let (storage, _dir) = storage();
        let note = storage.add("work", input("client X secrets")).unwrap();
        assert!(storage.get("default", note.id).unwrap().is_none());
        let err = storage.delete("default", note.id).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(storage.get("work", note.id).unwrap().is_some());
    }

    #[test]
    fn keyword_search_finds_matching_note() {
        let (storage, _dir) = storage();
        storage
            .add("default", input("Built React authentication using JWT tokens"))
            .unwrap();
        let hits = storage
            .search_keyword("default", "authentication", 10, &Filters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn format_content_truncates_long_bodies() {
        let long = "a".repeat(6000);
        let formatted = Storage::format_content(&long, false);
        assert!(formatted.len() < long.len());
        let full = Storage::format_content(&long, true);
        assert_eq!(full, long);
    }
}
