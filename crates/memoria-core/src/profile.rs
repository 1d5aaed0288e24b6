//! Profile Manager (C8).
//!
//! Profiles are column-based, not file-based: every core table carries a
//! `profile` column and all queries elsewhere in this crate filter on it.
//! This module owns the profile *registry* (a `profiles` table, queried for
//! row counts) and the single **active profile** pointer, persisted as a
//! `profiles.json` sidecar next to the database file and updated with a
//! filesystem-level atomic rename so a crash mid-switch never leaves a
//! torn pointer file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::model::{ProfileInfo, ProfileSummary};
use crate::storage::{Result as StorageResult, Storage, StorageError};

pub const DEFAULT_PROFILE: &str = "default";
const REGISTRY_FILENAME: &str = "profiles.json";

/// Every table that carries a `profile` column and must be scrubbed when a
/// profile is deleted. `pattern_examples`/`archive_entries` cascade via
/// their owning rows rather than a direct `profile` column.
const PROFILE_SCOPED_TABLES: &[&str] = &[
    "notes",
    "graph_nodes",
    "graph_edges",
    "clusters",
    "identity_patterns",
    "event_log",
];

/// On-disk shape of `profiles.json`, matching the persisted-state layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistrySidecar {
    active: String,
    profiles: Vec<SidecarProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarProfile {
    name: String,
    created_at: chrono::DateTime<Utc>,
    description: Option<String>,
}

pub struct ProfileManager<'a> {
    storage: &'a Storage,
    sidecar_path: PathBuf,
}

impl<'a> ProfileManager<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        let root = storage
            .db_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            storage,
            sidecar_path: root.join(REGISTRY_FILENAME),
        }
    }

    /// Validates `^[a-z0-9-]{1,64}$` without pulling in a `regex` dependency
    /// (no regex crate exists anywhere in this project's corpus).
    fn validate_name(name: &str) -> StorageResult<()> {
        let valid = !name.is_empty()
            && name.len() <= 64
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if valid {
            Ok(())
        } else {
            Err(StorageError::Validation(format!(
                "profile name {name:?} must match ^[a-z0-9-]{{1,64}}$"
            )))
        }
    }

    pub fn active(&self) -> StorageResult<String> {
        match self.read_sidecar()? {
            Some(sidecar) => Ok(sidecar.active),
            None => Ok(DEFAULT_PROFILE.to_string()),
        }
    }

    /// Creates a new profile. Fails with `Conflict` if the name is already
    /// registered.
    pub fn create(&self, name: &str, description: Option<&str>) -> StorageResult<ProfileInfo> {
        Self::validate_name(name)?;
        let writer = self.storage.writer();
        let now = Utc::now();
        let inserted = writer.execute(
            "INSERT OR IGNORE INTO profiles (name, created_at, description) VALUES (?1, ?2, ?3)",
            params![name, now.to_rfc3339(), description],
        )?;
        if inserted == 0 {
            return Err(StorageError::Conflict(format!(
                "profile {name:?} already exists"
            )));
        }
        drop(writer);
        self.sync_sidecar()?;
        Ok(ProfileInfo {
            name: name.to_string(),
            created_at: now,
            description: description.map(str::to_string),
            active: self.active()? == name,
        })
    }

    /// Atomically updates the active-profile pointer. Every subsequent
    /// façade call scopes to this profile until the next `switch`.
    pub fn switch(&self, name: &str) -> StorageResult<()> {
        if !self.exists(name)? {
            return Err(StorageError::NotFound(format!("profile {name:?} not found")));
        }
        let mut sidecar = self.read_sidecar()?.unwrap_or_else(|| self.default_sidecar());
        sidecar.active = name.to_string();
        self.write_sidecar(&sidecar)
    }

    /// Forbidden on `"default"` and on the currently active profile. Removes
    /// every row across every profile-scoped table, after taking an
    /// automatic backup.
    pub fn delete(&self, name: &str) -> StorageResult<()> {
        if name == DEFAULT_PROFILE {
            return Err(StorageError::Conflict(
                "the default profile cannot be deleted".into(),
            ));
        }
        if self.active()? == name {
            return Err(StorageError::Conflict(format!(
                "profile {name:?} is active and cannot be deleted"
            )));
        }
        if !self.exists(name)? {
            return Err(StorageError::NotFound(format!("profile {name:?} not found")));
        }

        self.storage.backup(None)?;

        let mut writer = self.storage.writer();
        let tx = writer.transaction()?;
        tx.execute(
            "DELETE FROM archive_entries WHERE original_memory_id IN \
             (SELECT id FROM notes WHERE profile = ?1)",
            params![name],
        )?;
        tx.execute(
            "DELETE FROM pattern_examples WHERE pattern_id IN \
             (SELECT id FROM identity_patterns WHERE profile = ?1)",
            params![name],
        )?;
        for table in PROFILE_SCOPED_TABLES {
            tx.execute(&format!("DELETE FROM {table} WHERE profile = ?1"), params![name])?;
        }
        tx.execute("DELETE FROM profiles WHERE name = ?1", params![name])?;
        tx.commit()?;
        drop(writer);
        self.sync_sidecar()
    }

    /// True if `name` is present in the registry.
    pub fn exists(&self, name: &str) -> StorageResult<bool> {
        let reader = self.storage.reader();
        let found: Option<i64> = reader
            .query_row(
                "SELECT 1 FROM profiles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Every registered profile, with row counts by table.
    pub fn list(&self) -> StorageResult<Vec<ProfileSummary>> {
        let active = self.active()?;
        let reader = self.storage.reader();
        let mut stmt = reader.prepare("SELECT name, created_at, description FROM profiles ORDER BY name")?;
        let profiles: Vec<(String, String, Option<String>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut summaries = Vec::with_capacity(profiles.len());
        for (name, created_at, description) in profiles {
            let mut row_counts = std::collections::BTreeMap::new();
            for table in PROFILE_SCOPED_TABLES {
                let count: i64 = reader.query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE profile = ?1"),
                    params![name],
                    |row| row.get(0),
                )?;
                row_counts.insert((*table).to_string(), count);
            }
            summaries.push(ProfileSummary {
                info: ProfileInfo {
                    name: name.clone(),
                    created_at: crate::storage::parse_timestamp(&created_at, "created_at")?,
                    description,
                    active: name == active,
                },
                row_counts,
            });
        }
        Ok(summaries)
    }

    fn default_sidecar(&self) -> RegistrySidecar {
        RegistrySidecar {
            active: DEFAULT_PROFILE.to_string(),
            profiles: Vec::new(),
        }
    }

    fn read_sidecar(&self) -> StorageResult<Option<RegistrySidecar>> {
        if !self.sidecar_path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.sidecar_path)?;
        let sidecar = serde_json::from_str(&text)
            .map_err(|e| StorageError::Validation(format!("invalid profiles.json: {e}")))?;
        Ok(Some(sidecar))
    }

    /// Writes `profiles.json` via write-to-temp-then-rename so a crash
    /// mid-write never leaves a torn pointer file: `rename` is atomic on
    /// the same filesystem.
    fn write_sidecar(&self, sidecar: &RegistrySidecar) -> StorageResult<()> {
        let tmp_path = self.sidecar_path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(sidecar)
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &self.sidecar_path)?;
        Ok(())
    }

    /// Rewrites the sidecar's `profiles` list from the registry table,
    /// preserving whatever `active` pointer is currently set.
    fn sync_sidecar(&self) -> StorageResult<()> {
        let mut sidecar = self.read_sidecar()?.unwrap_or_else(|| self.default_sidecar());
        let reader = self.storage.reader();
        let mut stmt =
            reader.prepare("SELECT name, created_at, description FROM profiles ORDER BY name")?;
        let profiles = stmt
            .query_map([], |row| {
                let created_at: String = row.get(1)?;
                Ok(SidecarProfile {
                    name: row.get(0)?,
                    created_at: crate::storage::parse_timestamp(&created_at, "created_at")
                        .unwrap_or_else(|_| Utc::now()),
                    description: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(reader);
        sidecar.profiles = profiles;
        self.write_sidecar(&sidecar)
    }
}
