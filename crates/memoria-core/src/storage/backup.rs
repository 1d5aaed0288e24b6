//! Backup (C9, backup half — see `crate::compression` for the tiering half).
//!
//! Uses SQLite's own online backup facility (`VACUUM INTO`) to snapshot the
//! database to a timestamped path without blocking readers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};

use super::sqlite::{Result, Storage, StorageError};

const BACKUP_FILENAME_PREFIX: &str = "memoria-";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

impl Storage {
    /// Snapshots the database to `backups/memoria-<timestamp>.db` under the
    /// database's own directory, or to an explicit `path` if given. Runs
    /// against the reader connection so writers are never blocked.
    pub fn backup(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let target = match path {
            Some(p) => p,
            None => {
                let backups_dir = self
                    .db_path()
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join("backups");
                std::fs::create_dir_all(&backups_dir)?;
                let timestamp = Utc::now().format(BACKUP_TIMESTAMP_FORMAT);
                backups_dir.join(format!("{BACKUP_FILENAME_PREFIX}{timestamp}.db"))
            }
        };

        validate_backup_path(&target)?;
        let path_str = target.to_string_lossy();
        let escaped = path_str.replace('\'', "''");

        let reader = self.reader();
        reader.execute_batch(&format!("VACUUM INTO '{escaped}'"))?;
        Ok(target)
    }

    /// Retention: keeps the newest `keep` backups under the database's
    /// `backups/` directory, removing older ones.
    pub fn prune_backups(&self, keep: usize) -> Result<usize> {
        let backups_dir = self
            .db_path()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("backups");
        let mut entries = list_backup_files(&backups_dir);
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        let mut removed = 0;
        for (path, _) in entries.into_iter().skip(keep) {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}

fn validate_backup_path(path: &Path) -> Result<()> {
    let s = path.to_string_lossy();
    if s.chars().any(|c| c.is_control() && c != '\t') {
        return Err(StorageError::Validation(
            "backup path contains control characters".into(),
        ));
    }
    Ok(())
}

fn list_backup_files(dir: &Path) -> Vec<(PathBuf, DateTime<Utc>)> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    read_dir
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_string_lossy().to_string();
            let ts = parse_backup_timestamp(&name)?;
            Some((path, ts))
        })
        .collect()
}

fn parse_backup_timestamp(filename: &str) -> Option<DateTime<Utc>> {
    let stripped = filename
        .strip_prefix(BACKUP_FILENAME_PREFIX)?
        .strip_suffix(".db")?;
    let naive = NaiveDateTime::parse_from_str(stripped, BACKUP_TIMESTAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Looks up the newest backup timestamp for the database at `db_path`,
/// scanning its sibling `backups/` directory.
pub fn get_last_backup_timestamp(db_path: &Path) -> Option<DateTime<Utc>> {
    let backups_dir = db_path.parent()?.join("backups");
    list_backup_files(&backups_dir)
        .into_iter()
        .map(|(_, ts)| ts)
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_creates_a_restorable_snapshot() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        storage
            .add("default", crate::model::AddInput {
                content: "hello".to_string(),
                ..Default::default()
            })
            .unwrap();

        let backup_path = storage.backup(None).unwrap();
        assert!(backup_path.exists());

        let restored = Storage::open(backup_path).unwrap();
        let notes = restored
            .list("default", crate::model::SortOrder::Recent, 10, 0)
            .unwrap();
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn prune_backups_keeps_only_newest_n() {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        for _ in 0..3 {
            storage
                .backup(None)
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }
        let removed = storage.prune_backups(1).unwrap();
        assert_eq!(removed, 2);
    }
}
