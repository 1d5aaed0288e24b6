//! Tree Manager (C3).
//!
//! Parent/child links over the same `notes` table using a materialized
//! path (`tree_path`, slash-separated ids) plus a `depth` column.
//! Reparenting rewrites the whole subtree's paths/depths in one
//! transaction via a `LIKE`-prefix update.

use rusqlite::params;

use crate::model::Note;

use super::sqlite::{row_to_note, Result, Storage, StorageError};

impl Storage {
    /// Ancestors of `id` within `profile`, nearest first, derived from its
    /// `tree_path`.
    pub fn ancestors(&self, profile: &str, id: i64) -> Result<Vec<Note>> {
        let reader = self.reader();
        let tree_path: Option<String> = reader
            .query_row(
                "SELECT tree_path FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| row.get(0),
            )
            .ok();
        let Some(tree_path) = tree_path else {
            return Err(StorageError::NotFound(format!("note {id} not found")));
        };
        let ancestor_ids: Vec<i64> = tree_path
            .split('/')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<i64>().ok())
            .filter(|&aid| aid != id)
            .collect();
        if ancestor_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut notes = Vec::with_capacity(ancestor_ids.len());
        for aid in ancestor_ids {
            if let Some(note) = reader
                .query_row(
                    "SELECT * FROM notes WHERE id = ?1 AND profile = ?2",
                    params![aid, profile],
                    |row| row_to_note(row),
                )
                .ok()
            {
                notes.push(note);
            }
        }
        // tree_path lists ancestors from root to leaf; reverse for nearest-first.
        notes.reverse();
        Ok(notes)
    }

    /// Every descendant of `id` within `profile` (any depth), ordered by
    /// `tree_path`.
    pub fn descendants(&self, profile: &str, id: i64) -> Result<Vec<Note>> {
        let reader = self.reader();
        let tree_path: Option<String> = reader
            .query_row(
                "SELECT tree_path FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| row.get(0),
            )
            .ok();
        let Some(tree_path) = tree_path else {
            return Err(StorageError::NotFound(format!("note {id} not found")));
        };
        let like_pattern = format!("{tree_path}%");
        let mut stmt = reader.prepare(
            "SELECT * FROM notes WHERE tree_path LIKE ?1 AND id != ?2 AND profile = ?3 ORDER BY tree_path",
        )?;
        let rows = stmt
            .query_map(params![like_pattern, id, profile], |row| row_to_note(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Other notes within `profile` sharing the same `parent_id`.
    pub fn siblings(&self, profile: &str, id: i64) -> Result<Vec<Note>> {
        let reader = self.reader();
        let parent_id: Option<i64> = reader
            .query_row(
                "SELECT parent_id FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| row.get(0),
            )
            .map_err(|_| StorageError::NotFound(format!("note {id} not found")))?;
        let mut stmt = match parent_id {
            Some(pid) => reader.prepare(
                "SELECT * FROM notes WHERE parent_id = ?1 AND id != ?2 AND profile = ?3",
            )?,
            None => reader.prepare(
                "SELECT * FROM notes WHERE parent_id IS NULL AND id != ?2 AND ?1 IS NULL AND profile = ?3",
            )?,
        };
        let rows = stmt
            .query_map(params![parent_id, id, profile], |row| row_to_note(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Moves `id` under `new_parent_id` (or to the root when `None`) within
    /// `profile`, rewriting the subtree's `tree_path`/`depth` in one
    /// transaction. Rejects the move if `new_parent_id` is `id` itself or
    /// one of its own descendants, which would introduce a cycle, or if
    /// `new_parent_id` belongs to a different profile.
    pub fn reparent(&self, profile: &str, id: i64, new_parent_id: Option<i64>) -> Result<()> {
        if new_parent_id == Some(id) {
            return Err(StorageError::Validation("a note cannot be its own parent".into()));
        }

        let mut writer = self.writer();
        let tx = writer.transaction()?;
        let (old_path, old_depth): (String, i32) = tx
            .query_row(
                "SELECT tree_path, depth FROM notes WHERE id = ?1 AND profile = ?2",
                params![id, profile],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|_| StorageError::NotFound(format!("note {id} not found")))?;

        let (new_parent_path, new_parent_depth) = match new_parent_id {
            Some(pid) => {
                let (path, depth): (String, i32) = tx
                    .query_row(
                        "SELECT tree_path, depth FROM notes WHERE id = ?1 AND profile = ?2",
                        params![pid, profile],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .map_err(|_| StorageError::NotFound(format!("parent {pid} not found")))?;
                if path.starts_with(&old_path) {
                    return Err(StorageError::Validation(
                        "cannot reparent a note under its own descendant".into(),
                    ));
                }
                (path, depth)
            }
            None => ("/".to_string(), -1),
        };

        let new_path = format!("{new_parent_path}{id}/");
        let depth_delta = (new_parent_depth + 1) - old_depth;

        // Rewrite this note and every descendant's tree_path prefix in one pass.
        let like_pattern = format!("{old_path}%");
        let mut stmt = tx.prepare(
            "SELECT id, tree_path, depth FROM notes WHERE tree_path LIKE ?1 AND profile = ?2",
        )?;
        let subtree: Vec<(i64, String, i32)> = stmt
            .query_map(params![like_pattern, profile], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        for (node_id, node_path, node_depth) in subtree {
            let rewritten_path = format!("{new_path}{}", &node_path[old_path.len()..]);
            tx.execute(
                "UPDATE notes SET tree_path = ?1, depth = ?2, parent_id = COALESCE(parent_id, ?3) \
                 WHERE id = ?4",
                params![rewritten_path, node_depth + depth_delta, new_parent_id, node_id],
            )?;
        }
        tx.execute(
            "UPDATE notes SET parent_id = ?1 WHERE id = ?2",
            params![new_parent_id, id],
        )?;
        tx.commit()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddInput;
    use tempfile::tempdir;

    fn storage() -> (Storage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(dir.path().join("memory.db")).unwrap();
        (storage, dir)
    }

    fn child_input(content: &str, parent_id: Option<i64>) -> AddInput {
        AddInput {
            content: content.to_string(),
            parent_id,
            ..Default::default()
        }
    }

    #[test]
    fn tree_path_and_depth_are_consistent_with_parent() {
        let (storage, _dir) = storage();
        let root = storage.add("default", child_input("root", None)).unwrap();
        let child = storage
            .add("default", child_input("child", Some(root.id)))
            .unwrap();
        assert!(child.tree_path.starts_with(&root.tree_path));
        assert_eq!(child.depth, root.depth + 1);
    }

    #[test]
    fn descendants_and_ancestors_are_symmetric() {
        let (storage, _dir) = storage();
        let root = storage.add("default", child_input("root", None)).unwrap();
        let child = storage
            .add("default", child_input("child", Some(root.id)))
            .unwrap();
        let grandchild = storage
            .add("default", child_input("grandchild", Some(child.id)))
            .unwrap();

        let descendants = storage.descendants("default", root.id).unwrap();
        assert_eq!(descendants.len(), 2);

        let ancestors = storage.ancestors("default", grandchild.id).unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[0].id, child.id);
        assert_eq!(ancestors[1].id, root.id);
    }

    #[test]
    fn reparent_rejects_moving_under_own_descendant() {
        let (storage, _dir) = storage();
        let root = storage.add("default", child_input("root", None)).unwrap();
        let child = storage
            .add("default", child_input("child", Some(root.id)))
            .unwrap();
        let err = storage.reparent("default", root.id, Some(child.id)).unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[test]
    fn ancestors_does_not_cross_profiles() {
        let (storage, _dir) = storage();
        let root = storage.add("work", child_input("root", None)).unwrap();
        let child = storage
            .add("work", child_input("child", Some(root.id)))
            .unwrap();
        let err = storage.ancestors("default", child.id).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn reparent_rewrites_subtree_paths() {
        let (storage, _dir) = storage();
        let a = storage.add("default", child_input("a", None)).unwrap();
        let b = storage.add("default", child_input("b", None)).unwrap();
        let child = storage
            .add("default", child_input("child", Some(a.id)))
            .unwrap();

        storage.reparent("default", child.id, Some(b.id)).unwrap();

        let moved = storage.peek("default", child.id).unwrap().unwrap();
        assert!(moved.tree_path.starts_with(&b.tree_path));
        assert_eq!(moved.depth, b.depth + 1);
    }
}
