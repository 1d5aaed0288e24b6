//! Reset (`reset soft|hard|layer`, §6). The façade always takes a backup
//! before calling into this module; these methods themselves are a plain,
//! unconditional clear scoped to one profile, reusing the cascade-delete
//! ordering `profile::ProfileManager::delete` already established.

use rusqlite::params;

use crate::model::{ResetLayer, ResetReport, ResetScope};

use super::sqlite::{Result, Storage};

impl Storage {
    pub fn reset(&self, profile: &str, scope: ResetScope) -> Result<ResetReport> {
        match scope {
            ResetScope::Soft => self.clear_memories(profile),
            ResetScope::Hard => self.clear_everything(profile),
            ResetScope::Layer(layer) => self.clear_layer(profile, layer),
        }
    }

    fn clear_memories(&self, profile: &str) -> Result<ResetReport> {
        let writer = self.writer();
        writer.execute(
            "DELETE FROM pattern_examples WHERE pattern_id IN \
             (SELECT id FROM identity_patterns WHERE profile = ?1)",
            params![profile],
        )?;
        writer.execute("DELETE FROM identity_patterns WHERE profile = ?1", params![profile])?;
        writer.execute("DELETE FROM graph_nodes WHERE profile = ?1", params![profile])?;
        writer.execute("DELETE FROM graph_edges WHERE profile = ?1", params![profile])?;
        writer.execute("DELETE FROM clusters WHERE profile = ?1", params![profile])?;
        writer.execute(
            "DELETE FROM archive_entries WHERE original_memory_id IN \
             (SELECT id FROM notes WHERE profile = ?1)",
            params![profile],
        )?;
        let notes_cleared = writer.execute("DELETE FROM notes WHERE profile = ?1", params![profile])? as i64;
        Ok(ResetReport {
            notes_cleared,
            graph_cleared: true,
            patterns_cleared: true,
        })
    }

    fn clear_everything(&self, profile: &str) -> Result<ResetReport> {
        let report = self.clear_memories(profile)?;
        let writer = self.writer();
        writer.execute("DELETE FROM event_log WHERE profile = ?1", params![profile])?;
        writer.execute("DELETE FROM graph_builds WHERE profile = ?1", params![profile])?;
        Ok(report)
    }

    fn clear_layer(&self, profile: &str, layer: ResetLayer) -> Result<ResetReport> {
        let writer = self.writer();
        match layer {
            ResetLayer::Graph => {
                writer.execute("DELETE FROM graph_nodes WHERE profile = ?1", params![profile])?;
                writer.execute("DELETE FROM graph_edges WHERE profile = ?1", params![profile])?;
                writer.execute("DELETE FROM clusters WHERE profile = ?1", params![profile])?;
                writer.execute("UPDATE notes SET cluster_id = NULL WHERE profile = ?1", params![profile])?;
                writer.execute("DELETE FROM graph_builds WHERE profile = ?1", params![profile])?;
                Ok(ResetReport {
                    notes_cleared: 0,
                    graph_cleared: true,
                    patterns_cleared: false,
                })
            }
            ResetLayer::Patterns => {
                writer.execute(
                    "DELETE FROM pattern_examples WHERE pattern_id IN \
                     (SELECT id FROM identity_patterns WHERE profile = ?1)",
                    params![profile],
                )?;
                writer.execute("DELETE FROM identity_patterns WHERE profile = ?1", params![profile])?;
                Ok(ResetReport {
                    notes_cleared: 0,
                    graph_cleared: false,
                    patterns_cleared: true,
                })
            }
        }
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

    #[test]
    fn soft_reset_clears_notes_but_leaves_profile_registry_intact() {
        let (storage, _dir) = storage();
        storage
            .add("default", AddInput { content: "to clear".into(), ..Default::default() })
            .unwrap();
        let report = storage.reset("default", ResetScope::Soft).unwrap();
        assert_eq!(report.notes_cleared, 1);
        assert_eq!(storage.stats("default").unwrap().total_notes, 0);
    }

    #[test]
    fn layer_reset_only_touches_the_named_layer() {
        let (storage, _dir) = storage();
        let note = storage
            .add("default", AddInput { content: "Using Rust for the backend".into(), ..Default::default() })
            .unwrap();
        storage
            .build_graph("default", &crate::config::GraphConfig::default(), &crate::error::CancellationToken::new())
            .unwrap();
        storage.reset("default", ResetScope::Layer(ResetLayer::Graph)).unwrap();
        assert!(storage.get("default", note.id).unwrap().is_some());
        assert!(storage.related("default", note.id).unwrap().is_empty());
    }
}
