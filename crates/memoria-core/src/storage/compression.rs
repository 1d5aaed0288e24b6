//! Compression tiering (C9, compression half).
//!
//! Tier 1 → 2: a note older than `tier2_age_days` and unaccessed for
//! `tier2_inactivity_days` has its content replaced by a summary (first
//! sentence plus top TF·IDF terms), with the original preserved in
//! `archive_entries`. Tier 2 → 3: after `tier3_age_days` without access the
//! content row becomes a pointer and the full (possibly already-summarized)
//! blob moves into `archive_entries`; retrieval transparently
//! re-materializes it. Never invoked implicitly by reads — only by an
//! explicit maintenance operation.

use chrono::Utc;
use rusqlite::params;

use crate::config::CompressionConfig;
use crate::terms::TermExtractor;

use super::sqlite::{row_to_note, Result, Storage, StorageError};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CompressionReport {
    pub promoted_to_tier2: usize,
    pub promoted_to_tier3: usize,
}

impl Storage {
    /// Runs one compression pass over `profile`, advancing eligible notes
    /// to the next tier. Never demotes a tier.
    pub fn compress(&self, profile: &str, config: &CompressionConfig) -> Result<CompressionReport> {
        if !config.enabled {
            return Ok(CompressionReport::default());
        }
        let mut report = CompressionReport::default();
        report.promoted_to_tier2 = self.promote_tier1_to_tier2(profile, config)?;
        report.promoted_to_tier3 = self.promote_tier2_to_tier3(profile, config)?;
        Ok(report)
    }

    fn promote_tier1_to_tier2(&self, profile: &str, config: &CompressionConfig) -> Result<usize> {
        let cutoff_age = Utc::now() - chrono::Duration::days(config.tier2_age_days);
        let cutoff_access = Utc::now() - chrono::Duration::days(config.tier2_inactivity_days);

        let mut writer = self.writer();
        let mut stmt = writer.prepare(
            "SELECT * FROM notes WHERE profile = ?1 AND tier = 1 \
             AND created_at <= ?2 AND last_accessed <= ?3",
        )?;
        let candidates = stmt
            .query_map(
                params![profile, cutoff_age.to_rfc3339(), cutoff_access.to_rfc3339()],
                |row| row_to_note(row),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let extractor = TermExtractor::default();
        let tx = writer.transaction()?;
        let mut promoted = 0;
        for note in candidates {
            let first_sentence = note
                .content
                .split(['.', '\n'])
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            let terms = extractor.top_terms_single(&note.content, 5);
            let term_list = terms
                .iter()
                .map(|(term, _)| term.clone())
                .collect::<Vec<_>>()
                .join(", ");
            let summary = if term_list.is_empty() {
                first_sentence
            } else {
                format!("{first_sentence} [{term_list}]")
            };

            archive_original(&tx, &note)?;
            // The original is preserved verbatim in archive_entries; content
            // itself becomes the summary so a tier-2 read actually returns
            // less data than tier 1, not the untouched original.
            tx.execute(
                "UPDATE notes SET content = ?1, summary = ?1, tier = 2 WHERE id = ?2",
                params![summary, note.id],
            )?;
            promoted += 1;
        }
        tx.commit()?;
        Ok(promoted)
    }

    fn promote_tier2_to_tier3(&self, profile: &str, config: &CompressionConfig) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(config.tier3_age_days);

        let mut writer = self.writer();
        let mut stmt = writer.prepare(
            "SELECT * FROM notes WHERE profile = ?1 AND tier = 2 AND last_accessed <= ?2",
        )?;
        let candidates = stmt
            .query_map(params![profile, cutoff.to_rfc3339()], |row| row_to_note(row))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);

        let tx = writer.transaction()?;
        let mut promoted = 0;
        for note in candidates {
            // The true original was already archived when this note was
            // promoted to tier 2; `note.content` here is just the tier-2
            // summary, so re-archiving it would clobber the original blob.
            let pointer = format!("[archived: see archive_entries for note {}]", note.id);
            tx.execute(
                "UPDATE notes SET content = ?1, tier = 3 WHERE id = ?2",
                params![pointer, note.id],
            )?;
            promoted += 1;
        }
        tx.commit()?;
        Ok(promoted)
    }

    /// Transparently re-materializes an archived note's original content,
    /// scoped to `profile` so a caller cannot read another profile's
    /// archived blob by guessing a note id. Does not change its tier —
    /// restoring visibility is distinct from restoring tier, which only
    /// happens via an explicit maintenance call.
    pub fn rematerialize(&self, profile: &str, id: i64) -> Result<String> {
        let reader = self.reader();
        reader
            .query_row(
                "SELECT a.compressed_blob FROM archive_entries a \
                 JOIN notes n ON n.id = a.original_memory_id \
                 WHERE a.original_memory_id = ?1 AND n.profile = ?2",
                params![id, profile],
                |row| {
                    let blob: Vec<u8> = row.get(0)?;
                    Ok(String::from_utf8_lossy(&blob).to_string())
                },
            )
            .map_err(|_| StorageError::NotFound(format!("no archive entry for note {id}")))
    }
}

fn archive_original(
    writer: &rusqlite::Connection,
    note: &crate::model::Note,
) -> rusqlite::Result<()> {
    let blob = note.content.as_bytes();
    writer.execute(
        "INSERT INTO archive_entries (original_memory_id, compressed_blob, original_size, compressed_size, archived_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(original_memory_id) DO UPDATE SET \
            compressed_blob = excluded.compressed_blob, \
            original_size = excluded.original_size, \
            compressed_size = excluded.compressed_size, \
            archived_at = excluded.archived_at",
        params![
            note.id,
            blob,
            note.content.len() as i64,
            blob.len() as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
