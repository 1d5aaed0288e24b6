//! Keyword search (C6, keyword signal).
//!
//! A thin wrapper over [`Storage::search_keyword`], kept as its own module
//! to mirror the shape the reference project's `search/mod.rs` declares
//! (`mod keyword;` alongside `hybrid`/`vector`), even though here it holds
//! no independent sanitization logic — `sqlite.rs` already owns the single
//! FTS5 query-sanitizing implementation.

use crate::error::Result;
use crate::model::{Filters, Note};
use crate::storage::Storage;

pub struct KeywordSearcher<'a> {
    storage: &'a Storage,
}

impl<'a> KeywordSearcher<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Keyword hits with their normalized-to-`[0, 1]` BM25 score.
    pub fn search(
        &self,
        profile: &str,
        query: &str,
        limit: i64,
        filters: &Filters,
    ) -> Result<Vec<(Note, f64)>> {
        Ok(self.storage.search_keyword(profile, query, limit, filters)?)
    }
}
