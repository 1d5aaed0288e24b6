//! Storage layer: schema & migrations (C1), the note store (C2), the
//! hierarchical tree index (C3), and backup/compression (C9).

mod backup;
mod compression;
mod migrations;
mod reset;
mod sqlite;
mod tree;

pub use backup::get_last_backup_timestamp;
pub use compression::CompressionReport;
pub use migrations::{Migration, MIGRATIONS};
pub(crate) use sqlite::parse_timestamp;
pub use sqlite::{Result, Storage, StorageError};
