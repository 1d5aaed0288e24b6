//! # Memoria Core
//!
//! A local-first, single-user knowledge memory engine for an AI assistant:
//! durable note storage with full-text search and content-hash dedup, a
//! hierarchical tree index over parent/child relationships, a TF·IDF-driven
//! knowledge graph with seeded community detection, a hybrid (keyword + term
//! + graph-propagation) searcher, and a Beta-Binomial pattern learner that
//! surfaces recurring user preferences.
//!
//! Everything is reachable through one entry point, [`Engine`]. The engine
//! owns a single SQLite database file plus a small `profiles.json` sidecar;
//! every layer beneath it (storage, tree, graph, search, patterns, profiles,
//! backup/compression) is implemented as inherent methods on
//! [`storage::Storage`] or a borrowing helper constructed on demand, never as
//! global state. Bindings (CLI, MCP server, HTTP dashboard) live outside this
//! crate and talk to it only through [`Engine`]'s methods and the typed
//! records in [`model`].
//!
//! ```rust,no_run
//! use memoria_core::{AddInput, Engine};
//!
//! let engine = Engine::open(None).unwrap();
//! let note = engine.add(AddInput { content: "Built the graph builder today".into(), ..Default::default() }).unwrap();
//! let hits = engine.search("graph builder", 10, 0.0, Default::default()).unwrap();
//! assert!(hits.iter().any(|h| h.note.id == note.id));
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod graph;
pub mod model;
pub mod patterns;
pub mod profile;
pub mod search;
pub mod storage;
pub mod terms;

pub use config::Config;
pub use error::{CancellationToken, EngineError, Result};
pub use event::{Event, EventLog};
pub use facade::Engine;
pub use model::{
    AddInput, ArchiveEntry, BuildStats, Cluster, Filters, FusionMode, GraphEdge, GraphNode,
    GraphStats, GraphView, GraphViewNode, Hit, IdentityContext, IdentityPattern, Note,
    PatternExample, PatternType, PriorCategory, ProfileInfo, ProfileSummary, ResetLayer,
    ResetReport, ResetScope, SearchSource, SortOrder, Status, StorageStats, Tier, TimelineBucket,
};
pub use profile::DEFAULT_PROFILE;
pub use search::EmbeddingProvider;
pub use storage::{CompressionReport, Storage, StorageError};
