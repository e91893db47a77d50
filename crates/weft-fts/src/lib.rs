//! Backend-agnostic full-text search for Weft.
//!
//! This crate ties the pieces together: documents and their mapping from
//! host objects, the generation-aware backend interface with an embedded
//! SQLite FTS5 engine and a remote JSON engine, atomic index rebuilds,
//! and incremental update fan-out.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        weft-fts                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SearchService (validate → search → hydrate)                │
//! │  UpdateDispatcher (fan-out, per-backend isolation)          │
//! │  Rebuilder (hidden generation → fill → promote → retire)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SearchBackend trait                                        │
//! │  ├── SqliteBackend (embedded, FTS5)                         │
//! │  └── RemoteBackend (JSON over HTTP, alias swap)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  DocumentMapper / Indexable (object → Document)             │
//! │  per-backend query compilers (QueryNode → SQL / DSL)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use weft_fts::{create_backends, Rebuilder, SearchService};
//!
//! let backends = create_backends(&config.backends, registry.clone()).await?;
//! let rebuilder = Rebuilder::new(backends[0].backend.clone(), registry, inflight);
//! rebuilder.rebuild(&page, &mut source, &options, &cancel).await?;
//!
//! let results = service
//!     .search_plain(&page, "quick fox", PlainTextOperator::Or, Pagination::default())
//!     .await?;
//! ```

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod mapper;
pub mod rebuilder;
pub mod remote;
pub mod service;
pub mod sqlite;

// Re-exports
pub use backend::{
    BoundBackend, FacetCount, IndexGeneration, Ordering, Pagination, SearchBackend, SearchHit,
    WriteTarget, create_backend, create_backends,
};
pub use config::{BackendConfig, EngineConfig, SearchConfig};
pub use dispatcher::{DispatchOutcome, DispatchReport, UpdateDispatcher};
pub use document::{Document, FieldValue, MULTI_VALUE_SEPARATOR, normalize_text};
pub use mapper::{DocumentMapper, Indexable};
pub use rebuilder::{
    CancelFlag, DocumentSource, InMemorySource, InflightRegistry, RebuildOptions, RebuildStats,
    Rebuilder,
};
pub use remote::RemoteBackend;
pub use service::{ObjectLookup, SearchResult, SearchService};
pub use sqlite::SqliteBackend;
