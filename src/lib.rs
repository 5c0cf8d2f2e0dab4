//! Project Memory Engine
//!
//! Durable, per-project memory backed by a single SQLite file:
//! - Key-value memory items with category, priority, and access stamps
//! - A directed, typed, weighted relation graph over the same keys
//! - Strategy-selectable retrieval (keyword, temporal, priority,
//!   context-aware scoring, graph traversal)
//!
//! A store is opened per project directory; `StoreRegistry` shares one
//! handle per resolved path across the process.

pub mod services;
pub mod storage;
pub mod utils;

pub use services::memory::graph::{
    MemoryGraph, MemoryRelation, RelationDirection, RelationGraph, DEFAULT_STRENGTH,
};
pub use services::memory::registry::StoreRegistry;
pub use services::memory::retrieval::{
    compute_relevance_score, search_with_strategy, SearchRequest, SearchStrategy,
    DEFAULT_SEARCH_LIMIT, DEFAULT_TRAVERSAL_DEPTH,
};
pub use services::memory::store::{
    MemoryItem, MemoryStats, ProjectMemoryStore, DEFAULT_CATEGORY,
};
pub use storage::database::{Database, DbPool};
pub use utils::error::{AppError, AppResult};
