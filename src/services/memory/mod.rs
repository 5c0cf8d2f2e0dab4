//! Project Memory System
//!
//! Durable per-project memory: a key-value item store, a directed typed
//! relation graph over the same keys, and strategy-selectable retrieval
//! composing the two.
//!
//! ## Module Structure
//!
//! - `store` — Core `ProjectMemoryStore` with CRUD and legacy import
//! - `graph` — `RelationGraph` traversal, clustering, and path finding
//! - `retrieval` — Search strategies and relevance scoring
//! - `registry` — Shared store handles keyed by resolved project path

pub mod graph;
pub mod registry;
pub mod retrieval;
pub mod store;

pub use graph::{MemoryGraph, MemoryRelation, RelationDirection, RelationGraph};
pub use registry::StoreRegistry;
pub use retrieval::{
    compute_relevance_score, search_with_strategy, SearchRequest, SearchStrategy,
};
pub use store::{MemoryItem, MemoryStats, ProjectMemoryStore};
