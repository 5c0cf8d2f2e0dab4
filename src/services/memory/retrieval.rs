//! Memory Retrieval Strategies
//!
//! Strategy-selectable search over the item store and relation graph.
//! Every strategy honors the same `limit` and `category` contract; the
//! strategies differ in how candidates are matched and ranked.

use rusqlite::params;

use crate::services::memory::graph::RelationGraph;
use crate::services::memory::store::{
    row_to_memory_item, MemoryItem, ProjectMemoryStore, ITEM_COLUMNS,
};
use crate::utils::error::{AppError, AppResult};

/// Results returned when a caller does not supply a limit
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Hops followed when a graph traversal caller does not supply a depth
pub const DEFAULT_TRAVERSAL_DEPTH: usize = 2;

// ============================================================================
// Data Types
// ============================================================================

/// Named search strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    Keyword,
    GraphTraversal,
    Temporal,
    Priority,
    ContextAware,
}

impl SearchStrategy {
    /// Parse a strategy name. Unknown names return `None`, which the
    /// dispatcher maps to the item store's plain search.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(SearchStrategy::Keyword),
            "graph_traversal" => Some(SearchStrategy::GraphTraversal),
            "temporal" => Some(SearchStrategy::Temporal),
            "priority" => Some(SearchStrategy::Priority),
            "context_aware" => Some(SearchStrategy::ContextAware),
            _ => None,
        }
    }

    /// Strategy name as accepted by [`parse`](SearchStrategy::parse)
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Keyword => "keyword",
            SearchStrategy::GraphTraversal => "graph_traversal",
            SearchStrategy::Temporal => "temporal",
            SearchStrategy::Priority => "priority",
            SearchStrategy::ContextAware => "context_aware",
        }
    }
}

/// A search request. `strategy` is the free-form strategy name;
/// omitting it selects `keyword`.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub strategy: Option<String>,
    pub category: Option<String>,
    pub limit: usize,
    pub start_key: Option<String>,
    pub depth: usize,
    pub relation_type: Option<String>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            strategy: None,
            category: None,
            limit: DEFAULT_SEARCH_LIMIT,
            start_key: None,
            depth: DEFAULT_TRAVERSAL_DEPTH,
            relation_type: None,
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Composite relevance used by the `context_aware` strategy:
///
///   score = 3.0 (query matches key)
///         + 2.0 (query matches value)
///         + priority * 0.5
///
/// Matching is case-insensitive substring containment, mirroring the
/// LIKE-based strategies.
pub fn compute_relevance_score(key_match: bool, value_match: bool, priority: i64) -> f64 {
    let mut score = 0.0;
    if key_match {
        score += 3.0;
    }
    if value_match {
        score += 2.0;
    }
    score + priority as f64 * 0.5
}

// ============================================================================
// Dispatch
// ============================================================================

/// Run a search request against a store.
///
/// An unknown strategy name falls back to the item store's plain
/// `search` (limit still applied). A `graph_traversal` request without a
/// `start_key` falls back to `keyword` with the same query rather than
/// erroring. As with the underlying substring semantics, an empty query
/// matches every row.
pub fn search_with_strategy(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
) -> AppResult<Vec<MemoryItem>> {
    let strategy = match request.strategy.as_deref() {
        None => Some(SearchStrategy::Keyword),
        Some(name) => SearchStrategy::parse(name),
    };

    match strategy {
        Some(SearchStrategy::Keyword) => keyword_search(store, request),
        Some(SearchStrategy::GraphTraversal) => graph_traversal_search(store, request),
        Some(SearchStrategy::Temporal) => substring_search(store, request, "timestamp DESC"),
        Some(SearchStrategy::Priority) => {
            substring_search(store, request, "priority DESC, lastAccessed DESC")
        }
        Some(SearchStrategy::ContextAware) => context_aware_search(store, request),
        None => {
            let mut items = store.search(&request.query)?;
            items.truncate(request.limit);
            Ok(items)
        }
    }
}

fn keyword_search(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
) -> AppResult<Vec<MemoryItem>> {
    substring_search(store, request, "priority DESC, timestamp DESC")
}

/// Graph traversal from `start_key`; without one, the request degrades
/// to a keyword search over the same query.
fn graph_traversal_search(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
) -> AppResult<Vec<MemoryItem>> {
    let start_key = match request.start_key.as_deref() {
        Some(key) => key,
        None => return keyword_search(store, request),
    };

    let graph = RelationGraph::for_store(store);
    let mut items =
        graph.get_related_memories(start_key, request.depth, request.relation_type.as_deref())?;
    if let Some(ref category) = request.category {
        items.retain(|item| &item.category == category);
    }
    items.truncate(request.limit);
    Ok(items)
}

fn context_aware_search(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
) -> AppResult<Vec<MemoryItem>> {
    // Unbounded fetch; the limit applies after scoring
    let candidates = substring_candidates(store, request, "priority DESC, timestamp DESC", -1)?;

    let needle = request.query.to_lowercase();
    let mut scored: Vec<(f64, MemoryItem)> = candidates
        .into_iter()
        .map(|item| {
            let key_match = item.key.to_lowercase().contains(&needle);
            let value_match = item.value.to_lowercase().contains(&needle);
            let score = compute_relevance_score(key_match, value_match, item.priority);
            (score, item)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap()
            .then_with(|| b.1.last_accessed.cmp(&a.1.last_accessed))
    });

    Ok(scored
        .into_iter()
        .take(request.limit)
        .map(|(_, item)| item)
        .collect())
}

fn substring_search(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
    order_by: &str,
) -> AppResult<Vec<MemoryItem>> {
    substring_candidates(store, request, order_by, request.limit as i64)
}

/// Shared LIKE query over key and value with optional category filter.
/// A `limit` of -1 is SQLite's spelling of "no limit".
fn substring_candidates(
    store: &ProjectMemoryStore,
    request: &SearchRequest,
    order_by: &str,
    limit: i64,
) -> AppResult<Vec<MemoryItem>> {
    let conn = store
        .pool()
        .get()
        .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;
    let pattern = format!("%{}%", request.query);

    if let Some(ref category) = request.category {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories
             WHERE (key LIKE ?1 OR value LIKE ?1) AND category = ?2
             ORDER BY {} LIMIT ?3",
            ITEM_COLUMNS, order_by
        ))?;
        let rows = stmt
            .query_map(params![pattern, category, limit], row_to_memory_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    } else {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories
             WHERE key LIKE ?1 OR value LIKE ?1
             ORDER BY {} LIMIT ?2",
            ITEM_COLUMNS, order_by
        ))?;
        let rows = stmt
            .query_map(params![pattern, limit], row_to_memory_item)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

// ============================================================================
// Tests
// ============================================================================
