//! Memory Relation Graph
//!
//! Directed, typed, weighted edges between memory keys, layered over the
//! item store's connection pool. Provides neighborhood traversal,
//! graph-view assembly with connected-component clustering, and
//! unweighted shortest-path search.
//!
//! Endpoints are never validated against the item table; a caller that
//! wants existence checks performs them itself.

use std::collections::{HashMap, HashSet, VecDeque};

use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::services::memory::store::{
    now_utc, row_to_memory_item, MemoryItem, ProjectMemoryStore, ITEM_COLUMNS,
};
use crate::storage::database::DbPool;
use crate::utils::error::{AppError, AppResult};

/// Strength applied when a caller does not supply one
pub const DEFAULT_STRENGTH: f64 = 1.0;

/// Columns selected for every `MemoryRelation` read, in
/// `row_to_relation` order.
const RELATION_COLUMNS: &str =
    "sourceKey, targetKey, relationType, strength, metadata, timestamp";

// ============================================================================
// Data Types
// ============================================================================

/// A directed, typed edge between two memory keys.
///
/// `strength` is advisory metadata only: no traversal or path cost ever
/// consults it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRelation {
    pub source_key: String,
    pub target_key: String,
    pub relation_type: String,
    pub strength: f64,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: String,
}

/// Which edges of a key a relation query matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationDirection {
    /// Edges where the key is the source
    Outgoing,
    /// Edges where the key is the target
    Incoming,
    /// The union of both queries
    Both,
}

/// An ephemeral graph view: nodes, edges, and connected-component
/// clusters computed over exactly this view's edge set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryGraph {
    pub nodes: Vec<MemoryItem>,
    pub edges: Vec<MemoryRelation>,
    pub clusters: Vec<Vec<String>>,
}

// ============================================================================
// RelationGraph
// ============================================================================

/// Traversal and analysis over the relation table
pub struct RelationGraph {
    pool: DbPool,
}

impl RelationGraph {
    /// Create a graph over an existing connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a graph sharing a store's pool
    pub fn for_store(store: &ProjectMemoryStore) -> Self {
        Self::new(store.pool().clone())
    }

    // ========================================================================
    // Edge maintenance
    // ========================================================================

    /// Create or refresh the edge `source → target` of the given type.
    ///
    /// Re-linking an existing (source, target, type) triple updates its
    /// strength, metadata and timestamp instead of adding a duplicate
    /// edge. Returns `false` only on a storage failure; the cause is
    /// logged and swallowed, so callers cannot tell a refresh apart from
    /// a rejection.
    pub fn link_memories(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        strength: f64,
        metadata: Option<&serde_json::Value>,
    ) -> bool {
        match self.try_link(source, target, relation_type, strength, metadata) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    source,
                    target,
                    relation_type,
                    error = %e,
                    "Failed to link memories"
                );
                false
            }
        }
    }

    fn try_link(
        &self,
        source: &str,
        target: &str,
        relation_type: &str,
        strength: f64,
        metadata: Option<&serde_json::Value>,
    ) -> AppResult<()> {
        let metadata_json = metadata.map(|m| m.to_string());
        let now = now_utc();
        let conn = self.get_connection()?;
        conn.execute(
            "INSERT INTO memory_relations
                 (sourceKey, targetKey, relationType, strength, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(sourceKey, targetKey, relationType) DO UPDATE SET
                 strength = ?4, metadata = ?5, timestamp = ?6",
            params![source, target, relation_type, strength, metadata_json, now],
        )?;
        Ok(())
    }

    /// Delete relations for exactly the ordered pair `source → target`.
    ///
    /// The reverse edge `target → source` is untouched even when its
    /// type matches. Omitting `relation_type` removes every type for the
    /// pair. Returns whether any row was removed.
    pub fn unlink_memories(
        &self,
        source: &str,
        target: &str,
        relation_type: Option<&str>,
    ) -> AppResult<bool> {
        let conn = self.get_connection()?;
        let rows = match relation_type {
            Some(relation_type) => conn.execute(
                "DELETE FROM memory_relations
                 WHERE sourceKey = ?1 AND targetKey = ?2 AND relationType = ?3",
                params![source, target, relation_type],
            )?,
            None => conn.execute(
                "DELETE FROM memory_relations WHERE sourceKey = ?1 AND targetKey = ?2",
                params![source, target],
            )?,
        };
        Ok(rows > 0)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Edges touching a key, filtered by direction.
    ///
    /// `Both` concatenates the outgoing and incoming query results
    /// without further deduplication.
    pub fn get_relations(
        &self,
        key: &str,
        direction: RelationDirection,
    ) -> AppResult<Vec<MemoryRelation>> {
        let conn = self.get_connection()?;
        let mut relations = Vec::new();

        if matches!(
            direction,
            RelationDirection::Outgoing | RelationDirection::Both
        ) {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_relations WHERE sourceKey = ?1",
                RELATION_COLUMNS
            ))?;
            relations.extend(
                stmt.query_map(params![key], row_to_relation)?
                    .filter_map(|r| r.ok()),
            );
        }

        if matches!(
            direction,
            RelationDirection::Incoming | RelationDirection::Both
        ) {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_relations WHERE targetKey = ?1",
                RELATION_COLUMNS
            ))?;
            relations.extend(
                stmt.query_map(params![key], row_to_relation)?
                    .filter_map(|r| r.ok()),
            );
        }

        Ok(relations)
    }

    /// Items reachable from `key` within `depth` hops, breadth-first.
    ///
    /// Edges are followed in both directions. Each key is visited at
    /// most once across the whole traversal, and the start key is
    /// excluded from the result. A `relation_type` filter applies at
    /// every hop, so a branch reachable only through other edge types is
    /// cut off even when an unfiltered path exists.
    pub fn get_related_memories(
        &self,
        key: &str,
        depth: usize,
        relation_type: Option<&str>,
    ) -> AppResult<Vec<MemoryItem>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(key.to_string());

        let mut collected: Vec<String> = Vec::new();
        let mut frontier: Vec<String> = vec![key.to_string()];

        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for current in &frontier {
                for relation in self.get_relations(current, RelationDirection::Both)? {
                    if let Some(wanted) = relation_type {
                        if relation.relation_type != wanted {
                            continue;
                        }
                    }
                    let neighbor = if relation.source_key == *current {
                        relation.target_key
                    } else {
                        relation.source_key
                    };
                    if visited.insert(neighbor.clone()) {
                        collected.push(neighbor.clone());
                        next.push(neighbor);
                    }
                }
            }
            frontier = next;
        }

        self.fetch_items(&collected)
    }

    /// Assemble a graph view.
    ///
    /// With a key: level-bounded BFS from that key, inclusive of the key
    /// itself, collecting every item visited and every edge touched
    /// (deduplicated by the (source, target, type) triple).
    ///
    /// Without a key: every item in the store becomes a node, and each
    /// node contributes only its outgoing edges. A node whose relations
    /// are all incoming therefore shows no edges of its own in this
    /// view; the edges still enter the set through their source nodes.
    /// Downstream consumers depend on this exact shape, so it must not
    /// be symmetrized.
    pub fn get_memory_graph(&self, key: Option<&str>, depth: usize) -> AppResult<MemoryGraph> {
        match key {
            Some(start) => self.graph_from(start, depth),
            None => self.whole_store_graph(),
        }
    }

    fn graph_from(&self, start: &str, depth: usize) -> AppResult<MemoryGraph> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start.to_string());
        let mut order: Vec<String> = vec![start.to_string()];

        let mut edges: Vec<MemoryRelation> = Vec::new();
        let mut edge_seen: HashSet<(String, String, String)> = HashSet::new();

        let mut frontier: Vec<String> = vec![start.to_string()];
        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for current in &frontier {
                for relation in self.get_relations(current, RelationDirection::Both)? {
                    let triple = (
                        relation.source_key.clone(),
                        relation.target_key.clone(),
                        relation.relation_type.clone(),
                    );
                    let neighbor = if relation.source_key == *current {
                        relation.target_key.clone()
                    } else {
                        relation.source_key.clone()
                    };
                    if edge_seen.insert(triple) {
                        edges.push(relation);
                    }
                    if visited.insert(neighbor.clone()) {
                        order.push(neighbor.clone());
                        next.push(neighbor);
                    }
                }
            }
            frontier = next;
        }

        let nodes = self.fetch_items(&order)?;
        let clusters = compute_clusters(&nodes, &edges);
        Ok(MemoryGraph {
            nodes,
            edges,
            clusters,
        })
    }

    fn whole_store_graph(&self) -> AppResult<MemoryGraph> {
        let nodes = {
            let conn = self.get_connection()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memories ORDER BY priority DESC, timestamp DESC",
                ITEM_COLUMNS
            ))?;
            let items: Vec<MemoryItem> = stmt
                .query_map([], row_to_memory_item)?
                .filter_map(|r| r.ok())
                .collect();
            items
        };

        let mut edges = Vec::new();
        for node in &nodes {
            edges.extend(self.get_relations(&node.key, RelationDirection::Outgoing)?);
        }

        let clusters = compute_clusters(&nodes, &edges);
        Ok(MemoryGraph {
            nodes,
            edges,
            clusters,
        })
    }

    /// Unweighted shortest path between two keys, treating every edge as
    /// undirected. Strength never affects the result.
    ///
    /// `source == target` yields the single-element path immediately,
    /// whether or not the key has edges. No connecting path yields
    /// `Ok(None)`, never an error.
    pub fn find_path(&self, source: &str, target: &str) -> AppResult<Option<Vec<String>>> {
        if source == target {
            return Ok(Some(vec![source.to_string()]));
        }

        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(source.to_string());
        let mut predecessor: HashMap<String, String> = HashMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(source.to_string());

        while let Some(current) = queue.pop_front() {
            for relation in self.get_relations(&current, RelationDirection::Both)? {
                let neighbor = if relation.source_key == current {
                    relation.target_key
                } else {
                    relation.source_key
                };
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                predecessor.insert(neighbor.clone(), current.clone());
                if neighbor == target {
                    return Ok(Some(reconstruct_path(&predecessor, source, target)));
                }
                queue.push_back(neighbor);
            }
        }

        Ok(None)
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Fetch items for the given keys, preserving key order and skipping
    /// keys with no item row (dangling relation endpoints).
    fn fetch_items(&self, keys: &[String]) -> AppResult<Vec<MemoryItem>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM memories WHERE key = ?1",
            ITEM_COLUMNS
        ))?;

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match stmt.query_row(params![key], row_to_memory_item) {
                Ok(item) => items.push(item),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(items)
    }

    /// Get a connection from the pool
    fn get_connection(
        &self,
    ) -> AppResult<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }
}

impl std::fmt::Debug for RelationGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationGraph").finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Convert a database row to a MemoryRelation (column order:
/// `RELATION_COLUMNS`)
fn row_to_relation(row: &rusqlite::Row) -> rusqlite::Result<MemoryRelation> {
    let metadata_json: Option<String> = row.get(4)?;
    Ok(MemoryRelation {
        source_key: row.get(0)?,
        target_key: row.get(1)?,
        relation_type: row.get(2)?,
        strength: row.get(3)?,
        metadata: metadata_json.and_then(|raw| serde_json::from_str(&raw).ok()),
        timestamp: row.get(5)?,
    })
}

fn reconstruct_path(
    predecessor: &HashMap<String, String>,
    source: &str,
    target: &str,
) -> Vec<String> {
    let mut path = vec![target.to_string()];
    let mut current = target;
    while current != source {
        match predecessor.get(current) {
            Some(prev) => {
                path.push(prev.clone());
                current = prev;
            }
            None => break,
        }
    }
    path.reverse();
    path
}

/// Connected components of size >= 2 over exactly the given node/edge
/// set, treating every edge as undirected. Edges whose endpoints are not
/// both in the node set are ignored.
fn compute_clusters(nodes: &[MemoryItem], edges: &[MemoryRelation]) -> Vec<Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.key.as_str(), i))
        .collect();

    let mut uf = UnionFind::new(nodes.len());
    for edge in edges {
        if let (Some(&a), Some(&b)) = (
            index.get(edge.source_key.as_str()),
            index.get(edge.target_key.as_str()),
        ) {
            uf.union(a, b);
        }
    }

    let mut groups: HashMap<usize, Vec<String>> = HashMap::new();
    for (i, node) in nodes.iter().enumerate() {
        groups.entry(uf.find(i)).or_default().push(node.key.clone());
    }

    let mut clusters: Vec<Vec<String>> = groups.into_values().filter(|g| g.len() >= 2).collect();
    // Deterministic output order for an otherwise hash-ordered grouping
    clusters.sort_by(|a, b| a[0].cmp(&b[0]));
    clusters
}

/// Union-find with path compression, sized to the node set of one view
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
