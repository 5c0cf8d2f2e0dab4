//! Memory Engine Integration Tests
//!
//! Cross-layer flows over real files: registry handle sharing, legacy
//! store import, cascade deletion observed through the graph, and
//! strategy search over a linked store.

use std::path::PathBuf;
use std::sync::Arc;

use project_memory::{
    search_with_strategy, MemoryItem, ProjectMemoryStore, RelationDirection, RelationGraph,
    SearchRequest, StoreRegistry, DEFAULT_CATEGORY, DEFAULT_STRENGTH,
};

fn keys(items: &[MemoryItem]) -> Vec<&str> {
    items.iter().map(|i| i.key.as_str()).collect()
}

#[test]
fn test_store_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let store = ProjectMemoryStore::open(tmp.path()).unwrap();
        store.save("k", "v", "notes", 4).unwrap();
    }

    let store = ProjectMemoryStore::open(tmp.path()).unwrap();
    let item = store.recall("k").unwrap().unwrap();
    assert_eq!(item.value, "v");
    assert_eq!(item.category, "notes");
    assert_eq!(item.priority, 4);
}

#[test]
fn test_registry_shares_one_handle_per_path() {
    let registry = StoreRegistry::new();
    let tmp = tempfile::tempdir().unwrap();

    let a = registry.store_for(tmp.path()).unwrap();
    let b = registry.store_for(tmp.path()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    a.save("shared", "v", DEFAULT_CATEGORY, 0).unwrap();
    assert!(b.recall("shared").unwrap().is_some());
}

#[test]
fn test_legacy_import_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let memory_dir = tmp.path().join(".project-memory");
    std::fs::create_dir_all(&memory_dir).unwrap();

    let legacy = memory_dir.join("memories.json");
    std::fs::write(
        &legacy,
        r#"[
            {"key": "style", "value": "tabs not spaces", "category": "preference",
             "priority": 1, "timestamp": "2026-02-01T00:00:00+00:00",
             "lastAccessed": "2026-02-01T00:00:00+00:00"},
            {"key": "owner", "value": "infra team"}
        ]"#,
    )
    .unwrap();

    let store = ProjectMemoryStore::open(tmp.path()).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert!(!legacy.exists());
    assert!(PathBuf::from(format!("{}.backup", legacy.display())).exists());

    // Imported rows behave like any other: full-replace save still wins
    store.save("style", "spaces after all", DEFAULT_CATEGORY, 0).unwrap();
    let item = store.recall("style").unwrap().unwrap();
    assert_eq!(item.value, "spaces after all");
    assert_eq!(item.category, DEFAULT_CATEGORY);
}

#[test]
fn test_cascade_delete_through_the_graph() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ProjectMemoryStore::open(tmp.path()).unwrap();
    let graph = RelationGraph::for_store(&store);

    for key in ["auth", "session", "tokens"] {
        store.save(key, "v", DEFAULT_CATEGORY, 0).unwrap();
    }
    assert!(graph.link_memories("auth", "session", "depends_on", DEFAULT_STRENGTH, None));
    assert!(graph.link_memories("tokens", "auth", "part_of", DEFAULT_STRENGTH, None));

    assert!(store.delete("auth").unwrap());

    // No edge referencing the deleted key survives, in either direction
    for key in ["session", "tokens"] {
        let relations = graph.get_relations(key, RelationDirection::Both).unwrap();
        assert!(
            relations
                .iter()
                .all(|r| r.source_key != "auth" && r.target_key != "auth"),
            "stale edge left on {}",
            key
        );
    }
}

#[test]
fn test_strategy_search_over_linked_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = ProjectMemoryStore::open(tmp.path()).unwrap();
    let graph = RelationGraph::for_store(&store);

    store.save("deploy-runbook", "release steps", "runbook", 5).unwrap();
    store.save("deploy-faq", "common deploy questions", "docs", 1).unwrap();
    store.save("rollback", "how to roll back a deploy", "runbook", 3).unwrap();
    graph.link_memories("deploy-runbook", "rollback", "see_also", DEFAULT_STRENGTH, None);

    // Keyword: priority-ranked substring match
    let items = search_with_strategy(
        &store,
        &SearchRequest {
            query: "deploy".into(),
            strategy: Some("keyword".into()),
            ..SearchRequest::default()
        },
    )
    .unwrap();
    assert_eq!(keys(&items), vec!["deploy-runbook", "rollback", "deploy-faq"]);

    // Graph traversal from the runbook finds its neighbor
    let items = search_with_strategy(
        &store,
        &SearchRequest {
            strategy: Some("graph_traversal".into()),
            start_key: Some("deploy-runbook".into()),
            depth: 1,
            ..SearchRequest::default()
        },
    )
    .unwrap();
    assert_eq!(keys(&items), vec!["rollback"]);

    // Clusters over the whole store: the linked pair, not the isolate
    let view = graph.get_memory_graph(None, 0).unwrap();
    assert_eq!(view.nodes.len(), 3);
    assert_eq!(view.clusters.len(), 1);
    let mut cluster = view.clusters[0].clone();
    cluster.sort();
    assert_eq!(cluster, vec!["deploy-runbook", "rollback"]);
}
