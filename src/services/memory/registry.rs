//! Store Registry
//!
//! Process-wide map from resolved project path to a shared store handle.
//! Callers that resolve the same physical path share one handle (and
//! therefore one connection pool); distinct paths get independent
//! handles. The engine adds no coordination beyond this sharing; across
//! processes, SQLite's own locking is the only arbiter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::services::memory::store::ProjectMemoryStore;
use crate::utils::error::AppResult;
use crate::utils::paths;

/// Registry of open stores, keyed by resolved project path
pub struct StoreRegistry {
    stores: Mutex<HashMap<PathBuf, Arc<ProjectMemoryStore>>>,
}

impl StoreRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry
    pub fn global() -> &'static StoreRegistry {
        static REGISTRY: OnceLock<StoreRegistry> = OnceLock::new();
        REGISTRY.get_or_init(StoreRegistry::new)
    }

    /// Get the shared store for a project directory, opening it on first
    /// use. Construction failures (directory creation, file open)
    /// propagate; an already-open handle is returned as-is.
    pub fn store_for(&self, project_dir: &Path) -> AppResult<Arc<ProjectMemoryStore>> {
        let resolved = resolve_path(project_dir);

        let mut stores = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(&resolved) {
            return Ok(store.clone());
        }

        let store = Arc::new(ProjectMemoryStore::open(project_dir)?);
        stores.insert(resolved, store.clone());
        Ok(store)
    }

    /// The shared store for callers without an explicit project
    pub fn default_store(&self) -> AppResult<Arc<ProjectMemoryStore>> {
        self.store_for(&paths::default_project_dir()?)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonicalize where possible so symlinked and relative spellings of
/// the same directory share a handle. A path that does not exist yet
/// falls back to its absolute form.
fn resolve_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_shares_handle() {
        let registry = StoreRegistry::new();
        let tmp = tempfile::tempdir().unwrap();

        let a = registry.store_for(tmp.path()).unwrap();
        let b = registry.store_for(tmp.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_distinct_paths_get_distinct_handles() {
        let registry = StoreRegistry::new();
        let tmp_a = tempfile::tempdir().unwrap();
        let tmp_b = tempfile::tempdir().unwrap();

        let a = registry.store_for(tmp_a.path()).unwrap();
        let b = registry.store_for(tmp_b.path()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_shared_handle_sees_writes() {
        let registry = StoreRegistry::new();
        let tmp = tempfile::tempdir().unwrap();

        let a = registry.store_for(tmp.path()).unwrap();
        a.save("k", "v", "general", 0).unwrap();

        let b = registry.store_for(tmp.path()).unwrap();
        assert!(b.recall("k").unwrap().is_some());
    }
}
