//! Storage Path Resolution
//!
//! Functions for resolving where a project's memory database and legacy
//! flat-file store live on disk. Each project keeps its data under a
//! `.project-memory/` directory inside the project root.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Directory name holding a project's memory files
pub const MEMORY_DIR_NAME: &str = ".project-memory";

/// Database file name within the memory directory
pub const DATABASE_FILE_NAME: &str = "memory.db";

/// Legacy flat-file store name, imported once then renamed
pub const LEGACY_FILE_NAME: &str = "memories.json";

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Project directory used by callers that do not pass an explicit one
pub fn default_project_dir() -> AppResult<PathBuf> {
    home_dir()
}

/// Get the memory directory for a project (<project>/.project-memory/)
pub fn memory_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(MEMORY_DIR_NAME)
}

/// Get the database file path for a project
pub fn database_path(project_dir: &Path) -> PathBuf {
    memory_dir(project_dir).join(DATABASE_FILE_NAME)
}

/// Get the legacy flat-file store path for a project.
///
/// The legacy file sits adjacent to the database file and is consumed
/// (then renamed with a `.backup` suffix) the first time a store is
/// opened for the project.
pub fn legacy_store_path(project_dir: &Path) -> PathBuf {
    memory_dir(project_dir).join(LEGACY_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_dir() {
        let dir = memory_dir(Path::new("/some/project"));
        assert!(dir.to_string_lossy().contains(".project-memory"));
    }

    #[test]
    fn test_database_path() {
        let path = database_path(Path::new("/some/project"));
        assert!(path.to_string_lossy().ends_with("memory.db"));
    }

    #[test]
    fn test_legacy_store_path_is_sibling_of_database() {
        let project = Path::new("/some/project");
        let db = database_path(project);
        let legacy = legacy_store_path(project);
        assert_eq!(db.parent(), legacy.parent());
    }
}
