//! Path-confined directory listing tool
//!
//! The `list_directory` tool may only see the configured repository
//! root. Candidate paths are resolved with symlinks followed, then
//! prefix-checked against the canonical root; any escape is refused.

use crate::error::{CampfireError, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Confinement root for directory listings
#[derive(Debug, Clone)]
pub struct RepoGuard {
    root: PathBuf,
}

impl RepoGuard {
    /// Canonicalize the root once at construction; a missing root is a
    /// configuration error.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            CampfireError::Config(format!("REPO_ROOT {} is invalid: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path inside the root.
    ///
    /// The candidate is canonicalized (resolving symlinks) before the
    /// prefix check, so a symlink pointing outside the root is refused
    /// even though its own path looks contained.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = self.root.join(relative);
        let resolved = candidate.canonicalize().map_err(|_| {
            CampfireError::NotFound(format!("directory not found: {}", relative))
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(CampfireError::UnauthorizedPath(relative.to_string()).into());
        }
        Ok(resolved)
    }
}

/// List one directory level inside the repository root. Dotfiles are
/// skipped.
pub fn run(guard: &RepoGuard, relative: &str) -> Result<Value> {
    let resolved = guard.resolve(relative)?;
    if !resolved.is_dir() {
        return Err(CampfireError::NotFound(format!("not a directory: {}", relative)).into());
    }

    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&resolved)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata()?;
        entries.push(json!({
            "name": name,
            "is_dir": metadata.is_dir(),
            "size": if metadata.is_file() { Some(metadata.len()) } else { None },
        }));
    }
    entries.sort_by(|a, b| {
        a["name"]
            .as_str()
            .unwrap_or_default()
            .cmp(b["name"].as_str().unwrap_or_default())
    });

    Ok(json!({ "path": relative, "items": entries }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lists_entries_sorted_without_dotfiles() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let guard = RepoGuard::new(dir.path()).unwrap();
        let value = run(&guard, ".").unwrap();
        let items = value["items"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["name"], "a.txt");
        assert_eq!(items[0]["size"], 1);
        assert_eq!(items[2]["name"], "sub");
        assert_eq!(items[2]["is_dir"], true);
        assert!(items[2]["size"].is_null());
    }

    #[test]
    fn test_refuses_parent_traversal() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        let guard = RepoGuard::new(&dir.path().join("inner")).unwrap();

        let err = run(&guard, "..").unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::UnauthorizedPath(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_refuses_symlink_escape() {
        let outside = tempdir().unwrap();
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let guard = RepoGuard::new(dir.path()).unwrap();
        let err = run(&guard, "escape").unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::UnauthorizedPath(_)));
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let guard = RepoGuard::new(dir.path()).unwrap();
        let err = run(&guard, "nope").unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::NotFound(_)));
    }

    #[test]
    fn test_file_path_is_not_a_directory() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();
        let guard = RepoGuard::new(dir.path()).unwrap();
        let err = run(&guard, "file.txt").unwrap_err();
        let typed = err.downcast_ref::<CampfireError>().unwrap();
        assert!(matches!(typed, CampfireError::NotFound(_)));
    }

    #[test]
    fn test_nested_listing_allowed() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();

        let guard = RepoGuard::new(dir.path()).unwrap();
        let value = run(&guard, "src").unwrap();
        let names: Vec<&str> = value["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["main.rs", "nested"]);
    }
}
