//! Local directory item source.
//!
//! Walks a directory tree with `walkdir`. Item names are `/`-separated
//! paths relative to the root, sorted, so they look like object keys and
//! stay stable across runs and platforms.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::traits::ItemSource;

/// An [`ItemSource`] over the files below one directory.
#[derive(Debug, Clone)]
pub struct LocalDirSource {
    root: PathBuf,
}

impl LocalDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an item name to a path below the root. Names that would
    /// escape the root are rejected.
    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let rel = Path::new(name);
        if name.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid item name: '{}'", name);
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ItemSource for LocalDirSource {
    fn source_tag(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            bail!("Source directory does not exist: {}", self.root.display());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry
                .with_context(|| format!("Failed to walk {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.push(name);
        }

        // Sort for deterministic ordering
        names.sort();
        Ok(names)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.resolve(name)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lists_relative_sorted_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("b/nested")).unwrap();
        std::fs::write(tmp.path().join("z.pdf"), b"z").unwrap();
        std::fs::write(tmp.path().join("b/nested/a.PDF"), b"a").unwrap();
        std::fs::write(tmp.path().join("b/notes.txt"), b"n").unwrap();

        let source = LocalDirSource::new(tmp.path());
        let names = source.list().await.unwrap();
        assert_eq!(names, vec!["b/nested/a.PDF", "b/notes.txt", "z.pdf"]);

        assert_eq!(source.fetch("b/nested/a.PDF").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn missing_root_fails_listing() {
        let source = LocalDirSource::new("/definitely/not/here");
        assert!(source.list().await.is_err());
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let tmp = TempDir::new().unwrap();
        let source = LocalDirSource::new(tmp.path());
        assert!(source.fetch("../etc/passwd").await.is_err());
        assert!(source.fetch("/etc/passwd").await.is_err());
        assert!(source.fetch("missing.pdf").await.is_err());
    }
}
