use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courseidx_core::{ContentSource, Entry, SourceError};
use tokio::fs;
use tracing::{debug, instrument};

/// Content tree on the local filesystem.
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    /// Create a source rooted at an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(SourceError::NotFound(root.display().to_string()));
        }
        Ok(FsContentSource {
            root: root.canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path, preventing directory traversal.
    fn resolve_path(&self, path: &str) -> Result<PathBuf, SourceError> {
        let trimmed = path.trim_start_matches('/');
        let rel = Path::new(trimmed);

        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SourceError::PathTraversal(trimmed.to_string()));
                }
                _ => {}
            }
        }

        Ok(self.root.join(rel))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> SourceError {
    if e.kind() == std::io::ErrorKind::NotFound {
        SourceError::NotFound(path.to_string())
    } else {
        SourceError::Io(e)
    }
}

fn join_rel(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    #[instrument(skip(self), fields(source = "fs", path = %dir))]
    async fn list(&self, dir: &str) -> Result<Vec<Entry>, SourceError> {
        let full_path = self.resolve_path(dir)?;

        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| not_found_or_io(dir, e))?;
        if !metadata.is_dir() {
            return Err(SourceError::NotADirectory(dir.to_string()));
        }

        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            // Entries can vanish between readdir and stat while content is being edited
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SourceError::Io(e)),
            };
            let name = entry.file_name().to_string_lossy().to_string();
            let entry_path = join_rel(dir, &name);
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

            if metadata.is_dir() {
                entries.push(Entry::dir(entry_path, name, modified));
            } else {
                entries.push(Entry::file(entry_path, name, metadata.len(), modified));
            }
        }

        // Directories first, then by name
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));

        debug!(count = entries.len(), "listed directory");
        Ok(entries)
    }

    #[instrument(skip(self), fields(source = "fs", path = %path))]
    async fn stat(&self, path: &str) -> Result<Entry, SourceError> {
        let full_path = self.resolve_path(path)?;

        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| not_found_or_io(path, e))?;

        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        let rel = path.trim_matches('/').to_string();

        if metadata.is_dir() {
            Ok(Entry::dir(rel, name, modified))
        } else {
            Ok(Entry::file(rel, name, metadata.len(), modified))
        }
    }

    #[instrument(skip(self), fields(source = "fs", path = %path))]
    async fn read(&self, path: &str) -> Result<Vec<u8>, SourceError> {
        let full_path = self.resolve_path(path)?;
        fs::read(&full_path)
            .await
            .map_err(|e| not_found_or_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, FsContentSource) {
        let temp_dir = TempDir::new().unwrap();
        let module = temp_dir.path().join("rust-101/module-1");
        std::fs::create_dir_all(&module).unwrap();
        std::fs::write(module.join("lesson-1.md"), "hello").unwrap();
        std::fs::write(temp_dir.path().join("rust-101/index.md"), "course").unwrap();
        let source = FsContentSource::new(temp_dir.path()).unwrap();
        (temp_dir, source)
    }

    #[tokio::test]
    async fn test_list_relative_paths() {
        let (_dir, source) = fixture();

        let root = source.list("").await.unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].path, "rust-101");
        assert!(root[0].is_dir);

        let course = source.list("rust-101").await.unwrap();
        let paths: Vec<_> = course.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["rust-101/module-1", "rust-101/index.md"]);
    }

    #[tokio::test]
    async fn test_read_and_stat() {
        let (_dir, source) = fixture();

        let content = source.read("rust-101/module-1/lesson-1.md").await.unwrap();
        assert_eq!(content, b"hello");

        let entry = source.stat("rust-101/module-1/lesson-1.md").await.unwrap();
        assert_eq!(entry.name, "lesson-1.md");
        assert_eq!(entry.size, Some(5));
        assert!(!entry.is_dir);
    }

    #[tokio::test]
    async fn test_missing_paths() {
        let (_dir, source) = fixture();

        let err = source.read("rust-101/module-1/lesson-9.md").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!source.exists("rust-101/module-9").await.unwrap());
        assert!(matches!(
            source.list("rust-101/index.md").await,
            Err(SourceError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, source) = fixture();
        assert!(matches!(
            source.read("../etc/passwd").await,
            Err(SourceError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(FsContentSource::new(&missing).is_err());
    }
}
