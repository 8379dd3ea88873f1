//! Maps content paths onto course structure.
//!
//! `<collection>/[.../]<group-dir>/[...]/<item-file>`: the first segment is the
//! collection, a directory matching the group pattern names the group, a file
//! matching the item pattern names the item (by stem). A file directly under
//! the collection that matches the index pattern is the collection index.

use std::path::{Component, Path, PathBuf};

use courseidx_config::{ConfigError, ContentConfig, LayoutConfig, PriorityConfig};
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

/// Identifiers derived from one relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Relative to the content root, `/` separated.
    pub path: String,
    pub collection_id: String,
    pub group_id: Option<String>,
    pub item_id: Option<String>,
    pub is_collection_index: bool,
}

/// Compiled layout patterns.
#[derive(Debug, Clone)]
pub struct ContentLayout {
    group: Regex,
    item: Regex,
    index: Regex,
}

impl ContentLayout {
    pub fn new(config: &LayoutConfig) -> Result<Self, ConfigError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(pattern.to_string(), e.to_string()))
        };
        Ok(ContentLayout {
            group: compile(&config.group_pattern)?,
            item: compile(&config.item_pattern)?,
            index: compile(&config.index_pattern)?,
        })
    }

    pub fn is_group_dir(&self, name: &str) -> bool {
        self.group.is_match(name)
    }

    pub fn is_item_file(&self, name: &str) -> bool {
        self.item.is_match(name)
    }

    pub fn is_index_file(&self, name: &str) -> bool {
        self.index.is_match(name)
    }

    /// Item id for an item file name: the name without its extension.
    pub fn item_id_of(&self, file_name: &str) -> Option<String> {
        if !self.is_item_file(file_name) {
            return None;
        }
        let stem = file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(file_name);
        Some(stem.to_string())
    }

    /// Map a root-relative path. `None` when no collection can be derived.
    pub fn map_relative(&self, rel: &str) -> Option<PathInfo> {
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return None;
        }

        let collection_id = segments[0];
        if collection_id.starts_with('.') {
            return None;
        }

        let file_name = segments[segments.len() - 1];
        let dirs = &segments[1..segments.len() - 1];

        let group_id = dirs
            .iter()
            .rev()
            .find(|d| self.is_group_dir(d))
            .map(|d| d.to_string());

        Some(PathInfo {
            path: segments.join("/"),
            collection_id: collection_id.to_string(),
            group_id,
            item_id: self.item_id_of(file_name),
            is_collection_index: dirs.is_empty() && self.is_index_file(file_name),
        })
    }

    /// Map a root-relative directory. The group is the innermost group
    /// directory on the path, the directory itself included.
    pub fn map_directory(&self, rel: &str) -> Option<PathInfo> {
        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        let collection_id = *segments.first()?;
        if collection_id.starts_with('.') {
            return None;
        }

        let group_id = segments[1..]
            .iter()
            .rev()
            .find(|d| self.is_group_dir(d))
            .map(|d| d.to_string());

        Some(PathInfo {
            path: segments.join("/"),
            collection_id: collection_id.to_string(),
            group_id,
            item_id: None,
            is_collection_index: false,
        })
    }

    /// Map an absolute path below `root`.
    pub fn map_path(&self, root: &Path, path: &Path) -> Option<PathInfo> {
        let rel = relative_path(root, path)?;
        self.map_relative(&rel)
    }

    /// Enqueue priority for a change at this path.
    pub fn priority_for(&self, info: &PathInfo, priorities: &PriorityConfig) -> i64 {
        if info.is_collection_index {
            priorities.collection_index
        } else if info.item_id.is_some() {
            priorities.item
        } else {
            priorities.other
        }
    }
}

/// Which root-relative paths count as content: recognized extension, within
/// `max_depth` segments, not matching an ignore glob.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    extensions: Vec<String>,
    max_depth: usize,
    ignore: GlobSet,
}

impl ContentFilter {
    pub fn new(extensions: &[String], max_depth: usize, ignore: &[String]) -> Result<Self, ConfigError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in ignore {
            let glob = Glob::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
            builder.add(glob);
        }
        let ignore = builder
            .build()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        Ok(ContentFilter {
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            max_depth,
            ignore,
        })
    }

    pub fn from_config(content: &ContentConfig) -> Result<Self, ConfigError> {
        ContentFilter::new(&content.extensions, content.max_depth, &content.ignore)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_ignored(&self, rel: &str) -> bool {
        self.ignore.is_match(rel)
    }

    /// Whether a directory can hold content: files inside it stay within
    /// `max_depth`, no segment is hidden and no ignore glob covers it.
    pub fn accepts_dir(&self, rel: &str) -> bool {
        rel.split('/').count() < self.max_depth
            && !rel.split('/').any(|s| s.is_empty() || s.starts_with('.'))
            && !self.is_ignored(rel)
            && !self.is_ignored(&format!("{}/", rel))
    }

    pub fn accepts(&self, rel: &str) -> bool {
        if rel.split('/').count() > self.max_depth || self.is_ignored(rel) {
            return false;
        }
        let file_name = rel.rsplit('/').next().unwrap_or(rel);
        match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            }
            _ => false,
        }
    }
}

/// `/`-joined path of `path` relative to `root`, or `None` if it lies outside.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel: PathBuf = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            // Removed files cannot be canonicalized; retry through the parent
            let parent = path.parent()?.canonicalize().ok()?;
            let rebuilt = parent.join(path.file_name()?);
            rebuilt.strip_prefix(root).ok()?.to_path_buf()
        }
    };

    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ContentLayout {
        ContentLayout::new(&LayoutConfig::default()).unwrap()
    }

    #[test]
    fn test_map_item_in_group() {
        let info = layout()
            .map_relative("rust-101/module-2/lesson-3.md")
            .unwrap();
        assert_eq!(info.collection_id, "rust-101");
        assert_eq!(info.group_id.as_deref(), Some("module-2"));
        assert_eq!(info.item_id.as_deref(), Some("lesson-3"));
        assert!(!info.is_collection_index);
    }

    #[test]
    fn test_map_collection_index() {
        let info = layout().map_relative("rust-101/index.md").unwrap();
        assert!(info.is_collection_index);
        assert!(info.group_id.is_none());
        assert!(info.item_id.is_none());

        // Only at the collection root
        let nested = layout().map_relative("rust-101/module-1/index.md").unwrap();
        assert!(!nested.is_collection_index);
    }

    #[test]
    fn test_map_nested_group_dirs() {
        let info = layout()
            .map_relative("rust-101/unit-a/section-b/assets/lesson-1.md")
            .unwrap();
        assert_eq!(info.group_id.as_deref(), Some("section-b"));
    }

    #[test]
    fn test_unmappable_paths() {
        let layout = layout();
        assert!(layout.map_relative("README.md").is_none());
        assert!(layout.map_relative("").is_none());
        assert!(layout.map_relative(".courseidx/queue.db").is_none());
    }

    #[test]
    fn test_map_directory() {
        let layout = layout();

        let group = layout.map_directory("rust-101/module-3").unwrap();
        assert_eq!(group.collection_id, "rust-101");
        assert_eq!(group.group_id.as_deref(), Some("module-3"));

        let inside = layout.map_directory("rust-101/module-3/assets").unwrap();
        assert_eq!(inside.group_id.as_deref(), Some("module-3"));

        let plain = layout.map_directory("rust-101/notes").unwrap();
        assert!(plain.group_id.is_none());

        let collection = layout.map_directory("rust-101").unwrap();
        assert_eq!(collection.path, "rust-101");
        assert!(collection.group_id.is_none());

        assert!(layout.map_directory(".courseidx").is_none());
        assert!(layout.map_directory("").is_none());
    }

    #[test]
    fn test_accepts_dir() {
        let filter = ContentFilter::from_config(&ContentConfig::default()).unwrap();
        assert!(filter.accepts_dir("rust-101"));
        assert!(filter.accepts_dir("rust-101/module-1"));
        assert!(!filter.accepts_dir("rust-101/.git"));
        assert!(!filter.accepts_dir(".courseidx"));
        assert!(!filter.accepts_dir("rust-101/node_modules"));

        let shallow = ContentFilter::new(&["md".to_string()], 2, &[]).unwrap();
        assert!(shallow.accepts_dir("rust-101"));
        assert!(!shallow.accepts_dir("rust-101/module-1"));
    }

    #[test]
    fn test_other_files_map_to_collection_only() {
        let info = layout().map_relative("rust-101/notes/glossary.md").unwrap();
        assert_eq!(info.collection_id, "rust-101");
        assert!(info.group_id.is_none());
        assert!(info.item_id.is_none());
    }

    #[test]
    fn test_priority_for() {
        let layout = layout();
        let priorities = PriorityConfig::default();
        let p = |rel: &str| layout.priority_for(&layout.map_relative(rel).unwrap(), &priorities);
        assert_eq!(p("c/index.md"), 10);
        assert_eq!(p("c/module-1/lesson-1.md"), 5);
        assert_eq!(p("c/module-1/cheatsheet.md"), 1);
    }

    #[test]
    fn test_map_absolute_path() {
        let root = Path::new("/srv/content");
        let info = layout()
            .map_path(root, Path::new("/srv/content/c/module-1/lesson-1.md"))
            .unwrap();
        assert_eq!(info.path, "c/module-1/lesson-1.md");
        assert!(layout()
            .map_path(root, Path::new("/elsewhere/c/module-1/lesson-1.md"))
            .is_none());
    }

    #[test]
    fn test_content_filter() {
        let filter = ContentFilter::from_config(&ContentConfig::default()).unwrap();
        assert!(filter.accepts("rust-101/module-1/lesson-1.md"));
        assert!(filter.accepts("rust-101/module-1/lesson-1.JSON"));
        assert!(!filter.accepts("rust-101/module-1/lesson-1.spec.md"));
        assert!(!filter.accepts("rust-101/module-1/lesson-1.test.md"));
        assert!(!filter.accepts("rust-101/.git/config.md"));
        assert!(!filter.accepts("rust-101/node_modules/pkg/readme.md"));
        assert!(!filter.accepts("rust-101/module-1/diagram.png"));
        assert!(!filter.accepts("rust-101/module-1/.md"));
        assert!(!filter.accepts("a/b/c/d/e/f.md"));
        assert!(filter.accepts("a/b/c/d/f.md"));
    }

    #[test]
    fn test_content_filter_rejects_bad_glob() {
        let ignore = vec!["a/{b".to_string()];
        assert!(ContentFilter::new(&["md".to_string()], 5, &ignore).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = LayoutConfig {
            item_pattern: "(".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ContentLayout::new(&config),
            Err(ConfigError::InvalidPattern(_, _))
        ));
    }
}
