//! File system resources
//!
//! Locations are paths, optionally prefixed with `file:`. Relative paths are
//! resolved against the loader's base directory. [`ResourceLoader::get_resources`]
//! accepts `*` and `?` wildcards in the last path segment; results are
//! cached until [`ResourceLoader::clear_cache`].

use crate::error::{ContextError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "logging")]
use tracing::trace;

/// Prefix accepted in front of file locations
pub const FILE_URL_PREFIX: &str = "file:";

/// A file addressed by location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    location: String,
    path: PathBuf,
}

impl Resource {
    pub fn new(location: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            path: path.into(),
        }
    }

    /// Location as requested
    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn filename(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    pub fn read_to_string(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| self.error(e))
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| self.error(e))
    }

    fn error(&self, e: std::io::Error) -> ContextError {
        ContextError::Resource {
            location: self.location.clone(),
            reason: e.to_string(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file [{}]", self.path.display())
    }
}

/// Resolves locations to resources
pub trait ResourceLoader: Send + Sync {
    /// Resource at `location`; it need not exist
    fn get_resource(&self, location: &str) -> Resource;

    /// Resources matching a location pattern, sorted by path
    fn get_resources(&self, pattern: &str) -> Result<Vec<Resource>>;

    /// Forget cached pattern results
    fn clear_cache(&self) {}
}

/// Loader for the local file system
pub struct FileSystemResourceLoader {
    base: PathBuf,
    cache: DashMap<String, Vec<Resource>, RandomState>,
}

impl FileSystemResourceLoader {
    /// Loader resolving relative paths against the working directory
    pub fn new() -> Self {
        Self::with_base(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            cache: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    #[inline]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Number of cached pattern results
    pub fn cached_patterns(&self) -> usize {
        self.cache.len()
    }

    fn resolve_path(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix(FILE_URL_PREFIX).unwrap_or(location);
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }

    fn scan(&self, pattern: &str) -> Result<Vec<Resource>> {
        let path = self.resolve_path(pattern);
        let Some(file_pattern) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        if !has_wildcards(file_pattern) {
            let resource = Resource::new(pattern, path.clone());
            return Ok(if resource.exists() { vec![resource] } else { Vec::new() });
        }

        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.base.clone());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ContextError::Resource {
                    location: pattern.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let prefix = pattern
            .strip_suffix(file_pattern)
            .unwrap_or_default()
            .to_string();
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if wildcard_match(file_pattern, name) && entry.path().is_file() {
                found.push(Resource::new(format!("{prefix}{name}"), entry.path()));
            }
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }
}

impl Default for FileSystemResourceLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceLoader for FileSystemResourceLoader {
    fn get_resource(&self, location: &str) -> Resource {
        Resource::new(location, self.resolve_path(location))
    }

    fn get_resources(&self, pattern: &str) -> Result<Vec<Resource>> {
        if let Some(cached) = self.cache.get(pattern) {
            return Ok(cached.value().clone());
        }
        let found = self.scan(pattern)?;

        #[cfg(feature = "logging")]
        trace!(target: "application_context", pattern, matches = found.len(), "Resolved resource pattern");

        self.cache.insert(pattern.to_string(), found.clone());
        Ok(found)
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl fmt::Debug for FileSystemResourceLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemResourceLoader")
            .field("base", &self.base)
            .field("cached_patterns", &self.cache.len())
            .finish()
    }
}

#[inline]
fn has_wildcards(segment: &str) -> bool {
    segment.contains(['*', '?'])
}

/// Match `name` against a pattern where `*` is any run and `?` one char
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("*.toml", "app.toml"));
        assert!(wildcard_match("app-?.toml", "app-1.toml"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXbYYc"));
        assert!(!wildcard_match("*.toml", "app.yaml"));
        assert!(!wildcard_match("app-?.toml", "app-10.toml"));
    }

    #[test]
    fn test_single_resource() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.toml"), "x = 1").unwrap();
        let loader = FileSystemResourceLoader::with_base(dir.path());

        let resource = loader.get_resource("file:app.toml");
        assert!(resource.exists());
        assert_eq!(resource.filename(), Some("app.toml"));
        assert_eq!(resource.read_to_string().unwrap(), "x = 1");

        let missing = loader.get_resource("missing.toml");
        assert!(!missing.exists());
        assert!(matches!(missing.read_bytes(), Err(ContextError::Resource { .. })));
    }

    #[test]
    fn test_patterns_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        for name in ["b.toml", "a.toml", "notes.txt"] {
            std::fs::write(dir.path().join("conf").join(name), "").unwrap();
        }
        let loader = FileSystemResourceLoader::with_base(dir.path());

        let found = loader.get_resources("conf/*.toml").unwrap();
        let names: Vec<&str> = found.iter().filter_map(|r| r.filename()).collect();
        assert_eq!(names, ["a.toml", "b.toml"]);
        assert_eq!(found[0].location(), "conf/a.toml");

        std::fs::write(dir.path().join("conf").join("c.toml"), "").unwrap();
        assert_eq!(loader.get_resources("conf/*.toml").unwrap().len(), 2);
        loader.clear_cache();
        assert_eq!(loader.get_resources("conf/*.toml").unwrap().len(), 3);

        assert!(loader.get_resources("nowhere/*.toml").unwrap().is_empty());
    }
}
