//! Merge exclusion rules.
//!
//! Scratch files that workers leave in their replicas must never be folded
//! into the shared archive.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use thiserror::Error;

/// Suffixes excluded from the archive: lock files, temporaries, archives
/// themselves, and OS metadata.
const IGNORED_PATTERNS: &[&str] = &[
    "*.lock",
    "**/*.lock",
    "*.tmp",
    "**/*.tmp",
    "*.tar",
    "**/*.tar",
    "*.zip",
    "**/*.zip",
    ".DS_Store",
    "**/.DS_Store",
];

/// Errors for ignore rules
#[derive(Debug, Error)]
pub enum IgnoreError {
    #[error("glob pattern error: {0}")]
    Glob(#[from] globset::Error),
}

/// Ignore rules applied while merging replica files into the archive.
#[derive(Debug)]
pub struct IgnoreRules {
    glob_set: GlobSet,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new().unwrap()
    }
}

impl IgnoreRules {
    /// Create the built-in rules.
    pub fn new() -> Result<Self, IgnoreError> {
        Self::with_patterns(&[])
    }

    /// Built-in rules plus additional patterns.
    pub fn with_patterns(patterns: &[&str]) -> Result<Self, IgnoreError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in IGNORED_PATTERNS {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in patterns {
            if !pattern.is_empty() {
                builder.add(Glob::new(pattern)?);
            }
        }
        Ok(Self {
            glob_set: builder.build()?,
        })
    }

    /// Check whether a replica-relative path is excluded from merging.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.glob_set.is_match(path_str.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignores_lock_files() {
        let rules = IgnoreRules::default();
        assert!(rules.is_ignored(Path::new("resource.lock")));
        assert!(rules.is_ignored(Path::new("deep/dir/resource.lock")));
    }

    #[test]
    fn test_ignores_temporaries_and_archives() {
        let rules = IgnoreRules::default();
        assert!(rules.is_ignored(Path::new("partial.tmp")));
        assert!(rules.is_ignored(Path::new("snapshot.tar")));
        assert!(rules.is_ignored(Path::new("legacy.zip")));
        assert!(rules.is_ignored(Path::new("a/b/legacy.zip")));
    }

    #[test]
    fn test_ignores_os_metadata() {
        let rules = IgnoreRules::default();
        assert!(rules.is_ignored(Path::new(".DS_Store")));
        assert!(rules.is_ignored(Path::new("sub/.DS_Store")));
    }

    #[test]
    fn test_regular_files_not_ignored() {
        let rules = IgnoreRules::default();
        assert!(!rules.is_ignored(Path::new("response.json")));
        assert!(!rules.is_ignored(Path::new("example.com/schema.xsd")));
        // Suffix must match the whole extension
        assert!(!rules.is_ignored(Path::new("locker.txt")));
    }

    #[test]
    fn test_custom_patterns() {
        let rules = IgnoreRules::with_patterns(&["*.bak", "**/*.bak"]).unwrap();
        assert!(rules.is_ignored(Path::new("old.bak")));
        assert!(rules.is_ignored(Path::new("dir/old.bak")));
        // Built-ins still apply
        assert!(rules.is_ignored(Path::new("resource.lock")));
    }
}
