//! Cache synchronizer.
//!
//! Owns the one authoritative local copy of the shared cache archive and
//! reconciles it against the archive store:
//!
//! - [`Synchronizer::download`] fetches the remote archive, short-circuiting
//!   on the last-modified timestamp and falling back to a pre-seeded backup
//!   when the store holds no archive at all;
//! - [`Synchronizer::extract`] replicates the archive into worker replica
//!   directories;
//! - [`Synchronizer::sync`] folds entries newly discovered by workers back
//!   into the archive, append-only and first-writer-wins;
//! - [`Synchronizer::upload`] publishes the merged archive to the store.
//!
//! Transient store failures are logged and reported as "nothing fetched";
//! the next reconciliation round is the retry.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{ArchiveAppender, ArchiveError, CacheArchive, IgnoreRules};
use crate::store::{ArchiveStore, StoreError};

/// Errors for synchronizer operations
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("source path escapes its replica root: {0}")]
    PathOutsideReplica(PathBuf),
}

/// Synchronizes the local authoritative cache archive with the store.
pub struct Synchronizer<S: ArchiveStore> {
    store: S,
    key: String,
    archive_path: PathBuf,
    backup_path: Option<PathBuf>,
    ignore: IgnoreRules,
    last_modified: Option<DateTime<Utc>>,
}

impl<S: ArchiveStore> Synchronizer<S> {
    /// Create a synchronizer for the archive stored under `key`, keeping the
    /// local authoritative copy at `archive_path`.
    pub fn new(store: S, key: impl Into<String>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            key: key.into(),
            archive_path: archive_path.into(),
            backup_path: None,
            ignore: IgnoreRules::default(),
            last_modified: None,
        }
    }

    /// Use a pre-seeded backup archive when the store holds no archive.
    pub fn with_backup(mut self, path: impl Into<PathBuf>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    /// Replace the merge ignore rules.
    pub fn with_ignore(mut self, ignore: IgnoreRules) -> Self {
        self.ignore = ignore;
        self
    }

    /// Path of the local authoritative archive.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Last-modified timestamp of the most recent successful download.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Download the cache archive from the store if it is newer than the
    /// last copy fetched. Returns whether a fresh archive was obtained
    /// (downloaded or copied from backup).
    pub fn download(&mut self) -> Result<bool, SyncError> {
        let remote_modified = match self.store.head(&self.key) {
            Ok(timestamp) => timestamp,
            Err(err) if err.is_not_found() => {
                info!(key = %self.key, "cache archive not found in store");
                return self.restore_from_backup();
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "failed to query cache archive metadata");
                return Ok(false);
            }
        };

        match self.last_modified {
            None => info!("initial cache download required"),
            Some(recorded) if remote_modified <= recorded => {
                info!("cache archive is up to date");
                return Ok(false);
            }
            Some(recorded) => {
                info!(
                    remote = %remote_modified,
                    recorded = %recorded,
                    "cache archive modified since last download"
                );
            }
        }

        info!(
            key = %self.key,
            path = %self.archive_path.display(),
            "downloading cache archive"
        );
        if let Err(err) = self.store.get(&self.key, &self.archive_path) {
            warn!(key = %self.key, error = %err, "failed to download cache archive");
            return Ok(false);
        }
        self.last_modified = Some(remote_modified);
        self.log_archive_entries()?;
        Ok(true)
    }

    /// Extract every archive entry into each target directory.
    pub fn extract(&self, targets: &[PathBuf]) -> Result<(), SyncError> {
        let archive = CacheArchive::open(&self.archive_path)?;
        for target in targets {
            archive.extract_to(target)?;
        }
        Ok(())
    }

    /// Merge new files from the source directories into the archive,
    /// returning the set of arcnames added.
    ///
    /// Entries already in the archive are never touched, and when two
    /// sources carry the same arcname the first one listed wins; later
    /// duplicates are skipped, not compared.
    pub fn sync(&mut self, sources: &[PathBuf]) -> Result<BTreeSet<String>, SyncError> {
        let mut known = if self.archive_path.exists() {
            CacheArchive::open(&self.archive_path)?.entry_names()?
        } else {
            BTreeSet::new()
        };

        let mut added = BTreeSet::new();
        let mut appender = ArchiveAppender::open(&self.archive_path)?;
        for source in sources {
            for entry in WalkDir::new(source) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|_| SyncError::PathOutsideReplica(entry.path().to_path_buf()))?;
                if self.ignore.is_ignored(rel) {
                    continue;
                }
                let arcname = arcname_for(rel);
                if known.contains(&arcname) {
                    debug!(
                        %arcname,
                        path = %entry.path().display(),
                        "entry already cached, skipping"
                    );
                    continue;
                }
                appender.append_file(&arcname, entry.path())?;
                info!(%arcname, path = %entry.path().display(), "added to cache");
                known.insert(arcname.clone());
                added.insert(arcname);
            }
        }
        appender.finish()?;
        Ok(added)
    }

    /// Publish the local archive to the store, replacing the remote copy.
    pub fn upload(&self) -> Result<(), SyncError> {
        info!(
            key = %self.key,
            path = %self.archive_path.display(),
            "uploading cache archive"
        );
        self.store.put(&self.key, &self.archive_path)?;
        Ok(())
    }

    fn restore_from_backup(&self) -> Result<bool, SyncError> {
        let Some(backup) = &self.backup_path else {
            return Ok(false);
        };
        if !backup.exists() {
            return Ok(false);
        }
        info!(backup = %backup.display(), "copying backup cache archive");
        fs::copy(backup, &self.archive_path)?;
        self.log_archive_entries()?;
        Ok(true)
    }

    fn log_archive_entries(&self) -> Result<(), SyncError> {
        let names = CacheArchive::open(&self.archive_path)?.entry_names()?;
        debug!(entries = names.len(), "cache archive loaded");
        Ok(())
    }
}

/// Arcname for a replica-relative path, with `/` separators.
fn arcname_for(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
