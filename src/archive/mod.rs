//! Cache archive codec.
//!
//! The shared cache travels as a single tar archive: a flat container of
//! uniquely-named byte blobs keyed by relative path (the *arcname*). The
//! codec supports the three operations the synchronizer needs: enumerate
//! entry names, extract everything into a directory, and append new entries
//! without rewriting the ones already present.

mod ignore;

pub use ignore::{IgnoreError, IgnoreRules};

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Length of the tar end-of-archive marker (two 512-byte zero blocks).
const TAR_TRAILER_LEN: u64 = 1024;

/// Errors for archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("entry has a non-relative path: {0}")]
    NonRelativeEntry(String),
}

/// Read-side handle to a cache archive on disk.
pub struct CacheArchive {
    path: PathBuf,
}

impl CacheArchive {
    /// Open an existing archive file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        if !path.exists() {
            return Err(ArchiveError::NotFound(path));
        }
        Ok(Self { path })
    }

    /// Path to the underlying archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Enumerate the arcnames of all file entries.
    pub fn entry_names(&self) -> Result<BTreeSet<String>, ArchiveError> {
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(BufReader::new(file));
        let mut names = BTreeSet::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let path = entry.path()?;
            names.insert(path.to_string_lossy().into_owned());
        }
        Ok(names)
    }

    /// Unpack every entry into `target`, creating it if necessary.
    ///
    /// Extraction is additive: files already present in `target` that have
    /// no archive counterpart are left alone.
    pub fn extract_to(&self, target: &Path) -> Result<(), ArchiveError> {
        std::fs::create_dir_all(target)?;
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(BufReader::new(file));
        archive.unpack(target)?;
        Ok(())
    }
}

/// Append-side handle to a cache archive.
///
/// Existing entries are never rewritten: the writer seeks back over the
/// end-of-archive marker and continues from there, so an interrupted append
/// cannot damage what was already stored.
pub struct ArchiveAppender {
    builder: tar::Builder<File>,
}

impl ArchiveAppender {
    /// Open `path` for appending, creating a new archive if it is absent.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len >= TAR_TRAILER_LEN {
            file.seek(SeekFrom::Start(len - TAR_TRAILER_LEN))?;
        }
        Ok(Self {
            builder: tar::Builder::new(file),
        })
    }

    /// Append the bytes of `source` under `arcname`.
    pub fn append_file(&mut self, arcname: &str, source: &Path) -> Result<(), ArchiveError> {
        if arcname.starts_with('/') || arcname.split('/').any(|part| part == "..") {
            return Err(ArchiveError::NonRelativeEntry(arcname.to_string()));
        }
        let mut file = File::open(source)?;
        self.builder.append_file(arcname, &mut file)?;
        Ok(())
    }

    /// Write the end-of-archive marker and flush.
    pub fn finish(mut self) -> Result<(), ArchiveError> {
        self.builder.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn append_entry(archive: &Path, arcname: &str, content: &[u8]) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("payload");
        fs::write(&source, content).unwrap();
        let mut appender = ArchiveAppender::open(archive).unwrap();
        appender.append_file(arcname, &source).unwrap();
        appender.finish().unwrap();
    }

    #[test]
    fn test_append_and_enumerate() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");

        append_entry(&archive_path, "a/one.json", b"one");
        append_entry(&archive_path, "b/two.json", b"two");

        let archive = CacheArchive::open(&archive_path).unwrap();
        let names = archive.entry_names().unwrap();
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["a/one.json".to_string(), "b/two.json".to_string()]
        );
    }

    #[test]
    fn test_extract_round_trip() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");

        append_entry(&archive_path, "nested/deep/file.bin", b"payload");

        let target = dir.path().join("out");
        let archive = CacheArchive::open(&archive_path).unwrap();
        archive.extract_to(&target).unwrap();

        assert_eq!(
            fs::read(target.join("nested/deep/file.bin")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_append_preserves_existing_entries() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");

        append_entry(&archive_path, "first.txt", b"first");
        let len_before = fs::metadata(&archive_path).unwrap().len();
        append_entry(&archive_path, "second.txt", b"second");

        // The archive grew instead of being rewritten
        assert!(fs::metadata(&archive_path).unwrap().len() > len_before);

        let target = dir.path().join("out");
        CacheArchive::open(&archive_path)
            .unwrap()
            .extract_to(&target)
            .unwrap();
        assert_eq!(fs::read(target.join("first.txt")).unwrap(), b"first");
        assert_eq!(fs::read(target.join("second.txt")).unwrap(), b"second");
    }

    #[test]
    fn test_extract_is_additive() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");
        append_entry(&archive_path, "entry.txt", b"entry");

        let target = dir.path().join("out");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("unrelated.txt"), b"keep me").unwrap();

        CacheArchive::open(&archive_path)
            .unwrap()
            .extract_to(&target)
            .unwrap();

        assert_eq!(fs::read(target.join("unrelated.txt")).unwrap(), b"keep me");
        assert_eq!(fs::read(target.join("entry.txt")).unwrap(), b"entry");
    }

    #[test]
    fn test_open_missing_archive() {
        let dir = TempDir::new().unwrap();
        let result = CacheArchive::open(dir.path().join("absent.tar"));
        assert!(matches!(result, Err(ArchiveError::NotFound(_))));
    }

    #[test]
    fn test_rejects_non_relative_arcnames() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");
        let source = dir.path().join("payload");
        fs::write(&source, b"x").unwrap();

        let mut appender = ArchiveAppender::open(&archive_path).unwrap();
        assert!(matches!(
            appender.append_file("/etc/passwd", &source),
            Err(ArchiveError::NonRelativeEntry(_))
        ));
        assert!(matches!(
            appender.append_file("a/../../escape", &source),
            Err(ArchiveError::NonRelativeEntry(_))
        ));
    }

    #[test]
    fn test_empty_archive_enumerates_nothing() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("cache.tar");

        let appender = ArchiveAppender::open(&archive_path).unwrap();
        appender.finish().unwrap();

        let names = CacheArchive::open(&archive_path)
            .unwrap()
            .entry_names()
            .unwrap();
        assert!(names.is_empty());
    }
}
