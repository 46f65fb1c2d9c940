//! Merge properties of the cache synchronizer.
//!
//! - merging the same sources twice adds nothing the second time
//! - entries already in the archive survive every merge unchanged
//! - duplicate arcnames across sources resolve to the first writer
//! - ignore-set suffixes never become archive entries
//! - extracting and re-syncing a directory adds nothing

use std::fs;
use std::path::{Path, PathBuf};

use hivecache::archive::CacheArchive;
use hivecache::store::DirStore;
use hivecache::sync::Synchronizer;
use tempfile::TempDir;

fn make_synchronizer(root: &Path) -> Synchronizer<DirStore> {
    let store = DirStore::new(root.join("store")).unwrap();
    Synchronizer::new(store, "cache.tar", root.join("cache.tar"))
}

fn write_file(dir: &Path, rel: &str, content: &[u8]) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
}

fn extract_to_fresh_dir(root: &Path, archive_path: &Path, name: &str) -> PathBuf {
    let target = root.join(name);
    CacheArchive::open(archive_path)
        .unwrap()
        .extract_to(&target)
        .unwrap();
    target
}

#[test]
fn test_sync_is_idempotent() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let source = root.path().join("replica-0");
    write_file(&source, "host.example/a.json", b"a");
    write_file(&source, "host.example/b.json", b"b");

    let sources = vec![source];
    let first = sync.sync(&sources).unwrap();
    assert_eq!(first.len(), 2);

    let size_before = fs::metadata(sync.archive_path()).unwrap().len();
    let second = sync.sync(&sources).unwrap();
    assert!(second.is_empty());

    // No duplicate entries, no growth
    assert_eq!(fs::metadata(sync.archive_path()).unwrap().len(), size_before);
    let names = CacheArchive::open(sync.archive_path())
        .unwrap()
        .entry_names()
        .unwrap();
    assert_eq!(names.len(), 2);
}

#[test]
fn test_sync_never_rewrites_existing_entries() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let first_round = root.path().join("replica-0");
    write_file(&first_round, "keep.json", b"original");
    sync.sync(&[first_round]).unwrap();

    // A later round offers different bytes under the same arcname plus a
    // genuinely new entry
    let second_round = root.path().join("replica-1");
    write_file(&second_round, "keep.json", b"imposter");
    write_file(&second_round, "new.json", b"new");
    let added = sync.sync(&[second_round]).unwrap();
    assert_eq!(added.into_iter().collect::<Vec<_>>(), vec!["new.json"]);

    let out = extract_to_fresh_dir(root.path(), sync.archive_path(), "out");
    assert_eq!(fs::read(out.join("keep.json")).unwrap(), b"original");
    assert_eq!(fs::read(out.join("new.json")).unwrap(), b"new");
}

#[test]
fn test_first_listed_source_wins_conflicts() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let replica_a = root.path().join("replica-0");
    let replica_b = root.path().join("replica-1");
    write_file(&replica_a, "dup/entry.json", b"from-a");
    write_file(&replica_b, "dup/entry.json", b"from-b");

    let added = sync.sync(&[replica_a, replica_b]).unwrap();
    assert_eq!(
        added.into_iter().collect::<Vec<_>>(),
        vec!["dup/entry.json"]
    );

    let names = CacheArchive::open(sync.archive_path())
        .unwrap()
        .entry_names()
        .unwrap();
    assert_eq!(names.len(), 1);

    let out = extract_to_fresh_dir(root.path(), sync.archive_path(), "out");
    assert_eq!(fs::read(out.join("dup/entry.json")).unwrap(), b"from-a");
}

#[test]
fn test_ignored_suffixes_never_enter_archive() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let replica = root.path().join("replica-0");
    write_file(&replica, "kept.json", b"kept");
    write_file(&replica, "held.lock", b"lock");
    write_file(&replica, "partial.tmp", b"tmp");
    write_file(&replica, "nested/snapshot.tar", b"tar");
    write_file(&replica, "nested/legacy.zip", b"zip");
    write_file(&replica, ".DS_Store", b"meta");

    let added = sync.sync(&[replica]).unwrap();
    assert_eq!(added.into_iter().collect::<Vec<_>>(), vec!["kept.json"]);

    let names = CacheArchive::open(sync.archive_path())
        .unwrap()
        .entry_names()
        .unwrap();
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["kept.json"]);
}

#[test]
fn test_extract_then_sync_round_trip_adds_nothing() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let replica = root.path().join("replica-0");
    write_file(&replica, "a/one.json", b"one");
    write_file(&replica, "b/two.json", b"two");
    sync.sync(&[replica]).unwrap();

    let fresh = root.path().join("fresh");
    sync.extract(&[fresh.clone()]).unwrap();

    let added = sync.sync(&[fresh]).unwrap();
    assert!(added.is_empty());
}

#[test]
fn test_sync_starts_empty_archive_when_none_exists() {
    let root = TempDir::new().unwrap();
    let mut sync = make_synchronizer(root.path());

    let replica = root.path().join("replica-0");
    write_file(&replica, "seed.json", b"seed");

    assert!(!sync.archive_path().exists());
    let added = sync.sync(&[replica]).unwrap();
    assert_eq!(added.len(), 1);
    assert!(sync.archive_path().exists());
}
