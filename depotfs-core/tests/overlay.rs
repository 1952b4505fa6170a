use bytes::Bytes;
use depotfs_core::cache::RemoteSnapshotCache;
use depotfs_core::depot::{DepotError, MemoryDepot};
use depotfs_core::traits::FileSystem;
use depotfs_core::types::{DepotPath, EngineConfig, Entry, FileKind};
use depotfs_core::{OverlayFs, Status};
use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const README: &str = "depotfs serves a depot at one changelist.\n";

fn depot() -> Arc<MemoryDepot> {
    Arc::new(
        MemoryDepot::builder()
            .changelist(100)
            .changelist(101)
            .file("//depot/a/b.txt", "remote b")
            .file("//depot/a/c/d.txt", "remote d")
            .file("//depot/a/e.txt", "remote e")
            .file("//depot/README", README)
            .build(),
    )
}

fn mount(depot: Arc<MemoryDepot>) -> (TempDir, OverlayFs) {
    let dir = tempfile::tempdir().unwrap();
    let fs = OverlayFs::new(depot, EngineConfig::new("//depot/...", dir.path()));
    (dir, fs)
}

fn names(fs: &OverlayFs, path: &str) -> BTreeSet<String> {
    fs.list_directory(&DepotPath::new(path))
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_remote_only_paths_read_depot_bytes() {
    let depot = depot();
    let (_dir, fs) = mount(depot.clone());

    for (path, expected) in [
        ("/depot/a/b.txt", "remote b"),
        ("/depot/a/c/d.txt", "remote d"),
        ("/depot/README", README),
    ] {
        let path = DepotPath::new(path);
        assert!(fs.namespace().resolve(&path).unwrap().is_remote());
        assert_eq!(fs.read_at(&path, 0, 4096).unwrap(), Bytes::from(expected));
    }
    assert_eq!(fs.changelist(), Some(101));
}

#[test]
fn test_local_entry_always_wins() {
    let (dir, fs) = mount(depot());
    let path = DepotPath::new("/depot/a/e.txt");

    // Resolve through the depot first, then shadow it locally.
    assert!(fs.namespace().resolve(&path).unwrap().is_remote());
    fs::create_dir_all(dir.path().join("depot/a")).unwrap();
    fs::write(dir.path().join("depot/a/e.txt"), b"local e").unwrap();

    for _ in 0..3 {
        assert!(matches!(fs.namespace().resolve(&path).unwrap(), Entry::Local(_)));
        assert_eq!(fs.read_at(&path, 0, 100).unwrap(), Bytes::from("local e"));
    }
    assert!(matches!(
        fs.namespace().snapshot().unwrap().get(&path),
        Some(Entry::Local(_))
    ));
}

#[test]
fn test_snapshot_get_is_idempotent() {
    let depot = depot();
    let cache = RemoteSnapshotCache::new(depot.clone(), NonZeroUsize::new(4).unwrap());

    let first = cache.get("//depot/...", 101).unwrap();
    let second = cache.get("//depot/...", 101).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(depot.calls().list_depot_files, 1);
}

#[test]
fn test_snapshot_cache_evicts_least_recently_used() {
    let depot = depot();
    let cache = RemoteSnapshotCache::new(depot.clone(), NonZeroUsize::new(2).unwrap());

    cache.get("//depot/...", 1).unwrap();
    cache.get("//depot/...", 2).unwrap();
    cache.get("//depot/...", 1).unwrap();
    cache.get("//depot/...", 3).unwrap();
    assert_eq!(depot.calls().list_depot_files, 3);
    assert!(!cache.contains("//depot/...", 2));

    cache.get("//depot/...", 2).unwrap();
    assert_eq!(depot.calls().list_depot_files, 4);
}

#[test]
fn test_promotion_applies_write_over_full_content() {
    let (dir, fs) = mount(depot());
    let path = DepotPath::new("/depot/README");

    assert_eq!(fs.write_at(&path, 8, b"SERVES").unwrap(), 6);

    let local = fs::read_to_string(dir.path().join("depot/README")).unwrap();
    assert_eq!(local, "depotfs SERVES a depot at one changelist.\n");
    assert_eq!(fs.read_at(&path, 0, 4096).unwrap(), Bytes::from(local));
    assert_eq!(fs.get_attributes(&path).unwrap().size, README.len() as u64);
    assert_eq!(fs.stats().promotions, 1);
}

#[test]
fn test_failed_promotion_leaves_no_local_file() {
    let depot = depot();
    let (dir, fs) = mount(depot.clone());
    let path = DepotPath::new("/depot/a/b.txt");
    fs.ensure_initialized().unwrap();
    fs.get_attributes(&path).unwrap();

    depot.fail_content("//depot/a/b.txt", DepotError::Timeout {
        request: "print //depot/a/b.txt".into(),
        after: Duration::from_secs(30),
    });
    let err = fs.write_at(&path, 0, b"X").unwrap_err();
    assert_eq!(err.status(), Status::IoError);

    let local_dir = dir.path().join("depot/a");
    assert!(!local_dir.join("b.txt").exists());
    let leftovers = fs::read_dir(&local_dir).map(|dir| dir.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    assert!(fs.namespace().resolve(&path).unwrap().is_remote());

    depot.clear_failures();
    fs.write_at(&path, 0, b"R").unwrap();
    assert_eq!(fs.read_at(&path, 0, 100).unwrap(), Bytes::from("Remote b"));
}

#[test]
fn test_directory_listing_merges_both_trees() {
    let depot = Arc::new(
        MemoryDepot::builder()
            .changelist(1)
            .file("//a/b.txt", "b")
            .file("//a/c/d.txt", "d")
            .build(),
    );
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::write(dir.path().join("a/e.txt"), b"e").unwrap();
    let fs = OverlayFs::new(depot, EngineConfig::new("//...", dir.path()));

    assert_eq!(names(&fs, "/a"), set(&["b.txt", "c", "e.txt"]));
    assert_eq!(names(&fs, "/a/c"), set(&["d.txt"]));

    let kinds: Vec<_> = fs
        .list_directory(&DepotPath::new("/a"))
        .unwrap()
        .into_iter()
        .map(|entry| entry.kind)
        .collect();
    assert_eq!(kinds, vec![FileKind::File, FileKind::Directory, FileKind::File]);
}

#[test]
fn test_empty_local_directory_is_listed() {
    let (dir, fs) = mount(depot());
    fs.make_directory(&DepotPath::new("/depot/a/scratch")).unwrap();
    assert!(dir.path().join("depot/a/scratch").is_dir());

    assert!(names(&fs, "/depot/a").contains("scratch"));
    assert!(names(&fs, "/depot/a/scratch").is_empty());
    assert!(fs
        .get_attributes(&DepotPath::new("/depot/a/scratch"))
        .unwrap()
        .is_directory());
}

#[test]
fn test_new_file_round_trip() {
    let (_dir, fs) = mount(depot());
    let path = DepotPath::new("/depot/a/new.bin");
    let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    fs.create(&path).unwrap();
    assert_eq!(fs.write_at(&path, 0, &data).unwrap(), data.len());
    assert_eq!(fs.read_at(&path, 0, data.len()).unwrap(), Bytes::from(data.clone()));
    assert_eq!(fs.get_attributes(&path).unwrap().size, data.len() as u64);
}

#[test]
fn test_write_without_create_makes_new_file() {
    let (dir, fs) = mount(depot());
    let path = DepotPath::new("/depot/a/c/fresh.txt");

    fs.write_at(&path, 0, b"fresh").unwrap();
    assert_eq!(fs::read(dir.path().join("depot/a/c/fresh.txt")).unwrap(), b"fresh");
    assert!(names(&fs, "/depot/a/c").contains("fresh.txt"));
    assert_eq!(fs.stats().promotions, 0);
}

#[test]
fn test_unlink_on_remote_entry_is_not_supported() {
    let (_dir, fs) = mount(depot());
    let path = DepotPath::new("/depot/a/b.txt");

    assert_eq!(fs.unlink(&path).unwrap_err().status(), Status::NotSupported);
    assert!(fs.namespace().resolve(&path).unwrap().is_remote());
    assert_eq!(fs.read_at(&path, 0, 100).unwrap(), Bytes::from("remote b"));
}

#[test]
fn test_remote_failure_surfaces_and_is_retried() {
    let depot = depot();
    let (_dir, fs) = mount(depot.clone());

    depot.fail_next(DepotError::Unreachable("connection refused".into()));
    let err = fs.get_attributes(&DepotPath::new("/depot/README")).unwrap_err();
    assert_eq!(err.status(), Status::IoError);

    let attrs = fs.get_attributes(&DepotPath::new("/depot/README")).unwrap();
    assert_eq!(attrs.size, README.len() as u64);
}

#[test]
fn test_concurrent_reads_fetch_once() {
    let depot = Arc::new(
        MemoryDepot::builder()
            .changelist(5)
            .file("//depot/big.bin", vec![7u8; 64 * 1024])
            .latency(Duration::from_millis(50))
            .build(),
    );
    let (_dir, fs) = mount(depot.clone());
    let path = DepotPath::new("/depot/big.bin");
    let workers = 8;
    let barrier = Barrier::new(workers);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                barrier.wait();
                let bytes = fs.read_at(&path, 0, 64 * 1024).unwrap();
                assert_eq!(bytes.len(), 64 * 1024);
            });
        }
    });

    let calls = depot.calls();
    assert_eq!(calls.list_changelists, 1);
    assert_eq!(calls.list_depot_files, 1);
    assert_eq!(calls.file_content, 1);
}

#[test]
fn test_concurrent_promotions_of_one_path() {
    let depot = depot();
    let (dir, fs) = mount(depot.clone());
    let path = DepotPath::new("/depot/a/b.txt");
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        for (offset, data) in [(0u64, b"R"), (7u64, b"B")] {
            let (fs, path, barrier) = (&fs, &path, &barrier);
            scope.spawn(move || {
                barrier.wait();
                fs.write_at(path, offset, data).unwrap();
            });
        }
    });

    let local = fs::read_to_string(dir.path().join("depot/a/b.txt")).unwrap();
    assert_eq!(local, "Remote B");
    assert_eq!(depot.calls().file_content, 1);
    assert_eq!(fs.stats().promotions, 1);
}

#[test]
fn test_statfs_counts_unified_entries() {
    let (dir, fs) = mount(depot());
    fs::create_dir_all(dir.path().join("depot")).unwrap();
    fs::write(dir.path().join("depot/local.txt"), b"l").unwrap();

    let stats = fs.filesystem_stats().unwrap();
    // four depot files, plus /depot and /depot/local.txt from the override tree
    assert_eq!(stats.total_files, 6);
    assert_eq!(stats.free_blocks, stats.total_blocks);
}

#[test]
fn test_rename_onto_path_being_promoted_keeps_renamed_content() {
    let depot = Arc::new(
        MemoryDepot::builder()
            .changelist(8)
            .file("//depot/a.txt", "Remote")
            .latency(Duration::from_millis(300))
            .build(),
    );
    let (dir, fs) = mount(depot);
    fs.ensure_initialized().unwrap();
    fs.namespace().remote().unwrap();

    let target = DepotPath::new("/depot/a.txt");
    let scratch = DepotPath::new("/depot/b.txt");
    thread::scope(|scope| {
        scope.spawn(|| fs.write_at(&target, 0, b"R").unwrap());
        scope.spawn(|| {
            // Lands while the promotion above is still fetching.
            thread::sleep(Duration::from_millis(100));
            fs.create(&scratch).unwrap();
            fs.write_at(&scratch, 0, b"mine").unwrap();
            fs.rename(&scratch, &target).unwrap();
        });
    });

    assert_eq!(fs::read_to_string(dir.path().join("depot/a.txt")).unwrap(), "mine");
    assert_eq!(fs.read_at(&target, 0, 100).unwrap(), Bytes::from("mine"));
    assert!(!dir.path().join("depot/b.txt").exists());
}
