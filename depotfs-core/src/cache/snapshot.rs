//! Capacity-bounded cache of depot listings keyed by (search root, changelist).

use super::{CacheCounters, CacheStats, SingleFlight};
use crate::error::DepotError;
use crate::traits::DepotTransport;
use crate::types::{ChangelistId, DepotPath, RemoteFile};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifies one point-in-time listing of the depot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    search_root: String,
    changelist: ChangelistId,
}

impl SnapshotKey {
    pub fn new(search_root: impl Into<String>, changelist: ChangelistId) -> Self {
        Self {
            search_root: search_root.into(),
            changelist,
        }
    }

    pub fn search_root(&self) -> &str {
        &self.search_root
    }

    pub fn changelist(&self) -> ChangelistId {
        self.changelist
    }

    /// The depot file spec for this listing, e.g. `//depot/main/...@42`.
    pub fn file_spec(&self) -> String {
        format!("{}@{}", self.search_root, self.changelist)
    }
}

/// The set of depot files visible at one changelist, keyed by logical path.
#[derive(Debug, Default)]
pub struct RemoteSnapshot {
    files: BTreeMap<DepotPath, RemoteFile>,
}

impl RemoteSnapshot {
    pub fn from_files(files: impl IntoIterator<Item = RemoteFile>) -> Self {
        let files = files
            .into_iter()
            .map(|file| (DepotPath::from_depot(file.depot_path()), file))
            .collect();
        Self { files }
    }

    pub fn get(&self, path: &DepotPath) -> Option<&RemoteFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DepotPath, &RemoteFile)> {
        self.files.iter()
    }

    /// Every file strictly below `dir`, in key order.
    pub fn descendants<'a>(
        &'a self,
        dir: &DepotPath,
    ) -> impl Iterator<Item = (&'a DepotPath, &'a RemoteFile)> + 'a {
        let prefix = dir.child_prefix();
        let start = prefix.clone();
        self.files
            .range::<str, _>((Bound::Included(start.as_str()), Bound::Unbounded))
            .take_while(move |(key, _)| key.as_str().starts_with(prefix.as_str()))
    }

    /// True if any file lies below `dir`.
    pub fn has_descendants(&self, dir: &DepotPath) -> bool {
        self.descendants(dir).next().is_some()
    }
}

/// LRU cache of [`RemoteSnapshot`]s loaded through the depot transport.
///
/// Snapshots are immutable once loaded; evicting one only costs a remote
/// round trip to rebuild it.
pub struct RemoteSnapshotCache {
    transport: Arc<dyn DepotTransport>,
    entries: Mutex<LruCache<SnapshotKey, Arc<RemoteSnapshot>>>,
    flights: SingleFlight<SnapshotKey, Arc<RemoteSnapshot>, DepotError>,
    counters: CacheCounters,
}

impl RemoteSnapshotCache {
    pub fn new(transport: Arc<dyn DepotTransport>, capacity: NonZeroUsize) -> Self {
        Self {
            transport,
            entries: Mutex::new(LruCache::new(capacity)),
            flights: SingleFlight::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Returns the listing for `(search_root, changelist)`, loading it on a
    /// miss.
    pub fn get(
        &self,
        search_root: &str,
        changelist: ChangelistId,
    ) -> Result<Arc<RemoteSnapshot>, DepotError> {
        let key = SnapshotKey::new(search_root, changelist);

        if let Some(snapshot) = self.entries.lock().get(&key).cloned() {
            self.counters.record_hit();
            return Ok(snapshot);
        }

        self.flights.work(&key, || {
            if let Some(snapshot) = self.entries.lock().get(&key).cloned() {
                return Ok(snapshot);
            }

            self.counters.record_miss();
            let file_spec = key.file_spec();
            debug!(%file_spec, "loading depot listing");

            let files = self.transport.list_depot_files(&file_spec).map_err(|err| {
                self.counters.record_failure();
                warn!(%file_spec, error = %err, "depot listing failed");
                err
            })?;

            let snapshot = Arc::new(RemoteSnapshot::from_files(files));
            debug!(%file_spec, files = snapshot.len(), "depot listing loaded");

            if let Some((evicted, _)) = self.entries.lock().push(key.clone(), Arc::clone(&snapshot)) {
                if evicted != key {
                    debug!(file_spec = %evicted.file_spec(), "evicted depot listing");
                }
            }
            Ok(snapshot)
        })
    }

    /// True if the listing is currently cached. Does not touch recency.
    pub fn contains(&self, search_root: &str, changelist: ChangelistId) -> bool {
        self.entries
            .lock()
            .contains(&SnapshotKey::new(search_root, changelist))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::MemoryDepot;

    fn depot() -> Arc<MemoryDepot> {
        Arc::new(
            MemoryDepot::builder()
                .changelist(10)
                .file("//depot/a/b.txt", "b")
                .file("//depot/a/c/d.txt", "d")
                .file("//depot/ab.txt", "ab")
                .build(),
        )
    }

    #[test]
    fn test_snapshot_key_file_spec() {
        let key = SnapshotKey::new("//depot/...", 42);
        assert_eq!(key.file_spec(), "//depot/...@42");
    }

    #[test]
    fn test_snapshot_descendants() {
        let snapshot = RemoteSnapshot::from_files(vec![
            RemoteFile::new("//depot/a/b.txt"),
            RemoteFile::new("//depot/a/c/d.txt"),
            RemoteFile::new("//depot/ab.txt"),
        ]);

        let below_a: Vec<_> = snapshot
            .descendants(&DepotPath::new("/depot/a"))
            .map(|(path, _)| path.as_str())
            .collect();
        assert_eq!(below_a, vec!["/depot/a/b.txt", "/depot/a/c/d.txt"]);

        assert_eq!(snapshot.descendants(&DepotPath::root()).count(), 3);
        assert!(snapshot.has_descendants(&DepotPath::new("/depot")));
        assert!(!snapshot.has_descendants(&DepotPath::new("/depot/ab.txt")));
    }

    #[test]
    fn test_get_issues_one_listing() {
        let depot = depot();
        let cache = RemoteSnapshotCache::new(depot.clone(), NonZeroUsize::new(4).unwrap());

        let first = cache.get("//depot/...", 10).unwrap();
        let second = cache.get("//depot/...", 10).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 3);
        assert_eq!(depot.calls().list_depot_files, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_least_recently_used_key_is_evicted() {
        let depot = depot();
        let cache = RemoteSnapshotCache::new(depot.clone(), NonZeroUsize::new(2).unwrap());

        cache.get("//depot/...", 1).unwrap();
        cache.get("//depot/...", 2).unwrap();
        // Touch 1 so that 2 becomes the least recently used.
        cache.get("//depot/...", 1).unwrap();
        cache.get("//depot/...", 3).unwrap();

        assert!(cache.contains("//depot/...", 1));
        assert!(!cache.contains("//depot/...", 2));
        assert_eq!(depot.calls().list_depot_files, 3);

        cache.get("//depot/...", 2).unwrap();
        assert_eq!(depot.calls().list_depot_files, 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_listing_failure_is_not_cached() {
        let depot = depot();
        let cache = RemoteSnapshotCache::new(depot.clone(), NonZeroUsize::new(2).unwrap());

        depot.fail_next(DepotError::Unreachable("connection refused".into()));
        assert!(cache.get("//depot/...", 10).is_err());
        assert!(cache.is_empty());

        assert_eq!(cache.get("//depot/...", 10).unwrap().len(), 3);
        assert_eq!(depot.calls().list_depot_files, 2);
        assert_eq!(cache.stats().failed_loads, 1);
    }
}
