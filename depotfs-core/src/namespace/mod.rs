//! The unified namespace: depot listing plus override tree, local wins.

mod listing;
mod scanner;

pub use listing::DirectoryListing;
pub use scanner::{is_staging_name, LocalTreeScanner, STAGING_PREFIX};

use crate::cache::{RemoteSnapshot, RemoteSnapshotCache};
use crate::error::{DepotError, DepotFsError, Result};
use crate::traits::DepotTransport;
use crate::types::{ChangelistId, DepotPath, EngineConfig, Entry};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{info, warn};

/// The changelist the session is pinned to.
///
/// Resolved exactly once, on first namespace access, by asking the depot for
/// the most recent changelist under the search root; held for the rest of
/// the process. A failed resolution is not remembered. Concurrent first
/// accesses block on the same resolution.
#[derive(Debug, Default)]
pub struct ChangelistPin {
    value: Mutex<Option<ChangelistId>>,
}

impl ChangelistPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pin that is already resolved, skipping the depot lookup.
    pub fn fixed(changelist: ChangelistId) -> Self {
        Self {
            value: Mutex::new(Some(changelist)),
        }
    }

    pub fn get(&self) -> Option<ChangelistId> {
        *self.value.lock()
    }

    pub fn get_or_resolve(
        &self,
        transport: &dyn DepotTransport,
        search_root: &str,
    ) -> Result<ChangelistId> {
        let mut value = self.value.lock();
        if let Some(changelist) = *value {
            return Ok(changelist);
        }

        let changelists = transport.list_changelists(search_root).map_err(|err| {
            warn!(%search_root, error = %err, "failed to resolve most recent changelist");
            DepotFsError::remote("changelist resolution", err)
        })?;
        let changelist = changelists.first().copied().ok_or_else(|| {
            DepotFsError::remote(
                "changelist resolution",
                DepotError::NotFound(format!("no changelists under {search_root}")),
            )
        })?;

        info!(%search_root, changelist, "pinned depot view to changelist");
        *value = Some(changelist);
        Ok(changelist)
    }
}

/// A materialized copy of the unified namespace.
///
/// A plain value: it does not follow later changes to the override tree.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    entries: BTreeMap<DepotPath, Entry>,
}

impl Namespace {
    pub fn get(&self, path: &DepotPath) -> Option<&Entry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &DepotPath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DepotPath, &Entry)> {
        self.entries.iter()
    }
}

/// Merges the depot listing and the override tree into one logical view.
pub struct NamespaceUnifier {
    transport: Arc<dyn DepotTransport>,
    search_root: String,
    scanner: LocalTreeScanner,
    snapshots: RemoteSnapshotCache,
    changelist: ChangelistPin,
}

impl NamespaceUnifier {
    pub fn new(transport: Arc<dyn DepotTransport>, config: &EngineConfig) -> Self {
        let capacity = NonZeroUsize::new(config.snapshot_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let changelist = match config.changelist {
            Some(changelist) => ChangelistPin::fixed(changelist),
            None => ChangelistPin::new(),
        };

        Self {
            snapshots: RemoteSnapshotCache::new(Arc::clone(&transport), capacity),
            transport,
            search_root: config.search_root.clone(),
            scanner: LocalTreeScanner::new(config.override_root.clone()),
            changelist,
        }
    }

    pub fn search_root(&self) -> &str {
        &self.search_root
    }

    pub fn scanner(&self) -> &LocalTreeScanner {
        &self.scanner
    }

    pub fn snapshot_cache(&self) -> &RemoteSnapshotCache {
        &self.snapshots
    }

    /// The pinned changelist, if it has been resolved yet.
    pub fn changelist(&self) -> Option<ChangelistId> {
        self.changelist.get()
    }

    /// Resolves the changelist now instead of on first access.
    pub fn ensure_initialized(&self) -> Result<ChangelistId> {
        self.changelist
            .get_or_resolve(self.transport.as_ref(), &self.search_root)
    }

    /// The depot half of the namespace at the pinned changelist.
    pub fn remote(&self) -> Result<Arc<RemoteSnapshot>> {
        let changelist = self.ensure_initialized()?;
        self.snapshots
            .get(&self.search_root, changelist)
            .map_err(|err| DepotFsError::remote("depot listing", err))
    }

    /// Finds the entry backing `path`, if any. The override tree wins.
    pub fn lookup(&self, path: &DepotPath) -> Result<Option<Entry>> {
        let remote = self.remote()?;
        if let Some(local) = self
            .scanner
            .lookup(path)
            .map_err(|err| DepotFsError::local(path, err))?
        {
            return Ok(Some(Entry::Local(local)));
        }
        Ok(remote.get(path).cloned().map(Entry::Remote))
    }

    /// Like [`lookup`](Self::lookup), but a missing entry is `NotFound`.
    pub fn resolve(&self, path: &DepotPath) -> Result<Entry> {
        self.lookup(path)?
            .ok_or_else(|| DepotFsError::NotFound { path: path.clone() })
    }

    /// Materializes the whole unified namespace.
    pub fn snapshot(&self) -> Result<Namespace> {
        let remote = self.remote()?;
        let local = self
            .scanner
            .scan()
            .map_err(|err| DepotFsError::local(&DepotPath::root(), err))?;

        let mut entries: BTreeMap<DepotPath, Entry> = remote
            .iter()
            .map(|(path, file)| (path.clone(), Entry::Remote(file.clone())))
            .collect();
        entries.extend(local.into_iter().map(|(path, entry)| (path, Entry::Local(entry))));

        Ok(Namespace { entries })
    }
}
