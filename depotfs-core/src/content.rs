//! Byte content and sizes for entries of the unified namespace.

use crate::cache::{CacheStats, FlightCache};
use crate::error::{DepotFsError, Result};
use crate::traits::DepotTransport;
use crate::types::{DepotPath, Entry, LocalEntry, RemoteFile};
use bytes::Bytes;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, warn};

/// Serves file content from the override tree or, through the caches, from
/// the depot.
///
/// Depot content is immutable at the pinned changelist, so the content and
/// size caches are unbounded and live for the whole session. Local content
/// is always read fresh.
pub struct ContentResolver {
    transport: Arc<dyn DepotTransport>,
    contents: FlightCache<DepotPath, Bytes>,
    sizes: FlightCache<DepotPath, u64>,
}

impl ContentResolver {
    pub fn new(transport: Arc<dyn DepotTransport>) -> Self {
        Self {
            transport,
            contents: FlightCache::new(),
            sizes: FlightCache::new(),
        }
    }

    /// Reads the whole content of `entry`.
    pub fn read(&self, path: &DepotPath, entry: &Entry) -> Result<Bytes> {
        match entry {
            Entry::Remote(remote) => self.read_remote(path, remote),
            Entry::Local(local) => {
                let content = fs::read(local.path()).map_err(|err| DepotFsError::local(path, err))?;
                Ok(Bytes::from(content))
            }
        }
    }

    /// Reads at most `len` bytes of `entry` starting at `offset`.
    pub fn read_range(&self, path: &DepotPath, entry: &Entry, offset: u64, len: usize) -> Result<Bytes> {
        match entry {
            Entry::Remote(remote) => {
                let content = self.read_remote(path, remote)?;
                Ok(slice_range(&content, offset, len))
            }
            Entry::Local(local) => read_local_range(path, local, offset, len),
        }
    }

    /// Full content of a depot file, fetched once per session.
    pub fn read_remote(&self, path: &DepotPath, remote: &RemoteFile) -> Result<Bytes> {
        self.contents
            .get_or_load(path, || {
                debug!(depot_path = remote.depot_path(), "fetching depot content");
                self.transport.file_content(remote)
            })
            .map_err(|err| {
                warn!(%path, error = %err, "depot content fetch failed");
                DepotFsError::remote("content fetch", err)
            })
    }

    /// Size in bytes of `entry`.
    pub fn size(&self, path: &DepotPath, entry: &Entry) -> Result<u64> {
        match entry {
            Entry::Remote(remote) => {
                if let Some(content) = self.contents.get(path) {
                    return Ok(content.len() as u64);
                }
                self.sizes
                    .get_or_load(path, || {
                        debug!(depot_path = remote.depot_path(), "fetching depot file size");
                        self.transport.file_size(remote)
                    })
                    .map_err(|err| DepotFsError::remote("size query", err))
            }
            Entry::Local(local) => fs::metadata(local.path())
                .map(|metadata| metadata.len())
                .map_err(|err| DepotFsError::local(path, err)),
        }
    }

    pub fn content_stats(&self) -> CacheStats {
        self.contents.stats()
    }

    pub fn size_stats(&self) -> CacheStats {
        self.sizes.stats()
    }

    /// Whether the content of `path` has already been fetched.
    pub fn is_cached(&self, path: &DepotPath) -> bool {
        self.contents.contains(path)
    }
}

fn slice_range(content: &Bytes, offset: u64, len: usize) -> Bytes {
    let total = content.len();
    let start = usize::try_from(offset).map_or(total, |offset| offset.min(total));
    let end = start.saturating_add(len).min(total);
    content.slice(start..end)
}

fn read_local_range(path: &DepotPath, local: &LocalEntry, offset: u64, len: usize) -> Result<Bytes> {
    let mut file = File::open(local.path()).map_err(|err| DepotFsError::local(path, err))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| DepotFsError::local(path, err))?;

    let mut buffer = Vec::with_capacity(len.min(1 << 20));
    file.take(len as u64)
        .read_to_end(&mut buffer)
        .map_err(|err| DepotFsError::local(path, err))?;
    Ok(Bytes::from(buffer))
}
