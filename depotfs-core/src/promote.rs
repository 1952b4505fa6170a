//! Copy-on-write promotion of depot-backed files into the override tree.

use crate::content::ContentResolver;
use crate::error::{DepotFsError, Result};
use crate::namespace::{LocalTreeScanner, NamespaceUnifier, STAGING_PREFIX};
use crate::types::{DepotPath, Entry, FileKind};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(unix)]
const PROMOTED_FILE_MODE: u32 = 0o644;

/// Result of a write routed through the promoter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes of caller data written.
    pub written: usize,
    /// True when this write materialized the file in the override tree.
    pub promoted: bool,
}

/// Materializes files in the override tree on first write.
///
/// Work on one path is serialized: the second of two racing promoters
/// re-resolves under the lock, finds the file already local and writes to
/// it directly. A promoted file is staged beside its destination and renamed
/// into place only once the full depot content and the caller's delta are
/// both on disk, so a failed promotion leaves nothing behind.
pub struct Promoter {
    scanner: LocalTreeScanner,
    locks: DashMap<DepotPath, Arc<Mutex<()>>>,
}

impl Promoter {
    pub fn new(scanner: LocalTreeScanner) -> Self {
        Self {
            scanner,
            locks: DashMap::new(),
        }
    }

    /// Writes `data` at `offset`, promoting the file first if the override
    /// tree does not have it yet.
    pub fn promote_and_write(
        &self,
        namespace: &NamespaceUnifier,
        content: &ContentResolver,
        path: &DepotPath,
        offset: u64,
        data: &[u8],
    ) -> Result<WriteOutcome> {
        self.with_path_lock(path, || match namespace.lookup(path)? {
            Some(Entry::Local(local)) if local.kind() == FileKind::Directory => {
                Err(DepotFsError::IsADirectory { path: path.clone() })
            }
            Some(Entry::Local(local)) => {
                let written = write_local(path, local.path(), offset, data)?;
                Ok(WriteOutcome { written, promoted: false })
            }
            Some(Entry::Remote(remote)) => {
                let base = content.read_remote(path, &remote)?;
                let written = self.stage_and_commit(path, &base, offset, data)?;
                info!(%path, bytes = base.len(), "promoted depot file to override tree");
                Ok(WriteOutcome { written, promoted: true })
            }
            None => {
                let written = self.stage_and_commit(path, &[], offset, data)?;
                debug!(%path, "created file in override tree on write");
                Ok(WriteOutcome { written, promoted: true })
            }
        })
    }

    /// Creates an empty file in the override tree, failing if anything is
    /// already at `path`.
    pub fn create_empty(&self, namespace: &NamespaceUnifier, path: &DepotPath) -> Result<()> {
        self.with_path_lock(path, || {
            if namespace.lookup(path)?.is_some() {
                return Err(DepotFsError::AlreadyExists { path: path.clone() });
            }
            let target = self.scanner.local_path(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|err| DepotFsError::local(path, err))?;
            }
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .map_err(|err| match err.kind() {
                    io::ErrorKind::AlreadyExists => DepotFsError::AlreadyExists { path: path.clone() },
                    _ => DepotFsError::local(path, err),
                })?;
            Ok(())
        })
    }

    /// Number of paths with a promotion currently in progress.
    pub fn in_progress(&self) -> usize {
        self.locks.len()
    }

    /// Runs `work` holding the lock that serializes promotions of `path`.
    pub(crate) fn with_path_lock<T>(&self, path: &DepotPath, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self
            .locks
            .entry(path.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock();
            work()
        };

        drop(lock);
        self.locks.remove_if(path, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn stage_and_commit(&self, path: &DepotPath, base: &[u8], offset: u64, data: &[u8]) -> Result<usize> {
        let target = self.scanner.local_path(path);
        let parent = target.parent().unwrap_or_else(|| self.scanner.root());
        fs::create_dir_all(parent).map_err(|err| DepotFsError::local(path, err))?;

        stage(parent, &target, base, offset, data).map_err(|err| {
            warn!(%path, error = %err, "promotion rolled back");
            DepotFsError::local(path, err)
        })?;
        Ok(data.len())
    }
}

fn stage(dir: &Path, target: &Path, base: &[u8], offset: u64, data: &[u8]) -> io::Result<()> {
    let mut staged = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)?;

    staged.write_all(base)?;
    staged.seek(SeekFrom::Start(offset))?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(PROMOTED_FILE_MODE))?;
    }

    staged.persist(target).map_err(|err| err.error)?;
    Ok(())
}

pub(crate) fn write_local(path: &DepotPath, local: &Path, offset: u64, data: &[u8]) -> Result<usize> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(local)
        .map_err(|err| DepotFsError::local(path, err))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| DepotFsError::local(path, err))?;
    file.write_all(data)
        .map_err(|err| DepotFsError::local(path, err))?;
    Ok(data.len())
}
