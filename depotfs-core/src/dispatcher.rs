//! The operation set presented to the kernel-facing adapter.
//!
//! Every operation classifies its path once through [`OverlayFs::classify`]
//! and then applies the rules for that kind of node. The dispatch rules live
//! here and nowhere else.

use crate::content::ContentResolver;
use crate::error::{DepotFsError, Result};
use crate::namespace::{is_staging_name, NamespaceUnifier};
use crate::promote::{self, Promoter};
use crate::stats::{CacheReport, EngineStats, OperationType, StatsSnapshot};
use crate::traits::{DepotTransport, FileSystem};
use crate::types::{
    ChangelistId, DepotPath, DirectoryEntry, EngineConfig, Entry, FileAttributes, FileKind,
    FsStats,
};
use bytes::Bytes;
use std::fs::{self, OpenOptions};
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, instrument};

/// What a logical path currently denotes.
#[derive(Debug, Clone)]
pub enum Node {
    /// The mount root, always a directory.
    Root,
    /// A file or directory backed by the depot or the override tree.
    Entry(Entry),
    /// A directory implied by depot paths below it.
    ImplicitDirectory,
    /// Nothing at this path.
    Missing,
}

impl Node {
    pub fn kind(&self) -> Option<FileKind> {
        match self {
            Node::Root | Node::ImplicitDirectory => Some(FileKind::Directory),
            Node::Entry(entry) => Some(entry.kind()),
            Node::Missing => None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == Some(FileKind::Directory)
    }

    pub fn exists(&self) -> bool {
        !matches!(self, Node::Missing)
    }
}

/// A depot view at one changelist overlaid by a writable local tree.
pub struct OverlayFs {
    config: EngineConfig,
    namespace: NamespaceUnifier,
    content: ContentResolver,
    promoter: Promoter,
    stats: EngineStats,
    mounted_at: SystemTime,
}

impl OverlayFs {
    pub fn new(transport: Arc<dyn DepotTransport>, config: EngineConfig) -> Self {
        let namespace = NamespaceUnifier::new(Arc::clone(&transport), &config);
        let promoter = Promoter::new(namespace.scanner().clone());
        Self {
            content: ContentResolver::new(transport),
            namespace,
            promoter,
            stats: EngineStats::new(),
            mounted_at: SystemTime::now(),
            config,
        }
    }

    /// Resolves the session changelist now rather than on first access.
    pub fn ensure_initialized(&self) -> Result<ChangelistId> {
        self.namespace.ensure_initialized()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn namespace(&self) -> &NamespaceUnifier {
        &self.namespace
    }

    pub fn content(&self) -> &ContentResolver {
        &self.content
    }

    pub fn changelist(&self) -> Option<ChangelistId> {
        self.namespace.changelist()
    }

    pub fn engine_stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Operation counters plus cache figures.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(CacheReport {
            snapshots: self.namespace.snapshot_cache().stats(),
            contents: self.content.content_stats(),
            sizes: self.content.size_stats(),
        })
    }

    /// Determines what `path` currently denotes.
    pub fn classify(&self, path: &DepotPath) -> Result<Node> {
        if path.is_root() {
            return Ok(Node::Root);
        }
        if let Some(entry) = self.namespace.lookup(path)? {
            return Ok(Node::Entry(entry));
        }
        if self.namespace.remote()?.has_descendants(path) {
            return Ok(Node::ImplicitDirectory);
        }
        Ok(Node::Missing)
    }

    /// Rejects paths that would land on a promotion staging name.
    fn check_name(path: &DepotPath) -> Result<()> {
        if path.segments().any(is_staging_name) {
            return Err(DepotFsError::ReservedName { path: path.clone() });
        }
        Ok(())
    }

    /// New nodes need an existing directory above them.
    fn ensure_parent(&self, path: &DepotPath) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Err(DepotFsError::AlreadyExists { path: path.clone() });
        };
        match self.classify(&parent)? {
            Node::Missing => Err(DepotFsError::NotFound { path: parent }),
            node if !node.is_directory() => Err(DepotFsError::NotADirectory { path: parent }),
            _ => Ok(()),
        }
    }

    fn record<T>(&self, operation: OperationType, path: &DepotPath, result: Result<T>) -> Result<T> {
        self.stats.record_operation(operation, result.is_ok());
        if let Err(err) = &result {
            debug!(op = operation.name(), %path, status = %err.status(), error = %err, "operation failed");
        }
        result
    }

    fn directory_attributes(&self) -> FileAttributes {
        FileAttributes::directory(self.config.directory_mode, self.mounted_at)
    }

    fn get_attributes_inner(&self, path: &DepotPath) -> Result<FileAttributes> {
        match self.classify(path)? {
            Node::Root | Node::ImplicitDirectory => Ok(self.directory_attributes()),
            Node::Entry(entry @ Entry::Remote(_)) => {
                let size = self.content.size(path, &entry)?;
                Ok(FileAttributes::file(size, self.config.file_mode, self.mounted_at))
            }
            Node::Entry(entry @ Entry::Local(_)) => {
                let modified = entry
                    .local_path()
                    .and_then(|local| fs::metadata(local).and_then(|m| m.modified()).ok())
                    .unwrap_or(self.mounted_at);
                if entry.is_directory() {
                    return Ok(FileAttributes::directory(self.config.directory_mode, modified));
                }
                let size = self.content.size(path, &entry)?;
                Ok(FileAttributes::file(size, self.config.file_mode, modified))
            }
            Node::Missing => Err(DepotFsError::NotFound { path: path.clone() }),
        }
    }

    fn list_directory_inner(&self, path: &DepotPath) -> Result<Vec<DirectoryEntry>> {
        match self.classify(path)? {
            Node::Missing => Err(DepotFsError::NotFound { path: path.clone() }),
            node if !node.is_directory() => Err(DepotFsError::NotADirectory { path: path.clone() }),
            _ => Ok(self
                .namespace
                .list_children(path)?
                .unwrap_or_default()
                .entries()),
        }
    }

    /// The file entry at `path`, or the error for a directory or a gap.
    fn file_entry(&self, path: &DepotPath) -> Result<Entry> {
        match self.classify(path)? {
            Node::Entry(entry) if !entry.is_directory() => Ok(entry),
            Node::Missing => Err(DepotFsError::NotFound { path: path.clone() }),
            _ => Err(DepotFsError::IsADirectory { path: path.clone() }),
        }
    }

    fn write_at_inner(&self, path: &DepotPath, offset: u64, data: &[u8]) -> Result<usize> {
        Self::check_name(path)?;
        match self.classify(path)? {
            Node::Entry(Entry::Local(local)) if local.kind() == FileKind::File => {
                promote::write_local(path, local.path(), offset, data)
            }
            Node::Entry(Entry::Remote(_)) => {
                let outcome = self
                    .promoter
                    .promote_and_write(&self.namespace, &self.content, path, offset, data)?;
                if outcome.promoted {
                    self.stats.record_promotion();
                }
                Ok(outcome.written)
            }
            Node::Missing => {
                self.ensure_parent(path)?;
                let outcome = self
                    .promoter
                    .promote_and_write(&self.namespace, &self.content, path, offset, data)?;
                Ok(outcome.written)
            }
            _ => Err(DepotFsError::IsADirectory { path: path.clone() }),
        }
    }

    fn truncate_inner(&self, path: &DepotPath, len: u64) -> Result<()> {
        match self.file_entry(path)? {
            Entry::Remote(_) => Err(DepotFsError::NotSupported {
                operation: "truncate",
                path: path.clone(),
            }),
            Entry::Local(local) => OpenOptions::new()
                .write(true)
                .open(local.path())
                .and_then(|file| file.set_len(len))
                .map_err(|err| DepotFsError::local(path, err)),
        }
    }

    fn unlink_inner(&self, path: &DepotPath) -> Result<()> {
        match self.file_entry(path)? {
            Entry::Remote(_) => Err(DepotFsError::NotSupported {
                operation: "unlink",
                path: path.clone(),
            }),
            Entry::Local(local) => {
                fs::remove_file(local.path()).map_err(|err| DepotFsError::local(path, err))
            }
        }
    }

    fn make_directory_inner(&self, path: &DepotPath) -> Result<()> {
        Self::check_name(path)?;
        if self.classify(path)?.exists() {
            return Err(DepotFsError::AlreadyExists { path: path.clone() });
        }
        self.ensure_parent(path)?;
        let local = self.namespace.scanner().local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent).map_err(|err| DepotFsError::local(path, err))?;
        }
        fs::create_dir(&local).map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => DepotFsError::AlreadyExists { path: path.clone() },
            _ => DepotFsError::local(path, err),
        })
    }

    fn rename_inner(&self, from: &DepotPath, to: &DepotPath) -> Result<()> {
        let source = match self.classify(from)? {
            Node::Entry(Entry::Local(local)) => local,
            Node::Missing => return Err(DepotFsError::NotFound { path: from.clone() }),
            _ => {
                return Err(DepotFsError::NotSupported {
                    operation: "rename",
                    path: from.clone(),
                })
            }
        };
        if from == to {
            return Ok(());
        }
        Self::check_name(to)?;
        self.ensure_parent(to)?;

        // A promotion of `to` commits by replacing the file, so it must not
        // overlap with a rename onto the same path.
        self.promoter.with_path_lock(to, || {
            match (source.kind(), self.classify(to)?.kind()) {
                (FileKind::File, Some(FileKind::Directory)) => {
                    return Err(DepotFsError::IsADirectory { path: to.clone() })
                }
                (FileKind::Directory, Some(FileKind::File)) => {
                    return Err(DepotFsError::NotADirectory { path: to.clone() })
                }
                _ => {}
            }

            let destination = self.namespace.scanner().local_path(to);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|err| DepotFsError::local(to, err))?;
            }
            fs::rename(source.path(), &destination).map_err(|err| DepotFsError::local(from, err))
        })
    }
}

impl FileSystem for OverlayFs {
    #[instrument(level = "debug", skip(self))]
    fn get_attributes(&self, path: &DepotPath) -> Result<FileAttributes> {
        let result = self.get_attributes_inner(path);
        self.record(OperationType::GetAttributes, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn list_directory(&self, path: &DepotPath) -> Result<Vec<DirectoryEntry>> {
        let result = self.list_directory_inner(path);
        self.record(OperationType::ListDirectory, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn open_for_read(&self, path: &DepotPath) -> Result<()> {
        let result = self.file_entry(path).map(|_| ());
        self.record(OperationType::Open, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn open_for_write(&self, path: &DepotPath) -> Result<()> {
        let result = self.file_entry(path).map(|_| ());
        self.record(OperationType::Open, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn create(&self, path: &DepotPath) -> Result<()> {
        let result = Self::check_name(path).and_then(|()| {
            self.ensure_parent(path)?;
            if let Node::ImplicitDirectory = self.classify(path)? {
                return Err(DepotFsError::AlreadyExists { path: path.clone() });
            }
            self.promoter.create_empty(&self.namespace, path)
        });
        self.record(OperationType::Create, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn read_at(&self, path: &DepotPath, offset: u64, len: usize) -> Result<Bytes> {
        let result = self
            .file_entry(path)
            .and_then(|entry| self.content.read_range(path, &entry, offset, len));
        if let Ok(bytes) = &result {
            self.stats.record_read(bytes.len());
        }
        self.record(OperationType::Read, path, result)
    }

    #[instrument(level = "debug", skip(self, data), fields(len = data.len()))]
    fn write_at(&self, path: &DepotPath, offset: u64, data: &[u8]) -> Result<usize> {
        let result = self.write_at_inner(path, offset, data);
        if let Ok(written) = &result {
            self.stats.record_write(*written);
        }
        self.record(OperationType::Write, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn truncate(&self, path: &DepotPath, len: u64) -> Result<()> {
        let result = self.truncate_inner(path, len);
        self.record(OperationType::Truncate, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn unlink(&self, path: &DepotPath) -> Result<()> {
        let result = self.unlink_inner(path);
        self.record(OperationType::Unlink, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn make_directory(&self, path: &DepotPath) -> Result<()> {
        let result = self.make_directory_inner(path);
        self.record(OperationType::MakeDirectory, path, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn rename(&self, from: &DepotPath, to: &DepotPath) -> Result<()> {
        let result = self.rename_inner(from, to);
        self.record(OperationType::Rename, from, result)
    }

    #[instrument(level = "debug", skip(self))]
    fn filesystem_stats(&self) -> Result<FsStats> {
        let result = self
            .namespace
            .snapshot()
            .map(|namespace| FsStats::synthetic(namespace.len() as u64));
        self.record(OperationType::Statfs, &DepotPath::root(), result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::MemoryDepot;
    use crate::error::Status;
    use tempfile::tempdir;

    fn overlay() -> (tempfile::TempDir, OverlayFs) {
        let depot = Arc::new(
            MemoryDepot::builder()
                .changelist(9)
                .file("//depot/a/b.txt", "bee")
                .file("//depot/a/c/d.txt", "dee")
                .build(),
        );
        let dir = tempdir().unwrap();
        let fs = OverlayFs::new(depot, EngineConfig::new("//depot/...", dir.path()));
        (dir, fs)
    }

    #[test]
    fn test_classify() {
        let (dir, fs) = overlay();
        std::fs::create_dir_all(dir.path().join("depot/local")).unwrap();

        assert!(matches!(fs.classify(&DepotPath::root()).unwrap(), Node::Root));
        assert!(matches!(
            fs.classify(&DepotPath::new("/depot/a")).unwrap(),
            Node::ImplicitDirectory
        ));
        assert!(matches!(
            fs.classify(&DepotPath::new("/depot/a/b.txt")).unwrap(),
            Node::Entry(Entry::Remote(_))
        ));
        assert!(matches!(
            fs.classify(&DepotPath::new("/depot/local")).unwrap(),
            Node::Entry(Entry::Local(_))
        ));
        assert!(!fs.classify(&DepotPath::new("/depot/zz")).unwrap().exists());
    }

    #[test]
    fn test_attributes() {
        let (_dir, fs) = overlay();

        let attrs = fs.get_attributes(&DepotPath::new("/depot/a/b.txt")).unwrap();
        assert_eq!(attrs.kind, FileKind::File);
        assert_eq!(attrs.size, 3);
        assert_eq!(attrs.mode, 0o777);

        assert!(fs.get_attributes(&DepotPath::new("/depot/a/c")).unwrap().is_directory());
        assert!(fs.get_attributes(&DepotPath::root()).unwrap().is_directory());
        assert_eq!(
            fs.get_attributes(&DepotPath::new("/nope")).unwrap_err().status(),
            Status::NotFound
        );
    }

    #[test]
    fn test_list_directory_rules() {
        let (_dir, fs) = overlay();

        let root = fs.list_directory(&DepotPath::root()).unwrap();
        assert_eq!(root, vec![DirectoryEntry::new("depot", FileKind::Directory)]);
        assert_eq!(
            fs.list_directory(&DepotPath::new("/depot/a/b.txt")).unwrap_err().status(),
            Status::NotADirectory
        );
        assert_eq!(
            fs.list_directory(&DepotPath::new("/depot/q")).unwrap_err().status(),
            Status::NotFound
        );
    }

    #[test]
    fn test_destructive_operations_on_remote_paths() {
        let (_dir, fs) = overlay();
        let path = DepotPath::new("/depot/a/b.txt");

        assert_eq!(fs.truncate(&path, 0).unwrap_err().status(), Status::NotSupported);
        assert_eq!(fs.unlink(&path).unwrap_err().status(), Status::NotSupported);
        assert_eq!(
            fs.rename(&path, &DepotPath::new("/depot/a/z.txt")).unwrap_err().status(),
            Status::NotSupported
        );
        assert_eq!(fs.read_at(&path, 0, 10).unwrap(), Bytes::from("bee"));
        assert_eq!(fs.engine_stats().failure_count(OperationType::Unlink), 1);
    }

    #[test]
    fn test_create_rules() {
        let (dir, fs) = overlay();

        assert_eq!(
            fs.create(&DepotPath::new("/depot/a/b.txt")).unwrap_err().status(),
            Status::AlreadyExists
        );
        assert_eq!(
            fs.create(&DepotPath::new("/depot/a/c")).unwrap_err().status(),
            Status::AlreadyExists
        );
        assert_eq!(
            fs.create(&DepotPath::new("/missing/x.txt")).unwrap_err().status(),
            Status::NotFound
        );
        assert_eq!(
            fs.create(&DepotPath::new("/depot/a/b.txt/x")).unwrap_err().status(),
            Status::NotADirectory
        );

        fs.create(&DepotPath::new("/depot/a/c/new.txt")).unwrap();
        assert!(dir.path().join("depot/a/c/new.txt").is_file());
        let names: Vec<_> = fs
            .list_directory(&DepotPath::new("/depot/a/c"))
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, vec!["d.txt", "new.txt"]);
    }

    #[test]
    fn test_write_to_implicit_directory() {
        let (_dir, fs) = overlay();
        assert_eq!(
            fs.write_at(&DepotPath::new("/depot/a"), 0, b"x").unwrap_err().status(),
            Status::IsADirectory
        );
    }

    #[test]
    fn test_local_lifecycle() {
        let (dir, fs) = overlay();
        let path = DepotPath::new("/depot/a/notes.md");

        fs.create(&path).unwrap();
        assert_eq!(fs.write_at(&path, 0, b"hello world").unwrap(), 11);
        fs.truncate(&path, 5).unwrap();
        assert_eq!(fs.read_at(&path, 0, 100).unwrap(), Bytes::from("hello"));

        let moved = DepotPath::new("/depot/moved/notes.md");
        fs.make_directory(&DepotPath::new("/depot/moved")).unwrap();
        fs.rename(&path, &moved).unwrap();
        assert!(dir.path().join("depot/moved/notes.md").is_file());
        assert_eq!(fs.get_attributes(&path).unwrap_err().status(), Status::NotFound);

        fs.unlink(&moved).unwrap();
        assert_eq!(fs.get_attributes(&moved).unwrap_err().status(), Status::NotFound);
        assert_eq!(
            fs.make_directory(&DepotPath::new("/depot/moved")).unwrap_err().status(),
            Status::AlreadyExists
        );
    }

    #[test]
    fn test_unlinking_promoted_file_re_exposes_depot_version() {
        let (_dir, fs) = overlay();
        let path = DepotPath::new("/depot/a/b.txt");

        fs.write_at(&path, 0, b"B").unwrap();
        assert_eq!(fs.read_at(&path, 0, 10).unwrap(), Bytes::from("Bee"));
        assert_eq!(fs.engine_stats().promotions(), 1);

        fs.unlink(&path).unwrap();
        assert_eq!(fs.read_at(&path, 0, 10).unwrap(), Bytes::from("bee"));
    }

    #[test]
    fn test_staging_names_are_reserved() {
        let (dir, fs) = overlay();
        let staged = DepotPath::new(&format!("/depot/{}notes", crate::namespace::STAGING_PREFIX));

        assert_eq!(fs.create(&staged).unwrap_err().status(), Status::NotSupported);
        assert_eq!(fs.write_at(&staged, 0, b"hello").unwrap_err().status(), Status::NotSupported);
        assert_eq!(fs.make_directory(&staged).unwrap_err().status(), Status::NotSupported);

        let notes = DepotPath::new("/depot/notes");
        fs.create(&notes).unwrap();
        assert_eq!(fs.rename(&notes, &staged).unwrap_err().status(), Status::NotSupported);

        let on_disk: Vec<_> = std::fs::read_dir(dir.path().join("depot"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(on_disk, vec!["notes"]);
        assert_eq!(fs.get_attributes(&staged).unwrap_err().status(), Status::NotFound);
    }

    #[test]
    fn test_concurrent_make_directory_has_one_winner() {
        let (dir, fs) = overlay();
        let path = DepotPath::new("/depot/a/scratch");
        let barrier = std::sync::Barrier::new(4);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        fs.make_directory(&path).map_err(|err| err.status())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.err())
            .all(|status| status == Status::AlreadyExists));
        assert!(dir.path().join("depot/a/scratch").is_dir());
    }

    #[test]
    fn test_filesystem_stats() {
        let (_dir, fs) = overlay();
        let stats = fs.filesystem_stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.block_size, 1024);
        assert_eq!(stats.total_blocks, 1024 * 1024);

        let snapshot = fs.stats();
        assert_eq!(snapshot.operations.get("statfs"), Some(&1));
        assert_eq!(snapshot.caches.snapshots.misses, 1);
    }
}
