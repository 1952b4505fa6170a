use depotfs_core::types::DepotPath;
use std::collections::HashMap;

/// Inode number of the mount root, fixed by the FUSE protocol.
pub const ROOT_INODE: u64 = fuser::FUSE_ROOT_ID;

/// Stable path <-> inode assignment for the lifetime of a mount.
///
/// Inodes are handed out on first sight of a path and never reused. A
/// rename moves the inodes of the whole subtree to their new paths. An inode
/// is dropped once the kernel forgets every lookup it was handed, or when
/// its path is unlinked.
#[derive(Debug)]
pub struct InodeTable {
    paths: HashMap<u64, DepotPath>,
    inodes: HashMap<DepotPath, u64>,
    lookups: HashMap<u64, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inodes: HashMap::new(),
            lookups: HashMap::new(),
            next: ROOT_INODE + 1,
        };
        table.paths.insert(ROOT_INODE, DepotPath::root());
        table.inodes.insert(DepotPath::root(), ROOT_INODE);
        table
    }

    pub fn path(&self, ino: u64) -> Option<&DepotPath> {
        self.paths.get(&ino)
    }

    pub fn inode(&self, path: &DepotPath) -> Option<u64> {
        self.inodes.get(path).copied()
    }

    /// Returns the inode for `path`, assigning a new one if needed.
    pub fn get_or_insert(&mut self, path: &DepotPath) -> u64 {
        if let Some(ino) = self.inodes.get(path) {
            return *ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.clone());
        self.inodes.insert(path.clone(), ino);
        ino
    }

    /// Like [`get_or_insert`](Self::get_or_insert), also counting one
    /// kernel lookup against the inode.
    pub fn remember(&mut self, path: &DepotPath) -> u64 {
        let ino = self.get_or_insert(path);
        *self.lookups.entry(ino).or_default() += 1;
        ino
    }

    /// Releases `nlookup` kernel lookups of `ino`, dropping the inode when
    /// none remain.
    pub fn forget(&mut self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let Some(count) = self.lookups.get_mut(&ino) else {
            return;
        };
        *count = count.saturating_sub(nlookup);
        if *count == 0 {
            self.lookups.remove(&ino);
            if let Some(path) = self.paths.remove(&ino) {
                self.inodes.remove(&path);
            }
        }
    }

    /// Drops the inode of an unlinked path.
    pub fn remove(&mut self, path: &DepotPath) {
        if path.is_root() {
            return;
        }
        if let Some(ino) = self.inodes.remove(path) {
            self.paths.remove(&ino);
            self.lookups.remove(&ino);
        }
    }

    /// Re-keys `from` and everything below it to live under `to`.
    ///
    /// Whatever was known at or below `to` is dropped first, as the rename
    /// replaced it.
    pub fn rename_subtree(&mut self, from: &DepotPath, to: &DepotPath) {
        let replaced: Vec<DepotPath> = self
            .inodes
            .keys()
            .filter(|path| path.starts_with(to) && !path.starts_with(from))
            .cloned()
            .collect();
        for path in replaced {
            self.remove(&path);
        }

        let moved: Vec<(DepotPath, u64)> = self
            .inodes
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, ino)| (path.clone(), *ino))
            .collect();
        for (old, _) in &moved {
            self.inodes.remove(old);
        }
        for (old, ino) in moved {
            if let Some(new) = old.rebase(from, to) {
                self.paths.insert(ino, new.clone());
                self.inodes.insert(new, ino);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}
