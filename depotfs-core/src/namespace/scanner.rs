//! Live view of the override tree. Nothing here is cached.

use crate::types::{DepotPath, FileKind, LocalEntry};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Name prefix of the temporary files a promotion stages its content in.
/// Such files are never reported as part of the tree.
pub const STAGING_PREFIX: &str = ".depotfs-promote-";

pub fn is_staging_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

fn kind_of(file_type: fs::FileType) -> FileKind {
    if file_type.is_dir() {
        FileKind::Directory
    } else {
        FileKind::File
    }
}

fn is_vanished(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

/// Walks the override root and reports its nodes under logical paths.
#[derive(Debug, Clone)]
pub struct LocalTreeScanner {
    root: PathBuf,
}

impl LocalTreeScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `path` lives (or would live) in the override tree.
    pub fn local_path(&self, path: &DepotPath) -> PathBuf {
        path.to_local(&self.root)
    }

    /// Walks the whole override tree, directories included, root excluded.
    ///
    /// Symlinks are followed here as in [`lookup`](Self::lookup), so both
    /// report a linked directory as a directory.
    pub fn scan(&self) -> io::Result<BTreeMap<DepotPath, LocalEntry>> {
        let mut entries = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !is_staging_name(name))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.loop_ancestor().is_some() => continue,
                Err(err) => {
                    let err = io::Error::from(err);
                    // Removed by a concurrent unlink/rename while walking.
                    if is_vanished(&err) {
                        continue;
                    }
                    return Err(err);
                }
            };
            if let Some(path) = DepotPath::from_local(&self.root, entry.path()) {
                let local = LocalEntry::new(entry.path().to_path_buf(), kind_of(entry.file_type()));
                entries.insert(path, local);
            }
        }

        Ok(entries)
    }

    /// Looks up a single logical path in the override tree.
    pub fn lookup(&self, path: &DepotPath) -> io::Result<Option<LocalEntry>> {
        if path.is_root() || path.segments().any(is_staging_name) {
            return Ok(None);
        }

        let local = self.local_path(path);
        match fs::metadata(&local) {
            Ok(metadata) => Ok(Some(LocalEntry::new(local, kind_of(metadata.file_type())))),
            Err(err) if is_vanished(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Lists the immediate children of `dir` in the override tree.
    ///
    /// Returns `None` when `dir` is not a directory there.
    pub fn children(&self, dir: &DepotPath) -> io::Result<Option<Vec<(String, FileKind)>>> {
        let local = self.local_path(dir);
        let read_dir = match fs::read_dir(&local) {
            Ok(read_dir) => read_dir,
            Err(err) if is_vanished(&err) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut children = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_staging_name(&name) {
                continue;
            }
            let kind = match fs::metadata(entry.path()) {
                Ok(metadata) => kind_of(metadata.file_type()),
                Err(err) if is_vanished(&err) => continue,
                Err(err) => return Err(err),
            };
            children.push((name, kind));
        }
        Ok(Some(children))
    }

    /// Counts the nodes in the override tree.
    pub fn count(&self) -> io::Result<u64> {
        Ok(self.scan()?.len() as u64)
    }
}
