use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Represents the type of a node in the mounted tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory, explicit (override tree) or implied by depot paths
    Directory,
}

/// Attributes reported for a path.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttributes {
    /// Type of the node
    pub kind: FileKind,
    /// Size in bytes (zero for directories)
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Last modification time; depot-backed nodes report the mount time
    pub modified: SystemTime,
}

impl FileAttributes {
    pub fn file(size: u64, mode: u32, modified: SystemTime) -> Self {
        Self {
            kind: FileKind::File,
            size,
            mode,
            modified,
        }
    }

    pub fn directory(mode: u32, modified: SystemTime) -> Self {
        Self {
            kind: FileKind::Directory,
            size: 0,
            mode,
            modified,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// A single child in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirectoryEntry {
    /// The child's name (one path segment)
    pub name: String,
    /// Whether the child is a file or a directory
    pub kind: FileKind,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Filesystem-wide statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsStats {
    pub block_size: u32,
    pub fragment_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub total_files: u64,
    pub max_name_length: u32,
}

impl FsStats {
    /// Synthetic capacity: 1 Mi blocks of 1 KiB, all free.
    pub fn synthetic(total_files: u64) -> Self {
        Self {
            block_size: 1024,
            fragment_size: 1024,
            total_blocks: 1024 * 1024,
            free_blocks: 1024 * 1024,
            available_blocks: 1024 * 1024,
            total_files,
            max_name_length: 255,
        }
    }
}
