use super::metadata::FileKind;
use std::path::{Path, PathBuf};

/// Identifier of a depot changelist.
pub type ChangelistId = u64;

/// Opaque descriptor of a file on the depot, as returned by a listing.
///
/// Sufficient for the transport to answer size and content requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFile {
    depot_path: String,
    revision: Option<u32>,
}

impl RemoteFile {
    pub fn new(depot_path: impl Into<String>) -> Self {
        Self {
            depot_path: depot_path.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = Some(revision);
        self
    }

    /// The depot path, e.g. `//depot/main/a.txt`.
    pub fn depot_path(&self) -> &str {
        &self.depot_path
    }

    pub fn revision(&self) -> Option<u32> {
        self.revision
    }
}

/// A node of the override tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    path: PathBuf,
    kind: FileKind,
}

impl LocalEntry {
    pub fn new(path: PathBuf, kind: FileKind) -> Self {
        Self { path, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }
}

/// What backs a logical path.
///
/// A local entry always shadows a remote entry for the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Remote(RemoteFile),
    Local(LocalEntry),
}

impl Entry {
    pub fn kind(&self) -> FileKind {
        match self {
            Entry::Remote(_) => FileKind::File,
            Entry::Local(local) => local.kind(),
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind() == FileKind::Directory
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Entry::Remote(_))
    }

    /// The override-tree location, if this entry is local.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Entry::Local(local) => Some(local.path()),
            Entry::Remote(_) => None,
        }
    }

    pub fn remote_file(&self) -> Option<&RemoteFile> {
        match self {
            Entry::Remote(remote) => Some(remote),
            Entry::Local(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_capabilities() {
        let remote = Entry::Remote(RemoteFile::new("//depot/a.txt").with_revision(3));
        assert!(remote.is_remote());
        assert_eq!(remote.kind(), FileKind::File);
        assert!(remote.local_path().is_none());
        assert_eq!(remote.remote_file().unwrap().revision(), Some(3));

        let local = Entry::Local(LocalEntry::new(PathBuf::from("/tmp/o/a"), FileKind::Directory));
        assert!(!local.is_remote());
        assert!(local.is_directory());
        assert_eq!(local.local_path(), Some(Path::new("/tmp/o/a")));
        assert!(local.remote_file().is_none());
    }
}
