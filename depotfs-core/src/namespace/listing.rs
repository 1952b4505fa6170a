use super::NamespaceUnifier;
use crate::error::{DepotFsError, Result};
use crate::types::{DepotPath, DirectoryEntry, FileKind};
use std::collections::{BTreeMap, BTreeSet};

/// Immediate children of a directory in the unified namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    children: BTreeMap<String, FileKind>,
}

impl DirectoryListing {
    fn insert(&mut self, name: &str, kind: FileKind) {
        self.children.insert(name.to_string(), kind);
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.children.keys().cloned().collect()
    }

    pub fn kind_of(&self, name: &str) -> Option<FileKind> {
        self.children.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Children in name order.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.children
            .iter()
            .map(|(name, kind)| DirectoryEntry::new(name.clone(), *kind))
            .collect()
    }
}

impl NamespaceUnifier {
    /// Derives the children of `dir` from both key spaces.
    ///
    /// A depot key `dir/x/...` contributes the child `x`, a directory when
    /// the key continues past it. Override-tree children are taken as they
    /// are and win on a name clash. Returns `None` when no key lies below
    /// `dir` and the override tree has no directory at `dir`; an empty
    /// override directory yields an empty listing.
    pub fn list_children(&self, dir: &DepotPath) -> Result<Option<DirectoryListing>> {
        let remote = self.remote()?;
        let mut listing = DirectoryListing::default();
        let mut matched = false;

        for (key, _) in remote.descendants(dir) {
            let Some(rest) = dir.descendant_suffix(key.as_str()) else {
                continue;
            };
            matched = true;
            match rest.split_once('/') {
                Some((child, _)) => listing.insert(child, FileKind::Directory),
                None => listing.insert(rest, FileKind::File),
            }
        }

        let local = self
            .scanner()
            .children(dir)
            .map_err(|err| DepotFsError::local(dir, err))?;
        if let Some(children) = local {
            matched = true;
            for (name, kind) in children {
                listing.insert(&name, kind);
            }
        }

        Ok(matched.then_some(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::MemoryDepot;
    use crate::types::EngineConfig;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn names(listing: Option<DirectoryListing>) -> Vec<String> {
        listing.unwrap().names().into_iter().collect()
    }

    #[test]
    fn test_merges_remote_and_local_children() {
        let depot = Arc::new(
            MemoryDepot::builder()
                .changelist(1)
                .file("//a/b.txt", "b")
                .file("//a/c/d.txt", "d")
                .build(),
        );
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/e.txt"), b"e").unwrap();
        let unifier = NamespaceUnifier::new(depot, &EngineConfig::new("//...", dir.path()));

        let listing = unifier.list_children(&DepotPath::new("/a")).unwrap();
        assert_eq!(names(listing.clone()), vec!["b.txt", "c", "e.txt"]);
        let listing = listing.unwrap();
        assert_eq!(listing.kind_of("c"), Some(FileKind::Directory));
        assert_eq!(listing.kind_of("b.txt"), Some(FileKind::File));

        assert_eq!(names(unifier.list_children(&DepotPath::new("/a/c")).unwrap()), vec!["d.txt"]);
        assert_eq!(names(unifier.list_children(&DepotPath::root()).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_not_a_directory() {
        let depot = Arc::new(MemoryDepot::builder().changelist(1).file("//a/b.txt", "b").build());
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("local.txt"), b"x").unwrap();
        let unifier = NamespaceUnifier::new(depot, &EngineConfig::new("//...", dir.path()));

        assert_eq!(unifier.list_children(&DepotPath::new("/a/b.txt")).unwrap(), None);
        assert_eq!(unifier.list_children(&DepotPath::new("/local.txt")).unwrap(), None);
        assert_eq!(unifier.list_children(&DepotPath::new("/missing")).unwrap(), None);
    }

    #[test]
    fn test_empty_local_directory_is_enumerable() {
        let depot = Arc::new(MemoryDepot::builder().changelist(1).build());
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("x/empty")).unwrap();
        let unifier = NamespaceUnifier::new(depot, &EngineConfig::new("//...", dir.path()));

        assert_eq!(names(unifier.list_children(&DepotPath::new("/x")).unwrap()), vec!["empty"]);
        let empty = unifier.list_children(&DepotPath::new("/x/empty")).unwrap().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_prefix_siblings_do_not_leak() {
        let depot = Arc::new(
            MemoryDepot::builder()
                .changelist(1)
                .file("//a/x.txt", "x")
                .file("//ab/y.txt", "y")
                .build(),
        );
        let dir = tempdir().unwrap();
        let unifier = NamespaceUnifier::new(depot, &EngineConfig::new("//...", dir.path()));

        assert_eq!(names(unifier.list_children(&DepotPath::new("/a")).unwrap()), vec!["x.txt"]);
        let entries = unifier.list_children(&DepotPath::root()).unwrap().unwrap().entries();
        assert_eq!(
            entries,
            vec![
                DirectoryEntry::new("a", FileKind::Directory),
                DirectoryEntry::new("ab", FileKind::Directory),
            ]
        );
    }
}
