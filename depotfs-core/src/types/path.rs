use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A canonical logical path inside the mounted tree.
///
/// Both key spaces normalize through this type: depot paths are derived by
/// string manipulation (`//depot/a/b` becomes `/depot/a/b`) and override
/// paths by walking the local tree. The canonical form always has a leading
/// `/`, never a trailing `/` except for the root, no empty segments and no
/// `.`/`..` components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepotPath {
    inner: String,
}

impl DepotPath {
    /// The root of the mounted tree, `/`.
    pub fn root() -> Self {
        Self {
            inner: "/".to_string(),
        }
    }

    /// Creates a new DepotPath, normalizing the input.
    pub fn new(path: &str) -> Self {
        Self {
            inner: Self::normalize(path),
        }
    }

    /// Maps a depot path string such as `//depot/main/a.txt` into the
    /// logical tree (`/depot/main/a.txt`).
    pub fn from_depot(depot_path: &str) -> Self {
        Self::new(depot_path.strip_prefix('/').unwrap_or(depot_path))
    }

    /// Builds a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for segment in segments {
            joined.push('/');
            joined.push_str(segment.as_ref());
        }
        Self::new(&joined)
    }

    /// Converts a location under `root` back into a logical path.
    ///
    /// Returns `None` when `local` is not below `root` or when a component is
    /// not valid UTF-8.
    pub fn from_local(root: &Path, local: &Path) -> Option<Self> {
        let relative = local.strip_prefix(root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_str()?),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(Self::from_segments(segments))
    }

    fn normalize(path: &str) -> String {
        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                name => segments.push(name),
            }
        }

        if segments.is_empty() {
            return "/".to_string();
        }

        let mut normalized = String::with_capacity(path.len() + 1);
        for segment in segments {
            normalized.push('/');
            normalized.push_str(segment);
        }
        normalized
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner == "/"
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<DepotPath> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => None,
        }
    }

    /// Returns the final segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.inner.rsplit('/').next()
    }

    /// Appends a child name (or relative path) to this path.
    pub fn join(&self, name: &str) -> DepotPath {
        Self::new(&format!("{}/{}", self.inner, name))
    }

    /// Iterates over the path segments, root excluded.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('/').filter(|s| !s.is_empty())
    }

    /// The prefix every descendant key starts with: `/` for the root,
    /// `/a/b/` for `/a/b`.
    pub fn child_prefix(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.inner)
        }
    }

    /// Returns what follows this path's child prefix in `key`, if `key` is a
    /// strict descendant.
    pub fn descendant_suffix<'a>(&self, key: &'a str) -> Option<&'a str> {
        let suffix = if self.is_root() {
            key.strip_prefix('/')?
        } else {
            key.strip_prefix(self.inner.as_str())?.strip_prefix('/')?
        };
        (!suffix.is_empty()).then_some(suffix)
    }

    /// Returns true if `self` is `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &DepotPath) -> bool {
        self == ancestor || self.descendant_suffix_of(ancestor).is_some()
    }

    fn descendant_suffix_of<'a>(&'a self, ancestor: &DepotPath) -> Option<&'a str> {
        ancestor.descendant_suffix(&self.inner)
    }

    /// Moves this path from below `from` to the same position below `to`.
    pub fn rebase(&self, from: &DepotPath, to: &DepotPath) -> Option<DepotPath> {
        if self == from {
            return Some(to.clone());
        }
        self.descendant_suffix_of(from).map(|rest| to.join(rest))
    }

    /// Resolves this logical path to its location under the override root.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut local = root.to_path_buf();
        for segment in self.segments() {
            local.push(segment);
        }
        local
    }
}

impl fmt::Display for DepotPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl From<&str> for DepotPath {
    fn from(s: &str) -> Self {
        DepotPath::new(s)
    }
}

impl From<String> for DepotPath {
    fn from(s: String) -> Self {
        DepotPath::new(&s)
    }
}

impl AsRef<str> for DepotPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}

impl Borrow<str> for DepotPath {
    fn borrow(&self) -> &str {
        &self.inner
    }
}
