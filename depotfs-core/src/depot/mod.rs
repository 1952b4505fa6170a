//! Depot transports shipped with the engine.
//!
//! The real depot protocol lives outside this crate; these implementations
//! of [`DepotTransport`](crate::traits::DepotTransport) cover embedding and
//! testing ([`MemoryDepot`]) and serving an exported tree from disk
//! ([`MirrorDepot`]).

mod memory;
mod mirror;

pub use memory::{DepotCalls, MemoryDepot, MemoryDepotBuilder};
pub use mirror::MirrorDepot;
pub use crate::error::DepotError;

use crate::types::ChangelistId;

/// A parsed depot file spec such as `//depot/main/...@42`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSpec<'a> {
    path: &'a str,
    recursive: bool,
    changelist: Option<ChangelistId>,
}

impl<'a> FileSpec<'a> {
    pub fn parse(spec: &'a str) -> Self {
        let (path, changelist) = match spec.rsplit_once('@') {
            Some((path, revision)) => (path, revision.parse().ok()),
            None => (spec, None),
        };
        match path.strip_suffix("...") {
            Some(prefix) => Self {
                path: prefix,
                recursive: true,
                changelist,
            },
            None => Self {
                path,
                recursive: false,
                changelist,
            },
        }
    }

    pub fn changelist(&self) -> Option<ChangelistId> {
        self.changelist
    }

    /// True if the depot file at `depot_path` is selected by this spec.
    pub fn matches(&self, depot_path: &str) -> bool {
        if self.recursive {
            depot_path.starts_with(self.path)
        } else {
            depot_path == self.path
        }
    }
}
