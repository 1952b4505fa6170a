//! # depotfs core
//!
//! The engine behind depotfs: a read-mostly view of a version-controlled
//! depot, pinned to one changelist, overlaid by a writable local directory.
//!
//! ## Overview
//!
//! Every logical path is backed either by the depot or by the override tree,
//! and the override tree always wins. Reads of depot-backed files are served
//! through session-long caches; the first write to such a file copies it into
//! the override tree ("promotion") and the write then applies locally.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use depotfs_core::depot::MemoryDepot;
//! use depotfs_core::traits::FileSystem;
//! use depotfs_core::types::{DepotPath, EngineConfig};
//! use depotfs_core::OverlayFs;
//! use std::sync::Arc;
//!
//! let depot = Arc::new(
//!     MemoryDepot::builder()
//!         .changelist(42)
//!         .file("//depot/main/README", "hello")
//!         .build(),
//! );
//! let fs = OverlayFs::new(depot, EngineConfig::new("//depot/...", "/srv/overrides"));
//! let bytes = fs.read_at(&DepotPath::new("/depot/main/README"), 0, 5)?;
//! ```
//!
//! ## Architecture
//!
//! - [`traits`]: the depot transport consumed and the operation set exposed
//! - [`types`]: paths, entries, attributes and configuration
//! - [`error`]: error taxonomy and status codes
//! - [`cache`]: single-flight caches for depot listings, content and sizes
//! - [`namespace`]: merging the depot listing with the override tree
//! - [`content`]: byte content and sizes per entry
//! - [`promote`]: copy-on-write promotion into the override tree
//! - [`dispatcher`]: [`OverlayFs`], the operation dispatcher
//! - [`stats`]: operation and cache counters
//! - [`depot`]: in-memory and directory-backed transports
//!
//! The Linux FUSE adapter lives in `depotfs-linux`.

pub mod cache;
pub mod content;
pub mod depot;
pub mod dispatcher;
pub mod error;
pub mod namespace;
pub mod promote;
pub mod stats;
pub mod traits;
pub mod types;

pub use dispatcher::{Node, OverlayFs};
pub use error::{DepotError, DepotFsError, Result, Status};
