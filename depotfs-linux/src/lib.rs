//! Linux kernel-facing adapter for depotfs, built on FUSE via `fuser`.
//!
//! [`DepotFuse`] translates inode-addressed kernel requests into path-based
//! calls on any [`FileSystem`](depotfs_core::traits::FileSystem) and the
//! engine's status codes into errno values. [`mount`] runs it in a
//! background session.

mod errno;
mod fuse;
mod inode;
mod mount;

pub use errno::{errno_for, status_errno};
pub use fuse::{DepotFuse, FuseOptions};
pub use inode::{InodeTable, ROOT_INODE};
pub use mount::{mount, MountError, MountHandle};
