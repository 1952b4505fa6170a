//! Core traits that define the seams of the depotfs engine.
//!
//! [`DepotTransport`] is consumed by the engine: it is the raw channel to the
//! remote depot. [`FileSystem`] is exposed by the engine: it is the abstract
//! operation set the kernel-facing adapter drives.

use crate::error::{DepotError, Result};
use crate::types::{
    ChangelistId, DepotPath, DirectoryEntry, FileAttributes, FsStats, RemoteFile,
};
use bytes::Bytes;

/// The raw transport to a remote depot.
///
/// Implementations block the calling thread. They own any timeout policy;
/// a timeout must be reported as [`DepotError::Timeout`] rather than hanging
/// forever, and the engine treats it like any other transport failure.
pub trait DepotTransport: Send + Sync {
    /// Lists changelists touching `search_path`, most recent first.
    fn list_changelists(&self, search_path: &str) -> std::result::Result<Vec<ChangelistId>, DepotError>;

    /// Lists the files matched by a file spec such as `//depot/main/...@42`.
    fn list_depot_files(&self, file_spec: &str) -> std::result::Result<Vec<RemoteFile>, DepotError>;

    /// Returns the byte length of a depot file.
    fn file_size(&self, file: &RemoteFile) -> std::result::Result<u64, DepotError>;

    /// Returns the full content of a depot file.
    fn file_content(&self, file: &RemoteFile) -> std::result::Result<Bytes, DepotError>;
}

/// The filesystem operation set presented to the kernel-facing adapter.
///
/// Every method is synchronous and safe to call from many threads at once.
/// Failures carry a [`DepotFsError`](crate::error::DepotFsError) whose
/// [`status`](crate::error::DepotFsError::status) is the code to report.
pub trait FileSystem: Send + Sync {
    /// Gets attributes for a file or directory.
    fn get_attributes(&self, path: &DepotPath) -> Result<FileAttributes>;

    /// Lists the immediate children of a directory.
    fn list_directory(&self, path: &DepotPath) -> Result<Vec<DirectoryEntry>>;

    /// Checks that a file can be opened for reading.
    fn open_for_read(&self, path: &DepotPath) -> Result<()>;

    /// Checks that a file can be opened for writing.
    fn open_for_write(&self, path: &DepotPath) -> Result<()>;

    /// Creates a new, empty file in the override tree.
    fn create(&self, path: &DepotPath) -> Result<()>;

    /// Reads up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes at end of file and an empty buffer past it.
    fn read_at(&self, path: &DepotPath, offset: u64, len: usize) -> Result<Bytes>;

    /// Writes `data` at `offset`, promoting depot-backed files first.
    ///
    /// Returns the number of bytes written.
    fn write_at(&self, path: &DepotPath, offset: u64, data: &[u8]) -> Result<usize>;

    /// Sets the length of a local file.
    fn truncate(&self, path: &DepotPath, len: u64) -> Result<()>;

    /// Removes a local file.
    fn unlink(&self, path: &DepotPath) -> Result<()>;

    /// Creates a directory (and any missing parents) in the override tree.
    fn make_directory(&self, path: &DepotPath) -> Result<()>;

    /// Renames a local file or directory.
    fn rename(&self, from: &DepotPath, to: &DepotPath) -> Result<()>;

    /// Returns filesystem-wide statistics.
    fn filesystem_stats(&self) -> Result<FsStats>;
}
