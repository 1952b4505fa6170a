use depotfs_core::{DepotFsError, Status};
use libc::c_int;

/// Maps an engine status onto the errno reported to the kernel.
pub fn status_errno(status: Status) -> c_int {
    match status {
        Status::Ok => 0,
        Status::NotFound => libc::ENOENT,
        Status::AlreadyExists => libc::EEXIST,
        Status::IsADirectory => libc::EISDIR,
        Status::NotADirectory => libc::ENOTDIR,
        Status::IoError => libc::EIO,
        Status::NotSupported => libc::ENOTSUP,
    }
}

/// Errno for a failed engine call.
///
/// Host filesystem failures keep their own errno (a full disk stays
/// `ENOSPC`); everything else goes through [`status_errno`].
pub fn errno_for(err: &DepotFsError) -> c_int {
    match err {
        DepotFsError::LocalIo { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
        other => status_errno(other.status()),
    }
}
