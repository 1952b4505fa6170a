use crate::fuse::{DepotFuse, FuseOptions};
use depotfs_core::traits::FileSystem;
use depotfs_core::types::MountSettings;
use fuser::{BackgroundSession, MountOption};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors raised while mounting.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("Mount point does not exist or is not a directory: {path}")]
    InvalidMountPoint { path: PathBuf },

    #[error("Failed to mount at {path}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A live mount. Dropping it unmounts.
pub struct MountHandle {
    mountpoint: PathBuf,
    session: BackgroundSession,
}

impl MountHandle {
    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Unmounts and waits for the session thread to finish.
    pub fn unmount(self) {
        info!(mountpoint = %self.mountpoint.display(), "unmounting");
        self.session.join();
    }
}

pub(crate) fn mount_options(settings: &MountSettings) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(settings.fs_name.clone()),
        MountOption::Subtype("depotfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if settings.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if settings.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

/// Mounts `fs` at `mountpoint` and serves it from a background thread.
pub fn mount<F: FileSystem + 'static>(
    fs: Arc<F>,
    mountpoint: &Path,
    settings: &MountSettings,
    options: FuseOptions,
) -> Result<MountHandle, MountError> {
    if !mountpoint.is_dir() {
        return Err(MountError::InvalidMountPoint {
            path: mountpoint.to_path_buf(),
        });
    }

    let session = fuser::spawn_mount2(DepotFuse::new(fs, options), mountpoint, &mount_options(settings))
        .map_err(|source| MountError::Mount {
            path: mountpoint.to_path_buf(),
            source,
        })?;

    info!(mountpoint = %mountpoint.display(), fs_name = %settings.fs_name, "mounted");
    Ok(MountHandle {
        mountpoint: mountpoint.to_path_buf(),
        session,
    })
}
