use super::FileSpec;
use crate::error::DepotError;
use crate::traits::DepotTransport;
use crate::types::{ChangelistId, RemoteFile};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Serves a directory on disk as a read-only depot at a single changelist.
///
/// The file `<directory>/main/a.txt` appears as `<depot_root>/main/a.txt`.
#[derive(Debug, Clone)]
pub struct MirrorDepot {
    directory: PathBuf,
    depot_root: String,
    changelist: ChangelistId,
}

impl MirrorDepot {
    pub fn new(directory: impl Into<PathBuf>, depot_root: &str, changelist: ChangelistId) -> Self {
        Self {
            directory: directory.into(),
            depot_root: depot_root.trim_end_matches('/').to_string(),
            changelist,
        }
    }

    fn local_path(&self, file: &RemoteFile) -> Result<PathBuf, DepotError> {
        let relative = file
            .depot_path()
            .strip_prefix(self.depot_root.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| DepotError::NotFound(file.depot_path().to_string()))?;

        let mut local = self.directory.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(DepotError::Rejected {
                    request: file.depot_path().to_string(),
                    message: "path escapes the mirror root".to_string(),
                });
            }
            local.push(segment);
        }
        Ok(local)
    }

    fn depot_path(&self, local: &Path) -> Option<String> {
        let relative = local.strip_prefix(&self.directory).ok()?;
        let mut depot_path = self.depot_root.clone();
        for component in relative.components() {
            depot_path.push('/');
            depot_path.push_str(component.as_os_str().to_str()?);
        }
        Some(depot_path)
    }
}

fn transport_error(request: &str, err: io::Error) -> DepotError {
    match err.kind() {
        io::ErrorKind::NotFound => DepotError::NotFound(request.to_string()),
        _ => DepotError::Unreachable(format!("{request}: {err}")),
    }
}

impl DepotTransport for MirrorDepot {
    fn list_changelists(&self, _search_path: &str) -> Result<Vec<ChangelistId>, DepotError> {
        Ok(vec![self.changelist])
    }

    fn list_depot_files(&self, file_spec: &str) -> Result<Vec<RemoteFile>, DepotError> {
        let spec = FileSpec::parse(file_spec);
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.directory).follow_links(true) {
            let entry = entry.map_err(|err| {
                DepotError::Unreachable(format!("{file_spec}: {err}"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.depot_path(entry.path()) {
                Some(depot_path) if spec.matches(&depot_path) => {
                    files.push(RemoteFile::new(depot_path));
                }
                Some(_) => {}
                None => debug!(path = ?entry.path(), "skipping non UTF-8 mirror path"),
            }
        }

        Ok(files)
    }

    fn file_size(&self, file: &RemoteFile) -> Result<u64, DepotError> {
        let local = self.local_path(file)?;
        std::fs::metadata(&local)
            .map(|metadata| metadata.len())
            .map_err(|err| transport_error(file.depot_path(), err))
    }

    fn file_content(&self, file: &RemoteFile) -> Result<Bytes, DepotError> {
        let local = self.local_path(file)?;
        std::fs::read(&local)
            .map(Bytes::from)
            .map_err(|err| transport_error(file.depot_path(), err))
    }
}
