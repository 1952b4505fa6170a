use super::FileSpec;
use crate::error::DepotError;
use crate::traits::DepotTransport;
use crate::types::{ChangelistId, RemoteFile};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Number of calls a [`MemoryDepot`] has served, per transport method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepotCalls {
    pub list_changelists: u64,
    pub list_depot_files: u64,
    pub file_size: u64,
    pub file_content: u64,
}

#[derive(Debug, Default)]
struct CallCounters {
    list_changelists: AtomicU64,
    list_depot_files: AtomicU64,
    file_size: AtomicU64,
    file_content: AtomicU64,
}

/// An in-memory depot.
///
/// Counts every call and can be told to fail or stall, which makes it the
/// transport of choice for exercising cache and promotion behavior.
#[derive(Debug)]
pub struct MemoryDepot {
    files: BTreeMap<String, Bytes>,
    changelists: Vec<ChangelistId>,
    latency: Duration,
    calls: CallCounters,
    pending_failures: Mutex<VecDeque<DepotError>>,
    content_failures: Mutex<HashMap<String, DepotError>>,
}

impl MemoryDepot {
    pub fn builder() -> MemoryDepotBuilder {
        MemoryDepotBuilder::default()
    }

    pub fn calls(&self) -> DepotCalls {
        DepotCalls {
            list_changelists: self.calls.list_changelists.load(Ordering::SeqCst),
            list_depot_files: self.calls.list_depot_files.load(Ordering::SeqCst),
            file_size: self.calls.file_size.load(Ordering::SeqCst),
            file_content: self.calls.file_content.load(Ordering::SeqCst),
        }
    }

    /// Makes the next transport call, whichever it is, fail with `error`.
    pub fn fail_next(&self, error: DepotError) {
        self.pending_failures.lock().push_back(error);
    }

    /// Makes every content fetch of `depot_path` fail until cleared.
    pub fn fail_content(&self, depot_path: impl Into<String>, error: DepotError) {
        self.content_failures.lock().insert(depot_path.into(), error);
    }

    pub fn clear_failures(&self) {
        self.pending_failures.lock().clear();
        self.content_failures.lock().clear();
    }

    fn begin(&self, counter: &AtomicU64) -> Result<(), DepotError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        match self.pending_failures.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn lookup(&self, file: &RemoteFile) -> Result<&Bytes, DepotError> {
        self.files
            .get(file.depot_path())
            .ok_or_else(|| DepotError::NotFound(file.depot_path().to_string()))
    }
}

impl DepotTransport for MemoryDepot {
    fn list_changelists(&self, _search_path: &str) -> Result<Vec<ChangelistId>, DepotError> {
        self.begin(&self.calls.list_changelists)?;
        Ok(self.changelists.clone())
    }

    fn list_depot_files(&self, file_spec: &str) -> Result<Vec<RemoteFile>, DepotError> {
        self.begin(&self.calls.list_depot_files)?;
        let spec = FileSpec::parse(file_spec);
        Ok(self
            .files
            .keys()
            .filter(|path| spec.matches(path))
            .map(|path| RemoteFile::new(path.as_str()))
            .collect())
    }

    fn file_size(&self, file: &RemoteFile) -> Result<u64, DepotError> {
        self.begin(&self.calls.file_size)?;
        Ok(self.lookup(file)?.len() as u64)
    }

    fn file_content(&self, file: &RemoteFile) -> Result<Bytes, DepotError> {
        self.begin(&self.calls.file_content)?;
        if let Some(error) = self.content_failures.lock().get(file.depot_path()) {
            return Err(error.clone());
        }
        Ok(self.lookup(file)?.clone())
    }
}

/// Builder for [`MemoryDepot`].
#[derive(Debug, Default)]
pub struct MemoryDepotBuilder {
    files: BTreeMap<String, Bytes>,
    changelists: Vec<ChangelistId>,
    latency: Duration,
}

impl MemoryDepotBuilder {
    /// Adds a file at a depot path such as `//depot/main/a.txt`.
    pub fn file(mut self, depot_path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        self.files.insert(depot_path.into(), content.into());
        self
    }

    /// Adds a changelist. Later calls are more recent.
    pub fn changelist(mut self, id: ChangelistId) -> Self {
        self.changelists.insert(0, id);
        self
    }

    /// Delays every call, to widen race windows in tests.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn build(self) -> MemoryDepot {
        MemoryDepot {
            files: self.files,
            changelists: self.changelists,
            latency: self.latency,
            calls: CallCounters::default(),
            pending_failures: Mutex::new(VecDeque::new()),
            content_failures: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_depot_serves_files() {
        let depot = MemoryDepot::builder()
            .changelist(1)
            .changelist(2)
            .file("//depot/a.txt", "hello")
            .file("//other/b.txt", "nope")
            .build();

        assert_eq!(depot.list_changelists("//depot/...").unwrap(), vec![2, 1]);

        let files = depot.list_depot_files("//depot/...@2").unwrap();
        assert_eq!(files, vec![RemoteFile::new("//depot/a.txt")]);

        assert_eq!(depot.file_size(&files[0]).unwrap(), 5);
        assert_eq!(depot.file_content(&files[0]).unwrap(), Bytes::from("hello"));
        assert_eq!(
            depot.calls(),
            DepotCalls {
                list_changelists: 1,
                list_depot_files: 1,
                file_size: 1,
                file_content: 1
            }
        );
    }

    #[test]
    fn test_memory_depot_failures() {
        let depot = MemoryDepot::builder().file("//depot/a.txt", "x").build();
        let file = RemoteFile::new("//depot/a.txt");

        depot.fail_next(DepotError::Unreachable("down".into()));
        assert!(depot.file_size(&file).is_err());
        assert!(depot.file_size(&file).is_ok());

        depot.fail_content("//depot/a.txt", DepotError::Unreachable("down".into()));
        assert!(depot.file_content(&file).is_err());
        assert!(depot.file_content(&file).is_err());
        depot.clear_failures();
        assert!(depot.file_content(&file).is_ok());

        assert!(matches!(
            depot.file_content(&RemoteFile::new("//depot/missing")),
            Err(DepotError::NotFound(_))
        ));
    }
}
