//! Operation and cache statistics for a running engine.

use crate::cache::CacheStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

const OPERATION_COUNT: usize = 11;

/// Types of operations that are tracked for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum OperationType {
    GetAttributes,
    ListDirectory,
    Open,
    Create,
    Read,
    Write,
    Truncate,
    Unlink,
    MakeDirectory,
    Rename,
    Statfs,
}

impl OperationType {
    pub const ALL: [OperationType; OPERATION_COUNT] = [
        OperationType::GetAttributes,
        OperationType::ListDirectory,
        OperationType::Open,
        OperationType::Create,
        OperationType::Read,
        OperationType::Write,
        OperationType::Truncate,
        OperationType::Unlink,
        OperationType::MakeDirectory,
        OperationType::Rename,
        OperationType::Statfs,
    ];

    /// Returns a human-readable name for the operation type.
    pub fn name(&self) -> &'static str {
        match self {
            OperationType::GetAttributes => "getattr",
            OperationType::ListDirectory => "readdir",
            OperationType::Open => "open",
            OperationType::Create => "create",
            OperationType::Read => "read",
            OperationType::Write => "write",
            OperationType::Truncate => "truncate",
            OperationType::Unlink => "unlink",
            OperationType::MakeDirectory => "mkdir",
            OperationType::Rename => "rename",
            OperationType::Statfs => "statfs",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Lock-free counters updated by every dispatched operation.
#[derive(Debug, Default)]
pub struct EngineStats {
    operations: [AtomicU64; OPERATION_COUNT],
    failures: [AtomicU64; OPERATION_COUNT],
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    promotions: AtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_operation(&self, operation: OperationType, succeeded: bool) {
        self.operations[operation.index()].fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.failures[operation.index()].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_count(&self, operation: OperationType) -> u64 {
        self.operations[operation.index()].load(Ordering::Relaxed)
    }

    pub fn failure_count(&self, operation: OperationType) -> u64 {
        self.failures[operation.index()].load(Ordering::Relaxed)
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    /// Captures the counters together with the caches' hit rates.
    pub fn snapshot(&self, caches: CacheReport) -> StatsSnapshot {
        let mut operations = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for operation in OperationType::ALL {
            let count = self.operation_count(operation);
            if count > 0 {
                operations.insert(operation.name(), count);
            }
            let failed = self.failure_count(operation);
            if failed > 0 {
                failures.insert(operation.name(), failed);
            }
        }

        StatsSnapshot {
            operations,
            failures,
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            promotions: self.promotions(),
            caches,
        }
    }
}

/// Hit/miss figures for each engine cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    pub snapshots: CacheStats,
    pub contents: CacheStats,
    pub sizes: CacheStats,
}

/// Point-in-time view of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub operations: BTreeMap<&'static str, u64>,
    pub failures: BTreeMap<&'static str, u64>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub promotions: u64,
    pub caches: CacheReport,
}
