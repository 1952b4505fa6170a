// Module declarations
pub mod path;
pub mod entry;
pub mod metadata;
pub mod config;

// Re-export all types from submodules
pub use path::DepotPath;
pub use entry::{ChangelistId, Entry, LocalEntry, RemoteFile};
pub use metadata::{DirectoryEntry, FileAttributes, FileKind, FsStats};
pub use config::{ConfigError, DepotFsConfig, EngineConfig, LogLevel, MirrorSettings, MountSettings};
