//! Configuration types for depotfs.

use super::entry::ChangelistId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Log level for the depotfs process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only log errors
    Error,
    /// Log errors and warnings
    Warn,
    /// Log errors, warnings, and informational messages
    Info,
    /// Log errors, warnings, info, and debug messages
    Debug,
    /// Log everything including trace-level details
    Trace,
}

impl LogLevel {
    /// Returns the string representation of the log level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Settings consumed by the overlay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Depot search root, e.g. `//depot/main/...`
    pub search_root: String,

    /// Writable directory that shadows the depot
    pub override_root: PathBuf,

    /// Pins the changelist instead of asking the depot for the latest one
    pub changelist: Option<ChangelistId>,

    /// Number of (search root, changelist) listings kept in memory
    pub snapshot_cache_capacity: usize,

    /// Permission bits reported for files
    pub file_mode: u32,

    /// Permission bits reported for directories
    pub directory_mode: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_root: String::new(),
            override_root: PathBuf::new(),
            changelist: None,
            snapshot_cache_capacity: 16,
            file_mode: 0o777,
            directory_mode: 0o777,
        }
    }
}

impl EngineConfig {
    pub fn new(search_root: impl Into<String>, override_root: impl Into<PathBuf>) -> Self {
        Self {
            search_root: search_root.into(),
            override_root: override_root.into(),
            ..Self::default()
        }
    }

    /// Pins the changelist, skipping the depot lookup.
    pub fn with_changelist(mut self, changelist: ChangelistId) -> Self {
        self.changelist = Some(changelist);
        self
    }

    pub fn with_snapshot_cache_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_cache_capacity = capacity;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.search_root.is_empty() {
            errors.push("search_root must not be empty".to_string());
        } else if !self.search_root.starts_with("//") {
            errors.push(format!(
                "search_root must be a depot path starting with '//': {}",
                self.search_root
            ));
        }

        if self.override_root.as_os_str().is_empty() {
            errors.push("override_root must not be empty".to_string());
        } else if !self.override_root.is_dir() {
            errors.push(format!(
                "override_root is not a directory: {:?}",
                self.override_root
            ));
        }

        if self.snapshot_cache_capacity == 0 {
            errors.push("snapshot_cache_capacity must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Mount-point settings for the kernel-facing adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSettings {
    pub mountpoint: Option<PathBuf>,
    pub fs_name: String,
    pub auto_unmount: bool,
    pub allow_other: bool,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            mountpoint: None,
            fs_name: "depotfs".to_string(),
            auto_unmount: true,
            allow_other: false,
        }
    }
}

/// Settings for serving a local directory as the depot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSettings {
    pub directory: Option<PathBuf>,
    pub depot_root: String,
    pub changelist: ChangelistId,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            directory: None,
            depot_root: "//depot".to_string(),
            changelist: 1,
        }
    }
}

/// The on-disk configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotFsConfig {
    pub log_level: LogLevel,
    pub engine: EngineConfig,
    pub mount: MountSettings,
    pub mirror: MirrorSettings,
}

impl Default for DepotFsConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            engine: EngineConfig::default(),
            mount: MountSettings::default(),
            mirror: MirrorSettings::default(),
        }
    }
}

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl DepotFsConfig {
    /// Loads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Info < LogLevel::Trace);
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.snapshot_cache_capacity, 16);
        assert_eq!(config.file_mode, 0o777);
        assert!(config.changelist.is_none());
    }

    #[test]
    fn test_engine_config_validate() {
        let dir = tempfile::tempdir().unwrap();

        let config = EngineConfig::new("//depot/main/...", dir.path());
        assert!(config.validate().is_ok());

        let errors = EngineConfig::new("depot/main", dir.path().join("missing"))
            .with_snapshot_cache_capacity(0)
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("starting with '//'"));
        assert!(errors[1].contains("not a directory"));
        assert!(errors[2].contains("at least 1"));
    }

    #[test]
    fn test_config_from_toml() {
        let config = DepotFsConfig::from_toml(
            r#"
            log_level = "debug"

            [engine]
            search_root = "//depot/main/..."
            override_root = "/srv/overrides"
            changelist = 1234

            [mount]
            mountpoint = "/mnt/depot"

            [mirror]
            directory = "/srv/export"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.engine.search_root, "//depot/main/...");
        assert_eq!(config.engine.changelist, Some(1234));
        assert_eq!(config.engine.snapshot_cache_capacity, 16);
        assert_eq!(config.mount.mountpoint, Some(PathBuf::from("/mnt/depot")));
        assert_eq!(config.mount.fs_name, "depotfs");
        assert_eq!(config.mirror.depot_root, "//depot");
    }

    #[test]
    fn test_config_load_missing_file() {
        let err = DepotFsConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
