//! Where medroute keeps its configuration and session records.
//!
//! Paths are resolved via AppPaths from the version-migrate crate so they
//! agree with AsyncDirStorage on every platform.

use std::path::PathBuf;
use version_migrate::AppPaths;

/// The platform gave no home directory to resolve against.
#[derive(Debug)]
pub enum PathError {
    NoHomeDirectory,
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::NoHomeDirectory => write!(f, "no home directory to place medroute files under"),
        }
    }
}

impl std::error::Error for PathError {}

/// Resolved medroute locations.
///
///
/// ```text
/// ~/.config/medroute/          # Config directory
/// └── config.toml              # Engine configuration
///
/// ~/.local/share/medroute/     # Data directory
/// └── sessions/                # Session records (AsyncDirStorage)
/// ```
pub struct MedroutePaths;

impl MedroutePaths {
    fn app_paths() -> AppPaths {
        AppPaths::new("medroute")
    }

    /// e.g. `~/.config/medroute/`
    pub fn config_dir() -> Result<PathBuf, PathError> {
        Self::app_paths()
            .config_dir()
            .map_err(|_| PathError::NoHomeDirectory)
    }

    /// e.g. `~/.local/share/medroute/`; session records live below it.
    pub fn data_dir() -> Result<PathBuf, PathError> {
        Self::app_paths()
            .data_dir()
            .map_err(|_| PathError::NoHomeDirectory)
    }

    /// `config.toml` inside [`Self::config_dir`].
    pub fn config_file() -> Result<PathBuf, PathError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }
}
