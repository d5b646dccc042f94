//! Daemon configuration.
//!
//! Groups the two path parameters every component derives its layout from:
//! the base directory holding per-container mountpoints and the filesystem
//! path emulated inside each mount.

use std::path::{Path, PathBuf};

/// Default base directory for per-container mountpoints.
pub const DEFAULT_BASE_MOUNT: &str = "/var/lib/sysboxfs";

/// Default filesystem path emulated inside each mount.
pub const DEFAULT_EMULATED_PATH: &str = "/";

/// Configuration for the fuse server service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory under which each container's mountpoint is created
    base_mount: PathBuf,
    /// Root of the emulated tree exposed through each mount
    emulated_path: PathBuf,
}

impl Config {
    /// Create a configuration with the default paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base mountpoint directory.
    pub fn with_base_mount(mut self, base_mount: impl Into<PathBuf>) -> Self {
        self.base_mount = base_mount.into();
        self
    }

    /// Set the emulated root path.
    pub fn with_emulated_path(mut self, emulated_path: impl Into<PathBuf>) -> Self {
        self.emulated_path = emulated_path.into();
        self
    }

    /// Base directory for per-container mountpoints.
    pub fn base_mount(&self) -> &Path {
        &self.base_mount
    }

    /// Root of the emulated tree.
    pub fn emulated_path(&self) -> &Path {
        &self.emulated_path
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_mount: PathBuf::from(DEFAULT_BASE_MOUNT),
            emulated_path: PathBuf::from(DEFAULT_EMULATED_PATH),
        }
    }
}
