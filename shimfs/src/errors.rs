//! Error kinds shared across the handler and FUSE layers.

use std::io;

use thiserror::Error;

/// Result type for filesystem-emulation operations.
pub type Result<T> = std::result::Result<T, FsError>;

/// Errors that can occur while serving emulated nodes.
#[derive(Debug, Error)]
pub enum FsError {
    /// A fuse server already exists for this container id
    #[error("fuse server already present for container {0}")]
    AlreadyPresent(String),

    /// Mountpoint directory could not be created or does not exist
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),

    /// Fuse server could not be initialized or mounted
    #[error("fuse server initialization failed: {0}")]
    InitFailure(String),

    /// The caller pid does not belong to any registered container
    #[error("no container registered for pid {0}")]
    ContainerNotFound(u32),

    /// The caller's pid-namespace inode could not be resolved
    #[error("could not identify pid-namespace inode for pid {0}")]
    PidNsInodeUnknown(u32),

    /// No handler owns the requested virtual path or name
    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    /// Open flags outside the allowed set for this node
    #[error("open flags {0:#x} not allowed on this node")]
    OpenDenied(i32),

    /// Host filesystem I/O failure
    #[error("host i/o failure: {0}")]
    Io(#[from] io::Error),

    /// Host node content did not match the expected value grammar
    #[error("unexpected content in {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// Read past the end of an emulated value
    #[error("end of file")]
    EndOfFile,
}

impl FsError {
    /// Errno equivalent returned to the kernel by the FUSE layer.
    ///
    /// `EndOfFile` never reaches this mapping: reads answer it with an
    /// empty payload first.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::OpenDenied(_) => libc::EACCES,
            FsError::HandlerNotFound(_) | FsError::InvalidMountpoint(_) => libc::ENOENT,
            FsError::Io(e) if e.kind() == io::ErrorKind::NotFound => libc::ENOENT,
            _ => libc::EIO,
        }
    }
}
