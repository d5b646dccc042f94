//! Thin abstraction over host pseudo-files.
//!
//! Handlers never touch the host filesystem directly: each kernel callback
//! hands them an [`IONode`] wrapping the real `/proc` or `/sys` path backing
//! the request. Nodes are created per request, so the only mutable state a
//! handler sees (the open handle, its flags, the path) is request-local
//! and the handlers themselves stay re-entrant.

use std::fs::{File, Metadata, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::{FsError, Result};

/// A host pseudo-file: path, open flags, and an optional open handle.
///
/// The handle is opened lazily on first I/O if the handler did not open it
/// explicitly, using whatever access mode the flags carry at that point.
#[derive(Debug)]
pub struct IONode {
    name: String,
    path: PathBuf,
    open_flags: i32,
    file: Option<File>,
}

impl IONode {
    /// Create a node for `path` with the given open flags (`libc::O_*`).
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, open_flags: i32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            open_flags,
            file: None,
        }
    }

    /// Last component name of the wrapped node.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host path backing this node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Redirect the node to a different host path.
    ///
    /// Any open handle refers to the old path and is dropped.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
        self.file = None;
    }

    /// Open flags the node will be (or was) opened with.
    pub fn open_flags(&self) -> i32 {
        self.open_flags
    }

    pub fn set_open_flags(&mut self, open_flags: i32) {
        self.open_flags = open_flags;
    }

    /// Parent directory of the wrapped path, keyed into the per-container
    /// resource map together with [`IONode::name`].
    pub fn dir(&self) -> String {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.display().to_string(),
            _ => "/".to_string(),
        }
    }

    /// Stat the host node.
    pub fn stat(&self) -> Result<Metadata> {
        Ok(std::fs::metadata(&self.path)?)
    }

    /// Open the host node with the current flags.
    pub fn open(&mut self) -> Result<()> {
        let mut opts = OpenOptions::new();
        match self.open_flags & libc::O_ACCMODE {
            libc::O_RDONLY => opts.read(true),
            libc::O_WRONLY => opts.write(true),
            libc::O_RDWR => opts.read(true).write(true),
            _ => return Err(FsError::OpenDenied(self.open_flags)),
        };
        self.file = Some(opts.open(&self.path)?);
        Ok(())
    }

    /// Release the host handle, if one was opened.
    pub fn close(&mut self) -> Result<()> {
        self.file = None;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            self.open()?;
        }
        match self.file {
            Some(ref mut f) => Ok(f),
            None => Err(FsError::Io(std::io::Error::other("node not open"))),
        }
    }

    /// Read up to the first newline (or EOF) and return the trimmed text.
    ///
    /// Content that fails to match the expected value grammar is returned
    /// unchanged; the caller decides. Zero bytes read is [`FsError::EndOfFile`].
    pub fn read_line(&mut self) -> Result<String> {
        let file = self.file_mut()?;
        let mut raw = Vec::with_capacity(64);
        let mut chunk = [0u8; 256];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                raw.extend_from_slice(&chunk[..pos]);
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
        }
        if raw.is_empty() {
            return Err(FsError::EndOfFile);
        }
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Write raw bytes at the current offset.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let file = self.file_mut()?;
        let written = file.write(data)?;
        file.flush()?;
        Ok(written)
    }

    /// Rewind the node offset back to its start point.
    pub fn seek_reset(&mut self) -> Result<u64> {
        Ok(self.file_mut()?.seek(SeekFrom::Start(0))?)
    }

    /// Seek to an absolute offset.
    pub fn seek_to(&mut self, offset: i64) -> Result<u64> {
        let offset = offset.max(0) as u64;
        Ok(self.file_mut()?.seek(SeekFrom::Start(offset))?)
    }

    /// Stream the remainder of the node.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.file_mut()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Factory for [`IONode`]s plus the streaming helper shared by the
/// passthrough handlers.
#[derive(Debug, Default)]
pub struct IOService;

impl IOService {
    pub fn new() -> Self {
        Self
    }

    /// Create a node for a host pseudo-file.
    pub fn new_io_node(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        open_flags: i32,
    ) -> IONode {
        IONode::new(name, path, open_flags)
    }

    /// Open-if-needed, seek to `offset`, and stream the rest of the node.
    pub fn read_node(&self, n: &mut IONode, offset: i64) -> Result<Vec<u8>> {
        n.seek_to(offset)?;
        n.read_to_end()
    }
}
