//! Per-container FUSE server.
//!
//! [`EmulatedFs`] adapts kernel callbacks to the handler contract: it
//! resolves inodes back to virtual paths, tags each callback with the
//! caller pid, routes by longest-prefix match, and translates error kinds
//! to errnos. [`FuseServer`] wraps one mounted instance per container and
//! drives its lifecycle.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fuser::{
    BackgroundSession, FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use tracing::{debug, error, warn};

use crate::errors::{FsError, Result};
use crate::handler::{FileInfo, Handler, HandlerRequest, HandlerService, Ownership};
use crate::ionode::{IONode, IOService};

/// Time-to-live for attribute caching.
const TTL: Duration = Duration::from_secs(1);

/// Advertised size for files whose host stat reports zero bytes. Pseudo
/// files stat as empty, and the kernel clamps reads to the advertised
/// size.
const PSEUDO_FILE_SIZE: u64 = 4096;

/// Filesystem adapter dispatching kernel callbacks to the handler registry.
struct EmulatedFs {
    /// Root of the emulated tree; inode 1 resolves here
    root: PathBuf,
    handlers: Arc<HandlerService>,
    ios: Arc<IOService>,
    /// Inode to virtual path mapping
    inode_to_path: Mutex<HashMap<u64, PathBuf>>,
    /// Virtual path to inode mapping
    path_to_inode: Mutex<HashMap<PathBuf, u64>>,
    /// Next available inode
    next_inode: AtomicU64,
    /// Nodes opened by the kernel, keyed by file handle
    open_nodes: Mutex<HashMap<u64, IONode>>,
    next_fh: AtomicU64,
}

impl EmulatedFs {
    fn new(root: PathBuf, ios: Arc<IOService>, handlers: Arc<HandlerService>) -> Self {
        let mut inode_to_path = HashMap::new();
        let mut path_to_inode = HashMap::new();

        // Reserve inode 1 for the emulated root.
        inode_to_path.insert(1, root.clone());
        path_to_inode.insert(root.clone(), 1);

        Self {
            root,
            handlers,
            ios,
            inode_to_path: Mutex::new(inode_to_path),
            path_to_inode: Mutex::new(path_to_inode),
            next_inode: AtomicU64::new(2),
            open_nodes: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Get or create an inode for a virtual path.
    fn get_or_create_inode(&self, path: &Path) -> u64 {
        let mut path_to_inode = self.path_to_inode.lock().unwrap();
        if let Some(&inode) = path_to_inode.get(path) {
            return inode;
        }

        let inode = self.next_inode.fetch_add(1, Ordering::Relaxed);
        path_to_inode.insert(path.to_path_buf(), inode);
        drop(path_to_inode);

        self.inode_to_path
            .lock()
            .unwrap()
            .insert(inode, path.to_path_buf());
        inode
    }

    /// Virtual path for an inode.
    fn get_path(&self, inode: u64) -> Option<PathBuf> {
        self.inode_to_path.lock().unwrap().get(&inode).cloned()
    }

    /// Handler owning the virtual path.
    fn dispatch(&self, path: &Path) -> Result<Arc<dyn Handler>> {
        let key = path.to_string_lossy();
        self.handlers
            .find_by_path(&key)
            .ok_or_else(|| FsError::HandlerNotFound(key.into_owned()))
    }

    /// Synthesize the per-callback context: request id, caller pid, and
    /// the container resolved for that pid (may be none).
    fn new_request(&self, req: &Request<'_>, offset: i64, data: Vec<u8>) -> HandlerRequest {
        let container = self
            .handlers
            .state_service()
            .ok()
            .and_then(|css| css.lookup_by_pid(req.pid()));

        HandlerRequest {
            id: req.unique(),
            pid: req.pid(),
            container,
            offset,
            data,
        }
    }

    fn node_for(&self, path: &Path, flags: i32) -> IONode {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string());
        self.ios.new_io_node(name, path, flags)
    }

    fn attr_for(inode: u64, info: &FileInfo, owner: Ownership) -> FileAttr {
        let kind = if info.is_dir {
            FileType::Directory
        } else {
            FileType::RegularFile
        };
        let size = if info.is_dir {
            0
        } else if info.size == 0 {
            PSEUDO_FILE_SIZE
        } else {
            info.size
        };

        FileAttr {
            ino: inode,
            size,
            blocks: size.div_ceil(512),
            atime: info.mod_time,
            mtime: info.mod_time,
            ctime: info.mod_time,
            crtime: info.mod_time,
            kind,
            perm: (info.mode & 0o7777) as u16,
            nlink: if info.is_dir { 2 } else { 1 },
            uid: owner.uid,
            gid: owner.gid,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Stat a virtual path through its handler, composing the handler's
    /// file info with the ownership it reports for this caller.
    fn stat_path(&self, path: &Path, req: &Request<'_>) -> Result<(FileInfo, Ownership)> {
        let handler = self.dispatch(path)?;
        let hreq = self.new_request(req, 0, Vec::new());
        let mut node = self.node_for(path, libc::O_RDONLY);

        let info = handler.lookup(&mut node, &hreq)?;
        // Ownership is advisory at stat time: callers the state service
        // cannot place yet see host-root ownership.
        let owner = handler
            .getattr(&mut node, &hreq)
            .unwrap_or(Ownership::HOST_ROOT);
        Ok((info, owner))
    }
}

impl Filesystem for EmulatedFs {
    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent, name = ?name, "lookup");

        let parent_path = match self.get_path(parent) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let child_path = parent_path.join(name);

        match self.stat_path(&child_path, req) {
            Ok((info, owner)) => {
                let inode = self.get_or_create_inode(&child_path);
                reply.entry(&TTL, &Self::attr_for(inode, &info, owner), 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        debug!(ino, "getattr");

        let path = match self.get_path(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        match self.stat_path(&path, req) {
            Ok((info, owner)) => reply.attr(&TTL, &Self::attr_for(ino, &info, owner)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");

        let path = match self.get_path(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let handler = match self.dispatch(&path) {
            Ok(h) => h,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let hreq = self.new_request(req, 0, Vec::new());
        let mut node = self.node_for(&path, flags);
        match handler.open(&mut node, &hreq) {
            Ok(()) => {
                let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
                self.open_nodes.lock().unwrap().insert(fh, node);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(ino, fh, "release");

        if let Some(mut node) = self.open_nodes.lock().unwrap().remove(&fh) {
            if let Some(path) = self.get_path(ino) {
                if let Ok(handler) = self.dispatch(&path) {
                    if let Err(e) = handler.close(&mut node) {
                        warn!(path = %path.display(), error = %e, "close failed");
                    }
                }
            }
        }
        reply.ok();
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino, fh, offset, size, "read");

        let path = match self.get_path(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let handler = match self.dispatch(&path) {
            Ok(h) => h,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut node = self
            .open_nodes
            .lock()
            .unwrap()
            .remove(&fh)
            .unwrap_or_else(|| self.node_for(&path, libc::O_RDONLY));

        let mut hreq = self.new_request(req, offset, Vec::new());
        match handler.read(&mut node, &mut hreq) {
            Ok(len) => {
                let end = len.min(size as usize);
                reply.data(&hreq.data[..end]);
            }
            // Reads past the emulated payload are a clean end-of-file.
            Err(FsError::EndOfFile) => reply.data(&[]),
            Err(e) => {
                error!(path = %path.display(), error = %e, "read failed");
                reply.error(e.errno());
            }
        }

        self.open_nodes.lock().unwrap().insert(fh, node);
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, fh, offset, len = data.len(), "write");

        let path = match self.get_path(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let handler = match self.dispatch(&path) {
            Ok(h) => h,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let mut node = self
            .open_nodes
            .lock()
            .unwrap()
            .remove(&fh)
            .unwrap_or_else(|| self.node_for(&path, libc::O_RDWR));

        let mut hreq = self.new_request(req, offset, data.to_vec());
        match handler.write(&mut node, &mut hreq) {
            Ok(len) => reply.written(len as u32),
            Err(e) => {
                error!(path = %path.display(), error = %e, "write failed");
                reply.error(e.errno());
            }
        }

        self.open_nodes.lock().unwrap().insert(fh, node);
    }

    fn readdir(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, "readdir");

        let path = match self.get_path(ino) {
            Some(p) => p,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        let handler = match self.dispatch(&path) {
            Ok(h) => h,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let hreq = self.new_request(req, 0, Vec::new());
        let mut node = self.node_for(&path, libc::O_RDONLY);
        let children = match handler.readdirall(&mut node, &hreq) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        let parent_inode = if path == self.root {
            ino
        } else {
            path.parent()
                .and_then(|p| self.path_to_inode.lock().unwrap().get(p).copied())
                .unwrap_or(1)
        };

        let mut entries: Vec<(u64, FileType, String)> = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((parent_inode, FileType::Directory, "..".to_string()));
        for child in children {
            let child_path = path.join(&child.name);
            let child_inode = self.get_or_create_inode(&child_path);
            let kind = if child.is_dir {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            entries.push((child_inode, kind, child.name));
        }

        for (i, (inode, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            // reply.add returns true when the buffer is full
            if reply.add(inode, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }
}

/// Lifecycle states of a [`FuseServer`]. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Initialized,
    Running,
    Destroyed,
}

/// One mounted filesystem instance serving a single container.
pub struct FuseServer {
    cntr_id: String,
    emulated_path: PathBuf,
    mountpoint: PathBuf,
    ios: Arc<IOService>,
    handlers: Arc<HandlerService>,
    state: Mutex<ServerState>,
    session: Mutex<Option<BackgroundSession>>,
}

impl FuseServer {
    pub fn new(
        cntr_id: impl Into<String>,
        emulated_path: impl Into<PathBuf>,
        mountpoint: impl Into<PathBuf>,
        ios: Arc<IOService>,
        handlers: Arc<HandlerService>,
    ) -> Self {
        Self {
            cntr_id: cntr_id.into(),
            emulated_path: emulated_path.into(),
            mountpoint: mountpoint.into(),
            ios,
            handlers,
            state: Mutex::new(ServerState::Created),
            session: Mutex::new(None),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.cntr_id
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock().unwrap()
    }

    /// Validate the mountpoint and make the server mountable.
    pub fn init(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != ServerState::Created {
            return Err(FsError::InitFailure(format!(
                "server for container {} is {:?}, expected Created",
                self.cntr_id, *state
            )));
        }

        if !self.mountpoint.is_dir() {
            return Err(FsError::InvalidMountpoint(
                self.mountpoint.display().to_string(),
            ));
        }

        *state = ServerState::Initialized;
        Ok(())
    }

    /// Mount and start serving kernel callbacks on a dedicated session
    /// thread.
    pub fn run(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != ServerState::Initialized {
            return Err(FsError::InitFailure(format!(
                "server for container {} is {:?}, expected Initialized",
                self.cntr_id, *state
            )));
        }

        let fs = EmulatedFs::new(
            self.emulated_path.clone(),
            Arc::clone(&self.ios),
            Arc::clone(&self.handlers),
        );
        let session = fuser::spawn_mount2(fs, &self.mountpoint, &[]).map_err(|e| {
            FsError::InitFailure(format!(
                "mount at {} failed: {}",
                self.mountpoint.display(),
                e
            ))
        })?;

        *self.session.lock().unwrap() = Some(session);
        *state = ServerState::Running;
        debug!(container = %self.cntr_id, mountpoint = %self.mountpoint.display(), "fuse server running");
        Ok(())
    }

    /// Unmount and release the kernel session. Idempotent.
    pub fn destroy(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ServerState::Destroyed {
                return Ok(());
            }
            *state = ServerState::Destroyed;
        }

        if let Some(session) = self.session.lock().unwrap().take() {
            session.join();
        }
        debug!(container = %self.cntr_id, "fuse server destroyed");
        Ok(())
    }
}
