//! Handler contract and dispatch types.
//!
//! Every emulated node (or node family) is owned by a handler implementing
//! the filesystem contract below. Handlers are long-lived singletons shared
//! by all per-container fuse servers and must assume parallel invocation
//! across and within containers; per-container state lives exclusively in
//! the container resource map, never in the handler.

pub mod common;
pub mod cpuinfo;
pub mod meminfo;
pub mod net_ipv4_neigh;
pub mod nf_conntrack_max;
pub mod proc_sys;
mod registry;
mod util;

pub use registry::HandlerService;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::SystemTime;

use crate::errors::{FsError, Result};
use crate::ionode::IONode;
use crate::state::Container;

/// Registry name of the default leaf handler.
pub const COMMON_HANDLER_NAME: &str = "commonHandler";

/// Registry name of the `/proc/sys` aggregator.
pub const PROC_SYS_HANDLER_NAME: &str = "/proc/sys/";

/// Kind of an emulated node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dir,
    File,
}

/// An emulated directory entry advertised by a handler.
#[derive(Debug, Clone, Copy)]
pub struct EmuNode {
    pub kind: NodeKind,
    pub mode: u32,
}

impl EmuNode {
    pub const fn dir(mode: u32) -> Self {
        Self {
            kind: NodeKind::Dir,
            mode,
        }
    }

    pub const fn file(mode: u32) -> Self {
        Self {
            kind: NodeKind::File,
            mode,
        }
    }
}

/// How a handler realizes the subtree it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Content synthesized or reconciled by the handler
    Substitution,
    /// Subtree bind-mounted by the runtime; handler only fills gaps
    BindMount,
    /// Content streamed from the host node
    Passthrough,
}

/// Stat information produced by lookups and directory listings.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    /// Permission bits
    pub mode: u32,
    pub is_dir: bool,
    pub size: u64,
    pub mod_time: SystemTime,
}

impl FileInfo {
    /// Synthesize info for an emulated node, stamped with the current time.
    pub fn emulated(name: impl Into<String>, node: &EmuNode) -> Self {
        Self {
            name: name.into(),
            mode: node.mode,
            is_dir: matches!(node.kind, NodeKind::Dir),
            size: 0,
            mod_time: SystemTime::now(),
        }
    }

    /// Info derived from a host stat.
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::PermissionsExt;

        Self {
            name: name.into(),
            mode: meta.permissions().mode() & 0o7777,
            is_dir: meta.is_dir(),
            size: meta.len(),
            mod_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// Node ownership reported by `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl Ownership {
    /// Ownership reported to callers living in the host pid namespace.
    pub const HOST_ROOT: Ownership = Ownership { uid: 0, gid: 0 };
}

/// Per-callback context synthesized by the fuse server before dispatch.
#[derive(Debug)]
pub struct HandlerRequest {
    /// Kernel request id
    pub id: u64,
    /// Caller pid
    pub pid: u32,
    /// Container resolved for the caller pid; `None` when the pid is
    /// outside every registered container
    pub container: Option<Arc<Container>>,
    pub offset: i64,
    /// Payload buffer: inbound bytes for writes, outbound for reads
    pub data: Vec<u8>,
}

/// Attributes shared by every handler family.
///
/// The registry handle is a non-owning capability installed at
/// registration; handlers reach the container-state service and their
/// sibling handlers through it, never the other way around.
#[derive(Debug)]
pub struct HandlerBase {
    pub name: &'static str,
    pub path: &'static str,
    pub kind: HandlerKind,
    pub enabled: bool,
    pub cacheable: bool,
    pub emu_nodes: HashMap<&'static str, EmuNode>,
    service: OnceLock<Weak<HandlerService>>,
}

impl HandlerBase {
    pub fn new(
        name: &'static str,
        path: &'static str,
        kind: HandlerKind,
        enabled: bool,
        cacheable: bool,
    ) -> Self {
        Self {
            name,
            path,
            kind,
            enabled,
            cacheable,
            emu_nodes: HashMap::new(),
            service: OnceLock::new(),
        }
    }

    /// Attach the emulated-node table advertised by this handler.
    pub fn with_emu_nodes(
        mut self,
        nodes: impl IntoIterator<Item = (&'static str, EmuNode)>,
    ) -> Self {
        self.emu_nodes = nodes.into_iter().collect();
        self
    }

    pub(crate) fn attach_service(&self, service: Weak<HandlerService>) {
        let _ = self.service.set(service);
    }

    /// Registry this handler is registered with.
    pub fn service(&self) -> Result<Arc<HandlerService>> {
        self.service
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| FsError::InitFailure(format!("handler {} has no registry", self.name)))
    }
}

/// The filesystem contract every emulated-node handler implements.
pub trait Handler: Send + Sync {
    /// Shared attribute block.
    fn base(&self) -> &HandlerBase;

    /// Produce stat info for the node, synthesizing it for emulated paths.
    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo>;

    /// Resolve node ownership for the caller.
    fn getattr(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Ownership>;

    /// Enforce the allowed flag set and open the host node if needed.
    fn open(&self, n: &mut IONode, req: &HandlerRequest) -> Result<()>;

    /// Release the host handle, if one was opened.
    fn close(&self, n: &mut IONode) -> Result<()>;

    /// Fill `req.data` with the node payload; returns the payload length.
    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize>;

    /// Apply `req.data` per the resource's reconciliation policy; returns
    /// the number of bytes accepted.
    fn write(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize>;

    /// Children of the current directory: emulated entries first, then
    /// host-visible siblings.
    fn readdirall(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Vec<FileInfo>>;

    fn name(&self) -> &'static str {
        self.base().name
    }

    fn path(&self) -> &'static str {
        self.base().path
    }

    fn kind(&self) -> HandlerKind {
        self.base().kind
    }

    fn enabled(&self) -> bool {
        self.base().enabled
    }

    fn cacheable(&self) -> bool {
        self.base().cacheable
    }
}
