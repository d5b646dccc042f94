//! Container identity and per-container resource state.

mod registry;

pub use registry::ContainerRegistry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// A registered system container as seen by the handlers.
///
/// The resource map is the container's private view of every emulated node
/// it has read or written: keys are `(virtual_dir, virtual_file)`, values
/// the last observed payload. It doubles as a write-through cache and as
/// the backing store for nodes with no host counterpart, and it is
/// fate-shared with the container. Handlers mutate it only while serving
/// requests on behalf of this container.
#[derive(Debug)]
pub struct Container {
    id: String,
    uid: u32,
    gid: u32,
    pid_ns_inode: u64,
    rootfs: PathBuf,
    data: DashMap<(String, String), String>,
}

impl Container {
    pub fn new(
        id: impl Into<String>,
        uid: u32,
        gid: u32,
        pid_ns_inode: u64,
        rootfs: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            uid,
            gid,
            pid_ns_inode,
            rootfs: rootfs.into(),
            data: DashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Inode of the container's pid namespace.
    pub fn pid_ns_inode(&self) -> u64 {
        self.pid_ns_inode
    }

    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    /// Last value this container observed for `(dir, file)`, if any.
    pub fn data_get(&self, dir: &str, file: &str) -> Option<String> {
        self.data
            .get(&(dir.to_string(), file.to_string()))
            .map(|v| v.value().clone())
    }

    /// Record the value this container should keep observing for `(dir, file)`.
    pub fn data_set(&self, dir: &str, file: &str, value: impl Into<String>) {
        self.data
            .insert((dir.to_string(), file.to_string()), value.into());
    }
}

/// Interface to the upstream container-state discovery service.
///
/// The service maps caller PIDs to registered containers and resolves
/// pid-namespace inodes, which is how host-origin callers are told apart
/// from container-origin ones. Production deployments inject the runtime's
/// own implementation; [`ContainerRegistry`] is the in-memory reference.
pub trait ContainerStateService: Send + Sync {
    /// Container holding the process `pid`, if any is registered.
    fn lookup_by_pid(&self, pid: u32) -> Option<Arc<Container>>;

    /// Inode of the host's own pid namespace.
    fn host_pid_ns_inode(&self) -> u64;

    /// Inode of the pid namespace `pid` lives in.
    fn find_pid_ns_inode(&self, pid: u32) -> Option<u64>;
}
