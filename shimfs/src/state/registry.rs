//! Reference in-memory container registry.

use std::os::unix::fs::MetadataExt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::{Container, ContainerStateService};

/// In-memory [`ContainerStateService`] implementation.
///
/// PIDs explicitly bound with [`ContainerRegistry::add_pid`] resolve to
/// their container; any other live PID is resolved by statting
/// `/proc/<pid>/ns/pid` on the host, so host-namespace callers come back
/// with the host inode.
pub struct ContainerRegistry {
    host_pid_ns: u64,
    containers: DashMap<String, Arc<Container>>,
    pids: DashMap<u32, String>,
}

impl ContainerRegistry {
    /// Create a registry, deriving the host pid-namespace inode from
    /// `/proc/self/ns/pid`.
    pub fn new() -> std::io::Result<Self> {
        let inode = std::fs::metadata("/proc/self/ns/pid")?.ino();
        Ok(Self::with_host_inode(inode))
    }

    /// Create a registry with an explicit host pid-namespace inode.
    pub fn with_host_inode(host_pid_ns: u64) -> Self {
        Self {
            host_pid_ns,
            containers: DashMap::new(),
            pids: DashMap::new(),
        }
    }

    /// Register a container.
    pub fn register(&self, cntr: Arc<Container>) {
        debug!(container = cntr.id(), uid = cntr.uid(), "registering container");
        self.containers.insert(cntr.id().to_string(), cntr);
    }

    /// Remove a container and every pid bound to it.
    pub fn unregister(&self, id: &str) -> Option<Arc<Container>> {
        self.pids.retain(|_, cntr_id| cntr_id.as_str() != id);
        self.containers.remove(id).map(|(_, c)| c)
    }

    /// Bind a caller pid to a registered container.
    pub fn add_pid(&self, pid: u32, cntr_id: impl Into<String>) {
        self.pids.insert(pid, cntr_id.into());
    }

    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.get(id).map(|c| Arc::clone(c.value()))
    }
}

impl ContainerStateService for ContainerRegistry {
    fn lookup_by_pid(&self, pid: u32) -> Option<Arc<Container>> {
        let id = self.pids.get(&pid)?;
        self.get(id.value())
    }

    fn host_pid_ns_inode(&self) -> u64 {
        self.host_pid_ns
    }

    fn find_pid_ns_inode(&self, pid: u32) -> Option<u64> {
        if let Some(cntr) = self.lookup_by_pid(pid) {
            return Some(cntr.pid_ns_inode());
        }
        std::fs::metadata(format!("/proc/{}/ns/pid", pid))
            .ok()
            .map(|m| m.ino())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_container(id: &str, pid_ns: u64) -> Arc<Container> {
        Arc::new(Container::new(id, 165536, 165536, pid_ns, "/var/lib/test"))
    }

    #[test]
    fn test_lookup_by_pid_bound() {
        let registry = ContainerRegistry::with_host_inode(0xAA00);
        registry.register(test_container("c1", 0xBB01));
        registry.add_pid(1001, "c1");

        let cntr = registry.lookup_by_pid(1001).unwrap();
        assert_eq!(cntr.id(), "c1");
    }

    #[test]
    fn test_lookup_by_pid_unbound() {
        let registry = ContainerRegistry::with_host_inode(0xAA00);
        assert!(registry.lookup_by_pid(4242).is_none());
    }

    #[test]
    fn test_find_pid_ns_inode_for_bound_pid() {
        let registry = ContainerRegistry::with_host_inode(0xAA00);
        registry.register(test_container("c1", 0xBB01));
        registry.add_pid(1001, "c1");

        assert_eq!(registry.find_pid_ns_inode(1001), Some(0xBB01));
    }

    #[test]
    fn test_find_pid_ns_inode_for_own_process() {
        let inode = std::fs::metadata("/proc/self/ns/pid").unwrap().ino();
        let registry = ContainerRegistry::with_host_inode(inode);

        let pid = std::process::id();
        assert_eq!(registry.find_pid_ns_inode(pid), Some(inode));
        assert_eq!(registry.host_pid_ns_inode(), inode);
    }

    #[test]
    fn test_unregister_drops_pid_bindings() {
        let registry = ContainerRegistry::with_host_inode(0xAA00);
        registry.register(test_container("c1", 0xBB01));
        registry.add_pid(1001, "c1");
        registry.add_pid(1002, "c1");

        let removed = registry.unregister("c1").unwrap();
        assert_eq!(removed.id(), "c1");
        assert!(registry.lookup_by_pid(1001).is_none());
        assert!(registry.lookup_by_pid(1002).is_none());
    }
}
