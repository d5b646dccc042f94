//! Substitution handler for the `/proc/sys/net/ipv4/neigh` subtree.
//!
//! The `default/gc_thresh{1,2,3}` family is emulated: the nodes are
//! synthesized for lookups and listings, while their values reconcile
//! against the host like any other shared kernel ceiling. Everything else
//! under `neigh` is delegated to the `/proc/sys` aggregator.

use std::path::Path;

use tracing::debug;

use crate::errors::{FsError, Result};
use crate::ionode::IONode;

use super::{
    util, EmuNode, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership,
    PROC_SYS_HANDLER_NAME,
};

/// Fallback node used when the neigh subtree is not exposed in the test
/// environment. Present on any host with a loopback interface.
const TEST_FALLBACK_NODE: &str = "/proc/sys/net/ipv4/neigh/lo/retrans_time";

pub struct ProcSysNetIpv4NeighHandler {
    base: HandlerBase,
}

impl ProcSysNetIpv4NeighHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(
                "procSysNetIpv4Neigh",
                "/proc/sys/net/ipv4/neigh",
                HandlerKind::Substitution,
                true,
                true,
            )
            .with_emu_nodes([
                ("default", EmuNode::dir(0o555)),
                ("default/gc_thresh1", EmuNode::file(0o644)),
                ("default/gc_thresh2", EmuNode::file(0o644)),
                ("default/gc_thresh3", EmuNode::file(0o644)),
            ]),
        }
    }

    /// Node path relative to the handler root, `.` for the root itself.
    /// `None` when the node lies outside the subtree.
    fn rel_path(&self, n: &IONode) -> Option<String> {
        let rel = n.path().strip_prefix(self.base.path).ok()?;
        if rel.as_os_str().is_empty() {
            return Some(".".to_string());
        }
        Some(rel.to_string_lossy().into_owned())
    }

    /// Parent of an emulated-node key, normalized the way [`rel_path`]
    /// reports the handler root.
    fn parent_of(key: &str) -> String {
        match Path::new(key).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().into_owned(),
            _ => ".".to_string(),
        }
    }

    fn redirect_for_tests(&self, n: &mut IONode) -> Result<()> {
        if self.base.service()?.ignore_errors() {
            n.set_path(TEST_FALLBACK_NODE);
        }
        Ok(())
    }
}

impl Default for ProcSysNetIpv4NeighHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ProcSysNetIpv4NeighHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, path = %n.path().display(), "procSysNetIpv4Neigh lookup");

        if let Some(rel) = self.rel_path(n) {
            if let Some(node) = self.base.emu_nodes.get(rel.as_str()) {
                let name = Path::new(&rel)
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or(rel.clone());
                return Ok(FileInfo::emulated(name, node));
            }
        }

        // Not one of ours: the host may still expose it.
        util::delegate(&self.base, PROC_SYS_HANDLER_NAME)?.lookup(n, req)
    }

    fn getattr(&self, _n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        match req.container {
            Some(ref cntr) => Ok(Ownership {
                uid: cntr.uid(),
                gid: cntr.gid(),
            }),
            None => Err(FsError::ContainerNotFound(req.pid)),
        }
    }

    fn open(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<()> {
        // No host open here: the emulated nodes reach the host lazily.
        // Write-only opens still get promoted so the push path can read
        // the host value first.
        if n.open_flags() & libc::O_ACCMODE == libc::O_WRONLY {
            n.set_open_flags(libc::O_RDWR);
        }
        Ok(())
    }

    fn close(&self, n: &mut IONode) -> Result<()> {
        n.close()
    }

    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        debug!(req_id = req.id, pid = req.pid, "procSysNetIpv4Neigh read");

        if req.container.is_none() {
            return Err(FsError::ContainerNotFound(req.pid));
        }

        self.redirect_for_tests(n)?;
        util::read_file_int(n, req)
    }

    fn write(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        debug!(req_id = req.id, pid = req.pid, "procSysNetIpv4Neigh write");

        if req.container.is_none() {
            return Err(FsError::ContainerNotFound(req.pid));
        }

        self.redirect_for_tests(n)?;
        util::write_file_int(n, req, i64::MIN, i64::MAX)
    }

    fn readdirall(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        debug!(req_id = req.id, path = %n.path().display(), "procSysNetIpv4Neigh readdirall");

        if req.container.is_none() {
            return Err(FsError::ContainerNotFound(req.pid));
        }

        let rel = match self.rel_path(n) {
            Some(rel) => rel,
            None => return Ok(Vec::new()),
        };

        let mut entries = Vec::new();
        for (key, node) in &self.base.emu_nodes {
            if rel == Self::parent_of(key) {
                let name = Path::new(key)
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| key.to_string());
                entries.push(FileInfo::emulated(name, node));
            }
        }

        // Merge host-visible siblings; the emulated view stands on its own
        // when the host exposes nothing here.
        if let Ok(aggregator) = util::delegate(&self.base, PROC_SYS_HANDLER_NAME) {
            if let Ok(host_entries) = aggregator.readdirall(n, req) {
                entries.extend(host_entries);
            }
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{default_service, request_for};
    use super::*;

    fn neigh_handler() -> (
        std::sync::Arc<dyn Handler>,
        std::sync::Arc<crate::state::ContainerRegistry>,
    ) {
        let (service, registry) = default_service();
        let handler = service.find_by_name("procSysNetIpv4Neigh").unwrap();
        // `base.service()` only holds a Weak reference; keep the strong
        // Arc alive for the test's lifetime or it upgrades to None.
        std::mem::forget(service);
        (handler, registry)
    }

    #[test]
    fn test_lookup_gc_thresh_is_emulated_file() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new(
            "gc_thresh2",
            "/proc/sys/net/ipv4/neigh/default/gc_thresh2",
            libc::O_RDONLY,
        );
        let req = request_for(&registry, 1001, b"");
        let info = handler.lookup(&mut node, &req).unwrap();

        assert_eq!(info.name, "gc_thresh2");
        assert_eq!(info.mode, 0o644);
        assert!(!info.is_dir);
    }

    #[test]
    fn test_lookup_default_is_emulated_dir() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new(
            "default",
            "/proc/sys/net/ipv4/neigh/default",
            libc::O_RDONLY,
        );
        let req = request_for(&registry, 1001, b"");
        let info = handler.lookup(&mut node, &req).unwrap();

        assert_eq!(info.mode, 0o555);
        assert!(info.is_dir);
    }

    #[test]
    fn test_getattr_requires_container() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new(
            "gc_thresh1",
            "/proc/sys/net/ipv4/neigh/default/gc_thresh1",
            libc::O_RDONLY,
        );
        let req = request_for(&registry, 4242, b"");
        assert!(matches!(
            handler.getattr(&mut node, &req),
            Err(FsError::ContainerNotFound(4242))
        ));

        let req = request_for(&registry, 1001, b"");
        let owner = handler.getattr(&mut node, &req).unwrap();
        assert_eq!(owner.uid, 165536);
    }

    #[test]
    fn test_open_promotes_write_only() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new(
            "gc_thresh1",
            "/proc/sys/net/ipv4/neigh/default/gc_thresh1",
            libc::O_WRONLY,
        );
        let req = request_for(&registry, 1001, b"");
        handler.open(&mut node, &req).unwrap();
        assert_eq!(node.open_flags() & libc::O_ACCMODE, libc::O_RDWR);
    }

    #[test]
    fn test_write_then_read_against_host_node() {
        let (handler, registry) = neigh_handler();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gc_thresh1");
        std::fs::write(&path, "128\n").unwrap();

        let mut node = IONode::new("gc_thresh1", &path, libc::O_RDWR);
        let mut req = request_for(&registry, 1001, b"1024");
        handler.write(&mut node, &mut req).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "1024");

        let mut node = IONode::new("gc_thresh1", &path, libc::O_RDONLY);
        let mut read_req = request_for(&registry, 1001, b"");
        let len = handler.read(&mut node, &mut read_req).unwrap();
        assert_eq!(&read_req.data[..len], b"1024\n");
    }

    #[test]
    fn test_readdirall_root_lists_default() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new("neigh", "/proc/sys/net/ipv4/neigh", libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let entries = handler.readdirall(&mut node, &req).unwrap();

        let default = entries.iter().find(|e| e.name == "default").unwrap();
        assert!(default.is_dir);
        assert_eq!(default.mode, 0o555);
    }

    #[test]
    fn test_readdirall_default_lists_thresholds() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new(
            "default",
            "/proc/sys/net/ipv4/neigh/default",
            libc::O_RDONLY,
        );
        let req = request_for(&registry, 1001, b"");
        let entries = handler.readdirall(&mut node, &req).unwrap();

        for name in ["gc_thresh1", "gc_thresh2", "gc_thresh3"] {
            let entry = entries.iter().find(|e| e.name == name).unwrap();
            assert!(!entry.is_dir);
            assert_eq!(entry.mode, 0o644);
        }
    }

    #[test]
    fn test_readdirall_requires_container() {
        let (handler, registry) = neigh_handler();

        let mut node = IONode::new("neigh", "/proc/sys/net/ipv4/neigh", libc::O_RDONLY);
        let req = request_for(&registry, 4242, b"");
        assert!(matches!(
            handler.readdirall(&mut node, &req),
            Err(FsError::ContainerNotFound(4242))
        ));
    }
}
