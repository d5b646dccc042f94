//! Aggregator for the `/proc/sys` subtree.
//!
//! Sysctls with no dedicated handler route here, and the substitution
//! handlers delegate to it to surface host-visible siblings next to their
//! emulated nodes. I/O is plain passthrough; only ownership resolution is
//! its own.

use tracing::debug;

use crate::errors::Result;
use crate::ionode::IONode;

use super::{
    util, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership,
    PROC_SYS_HANDLER_NAME,
};

pub struct ProcSysHandler {
    base: HandlerBase,
}

impl ProcSysHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(
                PROC_SYS_HANDLER_NAME,
                "/proc/sys/",
                HandlerKind::Passthrough,
                true,
                false,
            ),
        }
    }
}

impl Default for ProcSysHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ProcSysHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, path = %n.path().display(), "/proc/sys/ lookup");
        util::common_handler(&self.base)?.lookup(n, req)
    }

    fn getattr(&self, _n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        util::container_ownership(&self.base, req)
    }

    fn open(&self, n: &mut IONode, req: &HandlerRequest) -> Result<()> {
        util::common_handler(&self.base)?.open(n, req)
    }

    fn close(&self, n: &mut IONode) -> Result<()> {
        util::common_handler(&self.base)?.close(n)
    }

    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        util::common_handler(&self.base)?.read(n, req)
    }

    fn write(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        util::common_handler(&self.base)?.write(n, req)
    }

    fn readdirall(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        util::common_handler(&self.base)?.readdirall(n, req)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{default_service, request_for};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lookup_delegates_to_common() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(PROC_SYS_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("somaxconn");
        std::fs::write(&path, "4096\n").unwrap();

        let mut node = IONode::new("somaxconn", &path, libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let info = handler.lookup(&mut node, &req).unwrap();
        assert_eq!(info.name, "somaxconn");
        assert!(!info.is_dir);
    }

    #[test]
    fn test_getattr_reports_container_ownership() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(PROC_SYS_HANDLER_NAME).unwrap();

        let mut node = IONode::new("somaxconn", "/proc/sys/net/core/somaxconn", libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let owner = handler.getattr(&mut node, &req).unwrap();
        assert_eq!(owner, Ownership { uid: 165536, gid: 165536 });
    }

    #[test]
    fn test_read_streams_like_common() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(PROC_SYS_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("somaxconn");
        std::fs::write(&path, "4096\n").unwrap();

        let mut node = IONode::new("somaxconn", &path, libc::O_RDONLY);
        let mut req = request_for(&registry, 1001, b"");
        let len = handler.read(&mut node, &mut req).unwrap();
        assert_eq!(&req.data[..len], b"4096\n");
    }
}
