//! Host-passthrough handler for `/proc/cpuinfo`.
//!
//! CPU topology is host-wide; containers see the host view until per
//! container CPU accounting lands. Same contract as the meminfo handler.

use tracing::debug;

use crate::errors::{FsError, Result};
use crate::ionode::IONode;

use super::{util, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership};

pub struct ProcCpuinfoHandler {
    base: HandlerBase,
}

impl ProcCpuinfoHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(
                "procCpuinfo",
                "/proc/cpuinfo",
                HandlerKind::Passthrough,
                true,
                false,
            ),
        }
    }
}

impl Default for ProcCpuinfoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ProcCpuinfoHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, "procCpuinfo lookup");

        self.base.service()?.find_pid_ns_inode(req.pid)?;

        let meta = n.stat()?;
        Ok(FileInfo::from_metadata(n.name(), &meta))
    }

    fn getattr(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        let service = self.base.service()?;
        let pid_ns = service.find_pid_ns_inode(req.pid)?;
        if pid_ns == service.host_pid_ns_inode()? {
            return Ok(Ownership::HOST_ROOT);
        }

        util::common_handler(&self.base)?.getattr(n, req)
    }

    fn open(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<()> {
        if n.open_flags() & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::OpenDenied(n.open_flags()));
        }
        n.open()
    }

    fn close(&self, n: &mut IONode) -> Result<()> {
        n.close()
    }

    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        debug!(req_id = req.id, "procCpuinfo read");

        let service = self.base.service()?;
        let data = service.io_service().read_node(n, req.offset)?;
        let len = data.len();
        req.data = data;
        Ok(len)
    }

    fn write(&self, _n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        Ok(req.data.len())
    }

    fn readdirall(&self, _n: &mut IONode, _req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }
}
