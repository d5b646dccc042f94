//! Host-passthrough handler for `/proc/meminfo`.
//!
//! Memory accounting is served straight from the host for now; writes are
//! absorbed so `sysctl -p`-style sweeps inside the container do not fail.

use tracing::debug;

use crate::errors::{FsError, Result};
use crate::ionode::IONode;

use super::{util, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership};

pub struct ProcMeminfoHandler {
    base: HandlerBase,
}

impl ProcMeminfoHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(
                "procMeminfo",
                "/proc/meminfo",
                HandlerKind::Passthrough,
                true,
                false,
            ),
        }
    }
}

impl Default for ProcMeminfoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for ProcMeminfoHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, "procMeminfo lookup");

        self.base.service()?.find_pid_ns_inode(req.pid)?;

        let meta = n.stat()?;
        Ok(FileInfo::from_metadata(n.name(), &meta))
    }

    fn getattr(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        debug!(req_id = req.id, "procMeminfo getattr");

        let service = self.base.service()?;
        let pid_ns = service.find_pid_ns_inode(req.pid)?;
        if pid_ns == service.host_pid_ns_inode()? {
            // Container initialization phase.
            return Ok(Ownership::HOST_ROOT);
        }

        util::common_handler(&self.base)?.getattr(n, req)
    }

    fn open(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<()> {
        if n.open_flags() & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::OpenDenied(n.open_flags()));
        }

        n.open().map_err(|e| {
            debug!(path = %n.path().display(), error = %e, "host open failed");
            e
        })
    }

    fn close(&self, n: &mut IONode) -> Result<()> {
        n.close()
    }

    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        debug!(req_id = req.id, "procMeminfo read");

        let service = self.base.service()?;
        let data = service.io_service().read_node(n, req.offset)?;
        let len = data.len();
        req.data = data;
        Ok(len)
    }

    fn write(&self, _n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        // Writes are absorbed, never forwarded.
        Ok(req.data.len())
    }

    fn readdirall(&self, _n: &mut IONode, _req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{default_service, request_for};
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "MemTotal:       16384256 kB\nMemFree:         8192128 kB\n";

    #[test]
    fn test_open_rejects_writes() {
        let (service, registry) = default_service();
        let handler = service.find_by_name("procMeminfo").unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, SAMPLE).unwrap();

        for flags in [libc::O_WRONLY, libc::O_RDWR] {
            let mut node = IONode::new("meminfo", &path, flags);
            let req = request_for(&registry, 1001, b"");
            let err = handler.open(&mut node, &req).unwrap_err();
            assert_eq!(err.errno(), libc::EACCES);
        }
    }

    #[test]
    fn test_read_streams_host_file() {
        let (service, registry) = default_service();
        let handler = service.find_by_name("procMeminfo").unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut node = IONode::new("meminfo", &path, libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        handler.open(&mut node, &req).unwrap();

        let mut read_req = request_for(&registry, 1001, b"");
        let len = handler.read(&mut node, &mut read_req).unwrap();
        assert_eq!(&read_req.data[..len], SAMPLE.as_bytes());
    }

    #[test]
    fn test_write_is_absorbed() {
        let (service, registry) = default_service();
        let handler = service.find_by_name("procMeminfo").unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut node = IONode::new("meminfo", &path, libc::O_RDONLY);
        let mut req = request_for(&registry, 1001, b"MemTotal: 1 kB\n");
        assert_eq!(handler.write(&mut node, &mut req).unwrap(), 15);

        // Host content untouched.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SAMPLE);
    }
}
