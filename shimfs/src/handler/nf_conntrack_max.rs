//! Handler for `/proc/sys/net/netfilter/nf_conntrack_max`.
//!
//! The conntrack table ceiling is a single kernel-wide knob. Each container
//! observes whatever it last wrote; the host keeps the largest value any
//! container asked for.

use tracing::debug;

use crate::errors::{FsError, Result};
use crate::ionode::IONode;

use super::{util, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership};

pub struct NfConntrackMaxHandler {
    base: HandlerBase,
}

impl NfConntrackMaxHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(
                "nfConntrackMax",
                "/proc/sys/net/netfilter/nf_conntrack_max",
                HandlerKind::Substitution,
                true,
                true,
            ),
        }
    }
}

impl Default for NfConntrackMaxHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for NfConntrackMaxHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, "nfConntrackMax lookup");

        // The caller's pid namespace must resolve before the host node is
        // consulted.
        self.base.service()?.find_pid_ns_inode(req.pid)?;

        let meta = n.stat()?;
        Ok(FileInfo::from_metadata(n.name(), &meta))
    }

    fn getattr(&self, n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        util::common_handler(&self.base)?.getattr(n, req)
    }

    fn open(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<()> {
        let flags = n.open_flags() & libc::O_ACCMODE;
        if flags != libc::O_RDONLY && flags != libc::O_WRONLY {
            return Err(FsError::OpenDenied(n.open_flags()));
        }

        // Write-only opens are promoted so the push path can inspect the
        // host value before overwriting it.
        if flags == libc::O_WRONLY {
            n.set_open_flags(libc::O_RDWR);
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
        debug!(req_id = req.id, pid = req.pid, "nfConntrackMax read");
        util::read_file_int(n, req)
    }

    fn write(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        debug!(req_id = req.id, pid = req.pid, "nfConntrackMax write");
        util::write_file_int(n, req, i64::MIN, i64::MAX)
    }

    fn readdirall(&self, _n: &mut IONode, _req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }
}
