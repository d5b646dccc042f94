//! Default leaf handler.
//!
//! Any virtual path no dedicated handler claims lands here: straight
//! passthrough to the equally-named host node. Also the delegation target
//! the specialized handlers use for ownership resolution and host-visible
//! directory listings.

use tracing::debug;

use crate::errors::Result;
use crate::ionode::IONode;

use super::{
    util, FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership,
    COMMON_HANDLER_NAME,
};

pub struct CommonHandler {
    base: HandlerBase,
}

impl CommonHandler {
    pub fn new() -> Self {
        Self {
            base: HandlerBase::new(COMMON_HANDLER_NAME, "/", HandlerKind::Passthrough, true, false),
        }
    }
}

impl Default for CommonHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for CommonHandler {
    fn base(&self) -> &HandlerBase {
        &self.base
    }

    fn lookup(&self, n: &mut IONode, req: &HandlerRequest) -> Result<FileInfo> {
        debug!(req_id = req.id, path = %n.path().display(), "commonHandler lookup");

        let meta = n.stat()?;
        Ok(FileInfo::from_metadata(n.name(), &meta))
    }

    fn getattr(&self, _n: &mut IONode, req: &HandlerRequest) -> Result<Ownership> {
        util::container_ownership(&self.base, req)
    }

    fn open(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<()> {
        n.open()
    }

    fn close(&self, n: &mut IONode) -> Result<()> {
        n.close()
    }

    fn read(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        let service = self.base.service()?;
        let data = service.io_service().read_node(n, req.offset)?;
        let len = data.len();
        req.data = data;
        Ok(len)
    }

    fn write(&self, n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
        n.write(&req.data)
    }

    fn readdirall(&self, n: &mut IONode, _req: &HandlerRequest) -> Result<Vec<FileInfo>> {
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(n.path())? {
            let entry = entry?;
            let meta = entry.metadata()?;
            entries.push(FileInfo::from_metadata(
                entry.file_name().to_string_lossy(),
                &meta,
            ));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{default_service, request_for};
    use super::*;
    use crate::errors::FsError;
    use std::io::Write as _;
    use tempfile::tempdir;

    #[test]
    fn test_lookup_stats_host_node() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("uptime");
        std::fs::write(&path, "12345.67 89.01\n").unwrap();

        let mut node = IONode::new("uptime", &path, libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let info = handler.lookup(&mut node, &req).unwrap();
        assert!(!info.is_dir);
        assert_eq!(info.name, "uptime");
    }

    #[test]
    fn test_lookup_missing_node_is_not_found() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let mut node = IONode::new("gone", "/nonexistent/shimfs/gone", libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let err = handler.lookup(&mut node, &req).unwrap_err();
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn test_getattr_container_caller_gets_container_ids() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let mut node = IONode::new("uptime", "/proc/uptime", libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let owner = handler.getattr(&mut node, &req).unwrap();
        assert_eq!(owner, Ownership { uid: 165536, gid: 165536 });
    }

    #[test]
    fn test_getattr_unknown_container_fails() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        // Pid 1 is alive but bound to no registered container, and lives
        // in a pid namespace different from the registry's host inode.
        let mut node = IONode::new("uptime", "/proc/uptime", libc::O_RDONLY);
        let req = request_for(&registry, 1, b"");
        assert!(matches!(
            handler.getattr(&mut node, &req),
            Err(FsError::ContainerNotFound(1)) | Err(FsError::PidNsInodeUnknown(1))
        ));
    }

    #[test]
    fn test_read_streams_host_content() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("stat");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"cpu 1 2 3 4\ncpu0 1 2 3 4\n").unwrap();

        let mut node = IONode::new("stat", &path, libc::O_RDONLY);
        let mut req = request_for(&registry, 1001, b"");
        let len = handler.read(&mut node, &mut req).unwrap();
        assert_eq!(&req.data[..len], b"cpu 1 2 3 4\ncpu0 1 2 3 4\n");

        // Reads at an offset resume mid-stream.
        let mut node = IONode::new("stat", &path, libc::O_RDONLY);
        let mut req = request_for(&registry, 1001, b"");
        req.offset = 12;
        let len = handler.read(&mut node, &mut req).unwrap();
        assert_eq!(&req.data[..len], b"cpu0 1 2 3 4\n");
    }

    #[test]
    fn test_write_passes_through() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("tunable");
        std::fs::write(&path, "0\n").unwrap();

        let mut node = IONode::new("tunable", &path, libc::O_WRONLY);
        let mut req = request_for(&registry, 1001, b"1\n");
        assert_eq!(handler.write(&mut node, &mut req).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "1\n");
    }

    #[test]
    fn test_readdirall_lists_host_entries() {
        let (service, registry) = default_service();
        let handler = service.find_by_name(COMMON_HANDLER_NAME).unwrap();

        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), "1").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut node = IONode::new("dir", dir.path(), libc::O_RDONLY);
        let req = request_for(&registry, 1001, b"");
        let entries = handler.readdirall(&mut node, &req).unwrap();

        let mut names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["a", "sub"]);
        assert!(entries.iter().any(|e| e.name == "sub" && e.is_dir));
    }
}
