//! Handler registration and virtual-path routing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::{FsError, Result};
use crate::ionode::IOService;
use crate::state::ContainerStateService;

use super::Handler;

/// Owns every handler singleton and routes virtual paths to them.
///
/// The registry is populated at daemon startup; afterwards only the
/// container-state hookup and the test-mode flag mutate. Routing picks the
/// handler whose registered path is the longest match for the request: an
/// exact path beats any prefix, longer prefixes beat shorter ones, and
/// insertion order breaks remaining ties. The `commonHandler` registered at
/// `/` is the fallback every unowned path lands on.
pub struct HandlerService {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    state: RwLock<Option<Arc<dyn ContainerStateService>>>,
    ios: Arc<IOService>,
    ignore_errors: AtomicBool,
}

impl HandlerService {
    /// Create an empty registry around the given I/O service.
    pub fn new(ios: Arc<IOService>) -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(Vec::new()),
            state: RwLock::new(None),
            ios,
            ignore_errors: AtomicBool::new(false),
        })
    }

    /// Create a registry pre-populated with the default handler set.
    pub fn with_default_handlers(ios: Arc<IOService>) -> Arc<Self> {
        let service = Self::new(ios);
        service.register(Arc::new(super::common::CommonHandler::new()));
        service.register(Arc::new(super::proc_sys::ProcSysHandler::new()));
        service.register(Arc::new(super::meminfo::ProcMeminfoHandler::new()));
        service.register(Arc::new(super::cpuinfo::ProcCpuinfoHandler::new()));
        service.register(Arc::new(super::nf_conntrack_max::NfConntrackMaxHandler::new()));
        service.register(Arc::new(super::net_ipv4_neigh::ProcSysNetIpv4NeighHandler::new()));
        service
    }

    /// Register a handler under its own path, handing it a non-owning
    /// handle back to this registry.
    pub fn register(self: &Arc<Self>, handler: Arc<dyn Handler>) {
        handler.base().attach_service(Arc::downgrade(self));
        debug!(name = handler.name(), path = handler.path(), "registering handler");
        self.handlers.write().unwrap().push(handler);
    }

    /// Handler owning `path`: exact match first, then longest prefix.
    pub fn find_by_path(&self, path: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self.handlers.read().unwrap();
        let mut best: Option<(usize, &Arc<dyn Handler>)> = None;
        for handler in handlers.iter() {
            if !handler.enabled() {
                continue;
            }
            if handler.path() == path {
                return Some(Arc::clone(handler));
            }
            if Self::owns_prefix(handler.path(), path) {
                let len = handler.path().len();
                match best {
                    Some((best_len, _)) if best_len >= len => {}
                    _ => best = Some((len, handler)),
                }
            }
        }
        best.map(|(_, handler)| Arc::clone(handler))
    }

    /// Prefix ownership respects path-component boundaries, so a handler
    /// rooted at `/proc/sys/net/ipv4/neigh` does not capture
    /// `/proc/sys/net/ipv4/neighbor`.
    fn owns_prefix(registered: &str, path: &str) -> bool {
        if registered.ends_with('/') {
            path.starts_with(registered)
        } else {
            path.len() > registered.len()
                && path.starts_with(registered)
                && path.as_bytes()[registered.len()] == b'/'
        }
    }

    /// Direct name lookup, used for cross-handler delegation.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self.handlers.read().unwrap();
        handlers.iter().find(|h| h.name() == name).map(Arc::clone)
    }

    /// Inject the container-state service. Every registered handler
    /// reaches it through its registry handle.
    pub fn set_state_service(&self, css: Arc<dyn ContainerStateService>) {
        *self.state.write().unwrap() = Some(css);
    }

    pub fn state_service(&self) -> Result<Arc<dyn ContainerStateService>> {
        self.state
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| FsError::InitFailure("container state service not set".to_string()))
    }

    pub fn io_service(&self) -> &Arc<IOService> {
        &self.ios
    }

    pub fn host_pid_ns_inode(&self) -> Result<u64> {
        Ok(self.state_service()?.host_pid_ns_inode())
    }

    pub fn find_pid_ns_inode(&self, pid: u32) -> Result<u64> {
        self.state_service()?
            .find_pid_ns_inode(pid)
            .ok_or(FsError::PidNsInodeUnknown(pid))
    }

    /// Test-mode flag permitting handlers to rewrite a missing host path
    /// into a known-present one.
    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors.load(Ordering::Relaxed)
    }

    pub fn set_ignore_errors(&self, value: bool) {
        self.ignore_errors.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{FileInfo, Handler, HandlerBase, HandlerKind, HandlerRequest, Ownership};
    use super::*;
    use crate::ionode::IONode;

    struct DummyHandler {
        base: HandlerBase,
    }

    impl DummyHandler {
        fn new(name: &'static str, path: &'static str) -> Self {
            Self {
                base: HandlerBase::new(name, path, HandlerKind::Passthrough, true, false),
            }
        }

        fn disabled(name: &'static str, path: &'static str) -> Self {
            Self {
                base: HandlerBase::new(name, path, HandlerKind::Passthrough, false, false),
            }
        }
    }

    impl Handler for DummyHandler {
        fn base(&self) -> &HandlerBase {
            &self.base
        }

        fn lookup(&self, _n: &mut IONode, _req: &HandlerRequest) -> crate::errors::Result<FileInfo> {
            unimplemented!()
        }

        fn getattr(&self, _n: &mut IONode, _req: &HandlerRequest) -> crate::errors::Result<Ownership> {
            unimplemented!()
        }

        fn open(&self, _n: &mut IONode, _req: &HandlerRequest) -> crate::errors::Result<()> {
            Ok(())
        }

        fn close(&self, _n: &mut IONode) -> crate::errors::Result<()> {
            Ok(())
        }

        fn read(&self, _n: &mut IONode, _req: &mut HandlerRequest) -> crate::errors::Result<usize> {
            Ok(0)
        }

        fn write(&self, _n: &mut IONode, _req: &mut HandlerRequest) -> crate::errors::Result<usize> {
            Ok(0)
        }

        fn readdirall(
            &self,
            _n: &mut IONode,
            _req: &HandlerRequest,
        ) -> crate::errors::Result<Vec<FileInfo>> {
            Ok(Vec::new())
        }
    }

    fn default_service() -> Arc<HandlerService> {
        HandlerService::with_default_handlers(Arc::new(IOService::new()))
    }

    #[test]
    fn test_exact_match_wins_over_prefix() {
        let service = default_service();
        let handler = service
            .find_by_path("/proc/sys/net/netfilter/nf_conntrack_max")
            .unwrap();
        assert_eq!(handler.name(), "nfConntrackMax");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let service = default_service();
        let handler = service
            .find_by_path("/proc/sys/net/ipv4/neigh/default/gc_thresh2")
            .unwrap();
        assert_eq!(handler.name(), "procSysNetIpv4Neigh");
    }

    #[test]
    fn test_proc_sys_catches_unclaimed_sysctls() {
        let service = default_service();
        let handler = service.find_by_path("/proc/sys/other").unwrap();
        assert_eq!(handler.name(), super::super::PROC_SYS_HANDLER_NAME);
    }

    #[test]
    fn test_unknown_proc_path_falls_through_to_common() {
        let service = default_service();
        let handler = service.find_by_path("/proc/uptime").unwrap();
        assert_eq!(handler.name(), super::super::COMMON_HANDLER_NAME);
    }

    #[test]
    fn test_prefix_respects_component_boundaries() {
        let service = default_service();
        // neighbor is not under the neigh subtree
        let handler = service
            .find_by_path("/proc/sys/net/ipv4/neighbor")
            .unwrap();
        assert_eq!(handler.name(), super::super::PROC_SYS_HANDLER_NAME);
    }

    #[test]
    fn test_insertion_order_breaks_ties() {
        let service = HandlerService::new(Arc::new(IOService::new()));
        service.register(Arc::new(DummyHandler::new("first", "/a/b")));
        service.register(Arc::new(DummyHandler::new("second", "/a/b")));

        let handler = service.find_by_path("/a/b").unwrap();
        assert_eq!(handler.name(), "first");
    }

    #[test]
    fn test_disabled_handlers_are_skipped() {
        let service = HandlerService::new(Arc::new(IOService::new()));
        service.register(Arc::new(DummyHandler::disabled("off", "/a/b")));
        service.register(Arc::new(DummyHandler::new("fallback", "/")));

        let handler = service.find_by_path("/a/b").unwrap();
        assert_eq!(handler.name(), "fallback");
    }

    #[test]
    fn test_find_by_name() {
        let service = default_service();
        assert!(service.find_by_name("commonHandler").is_some());
        assert!(service.find_by_name("/proc/sys/").is_some());
        assert!(service.find_by_name("missing").is_none());
    }

    #[test]
    fn test_state_service_unset() {
        let service = HandlerService::new(Arc::new(IOService::new()));
        assert!(service.state_service().is_err());
    }

    #[test]
    fn test_ignore_errors_flag() {
        let service = default_service();
        assert!(!service.ignore_errors());
        service.set_ignore_errors(true);
        assert!(service.ignore_errors());
    }
}
