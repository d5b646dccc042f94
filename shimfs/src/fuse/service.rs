//! Server lifecycle management across containers.
//!
//! One fuse server per registered container, tracked in a single map. The
//! map lock is never held across disk or session I/O: existence checks and
//! the final commit take it briefly, everything in between runs unlocked
//! behind a per-id reservation.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, info};

use crate::config::Config;
use crate::errors::{FsError, Result};
use crate::handler::HandlerService;
use crate::ionode::IOService;
use crate::state::ContainerStateService;

use super::FuseServer;

/// Creates and destroys per-container fuse servers.
pub struct FuseServerService {
    config: Config,
    servers: RwLock<HashMap<String, Arc<FuseServer>>>,
    /// Ids with a create in flight; closes the window between the
    /// existence check and the map insert
    pending: Mutex<HashSet<String>>,
    ios: Arc<IOService>,
    handlers: Arc<HandlerService>,
}

impl FuseServerService {
    pub fn new(config: Config, ios: Arc<IOService>, handlers: Arc<HandlerService>) -> Self {
        Self {
            config,
            servers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            ios,
            handlers,
        }
    }

    /// Create, initialize, and launch a fuse server for `cntr_id`.
    ///
    /// The server's event loop runs on its own session thread; the server
    /// is recorded only once fully up. Duplicate ids are rejected with
    /// [`FsError::AlreadyPresent`].
    pub fn create(&self, cntr_id: &str) -> Result<()> {
        self.reserve(cntr_id)?;

        let result = self.create_reserved(cntr_id);
        match result {
            Ok(server) => {
                self.servers
                    .write()
                    .unwrap()
                    .insert(cntr_id.to_string(), server);
                self.unreserve(cntr_id);
                info!(container = cntr_id, "fuse server created");
                Ok(())
            }
            Err(e) => {
                self.unreserve(cntr_id);
                error!(container = cntr_id, error = %e, "fuse server creation failed");
                Err(e)
            }
        }
    }

    fn reserve(&self, cntr_id: &str) -> Result<()> {
        if self.servers.read().unwrap().contains_key(cntr_id) {
            return Err(FsError::AlreadyPresent(cntr_id.to_string()));
        }
        let mut pending = self.pending.lock().unwrap();
        if !pending.insert(cntr_id.to_string()) {
            return Err(FsError::AlreadyPresent(cntr_id.to_string()));
        }
        Ok(())
    }

    fn unreserve(&self, cntr_id: &str) {
        self.pending.lock().unwrap().remove(cntr_id);
    }

    /// The I/O-heavy part of create, run outside the map lock. Resources
    /// acquired before a failure are released in reverse order.
    fn create_reserved(&self, cntr_id: &str) -> Result<Arc<FuseServer>> {
        let mountpoint = self.config.base_mount().join(cntr_id);
        fs::create_dir_all(&mountpoint)
            .and_then(|_| fs::set_permissions(&mountpoint, fs::Permissions::from_mode(0o600)))
            .map_err(|e| {
                FsError::InvalidMountpoint(format!("{}: {}", mountpoint.display(), e))
            })?;

        let server = Arc::new(FuseServer::new(
            cntr_id,
            self.config.emulated_path(),
            &mountpoint,
            Arc::clone(&self.ios),
            Arc::clone(&self.handlers),
        ));

        if let Err(e) = server.init().and_then(|_| server.run()) {
            let _ = fs::remove_dir(&mountpoint);
            return Err(e);
        }

        Ok(server)
    }

    /// Tear down the server for `cntr_id`.
    ///
    /// Idempotent: unknown ids succeed silently. Teardown failures are
    /// logged and the registry entry is removed regardless, so repeated
    /// destroys always terminate.
    pub fn destroy(&self, cntr_id: &str) -> Result<()> {
        let server = match self.servers.read().unwrap().get(cntr_id) {
            Some(s) => Arc::clone(s),
            None => {
                debug!(container = cntr_id, "no fuse server to destroy");
                return Ok(());
            }
        };

        if let Err(e) = server.destroy() {
            error!(container = cntr_id, error = %e, "fuse server teardown failed");
        }

        let mountpoint = self.config.base_mount().join(cntr_id);
        if let Err(e) = fs::remove_dir(&mountpoint) {
            error!(container = cntr_id, error = %e, "mountpoint removal failed");
        }

        self.servers.write().unwrap().remove(cntr_id);
        info!(container = cntr_id, "fuse server destroyed");
        Ok(())
    }

    /// Destroy every server. Called on daemon shutdown.
    pub fn destroy_all(&self) {
        let ids: Vec<String> = self.servers.read().unwrap().keys().cloned().collect();
        for id in ids {
            let _ = self.destroy(&id);
        }
    }

    /// Inject the container-state service into the handler registry.
    pub fn set_container_service(&self, css: Arc<dyn ContainerStateService>) {
        self.handlers.set_state_service(css);
    }

    pub fn handler_service(&self) -> &Arc<HandlerService> {
        &self.handlers
    }

    /// Whether a server exists for `cntr_id`.
    pub fn contains(&self, cntr_id: &str) -> bool {
        self.servers.read().unwrap().contains_key(cntr_id)
    }

    pub fn len(&self) -> usize {
        self.servers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().unwrap().is_empty()
    }
}
