//! Per-container FUSE servers and their lifecycle manager.

mod server;
mod service;

pub use server::{FuseServer, ServerState};
pub use service::FuseServerService;
