//! Per-container emulation of `/proc` and `/sys` kernel tunables over FUSE.
//!
//! System containers expect kernel interfaces they can tune; the host has
//! exactly one of each. This library mounts a private filesystem per
//! container, routes every kernel callback to the handler owning the longest
//! matching virtual path, and reconciles container writes onto the shared
//! host value (monotonic-max for kernel ceilings, passthrough or
//! substitution elsewhere) while every container keeps observing the value
//! it last wrote.
//!
//! # High-Level API
//!
//! ```ignore
//! use shimfs::config::Config;
//! use shimfs::fuse::FuseServerService;
//! use shimfs::handler::HandlerService;
//! use shimfs::ionode::IOService;
//! use shimfs::state::ContainerRegistry;
//! use std::sync::Arc;
//!
//! let ios = Arc::new(IOService::new());
//! let handlers = HandlerService::with_default_handlers(Arc::clone(&ios));
//! let service = FuseServerService::new(Config::default(), ios, handlers);
//! service.set_container_service(Arc::new(ContainerRegistry::new()?));
//!
//! // One fuse server per registered container.
//! service.create("cntr-1")?;
//! ```

pub mod config;
pub mod errors;
pub mod fuse;
pub mod handler;
pub mod ionode;
pub mod logging;
pub mod state;

/// Version of the shimfs library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
