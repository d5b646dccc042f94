//! Shared helpers for single-integer emulated nodes.
//!
//! The monotonic-max resources all follow the same value grammar (one
//! integer, one line) and the same reconciliation shape; the helpers here
//! carry that shape so each handler only contributes its path, flag policy,
//! and redirects.

use std::sync::Arc;

use tracing::{debug, error};

use crate::errors::{FsError, Result};
use crate::ionode::IONode;

use super::{Handler, HandlerBase, HandlerRequest, Ownership, COMMON_HANDLER_NAME};

/// Copy a fully-formed payload into the request buffer.
pub(crate) fn copy_result_buffer(req: &mut HandlerRequest, payload: &[u8]) -> usize {
    req.data.clear();
    req.data.extend_from_slice(payload);
    payload.len()
}

/// Read the host node's first line as an integer.
pub(crate) fn fetch_file_int(n: &mut IONode) -> Result<i64> {
    let line = n.read_line()?;
    line.parse::<i64>().map_err(|e| {
        error!(path = %n.path().display(), content = %line, "unexpected host content");
        FsError::ParseFailure {
            path: n.path().display().to_string(),
            reason: e.to_string(),
        }
    })
}

/// Push `new_val` down to the host node, unless the host already holds a
/// larger value. The host ceiling is never lowered: other containers may
/// depend on it.
pub(crate) fn push_file_int(n: &mut IONode, new_val: i64) -> Result<()> {
    let cur_host = fetch_file_int(n)?;
    if new_val <= cur_host {
        return Ok(());
    }

    n.seek_reset()?;
    n.write(new_val.to_string().as_bytes())?;
    Ok(())
}

/// Serve a cached single-integer read, filling the cache from the host on
/// a miss. The payload carries a trailing newline.
pub(crate) fn read_file_int(n: &mut IONode, req: &mut HandlerRequest) -> Result<usize> {
    // Single integer element: anything past offset zero is EOF.
    if req.offset > 0 {
        return Err(FsError::EndOfFile);
    }

    let cntr = match req.container {
        Some(ref c) => Arc::clone(c),
        None => {
            error!(pid = req.pid, "could not find the container originating this request");
            return Err(FsError::ContainerNotFound(req.pid));
        }
    };

    let dir = n.dir();
    let file = n.name().to_string();

    let value = match cntr.data_get(&dir, &file) {
        Some(v) => v,
        None => {
            let fetched = fetch_file_int(n)?.to_string();
            cntr.data_set(&dir, &file, fetched.clone());
            fetched
        }
    };

    let payload = format!("{}\n", value);
    Ok(copy_result_buffer(req, payload.as_bytes()))
}

/// Apply a monotonic-max integer write.
///
/// The container cache always takes the new value, so the writer keeps
/// observing it; the host only sees values that raise its current one.
pub(crate) fn write_file_int(
    n: &mut IONode,
    req: &mut HandlerRequest,
    min: i64,
    max: i64,
) -> Result<usize> {
    let text = String::from_utf8_lossy(&req.data).trim().to_string();
    let new_val = text.parse::<i64>().map_err(|e| {
        error!(path = %n.path().display(), payload = %text, "rejecting non-numeric write");
        FsError::ParseFailure {
            path: n.path().display().to_string(),
            reason: e.to_string(),
        }
    })?;
    if new_val < min || new_val > max {
        return Err(FsError::ParseFailure {
            path: n.path().display().to_string(),
            reason: format!("value {} out of range", new_val),
        });
    }

    let cntr = match req.container {
        Some(ref c) => Arc::clone(c),
        None => {
            error!(pid = req.pid, "could not find the container originating this request");
            return Err(FsError::ContainerNotFound(req.pid));
        }
    };

    let dir = n.dir();
    let file = n.name().to_string();
    let accepted = req.data.len();

    match cntr.data_get(&dir, &file) {
        None => {
            // First write from this container: reconcile against the host.
            push_file_int(n, new_val)?;
            cntr.data_set(&dir, &file, text);
        }
        Some(cached) => {
            let cached_val = cached.parse::<i64>().map_err(|e| FsError::ParseFailure {
                path: n.path().display().to_string(),
                reason: e.to_string(),
            })?;
            // A value at or below what this container already holds stays
            // local; lowering the host ceiling could starve other
            // containers.
            if new_val > cached_val {
                push_file_int(n, new_val)?;
            }
            cntr.data_set(&dir, &file, text);
        }
    }

    debug!(dir = %dir, file = %file, value = new_val, "write accepted");
    Ok(accepted)
}

/// Ownership rules shared by the getattr paths: host-namespace callers
/// appear as root, container callers as the container's uid/gid.
pub(crate) fn container_ownership(base: &HandlerBase, req: &HandlerRequest) -> Result<Ownership> {
    let service = base.service()?;
    let css = service.state_service()?;

    let pid_ns = css
        .find_pid_ns_inode(req.pid)
        .ok_or(FsError::PidNsInodeUnknown(req.pid))?;
    if pid_ns == css.host_pid_ns_inode() {
        // Container initialization phase: requests arrive from the host
        // namespace before any container process runs.
        return Ok(Ownership::HOST_ROOT);
    }

    match req.container {
        Some(ref cntr) => Ok(Ownership {
            uid: cntr.uid(),
            gid: cntr.gid(),
        }),
        None => Err(FsError::ContainerNotFound(req.pid)),
    }
}

/// Resolve a sibling handler by registry name.
pub(crate) fn delegate(base: &HandlerBase, name: &str) -> Result<Arc<dyn Handler>> {
    base.service()?
        .find_by_name(name)
        .ok_or_else(|| FsError::HandlerNotFound(name.to_string()))
}

/// Resolve the default leaf handler.
pub(crate) fn common_handler(base: &HandlerBase) -> Result<Arc<dyn Handler>> {
    delegate(base, COMMON_HANDLER_NAME)
}
