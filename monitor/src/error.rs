use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a monitor.
///
/// State-machine and startup errors are returned synchronously from
/// `start`/`stop`; everything else is published on the monitor's error
/// channel while the event loop keeps running, except for fatal conditions
/// which additionally transition the monitor to Stopped.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("the monitor is already running")]
    AlreadyStarted,

    #[error("the monitor is already stopped")]
    AlreadyStopped,

    #[error("failed to resolve watch root {dir}: {source}")]
    BadRoot {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("selector failed for {path}: {source}")]
    Selector {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The kernel delivered an event for a descriptor the bookkeeping no
    /// longer knows about. The descriptor is opaque; `wd` is its debug
    /// rendering.
    #[error("no watched path registered for kernel descriptor {wd}")]
    UnknownDescriptor { wd: String },

    /// A moved-to event arrived whose cookie matches no pending moved-from
    /// half.
    #[error("orphaned move cookie {cookie} for {path}")]
    OrphanMoveCookie { cookie: u32, path: PathBuf },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
