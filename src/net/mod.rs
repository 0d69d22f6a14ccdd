//! Network restrictor — dev-safe socket denial without root.
//!
//! Every socket-creation entry point is intercepted process-wide by an
//! `LD_PRELOAD` shim (the `devjail-shim` cdylib) loaded ahead of the
//! target binary. Intercepted calls fail with `EPERM` and are recorded;
//! the target's filesystem and compute behavior are untouched. The
//! wrapper folds the shim's event stream into a single restriction log
//! it rewrites in place for the lifetime of the run.
//!
//! Coverage note: `LD_PRELOAD` only reaches dynamically linked
//! executables. A statically linked target bypasses the shim — this is
//! surfaced in `devjail status`, not hidden.

pub mod log;
pub mod runner;

use std::path::PathBuf;
use thiserror::Error;

pub use log::{NetRestrictionLog, SocketEvent};
pub use runner::{NetOutcome, NetRunner};

/// Marker exported to the target so cooperating code can detect that
/// network access has been disabled.
pub const NET_DISABLED_ENV: &str = "DEVJAIL_NET_DISABLED";

/// Where the shim appends intercepted-call events.
pub const NET_EVENTS_ENV: &str = "DEVJAIL_NET_EVENTS";

/// Override for the shim library location.
pub const NET_SHIM_ENV: &str = "DEVJAIL_NET_SHIM";

/// File name of the interposition library, as cargo builds it.
pub const SHIM_FILE_NAME: &str = "libdevjail_shim.so";

#[derive(Debug, Error)]
pub enum NetError {
    #[error(
        "interposition shim not found: {0} (build the devjail-shim crate, \
         or point DEVJAIL_NET_SHIM at the library)"
    )]
    ShimUnavailable(String),

    #[error("inline shell evaluation is not supported; pass a program and arguments")]
    InlineEval,

    #[error("no command provided")]
    EmptyCommand,

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("failed to write restriction log: {0}")]
    Log(String),
}
