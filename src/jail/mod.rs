//! Development file jail — non-privileged filesystem containment.
//!
//! Runs a target command rooted at a jail directory and detects file
//! accesses that escape it. Enforcement is observational: with `strace`
//! available every file-related syscall is traced and classified after
//! exit; without it a fallback poller inspects `/proc/<pid>/fd` while
//! the command runs. Either way the wrapper's exit code tells the caller
//! whether the subtree was escaped.

pub mod allowlist;
pub mod observer;
pub mod runner;

use std::path::PathBuf;
use thiserror::Error;

pub use allowlist::AllowListPolicy;
pub use observer::Observer;
pub use runner::{COMMAND_NOT_FOUND_EXIT_CODE, JailReport, JailRunner, VIOLATION_EXIT_CODE};

#[derive(Debug, Error)]
pub enum JailError {
    #[error("failed to prepare jail directory {path}: {source}")]
    JailDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("no command provided")]
    EmptyCommand,

    #[error("failed to write run report: {0}")]
    Report(String),
}
