//! devjail - dev-safe process sandboxing without root
//!
//! This crate provides the enforcement and monitoring subsystems:
//! - File jail enforcer: strace or /proc fd observation of filesystem escapes
//! - Network restrictor: LD_PRELOAD socket interception with audit logging
//! - Resource sampler and threshold alert manager
//! - ML guard: rolling-window inference with a confinement-checked kill policy

pub mod cli;
pub mod config;
pub mod guard;
pub mod jail;
pub mod logs;
pub mod monitor;
pub mod net;
pub mod paths;

pub use config::Config;
