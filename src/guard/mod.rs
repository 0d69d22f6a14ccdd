//! ML guard — per-watched-process supervisory loop.
//!
//! Each watched PID gets a dedicated worker that polls the sample
//! source, keeps a bounded rolling window, and hands the synthesized
//! run to an inference collaborator. A malicious verdict at or above
//! the kill threshold triggers the kill policy; everything else is
//! rate-limited change logging. The guard fails open: a broken
//! classifier degrades to an `unknown` verdict and must never take the
//! supervised workload down with it.

pub mod engine;
pub mod registry;
pub mod worker;

pub use crate::config::GuardConfig;
pub use engine::{CommandEngine, InferenceEngine, InferenceError, Prediction};
pub use registry::GuardRegistry;
pub use worker::is_process_in_jail;
