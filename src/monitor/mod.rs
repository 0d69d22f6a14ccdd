//! Resource monitoring: point-in-time process sampling, the bounded
//! rolling window live inference runs are synthesized from, and the
//! threshold-driven alert manager.
//!
//! Everything here is observation-only. The sampler reads OS process
//! introspection primitives; it never touches the watched process.

pub mod alerts;
pub mod run;
pub mod sample;
pub mod window;

pub use alerts::{AlertManager, AlertRecord};
pub use run::TelemetryRun;
pub use sample::{MonitorError, Sample, SampleSource};
pub use window::{SampleWindow, WINDOW_CAP};
