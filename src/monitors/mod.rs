//! Continuous health monitors fed by the shared ticker.
//!
//! Each monitor is a synchronous state machine: the runtime (or a test)
//! calls its `sample`/`tick` methods, and threshold breaches are emitted
//! on the event bus. Monitors never remediate directly beyond their own
//! documented fallback chain; policy lives in the mode coordinator.

pub mod dom;
pub mod heap;

pub use dom::{DomGrowthMonitor, DomMonitorConfig};
pub use heap::{DriftBand, HeapDriftConfig, HeapDriftDetector, HeapSnapshot};
