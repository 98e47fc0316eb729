// Heap drift detection
//
// Maintains a rolling window of heap snapshots and classifies sustained
// growth into warning/critical bands. Growth rate comes from a
// least-squares slope over the window rather than a two-point delta, so a
// single allocator sawtooth spike does not register as drift.
//
// The detector never frees memory itself. On a band breach it publishes
// memory:warning / memory:critical and, on critical, asks the optional GC
// hinter; actual cleanup is delegated to whoever subscribes.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::events::GovernanceEvent;
use crate::host::GcHinter;

/// One heap reading. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub used_heap: u64,
    pub total_heap: u64,
    pub timestamp_ms: u64,
}

/// Drift classification bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriftBand {
    Normal,
    Warning,
    Critical,
}

/// Tunable thresholds. The defaults are intentionally permissive to avoid
/// false positives from normal allocator sawtooth behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapDriftConfig {
    /// Window capacity; at one sample per ~30s this covers ~6 minutes.
    pub window_capacity: usize,
    /// Growth fraction that triggers the warning band (0.5 == +50%).
    pub warning_growth: f64,
    /// Growth fraction that triggers the critical band (1.0 == +100%).
    pub critical_growth: f64,
}

impl Default for HeapDriftConfig {
    fn default() -> Self {
        Self {
            window_capacity: 12,
            warning_growth: 0.5,
            critical_growth: 1.0,
        }
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftReport {
    pub band: DriftBand,
    pub growth_percent: f64,
    pub growth_rate_bytes_per_min: f64,
    pub current_heap: u64,
}

pub struct HeapDriftDetector {
    config: HeapDriftConfig,
    window: VecDeque<HeapSnapshot>,
    gc_hinter: Option<Arc<dyn GcHinter>>,
    measurement_warned: bool,
}

impl HeapDriftDetector {
    pub fn new(config: HeapDriftConfig) -> Self {
        let capacity = config.window_capacity.max(2);
        Self {
            config,
            window: VecDeque::with_capacity(capacity),
            gc_hinter: None,
            measurement_warned: false,
        }
    }

    /// Wire the optional GC-hint collaborator.
    pub fn with_gc_hinter(mut self, hinter: Arc<dyn GcHinter>) -> Self {
        self.gc_hinter = Some(hinter);
        self
    }

    /// Append one heap reading. A zero `used_heap` means the host could
    /// not measure; the reading is skipped and the condition logged once.
    pub fn sample(&mut self, used_heap: u64, total_heap: u64, timestamp_ms: u64) {
        if used_heap == 0 {
            if !self.measurement_warned {
                warn!("heap measurement unavailable; drift checks will be skipped");
                self.measurement_warned = true;
            }
            return;
        }
        if self.window.len() == self.config.window_capacity.max(2) {
            self.window.pop_front();
        }
        self.window.push_back(HeapSnapshot {
            used_heap,
            total_heap,
            timestamp_ms,
        });
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    /// Growth fraction between the oldest and newest snapshot.
    ///
    /// Defined as 0 when fewer than two samples exist or the oldest
    /// reading is zero.
    pub fn growth_percent(&self) -> f64 {
        let (oldest, newest) = match (self.window.front(), self.window.back()) {
            (Some(o), Some(n)) if self.window.len() >= 2 => (o, n),
            _ => return 0.0,
        };
        if oldest.used_heap == 0 {
            return 0.0;
        }
        (newest.used_heap as f64 - oldest.used_heap as f64) / oldest.used_heap as f64
    }

    /// Least-squares slope of (timestamp, used_heap), in bytes per minute.
    pub fn growth_rate_bytes_per_min(&self) -> f64 {
        let n = self.window.len();
        if n < 2 {
            return 0.0;
        }
        let t0 = self.window[0].timestamp_ms as f64;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut sum_xy = 0.0;
        let mut sum_xx = 0.0;
        for snap in &self.window {
            let x = snap.timestamp_ms as f64 - t0;
            let y = snap.used_heap as f64;
            sum_x += x;
            sum_y += y;
            sum_xy += x * y;
            sum_xx += x * x;
        }
        let nf = n as f64;
        let denom = nf * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return 0.0;
        }
        // slope in bytes/ms, reported per minute
        ((nf * sum_xy - sum_x * sum_y) / denom) * 60_000.0
    }

    /// Pure band classification for a growth fraction. Thresholds are
    /// inclusive: landing exactly on a band edge counts as the band.
    pub fn classify(&self, growth_percent: f64) -> DriftBand {
        if growth_percent >= self.config.critical_growth {
            DriftBand::Critical
        } else if growth_percent >= self.config.warning_growth {
            DriftBand::Warning
        } else {
            DriftBand::Normal
        }
    }

    /// Evaluate the window and publish any band breach.
    ///
    /// No-op until at least three samples exist; two points cannot be
    /// distinguished from a single sawtooth edge.
    pub fn evaluate(&mut self, bus: &EventBus) -> Option<DriftReport> {
        if self.window.len() < 3 {
            return None;
        }
        let growth_percent = self.growth_percent();
        let growth_rate = self.growth_rate_bytes_per_min();
        let current_heap = self.window.back().map(|s| s.used_heap).unwrap_or(0);
        let band = self.classify(growth_percent);

        match band {
            DriftBand::Critical => {
                warn!(
                    growth_percent,
                    growth_rate, current_heap, "heap drift critical"
                );
                bus.publish(GovernanceEvent::MemoryCritical {
                    growth_percent,
                    growth_rate_bytes_per_min: growth_rate,
                    current_heap,
                });
                if let Some(hinter) = &self.gc_hinter {
                    if hinter.try_request_gc() {
                        debug!("gc hint accepted by host");
                    }
                }
            }
            DriftBand::Warning => {
                warn!(
                    growth_percent,
                    growth_rate, current_heap, "heap drift warning"
                );
                bus.publish(GovernanceEvent::MemoryWarning {
                    growth_percent,
                    growth_rate_bytes_per_min: growth_rate,
                    current_heap,
                });
            }
            DriftBand::Normal => {}
        }

        Some(DriftReport {
            band,
            growth_percent,
            growth_rate_bytes_per_min: growth_rate,
            current_heap,
        })
    }
}
