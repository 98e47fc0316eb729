// DOM growth monitoring
//
// Tracks total node count against a baseline captured once at startup.
// Mutation batches gate the check so cheap churn (|added - removed| within
// the small-change threshold) is ignored. When growth breaches the hard
// limit the monitor runs a cleanup fallback chain:
//
// 1. Delegated orphan sweeper, when one is wired
// 2. Internal sweep of temporary/overlay-marked elements, excluding the
//    protected denylist (loader, control panel, logo)
// 3. Sweep of elements already detached from the live tree
//
// The baseline is never silently reset; only rebaseline() may change it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::events::GovernanceEvent;
use crate::host::{DomHost, OrphanSweeper};

/// Selectors that must never be removed by the internal sweep.
pub const DEFAULT_PROTECTED_SELECTORS: [&str; 3] = [".loader", "#control-panel", ".logo"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomMonitorConfig {
    /// Mutation batches with |added - removed| at or below this are ignored.
    pub small_change_threshold: i64,
    /// Growth above this logs a warning without forcing cleanup.
    pub warning_growth: i64,
    /// Growth above this triggers the cleanup fallback chain.
    pub max_growth: i64,
    /// Critical selectors excluded from the internal sweep.
    pub protected_selectors: Vec<String>,
}

impl Default for DomMonitorConfig {
    fn default() -> Self {
        Self {
            small_change_threshold: 5,
            warning_growth: 1_000,
            max_growth: 2_000,
            protected_selectors: DEFAULT_PROTECTED_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Outcome of a growth check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomCheckOutcome {
    WithinBudget,
    Warning { growth: i64 },
    ExcessiveGrowth { growth: i64, cleaned: usize },
}

pub struct DomGrowthMonitor {
    config: DomMonitorConfig,
    dom: Arc<dyn DomHost>,
    sweeper: Option<Arc<dyn OrphanSweeper>>,
    baseline: Option<usize>,
}

impl DomGrowthMonitor {
    pub fn new(config: DomMonitorConfig, dom: Arc<dyn DomHost>) -> Self {
        Self {
            config,
            dom,
            sweeper: None,
            baseline: None,
        }
    }

    /// Current live node count, straight from the host.
    pub fn node_count(&self) -> usize {
        self.dom.node_count()
    }

    /// Wire the preferred delegated cleanup collaborator.
    pub fn with_orphan_sweeper(mut self, sweeper: Arc<dyn OrphanSweeper>) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    /// Capture the startup baseline. Idempotent: a baseline captured once
    /// is never overwritten by repeated calls.
    pub fn capture_baseline(&mut self) {
        if self.baseline.is_none() {
            let count = self.dom.node_count();
            info!(baseline = count, "dom baseline captured");
            self.baseline = Some(count);
        }
    }

    /// Explicitly re-capture the baseline at the current node count.
    pub fn rebaseline(&mut self) {
        let count = self.dom.node_count();
        info!(baseline = count, "dom baseline explicitly reset");
        self.baseline = Some(count);
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline
    }

    /// Ingest one mutation batch. Only batches whose net change exceeds
    /// the small-change threshold trigger a full count check.
    pub fn on_mutation_batch(&mut self, added: usize, removed: usize, bus: &EventBus) {
        let net = added as i64 - removed as i64;
        if net.abs() > self.config.small_change_threshold {
            self.check(bus);
        }
    }

    /// Compare current node count against the baseline and remediate on a
    /// hard breach.
    pub fn check(&mut self, bus: &EventBus) -> DomCheckOutcome {
        let baseline = match self.baseline {
            Some(b) => b,
            None => {
                debug!("dom check skipped; baseline not captured yet");
                return DomCheckOutcome::WithinBudget;
            }
        };

        let current = self.dom.node_count();
        let growth = current as i64 - baseline as i64;

        if growth > self.config.max_growth {
            let cleaned = self.run_cleanup_chain();
            let current_after = self.dom.node_count();
            warn!(
                growth,
                current_count = current_after,
                cleaned, "dom growth exceeded budget"
            );
            bus.publish(GovernanceEvent::DomExcessiveGrowth {
                growth,
                current_count: current_after,
                cleaned_count: cleaned,
            });
            DomCheckOutcome::ExcessiveGrowth { growth, cleaned }
        } else if growth > self.config.warning_growth {
            warn!(growth, current_count = current, "dom growth warning");
            DomCheckOutcome::Warning { growth }
        } else {
            DomCheckOutcome::WithinBudget
        }
    }

    /// Delegated sweeper first; if it removes nothing, fall back to the
    /// internal temporary-marker sweep plus detached-node sweep.
    fn run_cleanup_chain(&self) -> usize {
        if let Some(sweeper) = &self.sweeper {
            let swept = sweeper.sweep_orphans();
            if swept > 0 {
                debug!(swept, "delegated orphan sweeper handled cleanup");
                return swept;
            }
        }

        let protected: Vec<&str> = self
            .config
            .protected_selectors
            .iter()
            .map(String::as_str)
            .collect();
        let temporaries = self.dom.remove_temporaries(&protected);
        let detached = self.dom.remove_detached();
        debug!(temporaries, detached, "internal dom sweep complete");
        temporaries + detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDom;

    fn monitor_with(dom: Arc<FakeDom>) -> DomGrowthMonitor {
        DomGrowthMonitor::new(DomMonitorConfig::default(), dom)
    }

    #[test]
    fn test_baseline_captured_once() {
        let dom = Arc::new(FakeDom::new(500));
        let mut monitor = monitor_with(Arc::clone(&dom));
        monitor.capture_baseline();
        dom.add_nodes(100, false);
        monitor.capture_baseline();
        assert_eq!(monitor.baseline(), Some(500), "baseline must not silently move");

        monitor.rebaseline();
        assert_eq!(monitor.baseline(), Some(600), "explicit rebaseline applies");
    }

    #[test]
    fn test_small_mutation_batches_ignored() {
        let dom = Arc::new(FakeDom::new(500));
        let mut monitor = monitor_with(Arc::clone(&dom));
        monitor.capture_baseline();
        let bus = EventBus::default();

        dom.add_nodes(5_000, true);
        // Net change of 3 stays under the small-change threshold, so no
        // check runs even though the tree is far over budget.
        monitor.on_mutation_batch(4, 1, &bus);
        assert_eq!(bus.total_events(), 0);

        monitor.on_mutation_batch(10, 0, &bus);
        assert_eq!(bus.topic_count("dom:excessive-growth"), 1);
    }

    #[test]
    fn test_excessive_growth_sweeps_and_reports() {
        let dom = Arc::new(FakeDom::new(500));
        let mut monitor = monitor_with(Arc::clone(&dom));
        monitor.capture_baseline();
        let bus = EventBus::default();

        // Tree grows to 2600 nodes, 299 of them temp-marked plus one
        // protected overlay element.
        dom.add_nodes(1_800, false);
        dom.add_nodes(299, true);
        dom.add_protected_node(".logo");

        let outcome = monitor.check(&bus);
        match outcome {
            DomCheckOutcome::ExcessiveGrowth { growth, cleaned } => {
                assert_eq!(growth, 2_100);
                assert!(cleaned >= 299, "temp-marked nodes must be swept");
            }
            other => panic!("expected excessive growth, got {:?}", other),
        }
        assert_eq!(
            dom.protected_removed(),
            0,
            "protected selectors must never be removed"
        );
        assert_eq!(bus.topic_count("dom:excessive-growth"), 1);
    }

    #[test]
    fn test_warning_band_does_not_force_cleanup() {
        let dom = Arc::new(FakeDom::new(500));
        let mut monitor = monitor_with(Arc::clone(&dom));
        monitor.capture_baseline();
        let bus = EventBus::default();

        dom.add_nodes(1_500, true);
        let outcome = monitor.check(&bus);
        assert_eq!(outcome, DomCheckOutcome::Warning { growth: 1_500 });
        assert_eq!(bus.total_events(), 0, "warning band emits no bus event");
        assert_eq!(dom.node_count(), 2_000, "no cleanup in warning band");
    }

    #[test]
    fn test_delegated_sweeper_preferred() {
        struct CountingSweeper(std::sync::atomic::AtomicUsize);
        impl OrphanSweeper for CountingSweeper {
            fn sweep_orphans(&self) -> usize {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                250
            }
        }

        let dom = Arc::new(FakeDom::new(500));
        let sweeper = Arc::new(CountingSweeper(std::sync::atomic::AtomicUsize::new(0)));
        let mut monitor = DomGrowthMonitor::new(
            DomMonitorConfig::default(),
            Arc::clone(&dom) as Arc<dyn DomHost>,
        )
        .with_orphan_sweeper(Arc::clone(&sweeper) as Arc<dyn OrphanSweeper>);
        monitor.capture_baseline();
        let bus = EventBus::default();

        dom.add_nodes(2_500, true);
        let outcome = monitor.check(&bus);
        assert_eq!(
            outcome,
            DomCheckOutcome::ExcessiveGrowth {
                growth: 2_500,
                cleaned: 250
            }
        );
        assert_eq!(
            dom.node_count(),
            3_000,
            "internal sweep must not run when the delegate removed nodes"
        );
    }
}
