//! Watchdog & recovery controller.
//!
//! Four independent liveness monitors sharing one fixed-period check:
//! animation-frame heartbeat, event-loop lag probe, GPU context recovery,
//! and the global error quarantine. The watchdog owns liveness, not
//! policy: every response is an event the mode coordinator (or the host)
//! acts on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bus::EventBus;
use crate::host::HostActions;

pub mod context_loss;
pub mod heartbeat;
pub mod lag;
pub mod quarantine;

pub use context_loss::{ContextRecovery, ContextRecoveryConfig};
pub use heartbeat::{HeartbeatConfig, RafHeartbeat, StallResponse};
pub use lag::{LagProbe, LagProbeConfig};
pub use quarantine::{classify_error, ErrorQuarantine, DEFAULT_QUARANTINE_THRESHOLD};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Period of the shared check cycle.
    pub check_period_ms: u64,
    pub heartbeat: HeartbeatConfig,
    pub lag: LagProbeConfig,
    pub recovery: ContextRecoveryConfig,
    pub quarantine_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_period_ms: 100,
            heartbeat: HeartbeatConfig::default(),
            lag: LagProbeConfig::default(),
            recovery: ContextRecoveryConfig::default(),
            quarantine_threshold: DEFAULT_QUARANTINE_THRESHOLD,
        }
    }
}

/// Snapshot of watchdog state for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub active: bool,
    pub consecutive_stalls: u32,
    pub lag_strikes: u32,
    pub gpu_recovering: bool,
    pub gpu_recovery_attempts: u32,
    pub quarantined: Vec<String>,
}

pub struct Watchdog {
    active: bool,
    heartbeat: RafHeartbeat,
    lag: LagProbe,
    recovery: ContextRecovery,
    quarantine: ErrorQuarantine,
    host: Arc<dyn HostActions>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, host: Arc<dyn HostActions>) -> Self {
        Self {
            active: false,
            heartbeat: RafHeartbeat::new(config.heartbeat),
            lag: LagProbe::new(config.lag),
            recovery: ContextRecovery::new(config.recovery),
            quarantine: ErrorQuarantine::new(config.quarantine_threshold),
            host,
        }
    }

    /// Idempotent: starting a running watchdog is a no-op.
    pub fn start(&mut self) {
        if !self.active {
            info!("watchdog active");
            self.active = true;
        }
    }

    /// Idempotent: stopping a stopped watchdog is a no-op.
    pub fn stop(&mut self) {
        if self.active {
            info!("watchdog stopped");
            self.active = false;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Record one animation-frame callback.
    pub fn beat(&mut self, now_ms: u64) {
        self.heartbeat.beat(now_ms);
    }

    /// True when the heartbeat is fresh; used for recovery gating.
    pub fn heartbeat_stable(&self, now_ms: u64) -> bool {
        self.heartbeat.is_stable(now_ms)
    }

    /// One shared check cycle across all monitors.
    pub fn check(&mut self, now_ms: u64, bus: &EventBus) {
        if !self.active {
            return;
        }
        let visible = self.host.is_page_visible();
        let stall = self.heartbeat.check(now_ms, visible, bus);
        if stall != StallResponse::Healthy {
            debug!(?stall, "heartbeat check result");
        }
        self.lag.check(now_ms, bus);
        self.recovery.tick(now_ms, bus, &self.host);
    }

    pub fn on_context_lost(&mut self, now_ms: u64) {
        self.recovery.on_context_lost(now_ms);
    }

    pub fn on_context_restored(&mut self, context_id: u64, bus: &EventBus) {
        self.recovery.on_context_restored(context_id, bus);
    }

    /// Funnel for the host's top-level error handler. Returns the bucket
    /// the error was filed under.
    pub fn record_error(&mut self, message: &str, bus: &EventBus) -> String {
        self.quarantine.record_error(message, bus)
    }

    pub fn is_quarantined(&self, component: &str) -> bool {
        self.quarantine.is_quarantined(component)
    }

    pub fn release_quarantine(&mut self, component: &str) {
        self.quarantine.release(component);
    }

    pub fn release_all_quarantines(&mut self) {
        self.quarantine.release_all();
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            active: self.active,
            consecutive_stalls: self.heartbeat.consecutive_stalls(),
            lag_strikes: self.lag.strikes(),
            gpu_recovering: self.recovery.is_recovering(),
            gpu_recovery_attempts: self.recovery.attempts(),
            quarantined: self.quarantine.quarantined(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn watchdog() -> (Watchdog, Arc<FakeHost>) {
        let fake = Arc::new(FakeHost::new());
        let dog = Watchdog::new(
            WatchdogConfig::default(),
            Arc::clone(&fake) as Arc<dyn HostActions>,
        );
        (dog, fake)
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (mut dog, _) = watchdog();
        assert!(!dog.is_active());
        dog.start();
        dog.start();
        assert!(dog.is_active());
        dog.stop();
        dog.stop();
        assert!(!dog.is_active());
    }

    #[test]
    fn test_inactive_watchdog_emits_nothing() {
        let (mut dog, _) = watchdog();
        let bus = EventBus::default();
        dog.beat(0);
        // Not started: even a long stall produces no events.
        dog.check(10_000, &bus);
        assert_eq!(bus.total_events(), 0);
    }

    #[test]
    fn test_stall_scenario_through_controller() {
        let (mut dog, _) = watchdog();
        let bus = EventBus::default();
        dog.start();
        dog.beat(0);
        dog.check(100, &bus);

        // Frames stop; checks continue every 100ms. The 300ms mark is the
        // first check past the 250ms threshold.
        dog.check(200, &bus);
        dog.check(300, &bus);
        assert_eq!(bus.topic_count("raf:restart"), 1);

        dog.check(400, &bus);
        dog.check(500, &bus);
        assert_eq!(bus.topic_count("performance:emergency"), 1);
        assert_eq!(
            bus.topic_count("raf:restart"),
            2,
            "severe response re-requests the loop restart"
        );
    }

    #[test]
    fn test_hidden_page_suppresses_stall_responses() {
        let (mut dog, fake) = watchdog();
        let bus = EventBus::default();
        dog.start();
        dog.beat(0);
        fake.set_visible(false);
        dog.check(5_000, &bus);
        dog.check(10_000, &bus);
        assert_eq!(bus.topic_count("raf:restart"), 0);
    }

    #[test]
    fn test_status_snapshot() {
        let (mut dog, _) = watchdog();
        let bus = EventBus::default();
        dog.start();
        dog.on_context_lost(0);
        for _ in 0..3 {
            dog.record_error("shader exploded", &bus);
        }
        let status = dog.status();
        assert!(status.active);
        assert!(status.gpu_recovering);
        assert_eq!(status.quarantined, vec!["render".to_string()]);
    }
}
