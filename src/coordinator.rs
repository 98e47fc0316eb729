//! Performance mode coordinator: the single authoritative ladder state.
//!
//! Every other component only reads the ladder or requests a transition
//! over the bus. Degradation may skip levels; recovery climbs one level
//! at a time and only after the system has been demonstrably healthy for
//! a full stability window. Ratchet down fast, climb back slowly.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::EventBus;
use crate::events::GovernanceEvent;
use crate::monitors::heap::DriftBand;
use crate::predictive::Urgency;

/// Ordered quality ladder, from full quality down to minimal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PerfState {
    /// Full quality, all effects enabled
    #[default]
    S0,
    /// High quality, heaviest post-processing trimmed
    S1,
    /// Normal quality
    S2,
    /// Reduced quality
    S3,
    /// Low quality, essential rendering only
    S4,
    /// Minimal: keep the page alive, nothing more
    S5,
}

impl PerfState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerfState::S0 => "s0",
            PerfState::S1 => "s1",
            PerfState::S2 => "s2",
            PerfState::S3 => "s3",
            PerfState::S4 => "s4",
            PerfState::S5 => "s5",
        }
    }

    /// Human-readable quality tier matching the external contract.
    pub fn label(&self) -> &'static str {
        match self {
            PerfState::S0 => "full",
            PerfState::S1 => "high",
            PerfState::S2 => "normal",
            PerfState::S3 => "reduced",
            PerfState::S4 => "low",
            PerfState::S5 => "minimal",
        }
    }

    /// One step toward full quality. S0 stays S0.
    pub fn step_up(&self) -> PerfState {
        match self {
            PerfState::S0 | PerfState::S1 => PerfState::S0,
            PerfState::S2 => PerfState::S1,
            PerfState::S3 => PerfState::S2,
            PerfState::S4 => PerfState::S3,
            PerfState::S5 => PerfState::S4,
        }
    }

    pub fn is_degraded(&self) -> bool {
        *self != PerfState::S0
    }
}

/// One ladder transition, kept in the bounded coordinator history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: PerfState,
    pub to: PerfState,
    pub cause: String,
    pub timestamp_ms: u64,
}

/// Conditions sampled by the governor each tick and handed to the
/// coordinator for recovery gating.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryInputs {
    pub heartbeat_stable: bool,
    pub heap_band: DriftBand,
    pub anomaly_score: f64,
}

/// When de-escalation is allowed. All three conditions must hold
/// continuously for `stability_window_ms` before each single-level step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    pub stability_window_ms: u64,
    pub max_anomaly_score: f64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            stability_window_ms: 10_000,
            max_anomaly_score: 30.0,
        }
    }
}

const TRANSITION_HISTORY_CAPACITY: usize = 10;

/// Sole writer of the performance ladder. Consumes degradation signals
/// from the bus-facing `observe`, applies recovery in `tick`, and
/// broadcasts every transition as `performance:state:changed`.
pub struct ModeCoordinator {
    state: PerfState,
    policy: RecoveryPolicy,
    history: VecDeque<Transition>,
    /// Start of the current uninterrupted healthy streak.
    stable_since_ms: Option<u64>,
    /// Recovery is held off until a temporary reduction window elapses.
    reduce_until_ms: Option<u64>,
}

impl ModeCoordinator {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            state: PerfState::S0,
            policy,
            history: VecDeque::with_capacity(TRANSITION_HISTORY_CAPACITY),
            stable_since_ms: None,
            reduce_until_ms: None,
        }
    }

    pub fn state(&self) -> PerfState {
        self.state
    }

    pub fn history(&self) -> Vec<Transition> {
        self.history.iter().cloned().collect()
    }

    /// React to a governance event. Degradation signals escalate the
    /// ladder (skipping levels is fine); `performance:restore` requests
    /// an immediate single recovery step.
    pub fn observe(&mut self, event: &GovernanceEvent, now_ms: u64, bus: &EventBus) {
        match event {
            GovernanceEvent::MemoryWarning { .. } => {
                self.escalate_to(PerfState::S2, "memory:warning", now_ms, None, bus);
            }
            GovernanceEvent::MemoryCritical { .. } => {
                self.escalate_to(PerfState::S4, "memory:critical", now_ms, None, bus);
            }
            GovernanceEvent::DomExcessiveGrowth { .. } => {
                self.escalate_to(PerfState::S2, "dom:excessive-growth", now_ms, None, bus);
            }
            GovernanceEvent::PerformanceEmergency { level } => {
                self.escalate_to(*level, "performance:emergency", now_ms, None, bus);
            }
            GovernanceEvent::PerformanceReduce { level, duration_ms } => {
                self.reduce_until_ms = Some(now_ms + duration_ms);
                self.escalate_to(*level, "performance:reduce", now_ms, None, bus);
            }
            GovernanceEvent::PredictiveAction { urgency, alert, .. } => {
                let target = match urgency {
                    Urgency::PrepareDegradation => PerfState::S1,
                    Urgency::ForceDegradation => PerfState::S3,
                    Urgency::EmergencyMeasures => PerfState::S5,
                };
                self.escalate_to(
                    target,
                    "predictive:action",
                    now_ms,
                    Some(alert.current_fps),
                    bus,
                );
            }
            GovernanceEvent::PerformanceRestore => {
                self.step_recovery("performance:restore", now_ms, bus);
            }
            _ => {}
        }
    }

    /// Explicit operator request. Unlike automatic escalation this may
    /// move the ladder in either direction, in one jump.
    pub fn request_state(&mut self, target: PerfState, now_ms: u64, bus: &EventBus) {
        if target == self.state {
            return;
        }
        self.transition(target, "external:request", now_ms, None, bus);
    }

    /// Recovery gating, driven from the shared governance tick. Steps
    /// the ladder up one level once the healthy streak covers a full
    /// stability window, then restarts the streak for the next step.
    pub fn tick(&mut self, now_ms: u64, inputs: &RecoveryInputs, bus: &EventBus) {
        if !self.state.is_degraded() {
            self.stable_since_ms = None;
            return;
        }

        let healthy = inputs.heartbeat_stable
            && inputs.heap_band == DriftBand::Normal
            && inputs.anomaly_score < self.policy.max_anomaly_score;
        if !healthy {
            self.stable_since_ms = None;
            return;
        }

        if let Some(until) = self.reduce_until_ms {
            if now_ms < until {
                return;
            }
            self.reduce_until_ms = None;
        }

        let since = *self.stable_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) >= self.policy.stability_window_ms {
            self.step_recovery("recovery", now_ms, bus);
            self.stable_since_ms = Some(now_ms);
        }
    }

    fn step_recovery(&mut self, cause: &str, now_ms: u64, bus: &EventBus) {
        if !self.state.is_degraded() {
            return;
        }
        let target = self.state.step_up();
        self.transition(target, cause, now_ms, None, bus);
    }

    fn escalate_to(
        &mut self,
        target: PerfState,
        cause: &str,
        now_ms: u64,
        fps: Option<f64>,
        bus: &EventBus,
    ) {
        // Escalation never moves toward full quality.
        if target <= self.state {
            return;
        }
        self.transition(target, cause, now_ms, fps, bus);
        self.stable_since_ms = None;
    }

    fn transition(
        &mut self,
        target: PerfState,
        cause: &str,
        now_ms: u64,
        fps: Option<f64>,
        bus: &EventBus,
    ) {
        let from = self.state;
        self.state = target;

        if self.history.len() >= TRANSITION_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            from,
            to: target,
            cause: cause.to_string(),
            timestamp_ms: now_ms,
        });

        info!(
            from = from.as_str(),
            to = target.as_str(),
            cause,
            "performance state changed"
        );
        bus.publish(GovernanceEvent::StateChanged {
            from,
            to: target,
            cause: cause.to_string(),
            fps,
        });
    }
}

impl Default for ModeCoordinator {
    fn default() -> Self {
        Self::new(RecoveryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> RecoveryInputs {
        RecoveryInputs {
            heartbeat_stable: true,
            heap_band: DriftBand::Normal,
            anomaly_score: 5.0,
        }
    }

    fn unhealthy() -> RecoveryInputs {
        RecoveryInputs {
            heartbeat_stable: false,
            heap_band: DriftBand::Normal,
            anomaly_score: 5.0,
        }
    }

    #[test]
    fn test_emergency_escalation_skips_levels() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();

        coord.observe(
            &GovernanceEvent::PerformanceEmergency {
                level: PerfState::S4,
            },
            1_000,
            &bus,
        );
        assert_eq!(coord.state(), PerfState::S4);
        assert_eq!(bus.topic_count("performance:state:changed"), 1);

        let history = coord.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from, PerfState::S0);
        assert_eq!(history[0].to, PerfState::S4);
        assert_eq!(history[0].cause, "performance:emergency");
    }

    #[test]
    fn test_escalation_never_moves_toward_full() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();

        coord.observe(
            &GovernanceEvent::PerformanceEmergency {
                level: PerfState::S4,
            },
            1_000,
            &bus,
        );
        // A later, weaker signal must not lift the ladder.
        coord.observe(
            &GovernanceEvent::MemoryWarning {
                growth_percent: 0.6,
                growth_rate_bytes_per_min: 0.0,
                current_heap: 100,
            },
            2_000,
            &bus,
        );
        assert_eq!(coord.state(), PerfState::S4);
        assert_eq!(bus.topic_count("performance:state:changed"), 1);
    }

    #[test]
    fn test_recovery_steps_one_level_per_window() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();
        coord.observe(
            &GovernanceEvent::PerformanceEmergency {
                level: PerfState::S4,
            },
            0,
            &bus,
        );

        // Healthy from t=1000; first step lands once the window is covered.
        coord.tick(1_000, &healthy(), &bus);
        coord.tick(6_000, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S4, "window not yet elapsed");

        coord.tick(11_000, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S3, "one step after 10s stable");

        // The next step needs its own full window.
        coord.tick(15_000, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S3);
        coord.tick(21_000, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S2);
    }

    #[test]
    fn test_unhealthy_tick_resets_the_streak() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();
        coord.observe(
            &GovernanceEvent::PerformanceEmergency {
                level: PerfState::S3,
            },
            0,
            &bus,
        );

        coord.tick(1_000, &healthy(), &bus);
        coord.tick(9_000, &unhealthy(), &bus);
        coord.tick(11_500, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S3, "streak restarted at 11.5s");

        coord.tick(21_500, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S2);
    }

    #[test]
    fn test_reduce_window_blocks_recovery_until_elapsed() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();
        coord.observe(
            &GovernanceEvent::PerformanceReduce {
                level: PerfState::S3,
                duration_ms: 5_000,
            },
            0,
            &bus,
        );
        assert_eq!(coord.state(), PerfState::S3);

        // Healthy throughout, but the reduction window holds until t=5000.
        coord.tick(1_000, &healthy(), &bus);
        coord.tick(4_000, &healthy(), &bus);
        coord.tick(6_000, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S3);

        coord.tick(16_500, &healthy(), &bus);
        assert_eq!(coord.state(), PerfState::S2);
    }

    #[test]
    fn test_explicit_restore_steps_immediately() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();
        coord.observe(
            &GovernanceEvent::PerformanceEmergency {
                level: PerfState::S5,
            },
            0,
            &bus,
        );

        coord.observe(&GovernanceEvent::PerformanceRestore, 1_000, &bus);
        assert_eq!(coord.state(), PerfState::S4, "restore steps exactly one");
    }

    #[test]
    fn test_external_request_moves_either_direction() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();

        coord.request_state(PerfState::S5, 0, &bus);
        assert_eq!(coord.state(), PerfState::S5);
        coord.request_state(PerfState::S0, 1_000, &bus);
        assert_eq!(coord.state(), PerfState::S0);
        assert_eq!(coord.history().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::default();
        let mut coord = ModeCoordinator::default();
        for i in 0..15u64 {
            let target = if i % 2 == 0 {
                PerfState::S4
            } else {
                PerfState::S0
            };
            coord.request_state(target, i * 100, &bus);
        }
        assert_eq!(coord.history().len(), TRANSITION_HISTORY_CAPACITY);
    }
}
