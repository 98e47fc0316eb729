// Animation-frame heartbeat liveness check
//
// The render loop reports each scheduled frame via beat(); the periodic
// check flags a stall when no beat arrived within the threshold while the
// page is visible. First stall gets a light response (restart the loop),
// the third consecutive stall gets the severe response exactly once.
// A fresh beat inside the threshold resets the counter.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::EventBus;
use crate::coordinator::PerfState;
use crate::events::GovernanceEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub stall_threshold_ms: u64,
    /// Consecutive stalled checks before the severe response.
    pub severe_after_stalls: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            stall_threshold_ms: 250,
            severe_after_stalls: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallResponse {
    Healthy,
    /// First stall: ask for an animation-loop restart.
    Light,
    /// Third consecutive stall: emergency reduction plus restart.
    Severe,
    /// Stall count beyond severe; already escalated, nothing new emitted.
    AlreadyEscalated,
}

#[derive(Debug)]
pub struct RafHeartbeat {
    config: HeartbeatConfig,
    last_beat_ms: Option<u64>,
    consecutive_stalls: u32,
}

impl RafHeartbeat {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_beat_ms: None,
            consecutive_stalls: 0,
        }
    }

    /// Record one animation-frame callback.
    pub fn beat(&mut self, now_ms: u64) {
        self.last_beat_ms = Some(now_ms);
    }

    pub fn consecutive_stalls(&self) -> u32 {
        self.consecutive_stalls
    }

    /// Whether the last observed beat is within the stall threshold.
    pub fn is_stable(&self, now_ms: u64) -> bool {
        match self.last_beat_ms {
            Some(last) => now_ms.saturating_sub(last) <= self.config.stall_threshold_ms,
            None => false,
        }
    }

    /// Periodic liveness check.
    pub fn check(&mut self, now_ms: u64, page_visible: bool, bus: &EventBus) -> StallResponse {
        if !page_visible {
            // A hidden page legitimately stops animation frames.
            self.consecutive_stalls = 0;
            self.last_beat_ms = Some(now_ms);
            return StallResponse::Healthy;
        }

        let last = match self.last_beat_ms {
            Some(last) => last,
            None => {
                // First check establishes the baseline.
                self.last_beat_ms = Some(now_ms);
                return StallResponse::Healthy;
            }
        };

        if now_ms.saturating_sub(last) <= self.config.stall_threshold_ms {
            self.consecutive_stalls = 0;
            return StallResponse::Healthy;
        }

        self.consecutive_stalls += 1;
        if self.consecutive_stalls == 1 {
            warn!(
                stalled_ms = now_ms.saturating_sub(last),
                "animation loop stall detected; requesting restart"
            );
            bus.publish(GovernanceEvent::RafRestart);
            StallResponse::Light
        } else if self.consecutive_stalls == self.config.severe_after_stalls {
            warn!(
                consecutive = self.consecutive_stalls,
                "animation loop still stalled; escalating to emergency reduction"
            );
            bus.publish(GovernanceEvent::PerformanceEmergency {
                level: PerfState::S4,
            });
            bus.publish(GovernanceEvent::RafRestart);
            StallResponse::Severe
        } else {
            StallResponse::AlreadyEscalated
        }
    }
}
