// Event-loop lag probe
//
// Runs on the shared periodic check and compares the actual elapsed time
// since the previous check against the expected period. Sustained lag
// triggers a temporary, bounded performance reduction. The strike counter
// decays by one per healthy check instead of resetting, which keeps a
// system oscillating around the threshold from flapping.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bus::EventBus;
use crate::coordinator::PerfState;
use crate::events::GovernanceEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LagProbeConfig {
    /// Expected interval between checks.
    pub expected_period_ms: u64,
    /// Lag beyond this counts as a strike.
    pub lag_threshold_ms: u64,
    /// Strikes required to trigger a reduction.
    pub trigger_strikes: u32,
    /// Duration of the requested temporary reduction.
    pub reduce_duration_ms: u64,
}

impl Default for LagProbeConfig {
    fn default() -> Self {
        Self {
            expected_period_ms: 100,
            lag_threshold_ms: 50,
            trigger_strikes: 3,
            reduce_duration_ms: 5_000,
        }
    }
}

#[derive(Debug)]
pub struct LagProbe {
    config: LagProbeConfig,
    last_check_ms: Option<u64>,
    strikes: u32,
}

impl LagProbe {
    pub fn new(config: LagProbeConfig) -> Self {
        Self {
            config,
            last_check_ms: None,
            strikes: 0,
        }
    }

    pub fn strikes(&self) -> u32 {
        self.strikes
    }

    /// Periodic check; returns the measured lag in ms once a previous
    /// check exists.
    pub fn check(&mut self, now_ms: u64, bus: &EventBus) -> Option<i64> {
        let last = match self.last_check_ms.replace(now_ms) {
            Some(last) => last,
            None => return None,
        };

        let actual = now_ms.saturating_sub(last) as i64;
        let lag = actual - self.config.expected_period_ms as i64;

        if lag > self.config.lag_threshold_ms as i64 {
            self.strikes += 1;
            if self.strikes >= self.config.trigger_strikes {
                warn!(
                    lag_ms = lag,
                    strikes = self.strikes,
                    "sustained event-loop lag; requesting temporary reduction"
                );
                bus.publish(GovernanceEvent::PerformanceReduce {
                    level: PerfState::S3,
                    duration_ms: self.config.reduce_duration_ms,
                });
                self.strikes = 0;
            }
        } else {
            // Decay, not reset.
            self.strikes = self.strikes.saturating_sub(1);
        }

        Some(lag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_establishes_baseline() {
        let mut probe = LagProbe::new(LagProbeConfig::default());
        let bus = EventBus::default();
        assert!(probe.check(0, &bus).is_none());
        assert_eq!(probe.check(100, &bus), Some(0));
    }

    #[test]
    fn test_three_laggy_checks_trigger_reduction() {
        let mut probe = LagProbe::new(LagProbeConfig::default());
        let bus = EventBus::default();
        probe.check(0, &bus);

        // Each check arrives 180ms after the previous: 80ms lag.
        probe.check(180, &bus);
        probe.check(360, &bus);
        assert_eq!(bus.topic_count("performance:reduce"), 0);
        probe.check(540, &bus);
        assert_eq!(bus.topic_count("performance:reduce"), 1);
        assert_eq!(probe.strikes(), 0, "strikes reset after triggering");
    }

    #[test]
    fn test_strikes_decay_instead_of_reset() {
        let mut probe = LagProbe::new(LagProbeConfig::default());
        let bus = EventBus::default();
        probe.check(0, &bus);
        probe.check(180, &bus);
        probe.check(360, &bus);
        assert_eq!(probe.strikes(), 2);

        // One healthy check decays by one; the accumulated history is not
        // wiped out.
        probe.check(460, &bus);
        assert_eq!(probe.strikes(), 1);

        probe.check(640, &bus);
        probe.check(820, &bus);
        assert_eq!(
            bus.topic_count("performance:reduce"),
            1,
            "decayed strikes plus two laggy checks reach the trigger"
        );
    }

    #[test]
    fn test_reduce_event_is_bounded() {
        let mut probe = LagProbe::new(LagProbeConfig::default());
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        probe.check(0, &bus);
        for i in 1..=3u64 {
            probe.check(i * 200, &bus);
        }
        match rx.try_recv().expect("reduce event") {
            GovernanceEvent::PerformanceReduce { duration_ms, .. } => {
                assert_eq!(duration_ms, 5_000);
            }
            other => panic!("expected reduce, got {:?}", other),
        }
    }
}
