//! Core governance event types describing the cross-component wire
//! contract carried by the event bus and exposed to diagnostic surfaces.
//!
//! Every cross-component signal in the engine is one of these variants;
//! handlers pattern-match exhaustively instead of duck-typing payload
//! fields. Topic strings are stable and mirror the published contract.

use serde::{Deserialize, Serialize};

use crate::coordinator::PerfState;
use crate::predictive::{AlertData, AlertLevel, Urgency};

/// Governance events broadcast between monitors, the watchdog, the mode
/// coordinator, and any external renderer/preloader subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GovernanceEvent {
    /// Heap drift crossed the warning band
    MemoryWarning {
        growth_percent: f64,
        growth_rate_bytes_per_min: f64,
        current_heap: u64,
    },
    /// Heap drift crossed the critical band
    MemoryCritical {
        growth_percent: f64,
        growth_rate_bytes_per_min: f64,
        current_heap: u64,
    },
    /// DOM node budget breach, with the remediation result
    DomExcessiveGrowth {
        growth: i64,
        current_count: usize,
        cleaned_count: usize,
    },
    /// Watchdog-triggered emergency degradation request
    PerformanceEmergency { level: PerfState },
    /// Temporary throttling request, bounded in duration
    PerformanceReduce { level: PerfState, duration_ms: u64 },
    /// Recovery signal: the temporary reduction window elapsed
    PerformanceRestore,
    /// Authoritative ladder transition (sole writer: mode coordinator)
    StateChanged {
        from: PerfState,
        to: PerfState,
        cause: String,
        fps: Option<f64>,
    },
    /// Predictive alert firing
    PredictiveAlert { level: AlertLevel, data: AlertData },
    /// Suggested remediation matching the alert urgency
    PredictiveAction {
        recommended_action: String,
        urgency: Urgency,
        alert: AlertData,
    },
    /// An error bucket reached its threshold and was quarantined
    ComponentQuarantine { component: String },
    /// Request for renderers to recreate GPU resources after a restore
    WebglRebuild { context_id: u64 },
    /// Request to restart the animation loop
    RafRestart,
    /// Request for an in-page soft restart
    SoftRestart,
}

impl GovernanceEvent {
    /// Stable topic name for this event, used for filtering, counters,
    /// and diagnostic output.
    pub fn topic(&self) -> String {
        match self {
            GovernanceEvent::MemoryWarning { .. } => "memory:warning".to_string(),
            GovernanceEvent::MemoryCritical { .. } => "memory:critical".to_string(),
            GovernanceEvent::DomExcessiveGrowth { .. } => "dom:excessive-growth".to_string(),
            GovernanceEvent::PerformanceEmergency { .. } => "performance:emergency".to_string(),
            GovernanceEvent::PerformanceReduce { .. } => "performance:reduce".to_string(),
            GovernanceEvent::PerformanceRestore => "performance:restore".to_string(),
            GovernanceEvent::StateChanged { .. } => "performance:state:changed".to_string(),
            GovernanceEvent::PredictiveAlert { level, .. } => {
                format!("predictive:alert:{}", level.as_str())
            }
            GovernanceEvent::PredictiveAction { urgency, .. } => {
                format!("predictive:action:{}", urgency.as_str())
            }
            GovernanceEvent::ComponentQuarantine { .. } => "component:quarantine".to_string(),
            GovernanceEvent::WebglRebuild { .. } => "webgl:rebuild".to_string(),
            GovernanceEvent::RafRestart => "raf:restart".to_string(),
            GovernanceEvent::SoftRestart => "app:soft-restart".to_string(),
        }
    }

    /// True for events that request degradation or signal a critical
    /// condition the mode coordinator must react to.
    pub fn is_degradation_signal(&self) -> bool {
        matches!(
            self,
            GovernanceEvent::MemoryCritical { .. }
                | GovernanceEvent::DomExcessiveGrowth { .. }
                | GovernanceEvent::PerformanceEmergency { .. }
                | GovernanceEvent::PerformanceReduce { .. }
                | GovernanceEvent::PredictiveAlert {
                    level: AlertLevel::Critical | AlertLevel::Emergency,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names_match_contract() {
        let event = GovernanceEvent::MemoryWarning {
            growth_percent: 0.6,
            growth_rate_bytes_per_min: 1024.0,
            current_heap: 100,
        };
        assert_eq!(event.topic(), "memory:warning");

        let event = GovernanceEvent::PredictiveAlert {
            level: AlertLevel::Emergency,
            data: AlertData::default(),
        };
        assert_eq!(event.topic(), "predictive:alert:emergency");

        let event = GovernanceEvent::PredictiveAction {
            recommended_action: "reduce_particle_count".to_string(),
            urgency: Urgency::ForceDegradation,
            alert: AlertData::default(),
        };
        assert_eq!(event.topic(), "predictive:action:force_degradation");

        assert_eq!(GovernanceEvent::SoftRestart.topic(), "app:soft-restart");
    }

    #[test]
    fn test_serde_round_trip_is_tagged() {
        let event = GovernanceEvent::DomExcessiveGrowth {
            growth: 2100,
            current_count: 3100,
            cleaned_count: 42,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"type\":\"dom_excessive_growth\""));
        let back: GovernanceEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn test_degradation_signal_classification() {
        assert!(GovernanceEvent::PerformanceEmergency {
            level: PerfState::S4
        }
        .is_degradation_signal());
        assert!(!GovernanceEvent::PerformanceRestore.is_degradation_signal());
        assert!(!GovernanceEvent::MemoryWarning {
            growth_percent: 0.6,
            growth_rate_bytes_per_min: 0.0,
            current_heap: 0,
        }
        .is_degradation_signal());
    }
}
