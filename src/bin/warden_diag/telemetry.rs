use std::collections::BTreeMap;

use anyhow::{Context, Result};
use frame_warden::governor::StatusReport;
use frame_warden::GovernanceEvent;
use serde::Serialize;
use tokio::sync::broadcast::{error::TryRecvError, Receiver};

/// Folds replayed governance events into a printable summary.
#[derive(Default)]
pub struct EventAggregator {
    total_events: usize,
    lagged_events: usize,
    topics: BTreeMap<String, usize>,
    transitions: Vec<TransitionEntry>,
    alerts: Vec<AlertEntry>,
    quarantined: Vec<String>,
    reloads_requested: usize,
}

impl EventAggregator {
    pub fn record(&mut self, event: GovernanceEvent) {
        self.total_events += 1;
        *self.topics.entry(event.topic()).or_insert(0) += 1;

        match event {
            GovernanceEvent::StateChanged {
                from, to, cause, ..
            } => self.transitions.push(TransitionEntry {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
                cause,
            }),
            GovernanceEvent::PredictiveAlert { level, data } => self.alerts.push(AlertEntry {
                level: level.as_str().to_string(),
                fps: data.current_fps,
                derivative: data.derivative,
                anomaly_score: data.anomaly_score,
            }),
            GovernanceEvent::ComponentQuarantine { component } => {
                self.quarantined.push(component)
            }
            GovernanceEvent::SoftRestart => self.reloads_requested += 1,
            _ => {}
        }
    }

    pub fn lagged(&mut self, skipped: usize) {
        self.lagged_events += skipped;
    }

    pub fn into_report(self, status: StatusReport) -> ReplayReport {
        ReplayReport {
            observed_events: self.total_events,
            lagged_events: self.lagged_events,
            topics: self.topics,
            transitions: self.transitions,
            alerts: self.alerts,
            quarantined: self.quarantined,
            soft_restarts: self.reloads_requested,
            status,
        }
    }
}

/// Drain everything currently buffered on the subscription.
pub fn drain_events(rx: &mut Receiver<GovernanceEvent>, aggregator: &mut EventAggregator) {
    loop {
        match rx.try_recv() {
            Ok(event) => aggregator.record(event),
            Err(TryRecvError::Lagged(skipped)) => aggregator.lagged(skipped as usize),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub observed_events: usize,
    pub lagged_events: usize,
    pub topics: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<AlertEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quarantined: Vec<String>,
    pub soft_restarts: usize,
    pub status: StatusReport,
}

impl ReplayReport {
    pub fn print_json(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing replay report")?;
        println!("{json}");
        Ok(())
    }

    pub fn print_table(&self) {
        println!("Events observed          : {}", self.observed_events);
        if self.lagged_events > 0 {
            println!("Lagged (dropped)         : {}", self.lagged_events);
        }
        println!(
            "Final state              : {} ({})",
            self.status.state.as_str(),
            self.status.state_label
        );
        println!("Current FPS              : {:.1}", self.status.current_fps);
        println!(
            "Alert / anomaly          : {} / {:.0}",
            self.status.alert_level.as_str(),
            self.status.anomaly_score
        );
        println!(
            "Heap growth              : {:.1}%",
            self.status.heap_growth_percent * 100.0
        );

        if self.topics.is_empty() {
            println!("Topics                   : none");
        } else {
            println!("Topics                   :");
            for (topic, count) in &self.topics {
                println!("  - {topic}: {count}");
            }
        }

        if !self.transitions.is_empty() {
            println!("Ladder transitions       :");
            for t in &self.transitions {
                println!("  - {} -> {} ({})", t.from, t.to, t.cause);
            }
        }

        if !self.alerts.is_empty() {
            println!("Predictive alerts        :");
            for a in &self.alerts {
                println!(
                    "  - {} at {:.1} fps (derivative {:.1}, anomaly {:.0})",
                    a.level, a.fps, a.derivative, a.anomaly_score
                );
            }
        }

        if !self.quarantined.is_empty() {
            println!("Quarantined components   : {}", self.quarantined.join(", "));
        }
        if self.soft_restarts > 0 {
            println!("Soft restarts            : {}", self.soft_restarts);
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransitionEntry {
    pub from: String,
    pub to: String,
    pub cause: String,
}

#[derive(Debug, Serialize)]
pub struct AlertEntry {
    pub level: String,
    pub fps: f64,
    pub derivative: f64,
    pub anomaly_score: f64,
}
