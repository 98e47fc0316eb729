// Global error quarantine
//
// Errors funneled in from the host's top-level error/rejection handler
// are bucketed by substring taxonomy. A bucket that keeps failing is
// quarantined and broadcast so dependent code can disable the component.
// The host-side handler must keep propagating errors normally; this
// registry only counts, it never swallows.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::bus::EventBus;
use crate::events::GovernanceEvent;

/// Errors per bucket before quarantine.
pub const DEFAULT_QUARANTINE_THRESHOLD: u32 = 3;

/// Known subsystem names matched against error messages before the
/// generic categories.
const SUBSYSTEM_MARKERS: [&str; 4] = ["matrix-rain", "beehive", "preloader", "particles"];

/// Animation-library error markers.
const ANIMATION_MARKERS: [&str; 3] = ["tween", "timeline", "gsap"];

/// GPU/render error markers.
const RENDER_MARKERS: [&str; 4] = ["webgl", "shader", "texture", "render"];

/// Classify an error message into its component bucket.
pub fn classify_error(message: &str) -> String {
    let lower = message.to_lowercase();
    for marker in SUBSYSTEM_MARKERS {
        if lower.contains(marker) {
            return marker.to_string();
        }
    }
    if ANIMATION_MARKERS.iter().any(|m| lower.contains(m)) {
        return "animation".to_string();
    }
    if RENDER_MARKERS.iter().any(|m| lower.contains(m)) {
        return "render".to_string();
    }
    "general".to_string()
}

#[derive(Debug)]
pub struct ErrorQuarantine {
    threshold: u32,
    counts: HashMap<String, u32>,
    quarantined: HashSet<String>,
}

impl ErrorQuarantine {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            counts: HashMap::new(),
            quarantined: HashSet::new(),
        }
    }

    /// Record one error occurrence; returns the bucket it landed in.
    pub fn record_error(&mut self, message: &str, bus: &EventBus) -> String {
        let bucket = classify_error(message);
        let count = self.counts.entry(bucket.clone()).or_insert(0);
        *count += 1;

        if *count >= self.threshold && self.quarantined.insert(bucket.clone()) {
            warn!(
                component = %bucket,
                errors = *count,
                "component quarantined after repeated errors"
            );
            bus.publish(GovernanceEvent::ComponentQuarantine {
                component: bucket.clone(),
            });
        }
        bucket
    }

    pub fn is_quarantined(&self, component: &str) -> bool {
        self.quarantined.contains(component)
    }

    pub fn quarantined(&self) -> Vec<String> {
        let mut list: Vec<String> = self.quarantined.iter().cloned().collect();
        list.sort();
        list
    }

    pub fn error_count(&self, component: &str) -> u32 {
        self.counts.get(component).copied().unwrap_or(0)
    }

    /// Lift a quarantine, e.g. after a soft restart replaced the
    /// component. Unknown components are a no-op.
    pub fn release(&mut self, component: &str) {
        self.quarantined.remove(component);
        self.counts.remove(component);
    }

    /// Lift every quarantine and forget the error counts. A soft restart
    /// replaces all components, so none of the history applies anymore.
    pub fn release_all(&mut self) {
        self.quarantined.clear();
        self.counts.clear();
    }
}

impl Default for ErrorQuarantine {
    fn default() -> Self {
        Self::new(DEFAULT_QUARANTINE_THRESHOLD)
    }
}
