//! Budget enforcer: declarative ceilings loaded from an external JSON
//! document, with bounded overrides layered on top.
//!
//! Load failure is never fatal. Consumers always read live values from
//! the enforcer instead of caching them, so a runtime override or mode
//! switch propagates immediately.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, ErrorCode};

/// Cleanup scheduling presets, selected by override or performance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupProfile {
    Idle,
    #[default]
    Moderate,
    Aggressive,
}

impl CleanupProfile {
    /// Maintenance period for the profile, in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        match self {
            CleanupProfile::Idle => 60_000,
            CleanupProfile::Moderate => 30_000,
            CleanupProfile::Aggressive => 10_000,
        }
    }
}

/// The active numeric ceilings, after all override layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveBudgets {
    pub max_dom_nodes: usize,
    pub max_timers: usize,
    /// Heap growth ceiling as a fraction (0.5 == 50%)
    pub max_heap_growth: f64,
    pub fps_emergency_threshold: f64,
    pub max_webgl_programs: usize,
    pub max_webgl_textures: usize,
    pub cleanup: CleanupProfile,
    pub debug: bool,
}

impl Default for ActiveBudgets {
    fn default() -> Self {
        Self {
            max_dom_nodes: 800,
            max_timers: 50,
            max_heap_growth: 0.5,
            fps_emergency_threshold: 20.0,
            max_webgl_programs: 32,
            max_webgl_textures: 64,
            cleanup: CleanupProfile::Moderate,
            debug: false,
        }
    }
}

// External document shape. Unknown fields are ignored and every level
// is optional so a sparse document still merges cleanly over defaults.

#[derive(Debug, Default, Deserialize)]
struct BudgetDocument {
    #[serde(default)]
    budgets: BudgetsSection,
}

#[derive(Debug, Default, Deserialize)]
struct BudgetsSection {
    #[serde(default)]
    performance: PerformanceSection,
}

#[derive(Debug, Default, Deserialize)]
struct PerformanceSection {
    #[serde(default)]
    memory: MemorySection,
    #[serde(default)]
    fps: FpsSection,
    #[serde(default)]
    webgl: WebglSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemorySection {
    #[serde(rename = "maxDOMNodes")]
    max_dom_nodes: Option<usize>,
    /// Percentage string, e.g. `"50%"`
    max_heap_growth: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FpsSection {
    emergency_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebglSection {
    max_programs: Option<usize>,
    max_textures: Option<usize>,
}

/// Parse a `"50%"` style percentage string into a fraction.
fn parse_percent(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    trimmed.parse::<f64>().ok().map(|v| v / 100.0)
}

/// Named bulk presets selectable via `data-performance-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetMode {
    LowPower,
    HighPerformance,
}

impl BudgetMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "low-power" => Some(BudgetMode::LowPower),
            "high-performance" => Some(BudgetMode::HighPerformance),
            _ => None,
        }
    }
}

const OVERRIDE_NODE_RANGE: std::ops::RangeInclusive<i64> = 1..=1000;
const OVERRIDE_TIMER_RANGE: std::ops::RangeInclusive<i64> = 1..=1000;

/// Startup overrides parsed from a query-parameter style string
/// (`max-nodes=200&aggressive-cleanup`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetOverrides {
    pub debug: bool,
    pub canvas_matrix: bool,
    pub aggressive_cleanup: bool,
    pub max_nodes: Option<usize>,
    pub max_timers: Option<usize>,
}

impl BudgetOverrides {
    /// Parse a `key=value&flag` string. Unknown keys are ignored and
    /// out-of-range numeric values are dropped with a warning.
    pub fn parse(query: &str) -> Self {
        let mut params: HashMap<&str, &str> = HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((key, value)) => params.insert(key, value),
                None => params.insert(pair, ""),
            };
        }

        let mut overrides = Self {
            debug: params.contains_key("debug"),
            canvas_matrix: params.contains_key("canvas-matrix")
                || params.get("matrix").copied() == Some("canvas"),
            aggressive_cleanup: params.contains_key("aggressive-cleanup")
                || params.get("cleanup").copied() == Some("aggressive"),
            max_nodes: None,
            max_timers: None,
        };
        overrides.max_nodes = Self::bounded(&params, "max-nodes", OVERRIDE_NODE_RANGE);
        overrides.max_timers = Self::bounded(&params, "max-timers", OVERRIDE_TIMER_RANGE);
        overrides
    }

    fn bounded(
        params: &HashMap<&str, &str>,
        key: &str,
        range: std::ops::RangeInclusive<i64>,
    ) -> Option<usize> {
        let raw = params.get(key)?;
        let value = match raw.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, raw, "ignoring non-numeric budget override");
                return None;
            }
        };
        if !range.contains(&value) {
            warn!(key, value, "ignoring out-of-range budget override");
            return None;
        }
        Some(value as usize)
    }
}

/// Owns the active budget values and applies the override layers in
/// order: loaded config, query/env overrides, named mode shortcut.
pub struct BudgetEnforcer {
    active: ActiveBudgets,
}

impl BudgetEnforcer {
    pub fn new() -> Self {
        Self {
            active: ActiveBudgets::default(),
        }
    }

    /// Load the external JSON document. Missing or malformed documents
    /// fall back to defaults with a warning.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(enforcer) => enforcer,
            Err(err) => {
                warn!(
                    code = err.code(),
                    "budget config unavailable, using defaults: {}",
                    err.message()
                );
                Self::new()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let doc: BudgetDocument =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_document(doc))
    }

    fn from_document(doc: BudgetDocument) -> Self {
        let mut active = ActiveBudgets::default();
        let perf = doc.budgets.performance;

        if let Some(nodes) = perf.memory.max_dom_nodes {
            active.max_dom_nodes = nodes;
        }
        if let Some(raw) = perf.memory.max_heap_growth.as_deref() {
            match parse_percent(raw) {
                Some(fraction) => active.max_heap_growth = fraction,
                None => warn!(raw, "ignoring malformed maxHeapGrowth"),
            }
        }
        if let Some(threshold) = perf.fps.emergency_threshold {
            active.fps_emergency_threshold = threshold;
        }
        if let Some(programs) = perf.webgl.max_programs {
            active.max_webgl_programs = programs;
        }
        if let Some(textures) = perf.webgl.max_textures {
            active.max_webgl_textures = textures;
        }

        Self { active }
    }

    /// Layer 2: validated query/env overrides.
    pub fn apply_overrides(&mut self, overrides: &BudgetOverrides) {
        if overrides.debug {
            self.active.debug = true;
        }
        if overrides.aggressive_cleanup {
            self.active.cleanup = CleanupProfile::Aggressive;
        }
        if let Some(nodes) = overrides.max_nodes {
            info!(nodes, "node budget overridden");
            self.active.max_dom_nodes = nodes;
        }
        if let Some(timers) = overrides.max_timers {
            info!(timers, "timer budget overridden");
            self.active.max_timers = timers;
        }
    }

    /// Layer 3: named mode shortcut, bulk-setting several fields.
    pub fn apply_mode(&mut self, mode: BudgetMode) {
        match mode {
            BudgetMode::LowPower => {
                self.active.max_dom_nodes = self.active.max_dom_nodes.min(400);
                self.active.max_timers = self.active.max_timers.min(20);
                self.active.max_webgl_programs = self.active.max_webgl_programs.min(16);
                self.active.max_webgl_textures = self.active.max_webgl_textures.min(32);
                self.active.cleanup = CleanupProfile::Aggressive;
            }
            BudgetMode::HighPerformance => {
                self.active.cleanup = CleanupProfile::Idle;
            }
        }
        info!(?mode, "budget mode applied");
    }

    // Live reads. Consumers call these every check instead of caching.

    pub fn max_dom_nodes(&self) -> usize {
        self.active.max_dom_nodes
    }

    pub fn max_timers(&self) -> usize {
        self.active.max_timers
    }

    pub fn max_heap_growth(&self) -> f64 {
        self.active.max_heap_growth
    }

    pub fn fps_emergency_threshold(&self) -> f64 {
        self.active.fps_emergency_threshold
    }

    pub fn max_webgl_programs(&self) -> usize {
        self.active.max_webgl_programs
    }

    pub fn max_webgl_textures(&self) -> usize {
        self.active.max_webgl_textures
    }

    pub fn cleanup_interval_ms(&self) -> u64 {
        self.active.cleanup.interval_ms()
    }

    pub fn debug(&self) -> bool {
        self.active.debug
    }

    pub fn snapshot(&self) -> ActiveBudgets {
        self.active
    }
}

impl Default for BudgetEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_merges_over_defaults() {
        let doc: BudgetDocument = serde_json::from_str(
            r#"{
                "budgets": {
                    "performance": {
                        "memory": { "maxDOMNodes": 600, "maxHeapGrowth": "25%" },
                        "fps": { "emergencyThreshold": 15 },
                        "webgl": { "maxPrograms": 24 },
                        "unknownSection": { "ignored": true }
                    }
                },
                "version": 3
            }"#,
        )
        .expect("valid document");
        let enforcer = BudgetEnforcer::from_document(doc);

        assert_eq!(enforcer.max_dom_nodes(), 600);
        assert!((enforcer.max_heap_growth() - 0.25).abs() < f64::EPSILON);
        assert_eq!(enforcer.fps_emergency_threshold(), 15.0);
        assert_eq!(enforcer.max_webgl_programs(), 24);
        // Untouched field keeps its default
        assert_eq!(enforcer.max_webgl_textures(), 64);
    }

    #[test]
    fn test_missing_document_falls_back_to_defaults() {
        let enforcer = BudgetEnforcer::load(Path::new("/nonexistent/budgets.json"));
        assert_eq!(enforcer.snapshot(), ActiveBudgets::default());
    }

    #[test]
    fn test_out_of_range_node_override_is_rejected() {
        let overrides = BudgetOverrides::parse("max-nodes=5000");
        assert_eq!(overrides.max_nodes, None);

        let mut enforcer = BudgetEnforcer::new();
        enforcer.apply_overrides(&overrides);
        assert_eq!(enforcer.max_dom_nodes(), ActiveBudgets::default().max_dom_nodes);
    }

    #[test]
    fn test_in_range_node_override_is_accepted() {
        let overrides = BudgetOverrides::parse("max-nodes=200&debug");
        assert_eq!(overrides.max_nodes, Some(200));
        assert!(overrides.debug);

        let mut enforcer = BudgetEnforcer::new();
        enforcer.apply_overrides(&overrides);
        assert_eq!(enforcer.max_dom_nodes(), 200);
        assert!(enforcer.debug());
    }

    #[test]
    fn test_flag_aliases() {
        let a = BudgetOverrides::parse("cleanup=aggressive&matrix=canvas");
        assert!(a.aggressive_cleanup);
        assert!(a.canvas_matrix);

        let b = BudgetOverrides::parse("aggressive-cleanup&canvas-matrix");
        assert!(b.aggressive_cleanup);
        assert!(b.canvas_matrix);
    }

    #[test]
    fn test_mode_shortcuts() {
        let mut enforcer = BudgetEnforcer::new();
        enforcer.apply_mode(BudgetMode::LowPower);
        assert_eq!(enforcer.max_dom_nodes(), 400);
        assert_eq!(enforcer.cleanup_interval_ms(), 10_000);

        let mut fast = BudgetEnforcer::new();
        fast.apply_mode(BudgetMode::HighPerformance);
        assert_eq!(fast.cleanup_interval_ms(), 60_000);
        assert_eq!(BudgetMode::parse("low-power"), Some(BudgetMode::LowPower));
        assert_eq!(BudgetMode::parse("turbo"), None);
    }

    #[test]
    fn test_percent_parsing() {
        assert_eq!(parse_percent("50%"), Some(0.5));
        assert_eq!(parse_percent(" 5 % "), Some(0.05));
        assert_eq!(parse_percent("lots"), None);
    }
}
