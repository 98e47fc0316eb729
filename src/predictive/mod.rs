// Predictive alerting engine
//
// Ingests FPS samples and derives three early-warning signals: a
// derivative series (FPS change per second, averaged over a fixed window
// of samples), a trend classification with confidence, and an anomaly
// score blending baseline deviation, sudden drops, derivative magnitude,
// and variance. Alerts ratchet upward through none/warning/critical/
// emergency; downgrades only happen through an explicit reset issued by
// whoever observes recovery. Firing is rate-limited by a cooldown,
// except that emergency-magnitude derivatives always fire.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::events::GovernanceEvent;
use crate::sampler::{MetricSample, SampleWindow};

pub mod patterns;

pub use patterns::{
    similarity, PatternFeatures, PatternOutcome, PatternSeverity, PatternTable,
    PerformancePattern, PATTERN_TABLE_CAPACITY, SIMILARITY_THRESHOLD,
};

/// Alert severity ladder. Ordering is meaningful: escalation compares
/// levels directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    None,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::None => "none",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        }
    }

    fn escalated(self) -> Self {
        match self {
            AlertLevel::None => AlertLevel::Warning,
            AlertLevel::Warning => AlertLevel::Critical,
            AlertLevel::Critical | AlertLevel::Emergency => AlertLevel::Emergency,
        }
    }
}

/// Urgency tiers attached to proactive-action events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    PrepareDegradation,
    ForceDegradation,
    EmergencyMeasures,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::PrepareDegradation => "prepare_degradation",
            Urgency::ForceDegradation => "force_degradation",
            Urgency::EmergencyMeasures => "emergency_measures",
        }
    }
}

/// FPS trend over the recent derivative series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Declining,
    #[default]
    Stable,
    Improving,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Declining => "declining",
            TrendDirection::Stable => "stable",
            TrendDirection::Improving => "improving",
        }
    }
}

/// Full assessment payload attached to alerts and actions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AlertData {
    pub current_fps: f64,
    /// Latest derivative, FPS per second.
    pub derivative: f64,
    /// Anomaly score, 0-100.
    pub anomaly_score: f64,
    pub trend: TrendDirection,
    /// Trend confidence, 0-1.
    pub confidence: f64,
    /// Estimated milliseconds until FPS reaches the critical floor; only
    /// present while declining with sufficient confidence.
    pub time_to_degrade_ms: Option<u64>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveConfig {
    pub history_capacity: usize,
    /// Samples accumulated per derivative computation.
    pub derivative_window: usize,
    /// Derivatives retained for trend analysis.
    pub derivative_history: usize,
    pub baseline_fps: f64,
    /// Deviation from baseline that starts contributing to the anomaly
    /// score.
    pub baseline_deviation_threshold: f64,
    pub warning_derivative: f64,
    pub critical_derivative: f64,
    pub emergency_derivative: f64,
    pub anomaly_warning_score: f64,
    pub anomaly_critical_score: f64,
    /// FPS floor used for time-to-degrade estimation.
    pub critical_fps_floor: f64,
    pub cooldown_ms: u64,
    /// Sliding buffer size for pattern extraction.
    pub pattern_window: usize,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            history_capacity: 300,
            derivative_window: 10,
            derivative_history: 30,
            baseline_fps: 60.0,
            baseline_deviation_threshold: 10.0,
            warning_derivative: -3.0,
            critical_derivative: -8.0,
            emergency_derivative: -15.0,
            anomaly_warning_score: 70.0,
            anomaly_critical_score: 90.0,
            critical_fps_floor: 20.0,
            cooldown_ms: 5_000,
            pattern_window: 30,
        }
    }
}

/// Firing statistics for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictiveStats {
    pub alerts_fired: u64,
    pub warnings: u64,
    pub criticals: u64,
    pub emergencies: u64,
    pub patterns_learned: u64,
    pub patterns_matched: u64,
}

pub struct PredictiveEngine {
    config: PredictiveConfig,
    history: SampleWindow,
    derivative_accum: Vec<MetricSample>,
    derivatives: SampleWindow,
    pattern_buffer: Vec<MetricSample>,
    patterns: PatternTable,
    level: AlertLevel,
    last_alert_ms: Option<u64>,
    last_assessment: Option<AlertData>,
    stats: PredictiveStats,
}

impl PredictiveEngine {
    pub fn new(config: PredictiveConfig) -> Self {
        let history = SampleWindow::new(config.history_capacity);
        let derivatives = SampleWindow::new(config.derivative_history);
        Self {
            config,
            history,
            derivative_accum: Vec::new(),
            derivatives,
            pattern_buffer: Vec::new(),
            patterns: PatternTable::new(),
            level: AlertLevel::None,
            last_alert_ms: None,
            last_assessment: None,
            stats: PredictiveStats::default(),
        }
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    pub fn stats(&self) -> &PredictiveStats {
        &self.stats
    }

    pub fn pattern_table(&self) -> &PatternTable {
        &self.patterns
    }

    /// Last computed assessment, fired or not. Used by the coordinator's
    /// recovery gating.
    pub fn last_assessment(&self) -> Option<&AlertData> {
        self.last_assessment.as_ref()
    }

    /// Downgrade path: callers observing recovery conditions reset the
    /// alert state explicitly. The engine never lowers it on its own.
    pub fn reset_alert(&mut self) {
        if self.level != AlertLevel::None {
            debug!(from = self.level.as_str(), "alert state reset after recovery");
        }
        self.level = AlertLevel::None;
        self.last_alert_ms = None;
    }

    /// Ingest one FPS sample; may fire an alert.
    pub fn record_fps(&mut self, fps: f64, now_ms: u64, bus: &EventBus) -> Option<AlertLevel> {
        let sample = MetricSample::new(fps, now_ms);
        self.history.push(sample);

        self.derivative_accum.push(sample);
        let mut fresh_derivative = false;
        if self.derivative_accum.len() >= self.config.derivative_window {
            if let Some(derivative) = average_derivative(&self.derivative_accum) {
                self.derivatives.push(MetricSample::new(derivative, now_ms));
                fresh_derivative = true;
            }
            self.derivative_accum.clear();
        }

        self.pattern_buffer.push(sample);
        if self.pattern_buffer.len() >= self.config.pattern_window {
            if let Some(features) = PatternFeatures::extract(&self.pattern_buffer) {
                match self.patterns.observe(features, now_ms) {
                    PatternOutcome::Learned { .. } => self.stats.patterns_learned += 1,
                    PatternOutcome::Matched { .. } => self.stats.patterns_matched += 1,
                    PatternOutcome::Discarded => {}
                }
            }
            self.pattern_buffer.clear();
        }

        // Alert decisions are driven by the derivative series; between
        // derivative computations there is nothing new to decide on.
        if fresh_derivative {
            self.evaluate(fps, now_ms, bus)
        } else {
            None
        }
    }

    fn evaluate(&mut self, current_fps: f64, now_ms: u64, bus: &EventBus) -> Option<AlertLevel> {
        let derivative = self.derivatives.last()?.value;

        let (trend, confidence) = self.classify_trend();
        let anomaly_score = self.anomaly_score(current_fps, derivative);
        let time_to_degrade_ms =
            self.time_to_degrade(current_fps, derivative, trend, confidence);

        let data = AlertData {
            current_fps,
            derivative,
            anomaly_score,
            trend,
            confidence,
            time_to_degrade_ms,
            timestamp_ms: now_ms,
        };
        self.last_assessment = Some(data);

        // Priority order: derivative classification first, then at most
        // one anomaly-driven promotion, then at most one trend-driven
        // promotion.
        let mut candidate = if derivative <= self.config.emergency_derivative {
            AlertLevel::Emergency
        } else if derivative <= self.config.critical_derivative {
            AlertLevel::Critical
        } else if derivative <= self.config.warning_derivative {
            AlertLevel::Warning
        } else {
            AlertLevel::None
        };

        if anomaly_score > self.config.anomaly_critical_score && candidate == AlertLevel::Warning {
            candidate = AlertLevel::Critical;
        } else if anomaly_score > self.config.anomaly_warning_score
            && candidate == AlertLevel::None
        {
            candidate = AlertLevel::Warning;
        }

        if trend == TrendDirection::Declining && confidence > 0.8 {
            candidate = candidate.escalated();
        }

        if candidate == AlertLevel::None || candidate < self.level {
            // Never downgrade from here; recovery resets explicitly.
            return None;
        }

        let bypass_cooldown = derivative <= self.config.emergency_derivative;
        let cooldown_elapsed = self
            .last_alert_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.cooldown_ms)
            .unwrap_or(true);
        let level_changed = candidate != self.level;

        if !(level_changed || cooldown_elapsed || bypass_cooldown) {
            return None;
        }

        self.fire(candidate, data, bus);
        Some(candidate)
    }

    fn fire(&mut self, level: AlertLevel, data: AlertData, bus: &EventBus) {
        self.level = level;
        self.last_alert_ms = Some(data.timestamp_ms);
        self.stats.alerts_fired += 1;

        let (urgency, recommended_action) = match level {
            AlertLevel::Warning => {
                self.stats.warnings += 1;
                (Urgency::PrepareDegradation, "trim_noncritical_effects")
            }
            AlertLevel::Critical => {
                self.stats.criticals += 1;
                (Urgency::ForceDegradation, "drop_to_low_quality")
            }
            AlertLevel::Emergency => {
                self.stats.emergencies += 1;
                (Urgency::EmergencyMeasures, "halt_heavy_effects")
            }
            AlertLevel::None => return,
        };

        warn!(
            level = level.as_str(),
            fps = data.current_fps,
            derivative = data.derivative,
            anomaly_score = data.anomaly_score,
            "predictive alert fired"
        );
        bus.publish(GovernanceEvent::PredictiveAlert { level, data });
        bus.publish(GovernanceEvent::PredictiveAction {
            recommended_action: recommended_action.to_string(),
            urgency,
            alert: data,
        });
    }

    /// Trend over the last five derivatives with a confidence in [0, 1].
    fn classify_trend(&self) -> (TrendDirection, f64) {
        let recent = self.derivatives.tail(5);
        if recent.is_empty() {
            return (TrendDirection::Stable, 0.0);
        }
        let avg = recent.iter().map(|s| s.value).sum::<f64>() / recent.len() as f64;
        let variance = recent
            .iter()
            .map(|s| (s.value - avg).powi(2))
            .sum::<f64>()
            / recent.len() as f64;

        let direction = if avg < -1.0 {
            TrendDirection::Declining
        } else if avg > 1.0 {
            TrendDirection::Improving
        } else {
            TrendDirection::Stable
        };
        let consistency = (1.0 - variance / 10.0).max(0.0);
        let confidence = (avg.abs() / 10.0 * consistency).min(1.0);
        (direction, confidence)
    }

    /// Anomaly score 0-100: the mean of the contributing normalized
    /// factors, scaled. Factors that do not trip their threshold do not
    /// contribute at all.
    fn anomaly_score(&self, current_fps: f64, derivative: f64) -> f64 {
        let mut factors: Vec<f64> = Vec::with_capacity(4);

        let deviation = (self.config.baseline_fps - current_fps).abs();
        if deviation > self.config.baseline_deviation_threshold {
            factors.push((deviation / self.config.baseline_fps).min(1.0));
        }

        let last5 = self.history.tail(5);
        let max_drop = last5
            .windows(2)
            .map(|pair| pair[0].value - pair[1].value)
            .fold(0.0f64, f64::max);
        if max_drop > 10.0 {
            factors.push((max_drop / 30.0).min(1.0));
        }

        if derivative.abs() > 2.0 {
            factors.push((derivative.abs() / 20.0).min(1.0));
        }

        let recent = self.history.tail(30);
        if recent.len() >= 2 {
            let mean = recent.iter().map(|s| s.value).sum::<f64>() / recent.len() as f64;
            let variance = recent
                .iter()
                .map(|s| (s.value - mean).powi(2))
                .sum::<f64>()
                / recent.len() as f64;
            if variance > 25.0 {
                factors.push((variance / 100.0).min(1.0));
            }
        }

        if factors.is_empty() {
            0.0
        } else {
            factors.iter().sum::<f64>() / factors.len() as f64 * 100.0
        }
    }

    /// Milliseconds until FPS hits the critical floor at the current rate
    /// of decline. Undefined unless declining with confidence >= 0.3.
    fn time_to_degrade(
        &self,
        current_fps: f64,
        derivative: f64,
        trend: TrendDirection,
        confidence: f64,
    ) -> Option<u64> {
        if trend != TrendDirection::Declining || confidence < 0.3 {
            return None;
        }
        if derivative >= 0.0 || current_fps <= self.config.critical_fps_floor {
            return None;
        }
        let seconds = ((current_fps - self.config.critical_fps_floor) / derivative).abs();
        Some((seconds * 1000.0) as u64)
    }
}

/// Average Δfps/Δt (per second) over consecutive sample pairs, skipping
/// zero-duration gaps. None when no usable pair exists.
fn average_derivative(samples: &[MetricSample]) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for pair in samples.windows(2) {
        let dt_ms = pair[1].timestamp_ms.saturating_sub(pair[0].timestamp_ms);
        if dt_ms == 0 {
            continue;
        }
        sum += (pair[1].value - pair[0].value) / (dt_ms as f64 / 1000.0);
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
