// Lightweight pattern learning over short performance-feature windows
//
// A feature vector is extracted each time the sliding sample buffer
// fills. Significant vectors that do not resemble any stored pattern are
// learned; re-matches increment the stored pattern's occurrence count.
// The table is bounded, evicting oldest-first.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sampler::MetricSample;

/// Patterns kept before oldest-first eviction.
pub const PATTERN_TABLE_CAPACITY: usize = 20;

/// Minimum mean per-feature similarity to count as a re-match.
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Feature vector summarizing a window of FPS samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternFeatures {
    pub avg_fps: f64,
    pub fps_variance: f64,
    /// Net FPS change across the window; negative means declining.
    pub trend_direction: f64,
    /// Mean absolute frame-to-frame FPS change.
    pub volatility: f64,
    /// Successive drops larger than 5 FPS.
    pub drop_count: u32,
    /// Largest single successive drop.
    pub max_drop: f64,
}

impl PatternFeatures {
    /// Extract features from a sample window. Needs at least two samples.
    pub fn extract(samples: &[MetricSample]) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }
        let n = samples.len() as f64;
        let avg_fps = samples.iter().map(|s| s.value).sum::<f64>() / n;
        let fps_variance =
            samples.iter().map(|s| (s.value - avg_fps).powi(2)).sum::<f64>() / n;

        let mut volatility_sum = 0.0;
        let mut drop_count = 0u32;
        let mut max_drop = 0.0f64;
        for pair in samples.windows(2) {
            let delta = pair[1].value - pair[0].value;
            volatility_sum += delta.abs();
            if delta < -5.0 {
                drop_count += 1;
            }
            if -delta > max_drop {
                max_drop = -delta;
            }
        }

        Some(Self {
            avg_fps,
            fps_variance,
            trend_direction: samples[samples.len() - 1].value - samples[0].value,
            volatility: volatility_sum / (n - 1.0),
            drop_count,
            max_drop,
        })
    }

    /// Whether this window is worth remembering at all.
    pub fn is_significant(&self) -> bool {
        self.fps_variance > 20.0
            || self.trend_direction.abs() > 10.0
            || self.drop_count > 3
            || self.volatility > 5.0
    }

    fn as_vector(&self) -> [f64; 6] {
        [
            self.avg_fps,
            self.fps_variance,
            self.trend_direction,
            self.volatility,
            self.drop_count as f64,
            self.max_drop,
        ]
    }
}

/// Mean per-feature normalized similarity in [0, 1]. Symmetric by
/// construction: each feature contributes 1 - |a-b| / max(|a|, |b|, 1).
pub fn similarity(a: &PatternFeatures, b: &PatternFeatures) -> f64 {
    let va = a.as_vector();
    let vb = b.as_vector();
    let mut total = 0.0;
    for (x, y) in va.iter().zip(vb.iter()) {
        let scale = x.abs().max(y.abs()).max(1.0);
        total += 1.0 - (x - y).abs() / scale;
    }
    total / va.len() as f64
}

/// Coarse severity assigned to a learned pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSeverity {
    Low,
    Medium,
    High,
}

impl PatternFeatures {
    pub fn severity(&self) -> PatternSeverity {
        if self.max_drop > 15.0 || self.fps_variance > 60.0 {
            PatternSeverity::High
        } else if self.drop_count > 3 || self.trend_direction < -10.0 {
            PatternSeverity::Medium
        } else {
            PatternSeverity::Low
        }
    }
}

/// A learned pattern with its occurrence bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformancePattern {
    pub id: String,
    pub features: PatternFeatures,
    pub created_at_ms: u64,
    pub occurrences: u32,
    pub severity: PatternSeverity,
}

/// Result of feeding one feature vector to the table.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternOutcome {
    /// Matched an existing pattern; occurrence count incremented.
    Matched { id: String, occurrences: u32 },
    /// Significant and novel; stored.
    Learned { id: String },
    /// Neither matched nor significant enough to store.
    Discarded,
}

/// Bounded table of learned patterns, oldest evicted at capacity.
pub struct PatternTable {
    patterns: Vec<PerformancePattern>,
    next_id: u64,
}

impl PatternTable {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[PerformancePattern] {
        &self.patterns
    }

    /// Match against stored patterns first; learn only significant
    /// novel vectors.
    pub fn observe(&mut self, features: PatternFeatures, now_ms: u64) -> PatternOutcome {
        let mut best: Option<(usize, f64)> = None;
        for (idx, pattern) in self.patterns.iter().enumerate() {
            let score = similarity(&features, &pattern.features);
            if score >= SIMILARITY_THRESHOLD
                && best.map(|(_, s)| score > s).unwrap_or(true)
            {
                best = Some((idx, score));
            }
        }

        if let Some((idx, score)) = best {
            let pattern = &mut self.patterns[idx];
            pattern.occurrences += 1;
            debug!(
                id = %pattern.id,
                score,
                occurrences = pattern.occurrences,
                "performance pattern re-matched"
            );
            return PatternOutcome::Matched {
                id: pattern.id.clone(),
                occurrences: pattern.occurrences,
            };
        }

        if !features.is_significant() {
            return PatternOutcome::Discarded;
        }

        let id = format!("pattern-{}", self.next_id);
        self.next_id += 1;
        self.patterns.push(PerformancePattern {
            id: id.clone(),
            features,
            created_at_ms: now_ms,
            occurrences: 1,
            severity: features.severity(),
        });
        if self.patterns.len() > PATTERN_TABLE_CAPACITY {
            let evicted = self.patterns.remove(0);
            debug!(id = %evicted.id, "oldest performance pattern evicted");
        }
        debug!(id = %id, "new performance pattern learned");
        PatternOutcome::Learned { id }
    }
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(values: &[f64]) -> Vec<MetricSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricSample::new(*v, i as u64 * 100))
            .collect()
    }

    fn declining_features() -> PatternFeatures {
        PatternFeatures::extract(&samples(&[60.0, 52.0, 45.0, 38.0, 30.0]))
            .expect("enough samples")
    }

    #[test]
    fn test_extraction_basics() {
        let features = declining_features();
        assert!((features.avg_fps - 45.0).abs() < 1e-9);
        assert!(features.trend_direction < -25.0);
        assert_eq!(features.drop_count, 4);
        assert!((features.max_drop - 8.0).abs() < 1e-9);
        assert!(features.is_significant());
    }

    #[test]
    fn test_steady_window_is_not_significant() {
        let features = PatternFeatures::extract(&samples(&[60.0, 60.5, 59.8, 60.1, 60.0]))
            .expect("extracts");
        assert!(!features.is_significant());
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = declining_features();
        let b = PatternFeatures::extract(&samples(&[58.0, 50.0, 47.0, 35.0, 31.0]))
            .expect("extracts");
        let ab = similarity(&a, &b);
        let ba = similarity(&b, &a);
        assert!((ab - ba).abs() < 1e-12, "similarity must be symmetric");
        assert!((similarity(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rematch_increments_occurrences() {
        let mut table = PatternTable::new();
        let features = declining_features();
        assert!(matches!(
            table.observe(features, 0),
            PatternOutcome::Learned { .. }
        ));
        match table.observe(features, 1_000) {
            PatternOutcome::Matched { occurrences, .. } => assert_eq!(occurrences, 2),
            other => panic!("expected rematch, got {:?}", other),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insignificant_novel_vector_discarded() {
        let mut table = PatternTable::new();
        let features = PatternFeatures::extract(&samples(&[60.0, 60.5, 59.8, 60.1, 60.0]))
            .expect("extracts");
        assert_eq!(table.observe(features, 0), PatternOutcome::Discarded);
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_capacity_evicts_oldest() {
        let mut table = PatternTable::new();
        // Geometrically scaled windows keep every feature pair well under
        // the similarity threshold, so nothing re-matches.
        for i in 0..(PATTERN_TABLE_CAPACITY + 3) {
            let s = 10.0 * 3f64.powi(i as i32);
            let base = 100.0 * s;
            let features = PatternFeatures::extract(&samples(&[
                base + 3.0 * s,
                base + s,
                base - s,
                base - 3.0 * s,
            ]))
            .expect("extracts");
            assert!(
                matches!(table.observe(features, i as u64), PatternOutcome::Learned { .. }),
                "vector {} should be novel",
                i
            );
        }
        assert_eq!(table.len(), PATTERN_TABLE_CAPACITY);
        assert_eq!(
            table.patterns()[0].id,
            "pattern-4",
            "oldest three patterns must have been evicted"
        );
    }
}
