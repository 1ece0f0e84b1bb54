//! Scoring engine: deterministic combination of sub-scores.
//!
//! Every number here comes from [`ScoringConfig`]; nothing reads global
//! state, so the same inputs always produce the same composite.

use serde::{Deserialize, Serialize};

use crate::parser::{ParsedAnalysis, DEFAULT_BLOOMS_SUM_TOLERANCE};
use crate::results::{
    BloomsDistribution, ComponentScores, DifficultyScores, QualityFlag, QualityTier,
};

/// Bloom's level weights, lowest to highest order of thinking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BloomsWeights {
    pub remember: f64,
    pub understand: f64,
    pub apply: f64,
    pub analyze: f64,
    pub evaluate: f64,
    pub create: f64,
}

impl Default for BloomsWeights {
    fn default() -> Self {
        Self {
            remember: 1.0,
            understand: 1.5,
            apply: 2.0,
            analyze: 2.5,
            evaluate: 3.0,
            create: 3.5,
        }
    }
}

impl BloomsWeights {
    pub fn values(&self) -> [f64; 6] {
        [
            self.remember,
            self.understand,
            self.apply,
            self.analyze,
            self.evaluate,
            self.create,
        ]
    }
}

/// Inclusive lower bounds of each tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub excellent: f64,
    pub good: f64,
    pub satisfactory: f64,
    pub needs_improvement: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            excellent: 85.0,
            good: 70.0,
            satisfactory: 55.0,
            needs_improvement: 40.0,
        }
    }
}

impl TierThresholds {
    pub fn tier(&self, score: f64) -> QualityTier {
        if score >= self.excellent {
            QualityTier::Excellent
        } else if score >= self.good {
            QualityTier::Good
        } else if score >= self.satisfactory {
            QualityTier::Satisfactory
        } else if score >= self.needs_improvement {
            QualityTier::NeedsImprovement
        } else {
            QualityTier::Poor
        }
    }
}

/// Weights, thresholds and tolerances used by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Component weights when course fit applies.
    pub difficulty_weight: f64,
    pub blooms_weight: f64,
    pub course_fit_weight: f64,
    /// Component weights when it does not.
    pub standalone_difficulty_weight: f64,
    pub standalone_blooms_weight: f64,
    /// Decimal places kept in the composite.
    pub precision: u32,
    pub tiers: TierThresholds,
    pub blooms_weights: BloomsWeights,
    /// Allowed deviation of the Bloom's sum from 100.
    pub blooms_sum_tolerance: f64,
    /// Fewer questions than this flags the result as low confidence.
    pub small_sample_threshold: usize,
    /// A difficulty-appropriateness score below `100 - threshold` flags a mismatch.
    pub difficulty_mismatch_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            difficulty_weight: 0.25,
            blooms_weight: 0.35,
            course_fit_weight: 0.40,
            standalone_difficulty_weight: 0.40,
            standalone_blooms_weight: 0.60,
            precision: 2,
            tiers: TierThresholds::default(),
            blooms_weights: BloomsWeights::default(),
            blooms_sum_tolerance: DEFAULT_BLOOMS_SUM_TOLERANCE,
            small_sample_threshold: 5,
            difficulty_mismatch_threshold: 30.0,
        }
    }
}

/// Normalized inputs to [`ScoringEngine::compute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    /// 0-100.
    pub difficulty: f64,
    /// 0-100.
    pub blooms: f64,
    /// 0-100, or `None` when course fit does not apply.
    pub course_fit: Option<f64>,
    pub question_count: usize,
    /// The course-fit difficulty-appropriateness sub-score, if reported.
    pub difficulty_appropriateness: Option<f64>,
}

/// Result of combining the components.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    pub components: ComponentScores,
    pub composite: f64,
    pub tier: QualityTier,
    pub flags: Vec<QualityFlag>,
}

/// Combines normalized components into a composite score and tier.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Mean of the four sub-scores (each clamped to 0-10), scaled to 0-100.
    pub fn difficulty_component(&self, scores: &DifficultyScores) -> f64 {
        let values = scores.values();
        let mean = values.iter().map(|v| v.clamp(0.0, 10.0)).sum::<f64>() / values.len() as f64;
        mean * 10.0
    }

    /// Weighted Bloom's percentages divided by the highest weight, clamped to 0-100.
    ///
    /// The score is `sum(pct * w) / max_w`. This deliberately replaces the
    /// older `(sum(pct * w) / sum(w)) * (100 / max_w)`, which is unbounded
    /// above: with the default weights an all-`create` assessment would score
    /// about 740. Here an all-`create` assessment scores 100 and an
    /// all-`remember` one scores `100 * remember / create`.
    pub fn blooms_component(&self, blooms: &BloomsDistribution) -> f64 {
        let weights = self.config.blooms_weights.values();
        let max_weight = weights.iter().copied().fold(f64::MIN, f64::max);
        if max_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = blooms
            .values()
            .iter()
            .zip(weights)
            .map(|(pct, w)| pct * w)
            .sum();
        (weighted / max_weight).clamp(0.0, 100.0)
    }

    /// Normalize a parsed analysis into scoring inputs.
    pub fn inputs(&self, analysis: &ParsedAnalysis, question_count: usize) -> ScoreInputs {
        let fit = analysis.course_fit.as_ref();
        ScoreInputs {
            difficulty: self.difficulty_component(&analysis.difficulty_scores),
            blooms: self.blooms_component(&analysis.blooms),
            course_fit: fit.map(|f| f.course_fit_score.clamp(0.0, 100.0)),
            question_count,
            difficulty_appropriateness: fit.and_then(|f| f.difficulty_appropriateness_score),
        }
    }

    pub fn compute(&self, inputs: &ScoreInputs) -> ScoreOutcome {
        let c = &self.config;
        let mut flags = Vec::new();

        let raw = match inputs.course_fit {
            Some(fit) => {
                inputs.difficulty * c.difficulty_weight
                    + inputs.blooms * c.blooms_weight
                    + fit * c.course_fit_weight
            }
            None => {
                flags.push(QualityFlag::CourseFitNotApplicable);
                inputs.difficulty * c.standalone_difficulty_weight
                    + inputs.blooms * c.standalone_blooms_weight
            }
        };
        let composite = round_to(raw, c.precision).clamp(0.0, 100.0);

        if inputs.question_count < c.small_sample_threshold {
            flags.push(QualityFlag::LowConfidenceSmallSample);
        }
        if inputs.course_fit.is_some() {
            if let Some(appropriateness) = inputs.difficulty_appropriateness {
                if appropriateness < 100.0 - c.difficulty_mismatch_threshold {
                    flags.push(QualityFlag::DifficultyMismatch);
                }
            }
        }

        ScoreOutcome {
            components: ComponentScores {
                difficulty: round_to(inputs.difficulty, c.precision),
                blooms: round_to(inputs.blooms, c.precision),
                course_fit: inputs.course_fit.map(|f| round_to(f, c.precision)),
            },
            composite,
            tier: c.tiers.tier(composite),
            flags,
        }
    }

    /// Convenience: normalize and combine in one step.
    pub fn score(&self, analysis: &ParsedAnalysis, question_count: usize) -> ScoreOutcome {
        self.compute(&self.inputs(analysis, question_count))
    }
}

/// Round half away from zero to `precision` decimal places.
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
