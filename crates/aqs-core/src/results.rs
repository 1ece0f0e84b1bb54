//! Evaluation result types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::{LlmCallStats, TokenMetrics};
use crate::model::{AssessmentKind, EvaluationTask};

/// A section that may legitimately be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Applicability<T> {
    Applicable(T),
    NotApplicable,
}

impl<T> Applicability<T> {
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Applicability::Applicable(v) => Some(v),
            Applicability::NotApplicable => None,
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, Applicability::Applicable(_))
    }
}

/// The four 1-10 difficulty sub-scores with their rationales.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyScores {
    #[serde(deserialize_with = "lenient_f64")]
    pub complexity_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub complexity_rationale: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub language_difficulty_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub language_difficulty_rationale: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub cognitive_effort_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cognitive_effort_rationale: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub course_alignment_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub course_alignment_rationale: String,
}

impl DifficultyScores {
    pub fn values(&self) -> [f64; 4] {
        [
            self.complexity_score,
            self.language_difficulty_score,
            self.cognitive_effort_score,
            self.course_alignment_score,
        ]
    }
}

/// Bloom's Taxonomy level names, lowest to highest.
pub const BLOOM_LEVELS: [&str; 6] = [
    "remember",
    "understand",
    "apply",
    "analyze",
    "evaluate",
    "create",
];

/// Percentage of questions at each Bloom's level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BloomsDistribution {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub remember: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub understand: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub apply: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub analyze: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub evaluate: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub create: f64,
}

impl BloomsDistribution {
    /// Values in [`BLOOM_LEVELS`] order.
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

    pub fn sum(&self) -> f64 {
        self.values().iter().sum()
    }
}

impl std::ops::Add for BloomsDistribution {
    type Output = BloomsDistribution;

    fn add(self, rhs: BloomsDistribution) -> BloomsDistribution {
        BloomsDistribution {
            remember: self.remember + rhs.remember,
            understand: self.understand + rhs.understand,
            apply: self.apply + rhs.apply,
            analyze: self.analyze + rhs.analyze,
            evaluate: self.evaluate + rhs.evaluate,
            create: self.create + rhs.create,
        }
    }
}

/// One question's Bloom's classification as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionClassification {
    #[serde(deserialize_with = "lenient_u32")]
    pub question_number: u32,
    #[serde(default, deserialize_with = "lenient_string")]
    pub blooms_level: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub justification: String,
}

/// Course-fit judgement with its 0-100 sub-scores. Sub-scores the backend
/// left out stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseFitDetails {
    #[serde(deserialize_with = "lenient_f64")]
    pub course_fit_score: f64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub course_fit_status: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub content_coverage_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_coverage_rationale: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub objective_alignment_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub objective_alignment_rationale: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub difficulty_appropriateness_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub difficulty_appropriateness_rationale: String,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub completeness_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub completeness_rationale: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub alignment_details: String,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
}

/// Machine-readable caveats attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    CourseFitNotApplicable,
    LowConfidenceSmallSample,
    NoQuestionsEvaluable,
    BloomsSumOutOfTolerance,
    QuestionNumberingAnomaly,
    DifficultyMismatch,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityFlag::CourseFitNotApplicable => "course_fit_not_applicable",
            QualityFlag::LowConfidenceSmallSample => "low_confidence_small_sample",
            QualityFlag::NoQuestionsEvaluable => "no_questions_evaluable",
            QualityFlag::BloomsSumOutOfTolerance => "blooms_sum_out_of_tolerance",
            QualityFlag::QuestionNumberingAnomaly => "question_numbering_anomaly",
            QualityFlag::DifficultyMismatch => "difficulty_mismatch",
        };
        f.write_str(s)
    }
}

/// Quality tier derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Excellent,
    Good,
    Satisfactory,
    NeedsImprovement,
    Poor,
}

impl QualityTier {
    pub const ALL: [QualityTier; 5] = [
        QualityTier::Excellent,
        QualityTier::Good,
        QualityTier::Satisfactory,
        QualityTier::NeedsImprovement,
        QualityTier::Poor,
    ];
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Satisfactory => "Satisfactory",
            QualityTier::NeedsImprovement => "Needs Improvement",
            QualityTier::Poor => "Poor",
        };
        f.write_str(s)
    }
}

/// Normalized 0-100 components that feed the composite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub difficulty: f64,
    pub blooms: f64,
    /// `None` when course fit does not apply.
    pub course_fit: Option<f64>,
}

/// Terminal artifact of one evaluation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AqsResult {
    pub task: EvaluationTask,
    pub assessment_name: String,
    pub assessment_kind: AssessmentKind,
    pub question_count: usize,
    /// Model id reported by the backend.
    pub backend_model: String,

    pub difficulty_level: String,
    pub difficulty_rationale: String,
    /// `None` only for the zero-question sentinel.
    pub difficulty_scores: Option<DifficultyScores>,
    pub blooms: Applicability<BloomsDistribution>,
    pub blooms_distribution_summary: String,
    pub question_classifications: Vec<QuestionClassification>,
    pub course_fit: Applicability<CourseFitDetails>,

    pub components: Option<ComponentScores>,
    /// `None` for the zero-question sentinel.
    pub composite: Option<f64>,
    pub tier: Option<QualityTier>,
    pub quality_tier_reasoning: String,
    pub flags: Vec<QualityFlag>,
    pub warnings: Vec<String>,

    pub tokens: TokenMetrics,
    pub llm_calls: LlmCallStats,
    pub attempt: u32,
    pub input_hash: String,
    pub prompt_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl AqsResult {
    pub fn has_flag(&self, flag: QualityFlag) -> bool {
        self.flags.contains(&flag)
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoders
// ---------------------------------------------------------------------------

// Backends occasionally quote numbers or append a percent sign.
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {s:?}"))),
        other => Err(de::Error::custom(format!("expected a number, got {other}"))),
    }
}

fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        other => lenient_f64(other).map(Some).map_err(de::Error::custom),
    }
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = lenient_f64(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(de::Error::custom(format!("expected a question number, got {value}")));
    }
    Ok(value as u32)
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applicability_wire_format() {
        let applicable: Applicability<u32> = Applicability::Applicable(7);
        assert_eq!(
            serde_json::to_string(&applicable).unwrap(),
            r#"{"status":"applicable","value":7}"#
        );
        let na: Applicability<u32> = Applicability::NotApplicable;
        assert_eq!(
            serde_json::to_string(&na).unwrap(),
            r#"{"status":"not_applicable"}"#
        );
        let back: Applicability<u32> =
            serde_json::from_str(r#"{"status":"not_applicable"}"#).unwrap();
        assert!(!back.is_applicable());
        assert_eq!(applicable.as_ref(), Some(&7));
    }

    #[test]
    fn lenient_numbers() {
        let blooms: BloomsDistribution =
            serde_json::from_str(r#"{"remember": "40%", "understand": 60, "apply": "0"}"#).unwrap();
        assert_eq!(blooms.remember, 40.0);
        assert_eq!(blooms.sum(), 100.0);

        let err = serde_json::from_str::<BloomsDistribution>(r#"{"remember": "lots"}"#).unwrap_err();
        assert!(err.to_string().contains("expected a number"));

        let qc: QuestionClassification =
            serde_json::from_str(r#"{"question_number": "3", "blooms_level": "apply", "justification": null}"#)
                .unwrap();
        assert_eq!(qc.question_number, 3);
        assert_eq!(qc.justification, "");
        assert!(serde_json::from_str::<QuestionClassification>(r#"{"question_number": 1.5}"#).is_err());
    }

    #[test]
    fn tier_and_flag_names() {
        assert_eq!(QualityTier::NeedsImprovement.to_string(), "Needs Improvement");
        assert_eq!(
            serde_json::to_string(&QualityTier::NeedsImprovement).unwrap(),
            "\"needs_improvement\""
        );
        assert_eq!(
            serde_json::to_string(&QualityFlag::BloomsSumOutOfTolerance).unwrap(),
            "\"blooms_sum_out_of_tolerance\""
        );
        assert_eq!(
            QualityFlag::LowConfidenceSmallSample.to_string(),
            "low_confidence_small_sample"
        );
    }
}
