//! Response parser: backend text in, typed analysis out.
//!
//! Backends wrap their JSON in prose or code fences often enough that the
//! parser never assumes the whole response is JSON. It scans for the first
//! balanced `{...}` that deserializes as an object, then validates it into
//! [`ParsedAnalysis`]. Untyped maps never leave this module.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::EvalError;
use crate::results::{
    Applicability, BloomsDistribution, CourseFitDetails, DifficultyScores, QualityFlag,
    QuestionClassification,
};

/// Default allowed deviation of the Bloom's sum from 100.
pub const DEFAULT_BLOOMS_SUM_TOLERANCE: f64 = 2.0;

const NOT_APPLICABLE: &str = "not_applicable";

/// Validated content of one scoring response.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub difficulty_level: String,
    pub difficulty_rationale: String,
    pub difficulty_scores: DifficultyScores,
    pub blooms: BloomsDistribution,
    pub blooms_distribution_summary: String,
    pub question_classifications: Vec<QuestionClassification>,
    pub course_fit: Applicability<CourseFitDetails>,
    pub quality_tier_reasoning: String,
    /// Non-fatal problems found while validating.
    pub flags: Vec<QualityFlag>,
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
struct ResponseDoc {
    #[serde(default)]
    difficulty_level: Option<Value>,
    #[serde(default)]
    difficulty_rationale: Option<Value>,
    difficulty_scores: Option<Value>,
    blooms_scores: Option<Value>,
    #[serde(default)]
    blooms_distribution_summary: Option<Value>,
    #[serde(default)]
    question_classifications: Option<Value>,
    course_fit_details: Option<Value>,
    #[serde(default)]
    quality_tier_reasoning: Option<Value>,
}

/// Parses backend responses against the scoring schema.
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    pub blooms_sum_tolerance: f64,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self {
            blooms_sum_tolerance: DEFAULT_BLOOMS_SUM_TOLERANCE,
        }
    }
}

impl ResponseParser {
    pub fn new(blooms_sum_tolerance: f64) -> Self {
        Self {
            blooms_sum_tolerance,
        }
    }

    /// Parse and validate `raw`. When `expect_course_fit` is false the course
    /// fit section is `NotApplicable` whatever the response says.
    pub fn parse(&self, raw: &str, expect_course_fit: bool) -> Result<ParsedAnalysis, EvalError> {
        let object = extract_json_object(raw).ok_or_else(|| {
            EvalError::ResponseUnparseable("no JSON object found in response".into())
        })?;
        let doc: ResponseDoc = serde_json::from_value(Value::Object(object))
            .map_err(|e| EvalError::ResponseUnparseable(e.to_string()))?;

        let difficulty_scores: DifficultyScores = required(doc.difficulty_scores, "difficulty_scores")?;
        let blooms: BloomsDistribution = required(doc.blooms_scores, "blooms_scores")?;

        let course_fit = if expect_course_fit {
            match doc.course_fit_details {
                None | Some(Value::Null) => {
                    return Err(EvalError::ResponseUnparseable(
                        "missing key 'course_fit_details'".into(),
                    ))
                }
                Some(Value::String(s)) if s.trim().eq_ignore_ascii_case(NOT_APPLICABLE) => {
                    Applicability::NotApplicable
                }
                Some(value) => Applicability::Applicable(typed(value, "course_fit_details")?),
            }
        } else {
            Applicability::NotApplicable
        };

        if let Some((level, value)) = crate::results::BLOOM_LEVELS
            .iter()
            .zip(blooms.values())
            .find(|(_, v)| *v < 0.0 || !v.is_finite())
        {
            return Err(EvalError::ResponseUnparseable(format!(
                "blooms_scores.{level} is {value}, expected a non-negative percentage"
            )));
        }

        let mut flags = Vec::new();
        let mut warnings = Vec::new();
        let sum = blooms.sum();
        if (sum - 100.0).abs() > self.blooms_sum_tolerance {
            flags.push(QualityFlag::BloomsSumOutOfTolerance);
            warnings.push(format!(
                "Bloom's percentages sum to {sum:.1}, expected 100 ± {}",
                self.blooms_sum_tolerance
            ));
        }

        let question_classifications = match doc.question_classifications {
            None | Some(Value::Null) => vec![],
            Some(value) => match serde_json::from_value(value) {
                Ok(list) => list,
                Err(e) => {
                    warnings.push(format!("ignored malformed question_classifications: {e}"));
                    vec![]
                }
            },
        };

        Ok(ParsedAnalysis {
            difficulty_level: text(doc.difficulty_level),
            difficulty_rationale: text(doc.difficulty_rationale),
            difficulty_scores,
            blooms,
            blooms_distribution_summary: text(doc.blooms_distribution_summary),
            question_classifications,
            course_fit,
            quality_tier_reasoning: text(doc.quality_tier_reasoning),
            flags,
            warnings,
        })
    }
}

/// Parse with the default tolerance.
pub fn parse_response(raw: &str, expect_course_fit: bool) -> Result<ParsedAnalysis, EvalError> {
    ResponseParser::default().parse(raw, expect_course_fit)
}

fn required<T: serde::de::DeserializeOwned>(value: Option<Value>, key: &str) -> Result<T, EvalError> {
    match value {
        None | Some(Value::Null) => Err(EvalError::ResponseUnparseable(format!(
            "missing key '{key}'"
        ))),
        Some(value) => typed(value, key),
    }
}

fn typed<T: serde::de::DeserializeOwned>(value: Value, key: &str) -> Result<T, EvalError> {
    if !value.is_object() {
        return Err(EvalError::ResponseUnparseable(format!(
            "'{key}' must be an object"
        )));
    }
    serde_json::from_value(value).map_err(|e| EvalError::ResponseUnparseable(format!("{key}: {e}")))
}

fn text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Find the first balanced `{...}` in `raw` that parses as a JSON object.
///
/// The scan tracks string literals and escapes so braces inside strings do
/// not unbalance it. Candidates that fail to parse are skipped and the search
/// resumes at the next `{`.
pub fn extract_json_object(raw: &str) -> Option<Map<String, Value>> {
    let bytes = raw.as_bytes();
    let mut start = 0;
    while let Some(offset) = raw[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(Value::Object(map)) = serde_json::from_str(&raw[open..=close]) {
                return Some(map);
            }
        }
        start = open + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
