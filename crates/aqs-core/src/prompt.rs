//! Prompt templates and rendering.
//!
//! Templates are opaque strings with `{name}` placeholders. Substitution is
//! literal so JSON braces in the schema example survive untouched.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{AssessmentRecord, CourseContext, ReferenceChunk};

/// Reference material is cut to this many characters in the prompt.
const MAX_REFERENCE_CHARS: usize = 10_000;

const DEFAULT_SYSTEM_ROLE: &str = "You are an expert educational assessment analyst. \
You evaluate assessments for difficulty, cognitive depth using Bloom's Taxonomy, and \
alignment with the course they belong to. Be rigorous, consistent and evidence-based. \
Always answer with a single JSON object and nothing else.";

const RESPONSE_SCHEMA: &str = r#"{
  "difficulty_level": "Beginner | Intermediate | Advanced",
  "difficulty_rationale": "string",
  "difficulty_scores": {
    "complexity_score": 1-10,
    "complexity_rationale": "string",
    "language_difficulty_score": 1-10,
    "language_difficulty_rationale": "string",
    "cognitive_effort_score": 1-10,
    "cognitive_effort_rationale": "string",
    "course_alignment_score": 1-10,
    "course_alignment_rationale": "string"
  },
  "blooms_scores": {
    "remember": 0-100, "understand": 0-100, "apply": 0-100,
    "analyze": 0-100, "evaluate": 0-100, "create": 0-100
  },
  "blooms_distribution_summary": "string",
  "question_classifications": [
    {"question_number": 1, "blooms_level": "remember", "justification": "string"}
  ],
  "course_fit_details": {
    "course_fit_score": 0-100,
    "course_fit_status": "Strong Fit | Moderate Fit | Weak Fit | Poor Fit",
    "content_coverage_score": 0-100,
    "content_coverage_rationale": "string",
    "objective_alignment_score": 0-100,
    "objective_alignment_rationale": "string",
    "difficulty_appropriateness_score": 0-100,
    "difficulty_appropriateness_rationale": "string",
    "completeness_score": 0-100,
    "completeness_rationale": "string",
    "alignment_details": "string",
    "improvement_suggestions": ["string"]
  },
  "quality_tier_reasoning": "string"
}"#;

const DEFAULT_COMBINED: &str = "Evaluate the following assessment in the context of its course.

## Course
Title: {course_title}
Level: {course_level}
Description: {course_description}
Learning objectives: {learning_objectives}
Competencies: {competencies}

## Course content
{course_content_summary}

## Assessment
Name: {assessment_name}
Type: {assessment_type}
Total questions: {total_questions}
Expected duration: {expected_duration} minutes

## Questions
{questions_text}

## Instructions
1. Rate difficulty on four 1-10 sub-scores: complexity, language difficulty, cognitive effort, course alignment.
2. Classify every question into one Bloom's Taxonomy level and report the percentage of questions at each level. Percentages must be non-negative and sum to 100.
3. Judge how well the assessment fits the course content and objectives on a 0-100 scale.

Respond with exactly one JSON object of this shape:
{response_schema}";

const DEFAULT_COMBINED_STANDALONE: &str = "Evaluate the following standalone assessment. It is \
not attached to a course, so do not judge course fit.

## Assessment
Name: {assessment_name}
Type: {assessment_type}
Total questions: {total_questions}
Expected duration: {expected_duration} minutes

## Questions
{questions_text}

## Instructions
1. Rate difficulty on four 1-10 sub-scores: complexity, language difficulty, cognitive effort, course alignment (rate alignment against the assessment's own stated topic).
2. Classify every question into one Bloom's Taxonomy level and report the percentage of questions at each level. Percentages must be non-negative and sum to 100.
3. Set \"course_fit_details\" to \"not_applicable\".

Respond with exactly one JSON object of this shape:
{response_schema}";

const DEFAULT_CORRECTION: &str = "Your previous answer could not be used: {error}. \
Respond again with exactly one JSON object containing every required key \
(difficulty_scores, blooms_scores{course_fit_hint}). Do not add prose or code fences.";

/// Versioned prompt templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    /// Participates in the checkpoint hash; bump it when templates change.
    pub version: String,
    pub system_role: String,
    pub combined: String,
    pub combined_standalone: String,
    pub correction: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            version: "v4".into(),
            system_role: DEFAULT_SYSTEM_ROLE.into(),
            combined: DEFAULT_COMBINED.into(),
            combined_standalone: DEFAULT_COMBINED_STANDALONE.into(),
            correction: DEFAULT_CORRECTION.into(),
        }
    }
}

/// A prompt ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl PromptTemplates {
    /// Load templates from a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt templates: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse prompt templates: {}", path.display()))
    }

    /// Render the scoring prompt for one assessment.
    pub fn render(&self, course: &CourseContext, assessment: &AssessmentRecord) -> RenderedPrompt {
        let questions_text = format_questions(assessment);
        let total_questions = assessment.question_count().to_string();
        let expected_duration = (assessment.expected_duration_secs / 60).to_string();
        let assessment_type = assessment.kind.to_string();

        let user = if assessment.kind.has_course_fit() {
            let competencies = course.competencies.join(", ");
            let summary = format_content_summary(course, course.reference_for(assessment));
            substitute(
                &self.combined,
                &[
                    ("course_title", &course.name),
                    ("course_description", &course.description),
                    ("course_level", &course.category),
                    ("learning_objectives", &course.description),
                    ("competencies", &competencies),
                    ("course_content_summary", &summary),
                    ("assessment_name", &assessment.name),
                    ("assessment_type", &assessment_type),
                    ("total_questions", &total_questions),
                    ("expected_duration", &expected_duration),
                    ("questions_text", &questions_text),
                    ("response_schema", RESPONSE_SCHEMA),
                ],
            )
        } else {
            substitute(
                &self.combined_standalone,
                &[
                    ("assessment_name", &assessment.name),
                    ("assessment_type", &assessment_type),
                    ("total_questions", &total_questions),
                    ("expected_duration", &expected_duration),
                    ("questions_text", &questions_text),
                    ("response_schema", RESPONSE_SCHEMA),
                ],
            )
        };

        RenderedPrompt {
            system: self.system_role.clone(),
            user,
        }
    }

    /// The corrective follow-up appended after an unusable response.
    pub fn render_correction(&self, error: &str, expect_course_fit: bool) -> String {
        let hint = if expect_course_fit {
            ", course_fit_details"
        } else {
            ""
        };
        substitute(
            &self.correction,
            &[("error", error), ("course_fit_hint", hint)],
        )
    }
}

/// Replace each `{key}` with its value in a single left-to-right pass.
///
/// Unknown placeholders are left alone and substituted values are never
/// scanned again, so braces inside course or question text stay literal.
pub fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replacement = after.find('}').and_then(|close| {
            let key = &after[..close];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, value)| (close, *value))
        });
        match replacement {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render questions in the numbered, lettered-option layout used in prompts.
pub fn format_questions(assessment: &AssessmentRecord) -> String {
    let mut lines = Vec::new();
    for q in &assessment.questions {
        lines.push(format!("\nQuestion {}: {}", q.number, q.text));
        lines.push(format!("Type: {}", q.question_type));
        if !q.options.is_empty() {
            lines.push("Options:".to_string());
            for (i, opt) in q.options.iter().enumerate() {
                lines.push(format!("  {}) {}", option_letter(i), opt));
            }
        }
    }
    lines.join("\n")
}

/// `A`, `B`, ... `Z`, then `AA`, `AB`, ...
pub fn option_letter(index: usize) -> String {
    let mut n = index;
    let mut out = Vec::new();
    loop {
        out.push((b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    out.iter().rev().collect()
}

fn format_content_summary(course: &CourseContext, reference: &[ReferenceChunk]) -> String {
    let mut parts = Vec::new();

    if !course.modules.is_empty() {
        parts.push("Course Modules:".to_string());
        for name in &course.modules {
            parts.push(format!("  - {name}"));
        }
    }

    if !reference.is_empty() {
        let combined = reference
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        parts.push(format!(
            "\nReference Material:\n{}",
            truncate_chars(&combined, MAX_REFERENCE_CHARS)
        ));
    }

    if parts.is_empty() {
        "(no course content available)".to_string()
    } else {
        parts.join("\n")
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... [truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
