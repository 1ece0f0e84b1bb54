//! Decoders for the on-disk assessment encodings.
//!
//! Three files may describe an assessment: the normalized
//! `assessment_parsed.json`, the raw `assessment.json` and the plain-text
//! `assessment_questions.txt`. Each decoder yields the same
//! [`DecodedAssessment`]; choosing between them is the context builder's job.

use serde::Deserialize;
use serde_json::Value;

use crate::error::EvalError;
use crate::model::Question;

pub const PARSED_FILE: &str = "assessment_parsed.json";
pub const RAW_FILE: &str = "assessment.json";
pub const TEXT_FILE: &str = "assessment_questions.txt";

/// Every file that marks a directory as an assessment.
pub const SOURCE_FILES: [&str; 3] = [PARSED_FILE, RAW_FILE, TEXT_FILE];

/// Fields recovered from one assessment file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAssessment {
    pub name: Option<String>,
    pub source_id: Option<String>,
    pub total_questions: Option<u32>,
    pub expected_duration_secs: Option<u64>,
    pub questions: Vec<Question>,
}

impl DecodedAssessment {
    /// Fill metadata this decode lacks from another decode of the same assessment.
    pub fn merge_metadata(&mut self, other: &DecodedAssessment) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        if self.source_id.is_none() {
            self.source_id = other.source_id.clone();
        }
        if self.total_questions.is_none() {
            self.total_questions = other.total_questions;
        }
        if self.expected_duration_secs.is_none() {
            self.expected_duration_secs = other.expected_duration_secs;
        }
    }
}

/// What `assessment.json` turned out to hold.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAssessment {
    /// A question list in one of the accepted encodings.
    Questions(DecodedAssessment),
    /// A platform `result.questionset` envelope with metadata only.
    Envelope(DecodedAssessment),
}

// ---------------------------------------------------------------------------
// assessment_parsed.json
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParsedFile {
    #[serde(default)]
    assessment_name: Option<String>,
    #[serde(default)]
    assessment_id: Option<String>,
    #[serde(default)]
    total_questions: Option<u32>,
    #[serde(default)]
    questions: Vec<Value>,
}

pub fn decode_parsed(content: &str) -> Result<DecodedAssessment, EvalError> {
    let file: ParsedFile = serde_json::from_str(content)
        .map_err(|e| EvalError::DataMalformed(format!("{PARSED_FILE}: {e}")))?;

    let questions = file
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| decode_question(q, i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EvalError::DataMalformed(format!("{PARSED_FILE}: {e}")))?;

    Ok(DecodedAssessment {
        name: file.assessment_name.filter(|s| !s.is_empty()),
        source_id: file.assessment_id.filter(|s| !s.is_empty()),
        total_questions: file.total_questions,
        expected_duration_secs: None,
        questions,
    })
}

// ---------------------------------------------------------------------------
// assessment.json
// ---------------------------------------------------------------------------

pub fn decode_raw(content: &str) -> Result<RawAssessment, EvalError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| EvalError::DataMalformed(format!("{RAW_FILE}: {e}")))?;
    let malformed = |msg: String| EvalError::DataMalformed(format!("{RAW_FILE}: {msg}"));

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("assessment") {
                items
            } else if let Some(Value::Array(items)) = map.get("questions") {
                items
            } else if let Some(set) = value.pointer("/result/questionset").and_then(Value::as_object) {
                let total_questions = set
                    .get("totalQuestions")
                    .and_then(Value::as_u64)
                    .map(|n| {
                        u32::try_from(n)
                            .map_err(|_| malformed(format!("totalQuestions {n} out of range")))
                    })
                    .transpose()?;
                return Ok(RawAssessment::Envelope(DecodedAssessment {
                    name: set.get("name").and_then(scalar_string),
                    source_id: set.get("identifier").and_then(scalar_string),
                    total_questions,
                    expected_duration_secs: set.get("expectedDuration").and_then(Value::as_u64),
                    questions: vec![],
                }));
            } else {
                return Err(malformed(
                    "object has neither an 'assessment' nor a 'questions' list".into(),
                ));
            }
        }
        other => return Err(malformed(format!("unexpected top-level {}", json_type(other)))),
    };

    let questions = items
        .iter()
        .enumerate()
        .map(|(i, q)| decode_question(q, i))
        .collect::<Result<Vec<_>, _>>()
        .map_err(malformed)?;

    let (name, source_id) = match &value {
        Value::Object(map) => (
            map.get("name")
                .or_else(|| map.get("assessmentName"))
                .and_then(scalar_string),
            map.get("identifier")
                .or_else(|| map.get("assessmentId"))
                .and_then(scalar_string),
        ),
        _ => (None, None),
    };

    Ok(RawAssessment::Questions(DecodedAssessment {
        name,
        source_id,
        total_questions: None,
        expected_duration_secs: None,
        questions,
    }))
}

fn decode_question(value: &Value, index: usize) -> Result<Question, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("question {} is a {}, expected an object", index + 1, json_type(value)))?;

    let pick = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null());

    let number = match pick(&["questionNumber", "number"]) {
        Some(v) => {
            let n = v
                .as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| format!("question {}: non-integer number {v}", index + 1))?;
            u32::try_from(n)
                .map_err(|_| format!("question {}: number {n} out of range", index + 1))?
        }
        None => u32::try_from(index + 1)
            .map_err(|_| format!("question {}: too many questions", index + 1))?,
    };

    let text = pick(&["questionText", "question", "text", "body", "name", "title"])
        .and_then(scalar_string)
        .map(|s| strip_html(&s))
        .ok_or_else(|| format!("question {number} has no text"))?;

    let options = pick(&["options", "choices"])
        .map(decode_options)
        .unwrap_or_default();

    let correct_answers = pick(&["correctAnswers", "answer", "correct"])
        .map(decode_answers)
        .unwrap_or_default();

    Ok(Question {
        number,
        text,
        question_type: pick(&["questionType", "type"])
            .and_then(scalar_string)
            .unwrap_or_default(),
        options,
        correct_answers,
        explanation: pick(&["explanation", "solution"])
            .and_then(scalar_string)
            .map(|s| strip_html(&s))
            .filter(|s| !s.is_empty()),
    })
}

fn decode_options(value: &Value) -> Vec<String> {
    let Value::Array(items) = value else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|opt| match opt {
            Value::Object(map) => map
                .get("value")
                .and_then(|v| v.get("body").or(Some(v)))
                .and_then(scalar_string)
                .or_else(|| map.get("body").and_then(scalar_string))
                .or_else(|| map.get("text").and_then(scalar_string))
                .or_else(|| map.get("label").and_then(scalar_string)),
            other => scalar_string(other),
        })
        .map(|s| strip_html(&s))
        .collect()
}

fn decode_answers(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drop markup tags and collapse the whitespace left behind.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// assessment_questions.txt
// ---------------------------------------------------------------------------

fn is_rule(line: &str, c: char) -> bool {
    let line = line.trim_end();
    line.chars().count() == 80 && line.chars().all(|x| x == c)
}

pub fn decode_text(content: &str) -> Result<DecodedAssessment, EvalError> {
    let lines: Vec<&str> = content.lines().collect();
    let (header, body) = match lines.iter().position(|l| is_rule(l, '=')) {
        Some(idx) => (&lines[..idx], &lines[idx + 1..]),
        None => (&lines[..0], &lines[..]),
    };

    let mut decoded = DecodedAssessment::default();
    for line in header {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("# Assessment:") {
            decoded.name = Some(name.trim().to_string()).filter(|s| !s.is_empty());
        } else if let Some(id) = line.strip_prefix("ID:") {
            decoded.source_id = Some(id.trim().to_string()).filter(|s| !s.is_empty());
        } else if let Some(total) = line.strip_prefix("Total Questions:") {
            decoded.total_questions = total.trim().parse().ok();
        }
    }

    for block in body.split(|l| is_rule(l, '-')) {
        if block.iter().all(|l| l.trim().is_empty()) {
            continue;
        }
        decoded.questions.push(decode_text_block(block)?);
    }

    Ok(decoded)
}

#[derive(PartialEq)]
enum Section {
    Text,
    Options,
    Explanation,
    Other,
}

fn decode_text_block(block: &[&str]) -> Result<Question, EvalError> {
    let malformed = |msg: String| EvalError::DataMalformed(format!("{TEXT_FILE}: {msg}"));

    let start = block
        .iter()
        .position(|l| l.trim_start().starts_with("Question "))
        .ok_or_else(|| malformed(format!("block without a Question line: {:?}", block.iter().find(|l| !l.trim().is_empty()))))?;

    let first = block[start].trim_start().trim_start_matches("Question ");
    let (number, text) = first
        .split_once(':')
        .ok_or_else(|| malformed(format!("malformed question line: {}", block[start].trim())))?;
    let number: u32 = number
        .trim()
        .parse()
        .map_err(|_| malformed(format!("non-integer question number: {}", number.trim())))?;

    let mut question = Question {
        number,
        text: text.trim().to_string(),
        question_type: String::new(),
        options: vec![],
        correct_answers: vec![],
        explanation: None,
    };
    let mut section = Section::Text;
    let mut explanation = String::new();

    for raw in &block[start + 1..] {
        let line = raw.trim();
        if let Some(t) = line.strip_prefix("Type:") {
            question.question_type = t.trim().to_string();
            section = Section::Other;
        } else if line == "Options:" {
            section = Section::Options;
        } else if let Some(answers) = line.strip_prefix("Correct Answer(s):") {
            question.correct_answers = answers
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            section = Section::Other;
        } else if let Some(e) = line.strip_prefix("Explanation:") {
            explanation = e.trim().to_string();
            section = Section::Explanation;
        } else if line.is_empty() {
            if section == Section::Text {
                section = Section::Other;
            }
        } else {
            match section {
                Section::Text => {
                    question.text.push(' ');
                    question.text.push_str(line);
                }
                Section::Options => {
                    let opt = match line.split_once(") ") {
                        Some((letter, rest)) if letter.chars().all(|c| c.is_ascii_uppercase()) => rest,
                        _ => line,
                    };
                    question.options.push(opt.trim().to_string());
                }
                Section::Explanation => {
                    explanation.push(' ');
                    explanation.push_str(line);
                }
                Section::Other => {}
            }
        }
    }

    if !explanation.is_empty() {
        question.explanation = Some(explanation);
    }
    Ok(question)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_file_camel_case() {
        let json = r#"{
            "assessmentName": "Final Assessment",
            "assessmentId": "do_42",
            "totalQuestions": 2,
            "questions": [
                {"questionNumber": 1, "questionText": "<p>What is 2+2?</p>", "questionType": "MCQ",
                 "options": ["3", "4"], "correctAnswers": [1], "explanation": "Arithmetic"},
                {"questionNumber": 2, "questionText": "Pick one", "options": [{"text": "x"}, {"label": "y"}]}
            ]
        }"#;
        let decoded = decode_parsed(json).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("Final Assessment"));
        assert_eq!(decoded.total_questions, Some(2));
        assert_eq!(decoded.questions[0].text, "What is 2+2?");
        assert_eq!(decoded.questions[0].correct_answers, vec!["1"]);
        assert_eq!(decoded.questions[1].options, vec!["x", "y"]);
        assert_eq!(decoded.questions[1].explanation, None);
    }

    #[test]
    fn raw_encodings() {
        let wrapped = r#"{"assessment": [{"question": "Q1", "choices": ["a", "b"], "answer": "a", "type": "mcq"}]}"#;
        let RawAssessment::Questions(d) = decode_raw(wrapped).unwrap() else {
            panic!("expected questions");
        };
        assert_eq!(d.questions[0].text, "Q1");
        assert_eq!(d.questions[0].correct_answers, vec!["a"]);
        assert_eq!(d.questions[0].question_type, "mcq");

        let listed = r#"{"questions": [{"text": "Q1"}, {"text": "Q2", "correct": [0, 2]}]}"#;
        let RawAssessment::Questions(d) = decode_raw(listed).unwrap() else {
            panic!("expected questions");
        };
        assert_eq!(d.questions.len(), 2);
        assert_eq!(d.questions[1].number, 2);
        assert_eq!(d.questions[1].correct_answers, vec!["0", "2"]);

        let bare = r#"[{"text": "Only"}]"#;
        assert!(matches!(decode_raw(bare).unwrap(), RawAssessment::Questions(d) if d.questions.len() == 1));
    }

    #[test]
    fn raw_envelope_is_metadata_only() {
        let json = r#"{"result": {"questionset": {"name": "Quiz 1", "identifier": "do_9",
            "totalQuestions": 5, "expectedDuration": 900}}}"#;
        let RawAssessment::Envelope(d) = decode_raw(json).unwrap() else {
            panic!("expected envelope");
        };
        assert_eq!(d.name.as_deref(), Some("Quiz 1"));
        assert_eq!(d.total_questions, Some(5));
        assert_eq!(d.expected_duration_secs, Some(900));
        assert!(d.questions.is_empty());
    }

    #[test]
    fn raw_unknown_shapes_are_malformed() {
        for bad in [r#"{"items": []}"#, "42", r#""text""#, "{not json"] {
            let err = decode_raw(bad).unwrap_err();
            assert!(matches!(err, EvalError::DataMalformed(_)), "{bad}: {err}");
        }
        let err = decode_raw(r#"{"questions": [{"number": "two", "text": "x"}]}"#).unwrap_err();
        assert!(err.to_string().contains("non-integer"));
    }

    fn rendered() -> String {
        let eq = "=".repeat(80);
        let dash = "-".repeat(80);
        format!(
            "# Assessment: Practice Quiz 1\nID: do_7\nTotal Questions: 2\n\n{eq}\n\n\
Question 1: Which pipe carries potable water?\nType: MCQ-SCA\n\nOptions:\n  A) Blue\n  B) Purple\n\n\
Correct Answer(s): 0\nExplanation: Blue is the convention\nin most regions.\n\n{dash}\n\n\
Question 2: Name two valves.\nType: MCQ-MCA\n\nOptions:\n  A) Gate\n  B) Globe\n  C) Drum\n\n\
Correct Answer(s): 0, 1\n\n{dash}\n\n"
        )
    }

    #[test]
    fn raw_numbers_beyond_u32_are_malformed() {
        let question = r#"[{"questionNumber": 4294967297, "question": "Q1"}]"#;
        let err = decode_raw(question).unwrap_err();
        assert!(matches!(err, EvalError::DataMalformed(_)), "{err:?}");
        assert!(err.to_string().contains("out of range"), "{err}");

        let envelope = r#"{"result": {"questionset": {"name": "Quiz", "totalQuestions": 4294967297}}}"#;
        let err = decode_raw(envelope).unwrap_err();
        assert!(matches!(err, EvalError::DataMalformed(_)), "{err:?}");

        let fits = r#"[{"questionNumber": 4294967295, "question": "Q1"}]"#;
        let RawAssessment::Questions(d) = decode_raw(fits).unwrap() else {
            panic!("expected questions");
        };
        assert_eq!(d.questions[0].number, u32::MAX);
    }

    #[test]
    fn text_rendering() {
        let decoded = decode_text(&rendered()).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("Practice Quiz 1"));
        assert_eq!(decoded.source_id.as_deref(), Some("do_7"));
        assert_eq!(decoded.total_questions, Some(2));
        assert_eq!(decoded.questions.len(), 2);

        let q1 = &decoded.questions[0];
        assert_eq!(q1.text, "Which pipe carries potable water?");
        assert_eq!(q1.question_type, "MCQ-SCA");
        assert_eq!(q1.options, vec!["Blue", "Purple"]);
        assert_eq!(
            q1.explanation.as_deref(),
            Some("Blue is the convention in most regions.")
        );

        let q2 = &decoded.questions[1];
        assert_eq!(q2.number, 2);
        assert_eq!(q2.options.len(), 3);
        assert_eq!(q2.correct_answers, vec!["0", "1"]);
    }

    #[test]
    fn text_block_without_question_is_malformed() {
        let dash = "-".repeat(80);
        let content = format!("Type: MCQ\nOptions:\n  A) x\n{dash}\n");
        assert!(matches!(
            decode_text(&content),
            Err(EvalError::DataMalformed(_))
        ));

        let content = format!("Question one: what?\n{dash}\n");
        assert!(decode_text(&content)
            .unwrap_err()
            .to_string()
            .contains("non-integer"));
    }

    #[test]
    fn merge_fills_only_missing_metadata() {
        let mut parsed = DecodedAssessment {
            name: Some("Parsed".into()),
            ..Default::default()
        };
        let envelope = DecodedAssessment {
            name: Some("Envelope".into()),
            expected_duration_secs: Some(600),
            ..Default::default()
        };
        parsed.merge_metadata(&envelope);
        assert_eq!(parsed.name.as_deref(), Some("Parsed"));
        assert_eq!(parsed.expected_duration_secs, Some(600));
    }
}
