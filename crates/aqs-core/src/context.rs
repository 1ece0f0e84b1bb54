//! Context builder: turns course directories into evaluation contexts.
//!
//! A course directory holds `metadata.json`, optional reference material
//! (WebVTT transcripts and PDFs anywhere, plain text under `Course/`) and any number of
//! assessment directories found by a bounded-depth search. Course contexts are
//! cached per course and evicted by the orchestrator once the course is done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::EvalError;
use crate::model::{AssessmentKind, AssessmentRecord, CourseContext, ReferenceChunk};
use crate::sources::{self, DecodedAssessment, RawAssessment};

pub const METADATA_FILE: &str = "metadata.json";

/// How deep below a course directory assessment directories are searched for.
const ASSESSMENT_SEARCH_DEPTH: usize = 5;

/// Directories under `Course/` that never count as modules.
const NON_MODULE_DIRS: [&str; 7] = [
    "Content",
    "Final_Assessment",
    "Final Assessment",
    "Practice_Quizzes",
    "Practice_Quiz",
    "Practice Quiz",
    "Assessments",
];

/// Reference-material chunking limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    pub chunk_chars: usize,
    /// Chunks beyond this count are dropped.
    pub max_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 2000,
            max_chunks: 8,
        }
    }
}

/// Where an assessment lives inside its course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentLocation {
    pub id: String,
    pub dir: PathBuf,
    pub kind: AssessmentKind,
    pub module: Option<String>,
}

struct CourseEntry {
    context: Arc<CourseContext>,
    assessments: Vec<AssessmentLocation>,
}

/// Loads course and assessment records from a data directory.
pub struct ContextBuilder {
    data_dir: PathBuf,
    chunking: ChunkingConfig,
    cache: Mutex<HashMap<String, Arc<CourseEntry>>>,
}

impl ContextBuilder {
    pub fn new(data_dir: impl Into<PathBuf>, chunking: ChunkingConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            chunking,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Course ids: sub-directories holding `metadata.json`, sorted by name.
    pub fn list_courses(&self) -> Result<Vec<String>, EvalError> {
        if !self.data_dir.is_dir() {
            return Err(EvalError::DataMissing(format!(
                "data directory not found: {}",
                self.data_dir.display()
            )));
        }
        let mut courses: Vec<String> = std::fs::read_dir(&self.data_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join(METADATA_FILE).is_file())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        courses.sort();
        Ok(courses)
    }

    /// The course context, loading and caching it on first use.
    pub fn course(&self, course_id: &str) -> Result<Arc<CourseContext>, EvalError> {
        Ok(Arc::clone(&self.entry(course_id)?.context))
    }

    /// Assessments of a course in sorted order.
    pub fn assessments(&self, course_id: &str) -> Result<Vec<AssessmentLocation>, EvalError> {
        Ok(self.entry(course_id)?.assessments.clone())
    }

    /// Build the evaluation context for one assessment.
    pub fn build(
        &self,
        course_id: &str,
        assessment_id: &str,
    ) -> Result<(Arc<CourseContext>, AssessmentRecord), EvalError> {
        let entry = self.entry(course_id)?;
        let location = entry
            .assessments
            .iter()
            .find(|a| a.id == assessment_id)
            .ok_or_else(|| {
                EvalError::DataMissing(format!(
                    "assessment '{assessment_id}' not found in course '{course_id}'"
                ))
            })?;
        let record = load_assessment(location)?;
        Ok((Arc::clone(&entry.context), record))
    }

    /// Drop the cached context of a finished course.
    pub fn evict(&self, course_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(course_id);
        }
    }

    fn entry(&self, course_id: &str) -> Result<Arc<CourseEntry>, EvalError> {
        if let Some(entry) = self.cache.lock().ok().and_then(|c| c.get(course_id).cloned()) {
            return Ok(entry);
        }

        let entry = Arc::new(self.load_course(course_id)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(course_id.to_string(), Arc::clone(&entry));
        }
        Ok(entry)
    }

    fn load_course(&self, course_id: &str) -> Result<CourseEntry, EvalError> {
        let course_dir = self.data_dir.join(course_id);
        if !course_dir.is_dir() {
            return Err(EvalError::DataMissing(format!(
                "course directory not found: {}",
                course_dir.display()
            )));
        }

        let mut context = load_metadata(&course_dir, course_id)?;
        let assessment_dirs = find_assessment_dirs(&course_dir);
        let module_dirs = module_dirs(&course_dir, &assessment_dirs);

        context.modules = module_dirs
            .iter()
            .filter_map(|d| d.file_name().and_then(|n| n.to_str()))
            .map(|n| n.replace('_', " "))
            .collect();
        context.reference = chunk_text(&course_reference_text(&course_dir), &self.chunking);
        for dir in &module_dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let text = reference_text(dir, |p| is_vtt(p) || is_pdf(p) || is_reference_txt(p));
            context
                .module_reference
                .insert(name.to_string(), chunk_text(&text, &self.chunking));
        }

        let mut assessments = Vec::new();
        let mut practice_index = 0;
        for dir in assessment_dirs {
            let Some(id) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if assessments.iter().any(|a: &AssessmentLocation| a.id == id) {
                tracing::warn!(course = course_id, assessment = %id, "duplicate assessment directory name, keeping the first");
                continue;
            }
            let relative = dir.strip_prefix(&course_dir).unwrap_or(dir.as_path());
            let kind = AssessmentKind::from_name(&relative.to_string_lossy());
            let module = if kind == AssessmentKind::Practice {
                let module = module_dirs
                    .get(practice_index)
                    .and_then(|d| d.file_name())
                    .and_then(|n| n.to_str())
                    .map(str::to_string);
                practice_index += 1;
                module
            } else {
                None
            };
            assessments.push(AssessmentLocation {
                id,
                dir,
                kind,
                module,
            });
        }

        tracing::debug!(
            course = course_id,
            assessments = assessments.len(),
            modules = context.modules.len(),
            reference_chunks = context.reference.len(),
            "loaded course"
        );

        Ok(CourseEntry {
            context: Arc::new(context),
            assessments,
        })
    }
}

// ---------------------------------------------------------------------------
// Course metadata
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFile {
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    competencies: Vec<Value>,
    #[serde(default)]
    primary_category: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

fn load_metadata(course_dir: &Path, course_id: &str) -> Result<CourseContext, EvalError> {
    let path = course_dir.join(METADATA_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EvalError::DataMissing(format!("{} not found", path.display()))
        } else {
            EvalError::Io(e)
        }
    })?;
    let meta: MetadataFile = serde_json::from_str(&content)
        .map_err(|e| EvalError::DataMalformed(format!("{}: {e}", path.display())))?;

    let competencies = meta
        .competencies
        .iter()
        .filter_map(|c| match c {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => ["competencyName", "name", "label"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .collect();

    Ok(CourseContext {
        id: course_id.to_string(),
        identifier: meta
            .identifier
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| course_id.to_string()),
        name: meta
            .name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| course_id.to_string()),
        description: meta.description.unwrap_or_default(),
        competencies,
        category: meta.primary_category.unwrap_or_default(),
        keywords: meta.keywords,
        modules: vec![],
        reference: vec![],
        module_reference: Default::default(),
    })
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

fn is_assessment_dir(dir: &Path) -> bool {
    sources::SOURCE_FILES.iter().any(|f| dir.join(f).is_file())
}

fn find_assessment_dirs(course_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(course_dir)
        .min_depth(1)
        .max_depth(ASSESSMENT_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && is_assessment_dir(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Module directories under `Course/` (and `Course/Content/`), sorted.
fn module_dirs(course_dir: &Path, assessment_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let root = course_dir.join("Course");
    let mut modules = sorted_subdirs(&root);
    for extra in sorted_subdirs(&root.join("Content")) {
        if !modules.iter().any(|m| m.file_name() == extra.file_name()) {
            modules.push(extra);
        }
    }
    modules.retain(|dir| {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        !NON_MODULE_DIRS.contains(&name) && !assessment_dirs.contains(dir)
    });
    modules
}

fn sorted_subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return vec![];
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

// ---------------------------------------------------------------------------
// Assessments
// ---------------------------------------------------------------------------

fn read_source(dir: &Path, file: &str) -> Result<Option<String>, EvalError> {
    let path = dir.join(file);
    if !path.is_file() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(&path)?))
}

/// Load an assessment, preferring the normalized file, then the raw JSON,
/// then the text rendering. A metadata-only envelope in `assessment.json`
/// contributes name, total and duration to whichever source has questions.
pub fn load_assessment(location: &AssessmentLocation) -> Result<AssessmentRecord, EvalError> {
    let dir = &location.dir;
    let raw = read_source(dir, sources::RAW_FILE)?;

    let decoded = if let Some(content) = read_source(dir, sources::PARSED_FILE)? {
        let mut decoded = sources::decode_parsed(&content)?;
        if let Some(Ok(RawAssessment::Envelope(meta))) = raw.as_deref().map(sources::decode_raw) {
            decoded.merge_metadata(&meta);
        }
        decoded
    } else {
        let envelope = raw.as_deref().map(sources::decode_raw).transpose()?;
        match envelope {
            Some(RawAssessment::Questions(decoded)) => decoded,
            Some(RawAssessment::Envelope(meta)) => match read_source(dir, sources::TEXT_FILE)? {
                Some(content) => {
                    let mut decoded = sources::decode_text(&content)?;
                    decoded.merge_metadata(&meta);
                    decoded
                }
                None => {
                    tracing::warn!(assessment = %location.id, "assessment.json carries no questions and no text rendering exists");
                    meta
                }
            },
            None => match read_source(dir, sources::TEXT_FILE)? {
                Some(content) => sources::decode_text(&content)?,
                None => {
                    return Err(EvalError::DataMissing(format!(
                        "no assessment file in {}",
                        dir.display()
                    )))
                }
            },
        }
    };

    Ok(into_record(location, decoded))
}

fn into_record(location: &AssessmentLocation, decoded: DecodedAssessment) -> AssessmentRecord {
    AssessmentRecord {
        id: location.id.clone(),
        name: decoded
            .name
            .unwrap_or_else(|| location.id.replace('_', " ")),
        kind: location.kind,
        module: location.module.clone(),
        total_questions: decoded.total_questions,
        expected_duration_secs: decoded.expected_duration_secs.unwrap_or(0),
        questions: decoded.questions,
    }
}

// ---------------------------------------------------------------------------
// Reference material
// ---------------------------------------------------------------------------

fn is_vtt(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "vtt")
}

fn is_reference_txt(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "txt")
        && path.file_name().is_some_and(|n| n != sources::TEXT_FILE)
}

fn is_pdf(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn course_reference_text(course_dir: &Path) -> String {
    let course_root = course_dir.join("Course");
    reference_text(course_dir, |p| {
        is_vtt(p) || is_pdf(p) || (is_reference_txt(p) && p.starts_with(&course_root))
    })
}

/// Concatenate matching reference files under `dir` in path order.
fn reference_text(dir: &Path, include: impl Fn(&Path) -> bool) -> String {
    let mut parts = Vec::new();
    for entry in WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && include(e.path()))
    {
        let path = entry.path();
        let content = if is_pdf(path) {
            pdf_text(path)
        } else {
            std::fs::read_to_string(path).map_err(EvalError::from)
        };
        let content = match content {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping unreadable reference file: {e}");
                continue;
            }
        };
        let text = if is_vtt(path) {
            parse_vtt(&content)
        } else {
            content.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        if !text.is_empty() {
            parts.push(text);
        }
    }
    parts.join(" ")
}

/// Text of every page of a PDF in page order.
///
/// Pages whose content cannot be decoded are skipped with a warning.
pub fn pdf_text(path: &Path) -> Result<String, EvalError> {
    let document = lopdf::Document::load(path)
        .map_err(|e| EvalError::DataMalformed(format!("{}: {e}", path.display())))?;
    let mut pages = Vec::new();
    for number in document.get_pages().into_keys() {
        match document.extract_text(&[number]) {
            Ok(text) => pages.push(text),
            Err(e) => {
                tracing::warn!(path = %path.display(), page = number, "skipping unreadable PDF page: {e}")
            }
        }
    }
    Ok(pages.join("\n\n"))
}

/// Extract spoken text from a WebVTT transcript.
pub fn parse_vtt(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty()
                && !line.starts_with("WEBVTT")
                && !line.starts_with("NOTE")
                && !line.contains("-->")
                && !line.chars().all(|c| c.is_ascii_digit())
                && !(line.starts_with('[') && line.ends_with(']'))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pack words greedily into chunks of at most `chunk_chars` characters.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<ReferenceChunk> {
    let limit = config.chunk_chars.max(1);
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    let flush = |current: &mut String, current_len: &mut usize, chunks: &mut Vec<String>| {
        if !current.is_empty() {
            chunks.push(std::mem::take(current));
            *current_len = 0;
        }
    };

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > limit {
            flush(&mut current, &mut current_len, &mut chunks);
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > limit {
            flush(&mut current, &mut current_len, &mut chunks);
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    flush(&mut current, &mut current_len, &mut chunks);

    chunks
        .into_iter()
        .take(config.max_chunks)
        .enumerate()
        .map(|(index, text)| ReferenceChunk { index, text })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn parsed_json(questions: usize) -> String {
        let qs: Vec<String> = (1..=questions)
            .map(|i| {
                format!(
                    r#"{{"questionNumber": {i}, "questionText": "Q{i}", "questionType": "MCQ", "options": ["a", "b"], "correctAnswers": ["a"]}}"#
                )
            })
            .collect();
        format!(
            r#"{{"assessmentName": "Assessment", "totalQuestions": {questions}, "questions": [{}]}}"#,
            qs.join(",")
        )
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let course = dir.path().join("do_1");
        write(
            &course.join(METADATA_FILE),
            r#"{"identifier": "do_1", "name": "Water Supply", "description": "Pipes and pumps",
                "competencies": ["Planning", {"competencyName": "Operations"}],
                "primaryCategory": "Course", "keywords": ["water"]}"#,
        );
        write(
            &course.join("Course/Module_1/intro.vtt"),
            "WEBVTT\n\n1\n00:00:01.000 --> 00:00:02.000\nWelcome to pumps.\n\n[Music]\nNOTE internal\n",
        );
        write(&course.join("Course/Module_2/notes.txt"), "Valves control  flow.");
        write(
            &course.join("Assessments/Final_Assessment/assessment_parsed.json"),
            &parsed_json(6),
        );
        write(
            &course.join("Assessments/Practice_Quizzes/Quiz_1/assessment_parsed.json"),
            &parsed_json(3),
        );
        write(
            &course.join("Assessments/Practice_Quizzes/Quiz_2/assessment_parsed.json"),
            &parsed_json(2),
        );
        std::fs::create_dir_all(dir.path().join("not_a_course")).unwrap();
        dir
    }

    #[test]
    fn lists_courses_with_metadata() {
        let dir = fixture();
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        assert_eq!(builder.list_courses().unwrap(), vec!["do_1"]);
    }

    #[test]
    fn builds_course_context() {
        let dir = fixture();
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        let course = builder.course("do_1").unwrap();
        assert_eq!(course.name, "Water Supply");
        assert_eq!(course.competencies, vec!["Planning", "Operations"]);
        assert_eq!(course.category, "Course");
        assert_eq!(course.modules, vec!["Module 1", "Module 2"]);
        assert_eq!(course.reference.len(), 1);
        assert!(course.reference[0].text.contains("Welcome to pumps."));
        assert!(course.reference[0].text.contains("Valves control flow."));
        assert!(!course.reference[0].text.contains("Music"));
        assert_eq!(
            course.module_reference["Module_2"][0].text,
            "Valves control flow."
        );
    }

    /// One-page PDF with a single line of text in a standard font.
    fn write_pdf(path: &Path, text: &str) {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        doc.save(path).unwrap();
    }

    #[test]
    fn pdf_material_feeds_module_and_course_reference() {
        let dir = fixture();
        let course = dir.path().join("do_1");
        write_pdf(&course.join("Course/Module_2/handout.pdf"), "Pumps need priming");
        write_pdf(&course.join("syllabus.pdf"), "Course syllabus overview");
        write(&course.join("Course/Module_1/broken.pdf"), "%PDF-1.4 not really");

        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        let context = builder.course("do_1").unwrap();

        let module_2 = &context.module_reference["Module_2"][0].text;
        assert!(module_2.contains("Pumps need priming"), "{module_2}");
        assert!(module_2.contains("Valves control flow."));
        assert!(!context.module_reference["Module_1"][0]
            .text
            .contains("Course syllabus"));

        let summary = &context.reference[0].text;
        assert!(summary.contains("Pumps need priming"), "{summary}");
        assert!(summary.contains("Course syllabus overview"), "{summary}");
        assert!(summary.contains("Welcome to pumps."));
    }

    #[test]
    fn course_id_is_the_directory_name() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("course_dir").join(METADATA_FILE),
            r#"{"identifier": "do_meta", "name": "Renamed"}"#,
        );
        write(&dir.path().join("plain").join(METADATA_FILE), r#"{"name": "Plain"}"#);
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());

        let course = builder.course("course_dir").unwrap();
        assert_eq!(course.id, "course_dir");
        assert_eq!(course.identifier, "do_meta");

        let plain = builder.course("plain").unwrap();
        assert_eq!(plain.identifier, "plain");
    }

    #[test]
    fn discovers_assessments_and_maps_modules() {
        let dir = fixture();
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        let found = builder.assessments("do_1").unwrap();
        let ids: Vec<&str> = found.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["Final_Assessment", "Quiz_1", "Quiz_2"]);
        assert_eq!(found[0].kind, AssessmentKind::Final);
        assert_eq!(found[0].module, None);
        assert_eq!(found[1].kind, AssessmentKind::Practice);
        assert_eq!(found[1].module.as_deref(), Some("Module_1"));
        assert_eq!(found[2].module.as_deref(), Some("Module_2"));

        let (course, record) = builder.build("do_1", "Quiz_2").unwrap();
        assert_eq!(record.question_count(), 2);
        assert_eq!(course.reference_for(&record)[0].text, "Valves control flow.");
    }

    #[test]
    fn missing_and_malformed_inputs() {
        let dir = fixture();
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        assert!(matches!(
            builder.build("do_missing", "x"),
            Err(EvalError::DataMissing(_))
        ));
        assert!(matches!(
            builder.build("do_1", "Quiz_9"),
            Err(EvalError::DataMissing(_))
        ));

        write(&dir.path().join("do_2/metadata.json"), "{ not json");
        assert!(matches!(
            builder.course("do_2"),
            Err(EvalError::DataMalformed(_))
        ));

        std::fs::create_dir_all(dir.path().join("do_3")).unwrap();
        assert!(matches!(builder.course("do_3"), Err(EvalError::DataMissing(_))));
    }

    #[test]
    fn envelope_metadata_merges_into_text_rendering() {
        let dir = fixture();
        let quiz = dir.path().join("do_1/Assessments/Standalone_Check");
        write(
            &quiz.join("assessment.json"),
            r#"{"result": {"questionset": {"name": "Safety Check", "totalQuestions": 1, "expectedDuration": 300}}}"#,
        );
        write(
            &quiz.join("assessment_questions.txt"),
            &format!("Question 1: Is water wet?\nType: MCQ\n\nOptions:\n  A) Yes\n  B) No\n\nCorrect Answer(s): 0\n{}\n", "-".repeat(80)),
        );
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        let (_, record) = builder.build("do_1", "Standalone_Check").unwrap();
        assert_eq!(record.name, "Safety Check");
        assert_eq!(record.kind, AssessmentKind::Standalone);
        assert_eq!(record.expected_duration_secs, 300);
        assert_eq!(record.questions[0].options, vec!["Yes", "No"]);
    }

    #[test]
    fn envelope_without_questions_yields_empty_record() {
        let dir = fixture();
        let quiz = dir.path().join("do_1/Assessments/Final_Exam_Old");
        write(
            &quiz.join("assessment.json"),
            r#"{"result": {"questionset": {"name": "Old Final", "totalQuestions": 10}}}"#,
        );
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        let (_, record) = builder.build("do_1", "Final_Exam_Old").unwrap();
        assert_eq!(record.question_count(), 0);
        assert_eq!(record.total_questions, Some(10));
    }

    #[test]
    fn eviction_reloads_from_disk() {
        let dir = fixture();
        let builder = ContextBuilder::new(dir.path(), ChunkingConfig::default());
        assert_eq!(builder.course("do_1").unwrap().name, "Water Supply");
        write(
            &dir.path().join("do_1/metadata.json"),
            r#"{"name": "Renamed"}"#,
        );
        assert_eq!(builder.course("do_1").unwrap().name, "Water Supply");
        builder.evict("do_1");
        assert_eq!(builder.course("do_1").unwrap().name, "Renamed");
    }

    #[test]
    fn vtt_parsing() {
        let vtt = "WEBVTT\n\nNOTE header\n\n12\n00:00:01.000 --> 00:00:04.000\nHello there.\n[Applause]\nGeneral Kenobi.\n";
        assert_eq!(parse_vtt(vtt), "Hello there. General Kenobi.");
    }

    #[test]
    fn chunking_is_deterministic_and_bounded() {
        let config = ChunkingConfig {
            chunk_chars: 10,
            max_chunks: 3,
        };
        let chunks = chunk_text("aaa bbb ccc ddd eee fff ggg", &config);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["aaa bbb", "ccc ddd", "eee fff"]);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunk_text("aaa bbb ccc ddd eee fff ggg", &config), chunks);

        let long = chunk_text("abcdefghijklmnopqrstuvwxy z", &config);
        assert_eq!(long[0].text, "abcdefghij");
        assert_eq!(long[1].text, "klmnopqrst");
        assert_eq!(long[2].text, "uvwxy");

        assert!(chunk_text("   ", &config).is_empty());
    }
}
