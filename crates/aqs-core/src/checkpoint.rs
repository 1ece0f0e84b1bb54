//! Durable per-task progress.
//!
//! One JSON file per (backend, course, assessment) so that concurrent
//! writers to different tasks never touch the same file. Writes go to a
//! temporary file in the target directory and are renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::engine::TaskStage;
use crate::error::{ErrorKind, EvalError};
use crate::model::{path_component, AssessmentRecord, CourseContext, EvaluationTask};
use crate::results::AqsResult;

/// Persisted status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// The last error recorded for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EvalError> for ErrorRecord {
    fn from(err: &EvalError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Stored state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub task: EvaluationTask,
    pub status: CheckpointStatus,
    /// Last stage the task reached.
    pub stage: TaskStage,
    pub attempts: u32,
    pub input_hash: String,
    pub prompt_version: String,
    #[serde(default)]
    pub last_error: Option<ErrorRecord>,
    pub updated_at: DateTime<Utc>,
    /// Present once the task completed.
    #[serde(default)]
    pub result: Option<AqsResult>,
}

impl CheckpointEntry {
    pub fn pending(task: EvaluationTask, input_hash: String, prompt_version: String) -> Self {
        Self {
            task,
            status: CheckpointStatus::Pending,
            stage: TaskStage::Pending,
            attempts: 0,
            input_hash,
            prompt_version,
            last_error: None,
            updated_at: Utc::now(),
            result: None,
        }
    }
}

/// What to do with a task given its stored state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeDecision {
    /// Run it. `previous_attempts` counts earlier tries.
    Evaluate { previous_attempts: u32 },
    /// Inputs unchanged since a completed run: return the stored result.
    Reuse(Box<AqsResult>),
    /// It failed before and failed tasks are being skipped.
    SkipFailed { last_error: Option<ErrorRecord> },
}

/// Durable store of task progress.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, task: &EvaluationTask) -> Result<Option<CheckpointEntry>, EvalError>;

    fn put(&self, entry: &CheckpointEntry) -> Result<(), EvalError>;

    /// Write `entry` only if the stored status is one of `expected`. A
    /// missing entry counts as [`CheckpointStatus::Pending`]. Returns whether
    /// the write happened.
    fn transition(
        &self,
        expected: &[CheckpointStatus],
        entry: &CheckpointEntry,
    ) -> Result<bool, EvalError>;

    fn list(&self) -> Result<Vec<CheckpointEntry>, EvalError>;

    /// Decide whether a task needs evaluating.
    fn should_skip(
        &self,
        task: &EvaluationTask,
        current_hash: &str,
        skip_failed: bool,
    ) -> Result<ResumeDecision, EvalError> {
        Ok(resume_decision(task, self.get(task)?, current_hash, skip_failed))
    }
}

/// Resume policy over an already-read entry.
pub fn resume_decision(
    task: &EvaluationTask,
    entry: Option<CheckpointEntry>,
    current_hash: &str,
    skip_failed: bool,
) -> ResumeDecision {
    let Some(entry) = entry else {
        return ResumeDecision::Evaluate {
            previous_attempts: 0,
        };
    };

    match entry.status {
        CheckpointStatus::Completed => match entry.result {
            Some(result) if entry.input_hash == current_hash => ResumeDecision::Reuse(Box::new(result)),
            _ => {
                let drift = EvalError::ChecksumMismatch {
                    task: task.to_string(),
                    stored: entry.input_hash.clone(),
                    current: current_hash.to_string(),
                };
                tracing::warn!(%task, "{drift}; re-evaluating");
                ResumeDecision::Evaluate {
                    previous_attempts: entry.attempts,
                }
            }
        },
        CheckpointStatus::Failed if skip_failed => ResumeDecision::SkipFailed {
            last_error: entry.last_error,
        },
        CheckpointStatus::Failed | CheckpointStatus::InProgress | CheckpointStatus::Pending => {
            ResumeDecision::Evaluate {
                previous_attempts: entry.attempts,
            }
        }
    }
}

/// SHA-256 over the canonical JSON of everything that determines a result.
pub fn input_hash(
    course: &CourseContext,
    assessment: &AssessmentRecord,
    prompt_version: &str,
    backend: &str,
) -> Result<String, EvalError> {
    #[derive(Serialize)]
    struct HashInput<'a> {
        course: &'a CourseContext,
        assessment: &'a AssessmentRecord,
        prompt_version: &'a str,
        backend: &'a str,
    }

    let canonical = serde_json::to_vec(&HashInput {
        course,
        assessment,
        prompt_version,
        backend,
    })
    .map_err(|e| EvalError::Checkpoint(format!("failed to serialize hash input: {e}")))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Filesystem-backed checkpoint store: `<root>/<backend>/<course>/<assessment>.json`.
pub struct FsCheckpointStore {
    root: PathBuf,
    // Serializes compare-and-swap within this process.
    cas_lock: Mutex<()>,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EvalError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            cas_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, task: &EvaluationTask) -> PathBuf {
        self.root
            .join(path_component(&task.backend))
            .join(path_component(&task.course_id))
            .join(format!("{}.json", path_component(&task.assessment_id)))
    }

    fn read(&self, path: &Path) -> Result<Option<CheckpointEntry>, EvalError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| EvalError::Checkpoint(format!("{}: {e}", path.display())))
    }

    fn write(&self, entry: &CheckpointEntry) -> Result<(), EvalError> {
        let path = self.entry_path(&entry.task);
        let dir = path
            .parent()
            .ok_or_else(|| EvalError::Checkpoint(format!("no parent for {}", path.display())))?;
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| EvalError::Checkpoint(format!("failed to serialize entry: {e}")))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| EvalError::Io(e.error))?;
        Ok(())
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn get(&self, task: &EvaluationTask) -> Result<Option<CheckpointEntry>, EvalError> {
        self.read(&self.entry_path(task))
    }

    fn put(&self, entry: &CheckpointEntry) -> Result<(), EvalError> {
        let _guard = self
            .cas_lock
            .lock()
            .map_err(|_| EvalError::Checkpoint("checkpoint lock poisoned".into()))?;
        self.write(entry)
    }

    fn transition(
        &self,
        expected: &[CheckpointStatus],
        entry: &CheckpointEntry,
    ) -> Result<bool, EvalError> {
        let _guard = self
            .cas_lock
            .lock()
            .map_err(|_| EvalError::Checkpoint("checkpoint lock poisoned".into()))?;
        // An entry that no longer deserializes counts as pending and is overwritten.
        let current = match self.get(&entry.task) {
            Ok(existing) => existing
                .map(|e| e.status)
                .unwrap_or(CheckpointStatus::Pending),
            Err(EvalError::Checkpoint(message)) => {
                tracing::warn!(task = %entry.task, "replacing unreadable checkpoint: {message}");
                CheckpointStatus::Pending
            }
            Err(e) => return Err(e),
        };
        if !expected.contains(&current) {
            return Ok(false);
        }
        self.write(entry)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<CheckpointEntry>, EvalError> {
        let mut entries = Vec::new();
        for file in WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "json")
            })
        {
            if let Some(entry) = self.read(file.path())? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
