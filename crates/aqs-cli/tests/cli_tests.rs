//! CLI integration tests using assert_cmd.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn aqs() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("aqs").unwrap();
    cmd.env_remove("AQS_GEMINI_KEY")
        .env_remove("AQS_OPENAI_KEY")
        .env_remove("AQS_ANTHROPIC_KEY");
    cmd
}

const MOCK_CONFIG: &str = r#"
default_backends = ["offline"]

[retry]
max_attempts = 1
initial_backoff_ms = 1
max_backoff_ms = 1

[backends.offline]
type = "mock"
"#;

const METADATA: &str = r#"{
  "identifier": "do_1",
  "name": "Spreadsheet Basics",
  "description": "Formulas, references and charts.",
  "competencies": ["Spreadsheets"]
}"#;

const FINAL_ASSESSMENT: &str = r#"{
  "assessmentName": "Final Assessment",
  "questions": [
    {"questionNumber": 1, "questionText": "What does =SUM(A1:A3) compute?", "options": ["Sum", "Average"], "correctAnswers": ["Sum"]},
    {"questionNumber": 2, "questionText": "Which reference stays fixed when copied?", "options": ["A1", "$A$1"], "correctAnswers": ["$A$1"]}
  ]
}"#;

/// A temp workspace with a mock-backed config and one course.
fn workspace() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("aqs.toml");
    std::fs::write(&config, MOCK_CONFIG).unwrap();

    let course = dir.path().join("data").join("do_1");
    let assessment = course.join("Assessments").join("Final_Assessment");
    std::fs::create_dir_all(&assessment).unwrap();
    std::fs::write(course.join("metadata.json"), METADATA).unwrap();
    std::fs::write(assessment.join("assessment_parsed.json"), FINAL_ASSESSMENT).unwrap();
    (dir, config)
}

fn run_in(dir: &Path, config: &Path) -> assert_cmd::assert::Assert {
    aqs()
        .arg("run")
        .arg("--config")
        .arg(config)
        .arg("--data-dir")
        .arg(dir.join("data"))
        .arg("--output")
        .arg(dir.join("out"))
        .assert()
}

#[test]
fn help_lists_commands() {
    aqs()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list-courses"))
        .stdout(predicate::str::contains("list-backends"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("costs"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn version_flag() {
    aqs()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("aqs"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    aqs()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created aqs.toml"))
        .stdout(predicate::str::contains("metadata.json"));

    assert!(dir.path().join("aqs.toml").exists());
    assert!(dir
        .path()
        .join("data/do_example/Assessments/Final_Assessment/assessment_parsed.json")
        .exists());
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("aqs.toml"), "# mine\n").unwrap();

    aqs()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists, skipping"));

    let content = std::fs::read_to_string(dir.path().join("aqs.toml")).unwrap();
    assert_eq!(content, "# mine\n");
}

#[test]
fn init_example_course_validates() {
    let dir = TempDir::new().unwrap();
    aqs().current_dir(dir.path()).arg("init").assert().success();
    let config = dir.path().join("mock.toml");
    std::fs::write(&config, MOCK_CONFIG).unwrap();

    aqs()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Introduction to Data Literacy"))
        .stdout(predicate::str::contains("3 question(s)"));
}

#[test]
fn validate_reports_courses() {
    let (dir, config) = workspace();

    aqs()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Spreadsheet Basics"))
        .stdout(predicate::str::contains("2 question(s)"))
        .stdout(predicate::str::contains("All courses valid"));
}

#[test]
fn validate_flags_broken_assessment() {
    let (dir, config) = workspace();
    let broken = dir.path().join("data/do_1/Assessments/Practice_Quiz_1");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("assessment_parsed.json"), "{not json").unwrap();

    aqs()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("1 problem(s) found"));
}

#[test]
fn validate_missing_data_dir() {
    let (dir, config) = workspace();

    aqs()
        .arg("validate")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("nowhere"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("data directory not found"));
}

#[test]
fn missing_config_file() {
    aqs()
        .arg("list-backends")
        .arg("--config")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn list_courses_table() {
    let (dir, config) = workspace();

    aqs()
        .arg("list-courses")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .assert()
        .success()
        .stdout(predicate::str::contains("do_1"))
        .stdout(predicate::str::contains("Spreadsheet Basics"))
        .stdout(predicate::str::contains("1 course(s)"));
}

#[test]
fn list_backends_table() {
    let (_dir, config) = workspace();

    aqs()
        .arg("list-backends")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("offline"))
        .stdout(predicate::str::contains("mock-model"));
}

#[test]
fn run_with_mock_backend() {
    let (dir, config) = workspace();

    run_in(dir.path(), &config)
        .success()
        .stderr(predicate::str::contains("do_1/Final_Assessment@offline"));

    let out = dir.path().join("out");
    let result = out.join("do_1/offline/Final_Assessment_aqs.json");
    assert!(result.exists(), "missing {}", result.display());
    assert!(out.join("do_1/course_aqs.json").exists());
    let costs = std::fs::read_to_string(out.join("cost_summary.csv")).unwrap();
    assert!(costs.contains("do_1,offline,1,"));

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("run_summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["tasks"][0]["status"], "completed");
    assert_eq!(summary["backends"][0], "offline");
}

#[test]
fn second_run_reuses_results() {
    let (dir, config) = workspace();
    run_in(dir.path(), &config).success();
    run_in(dir.path(), &config)
        .success()
        .stderr(predicate::str::contains("1 reused"));

    let summary: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("out/run_summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["tasks"][0]["status"], "reused");
}

#[test]
fn run_rejects_unknown_backend() {
    let (dir, config) = workspace();

    aqs()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--output")
        .arg(dir.path().join("out"))
        .arg("--backends")
        .arg("nope")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown backend 'nope'"));
}

#[test]
fn run_rejects_bad_parallelism() {
    let (dir, config) = workspace();

    aqs()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--data-dir")
        .arg(dir.path().join("data"))
        .arg("--parallelism")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallelism"));
}

#[test]
fn compare_missing_file() {
    aqs()
        .arg("compare")
        .arg("--baseline")
        .arg("nonexistent.json")
        .arg("--current")
        .arg("also-nonexistent.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}
