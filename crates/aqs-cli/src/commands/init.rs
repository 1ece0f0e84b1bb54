//! The `aqs init` command.

use std::path::Path;

use anyhow::Result;

use aqs_providers::SAMPLE_CONFIG;

const CONFIG_FILE: &str = "aqs.toml";
const EXAMPLE_COURSE_DIR: &str = "data/do_example";
const EXAMPLE_ASSESSMENT_DIR: &str = "data/do_example/Assessments/Final_Assessment";

fn write_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        println!("{} already exists, skipping.", path.display());
    } else {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        println!("Created {}", path.display());
    }
    Ok(())
}

pub fn execute() -> Result<()> {
    write_if_missing(Path::new(CONFIG_FILE), SAMPLE_CONFIG)?;
    write_if_missing(
        &Path::new(EXAMPLE_COURSE_DIR).join("metadata.json"),
        EXAMPLE_METADATA,
    )?;
    write_if_missing(
        &Path::new(EXAMPLE_ASSESSMENT_DIR).join("assessment_parsed.json"),
        EXAMPLE_ASSESSMENT,
    )?;

    println!("\nNext steps:");
    println!("  1. Set GEMINI_API_KEY or edit {CONFIG_FILE}");
    println!("  2. Run: aqs validate");
    println!("  3. Run: aqs run --courses do_example");

    Ok(())
}

const EXAMPLE_METADATA: &str = r#"{
  "identifier": "do_example",
  "name": "Introduction to Data Literacy",
  "description": "Reading tables and charts, basic descriptive statistics and spotting misleading visuals.",
  "competencies": [
    {"competencyName": "Descriptive statistics"},
    {"competencyName": "Data visualization"}
  ],
  "primaryCategory": "Course",
  "keywords": ["data", "statistics", "charts"]
}
"#;

const EXAMPLE_ASSESSMENT: &str = r#"{
  "assessmentName": "Final Assessment",
  "assessmentId": "do_example_final",
  "totalQuestions": 3,
  "questions": [
    {
      "questionNumber": 1,
      "questionText": "Which measure of central tendency is least affected by outliers?",
      "questionType": "mcq-sca",
      "options": ["Mean", "Median", "Range", "Standard deviation"],
      "correctAnswers": ["Median"]
    },
    {
      "questionNumber": 2,
      "questionText": "A bar chart's y-axis starts at 90 instead of 0. What effect does this most likely have?",
      "questionType": "mcq-sca",
      "options": [
        "It hides differences between bars",
        "It exaggerates differences between bars",
        "It has no effect",
        "It converts counts into percentages"
      ],
      "correctAnswers": ["It exaggerates differences between bars"]
    },
    {
      "questionNumber": 3,
      "questionText": "Which chart types are suited to showing a trend over time?",
      "questionType": "mcq-mca",
      "options": ["Line chart", "Pie chart", "Area chart", "Scatter plot of unrelated variables"],
      "correctAnswers": ["Line chart", "Area chart"]
    }
  ]
}
"#;
