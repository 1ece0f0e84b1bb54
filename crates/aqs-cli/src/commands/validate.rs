//! The `aqs validate` command.

use std::path::PathBuf;

use anyhow::Result;

use aqs_core::context::{load_assessment, ContextBuilder};
use aqs_providers::load_config_from;

pub fn execute(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    let mut config = load_config_from(config_path.as_deref())?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }

    let mut problems = 0;
    let mut warnings = 0;

    for problem in config.validate() {
        println!("  CONFIG: {problem}");
        problems += 1;
    }

    let context = ContextBuilder::new(&config.data_dir, config.chunking);
    let courses = match context.list_courses() {
        Ok(courses) => courses,
        Err(e) => {
            println!("  DATA: {e}");
            anyhow::bail!("{} problem(s) found", problems + 1);
        }
    };

    for course_id in &courses {
        let course = match context.course(course_id) {
            Ok(course) => course,
            Err(e) => {
                println!("Course {course_id}: ERROR {e}");
                problems += 1;
                continue;
            }
        };
        let assessments = context.assessments(course_id)?;
        if course.identifier != course.id {
            println!("Course {}: metadata identifier is {}", course.id, course.identifier);
        }
        println!(
            "Course {} ({}): {} assessment(s), {} module(s), {} reference chunk(s)",
            course.id,
            course.name,
            assessments.len(),
            course.modules.len(),
            course.reference.len()
        );

        for location in &assessments {
            match load_assessment(location) {
                Ok(record) => {
                    println!(
                        "  [{}] {} ({}): {} question(s)",
                        record.id,
                        record.name,
                        record.kind,
                        record.question_count()
                    );
                    if record.question_count() == 0 {
                        println!("  [{}] WARNING: no questions", record.id);
                        warnings += 1;
                    }
                    for anomaly in record.numbering_anomalies() {
                        println!("  [{}] WARNING: {anomaly}", record.id);
                        warnings += 1;
                    }
                }
                Err(e) => {
                    println!("  [{}] ERROR: {e}", location.id);
                    problems += 1;
                }
            }
        }
    }

    if courses.is_empty() {
        println!("No courses found in {}", config.data_dir.display());
    }
    if warnings > 0 {
        println!("\n{warnings} warning(s) found.");
    }
    if problems > 0 {
        anyhow::bail!("{problems} problem(s) found");
    }
    println!("All courses valid.");
    Ok(())
}
