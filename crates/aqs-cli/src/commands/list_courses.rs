//! The `aqs list-courses` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use aqs_core::context::ContextBuilder;
use aqs_core::model::AssessmentKind;
use aqs_providers::load_config_from;

pub fn execute(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let data_dir = data_dir.unwrap_or(config.data_dir);
    let context = ContextBuilder::new(&data_dir, config.chunking);

    let courses = context.list_courses()?;
    if courses.is_empty() {
        println!("No courses found in {}", data_dir.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Course", "Name", "Final", "Practice", "Standalone"]);

    for course_id in &courses {
        match (context.course(course_id), context.assessments(course_id)) {
            (Ok(course), Ok(assessments)) => {
                let count = |kind: AssessmentKind| assessments.iter().filter(|a| a.kind == kind).count();
                table.add_row(vec![
                    Cell::new(course_id),
                    Cell::new(&course.name),
                    Cell::new(count(AssessmentKind::Final)),
                    Cell::new(count(AssessmentKind::Practice)),
                    Cell::new(count(AssessmentKind::Standalone)),
                ]);
            }
            (Err(e), _) | (_, Err(e)) => {
                table.add_row(vec![
                    Cell::new(course_id),
                    Cell::new(format!("error: {e}")),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                ]);
            }
        }
    }

    println!("{table}");
    println!("{} course(s)", courses.len());
    Ok(())
}
