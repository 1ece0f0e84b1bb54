//! The `aqs run` command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use aqs_core::checkpoint::FsCheckpointStore;
use aqs_core::context::ContextBuilder;
use aqs_core::engine::{estimate_remaining, Orchestrator, OrchestratorConfig, ProgressReporter};
use aqs_core::gateway::ModelGateway;
use aqs_core::metrics::TokenMetrics;
use aqs_core::model::EvaluationTask;
use aqs_core::parser::ResponseParser;
use aqs_core::prompt::PromptTemplates;
use aqs_core::report::{RunSummary, TaskRecord, TaskStatus};
use aqs_core::scoring::ScoringEngine;
use aqs_providers::{build_registry, load_config_from};
use aqs_report::FsResultSink;

/// Exit code of a run interrupted with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub backends: Option<String>,
    pub courses: Option<String>,
    pub parallelism: Option<usize>,
    pub temperature: Option<f64>,
    pub skip_failed: bool,
    pub force_restart: bool,
}

/// Console progress reporter.
struct ConsoleReporter {
    started: Instant,
    total: AtomicUsize,
    done: AtomicUsize,
}

impl ConsoleReporter {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_course_start(&self, course_id: &str, tasks: usize) {
        self.total.fetch_add(tasks, Ordering::Relaxed);
        eprintln!("Course {course_id}: {tasks} task(s)");
    }

    fn on_task_start(&self, task: &EvaluationTask, attempt: u32) {
        eprintln!("  Starting: {task} (attempt {attempt})");
    }

    fn on_task_complete(&self, record: &TaskRecord) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        let eta = estimate_remaining(
            self.started.elapsed(),
            done,
            total.saturating_sub(done),
        )
        .map(|d| format!(", ~{}s left", d.as_secs()))
        .unwrap_or_default();

        match (&record.status, &record.error) {
            (TaskStatus::Failed, Some(error)) => eprintln!(
                "  FAILED: {} [{}] {} ({done}/{total}{eta})",
                record.task, error.kind, error.message
            ),
            _ => eprintln!(
                "  Done: {} {:?} AQS {} ({}ms, {done}/{total}{eta})",
                record.task,
                record.status,
                record
                    .composite
                    .map_or_else(|| "n/a".to_string(), |c| format!("{c:.2}")),
                record.duration_ms,
            ),
        }
    }

    fn on_run_complete(&self, summary: &RunSummary) {
        let counts = summary.counts();
        eprintln!(
            "\nComplete: {} evaluated, {} reused, {} failed ({:.1}s)",
            counts.completed,
            counts.reused,
            counts.failed,
            self.started.elapsed().as_secs_f64()
        );
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let mut config = load_config_from(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = args.output {
        config.output_dir = dir;
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(temperature) = args.temperature {
        config.temperature = temperature;
    }
    config.skip_failed |= args.skip_failed;

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("  {problem}");
        }
        anyhow::bail!("invalid configuration ({} problem(s))", problems.len());
    }

    let backends = match &args.backends {
        Some(list) => split_list(list),
        None => config.default_backends.clone(),
    };
    let courses = args.courses.as_deref().map(split_list);
    tracing::debug!(?backends, ?courses, data_dir = %config.data_dir.display(), "run selection");

    let registry = build_registry(&config)?;
    let templates = match &config.prompts {
        Some(path) => PromptTemplates::from_file(path)?,
        None => PromptTemplates::default(),
    };
    let gateway = ModelGateway::new(
        Arc::new(templates),
        ResponseParser::new(config.scoring.blooms_sum_tolerance),
        config.gateway_config(),
    );
    let checkpoints = FsCheckpointStore::new(config.checkpoint_dir())
        .context("failed to open checkpoint store")?;
    let sink = FsResultSink::new(&config.output_dir);
    let summary_path = sink.run_summary_path();

    let orchestrator = Orchestrator::new(
        ContextBuilder::new(&config.data_dir, config.chunking),
        gateway,
        ScoringEngine::new(config.scoring.clone()),
        registry,
        Arc::new(checkpoints),
        Arc::new(sink),
        OrchestratorConfig {
            parallelism: config.parallelism,
            backends: backends.clone(),
            courses,
            skip_failed: config.skip_failed,
            force_restart: args.force_restart,
        },
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing in-flight tasks...");
            on_signal.cancel();
        }
    });

    eprintln!(
        "aqs v{}: evaluating with {}",
        env!("CARGO_PKG_VERSION"),
        backends.join(", ")
    );
    eprintln!();

    let reporter = ConsoleReporter::new();
    let summary = orchestrator.run(&reporter, &cancel).await?;

    print_summary(&summary);
    eprintln!("Run summary: {}", summary_path.display());

    if summary.cancelled {
        std::process::exit(EXIT_CANCELLED);
    }
    Ok(())
}

#[derive(Default)]
struct BackendRow {
    completed: usize,
    reused: usize,
    failed: usize,
    composite_sum: f64,
    scored: usize,
    tokens: TokenMetrics,
}

fn print_summary(summary: &RunSummary) {
    use comfy_table::{Cell, Table};

    let mut rows: BTreeMap<&str, BackendRow> = BTreeMap::new();
    for record in &summary.tasks {
        let row = rows.entry(record.task.backend.as_str()).or_default();
        match record.status {
            TaskStatus::Completed => row.completed += 1,
            TaskStatus::Reused => row.reused += 1,
            TaskStatus::Failed => row.failed += 1,
            TaskStatus::SkippedFailed | TaskStatus::Cancelled => {}
        }
        if let Some(composite) = record.composite {
            row.composite_sum += composite;
            row.scored += 1;
        }
        row.tokens += record.tokens;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Backend",
        "Evaluated",
        "Reused",
        "Failed",
        "Avg AQS",
        "Tokens",
        "Cost",
    ]);
    for (backend, row) in &rows {
        let average = if row.scored > 0 {
            format!("{:.2}", row.composite_sum / row.scored as f64)
        } else {
            "n/a".to_string()
        };
        table.add_row(vec![
            Cell::new(backend),
            Cell::new(row.completed),
            Cell::new(row.reused),
            Cell::new(row.failed),
            Cell::new(average),
            Cell::new(row.tokens.total_tokens()),
            Cell::new(format!("${:.4}", row.tokens.cost().total)),
        ]);
    }

    eprintln!("\n{table}");
    for failure in &summary.course_failures {
        eprintln!(
            "Course {} failed: [{}] {}",
            failure.course_id, failure.error.kind, failure.error.message
        );
    }
    if !summary.cancelled_courses.is_empty() {
        eprintln!("Not started: {}", summary.cancelled_courses.join(", "));
    }
}
