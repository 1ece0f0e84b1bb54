//! aqs command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "aqs", version, about = "Assessment quality scoring with LLM backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every assessment of the selected courses
    Run {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Course data directory (overrides the config)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output directory (overrides the config)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Backends to evaluate with, comma-separated (default: config's default_backends)
        #[arg(long)]
        backends: Option<String>,

        /// Restrict the run to these course ids, comma-separated
        #[arg(long)]
        courses: Option<String>,

        /// Max concurrent tasks within a course
        #[arg(long)]
        parallelism: Option<usize>,

        /// Generation temperature
        #[arg(long)]
        temperature: Option<f64>,

        /// Leave tasks that failed in an earlier run alone
        #[arg(long)]
        skip_failed: bool,

        /// Ignore checkpoints and evaluate everything again
        #[arg(long)]
        force_restart: bool,
    },

    /// List the courses found in the data directory
    ListCourses {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Course data directory (overrides the config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// List configured backends
    ListBackends {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check the configuration and load every course without calling a backend
    Validate {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Course data directory (overrides the config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Compare two run summaries
    Compare {
        /// Baseline run_summary.json
        #[arg(long)]
        baseline: PathBuf,

        /// Current run_summary.json
        #[arg(long)]
        current: PathBuf,

        /// Composite changes up to this many points count as unchanged
        #[arg(long, default_value = "1.0")]
        threshold: f64,

        /// Exit code 1 if regressions found
        #[arg(long)]
        fail_on_regression: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show token usage and cost per course and backend of a saved run
    Costs {
        /// run_summary.json to read
        #[arg(long)]
        summary: PathBuf,

        /// Output format: table, csv
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Create a starter config and an example course
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aqs=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            data_dir,
            output,
            backends,
            courses,
            parallelism,
            temperature,
            skip_failed,
            force_restart,
        } => {
            commands::run::execute(commands::run::RunArgs {
                config,
                data_dir,
                output,
                backends,
                courses,
                parallelism,
                temperature,
                skip_failed,
                force_restart,
            })
            .await
        }
        Commands::ListCourses { config, data_dir } => {
            commands::list_courses::execute(config, data_dir)
        }
        Commands::ListBackends { config } => commands::list_backends::execute(config),
        Commands::Validate { config, data_dir } => commands::validate::execute(config, data_dir),
        Commands::Compare {
            baseline,
            current,
            threshold,
            fail_on_regression,
            format,
        } => commands::compare::execute(baseline, current, threshold, fail_on_regression, format),
        Commands::Costs { summary, format } => commands::costs::execute(summary, format),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
