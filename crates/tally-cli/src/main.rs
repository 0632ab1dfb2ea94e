mod cmd_days;
mod cmd_parse;
mod cmd_render;
mod cmd_run;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Replay a test fixture across a repository's history, one day at a time"
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sweep the history: one checkout and test run per day
    Run {
        /// Sweep config (YAML)
        config: PathBuf,
        /// Repository to sweep (overrides `repo:` in the config)
        #[arg(long)]
        repo: Option<PathBuf>,
        /// Print the sampled days without touching the working tree
        #[arg(long)]
        dry_run: bool,
        /// Echo the test command's output live
        #[arg(long)]
        verbose: bool,
        /// Also print each event as a JSON line on stdout
        #[arg(long)]
        json_events: bool,
    },
    /// Print the sampled (day, commit) plan
    Days {
        /// Sweep config (YAML)
        config: PathBuf,
        /// Repository to sample (overrides `repo:` in the config)
        #[arg(long)]
        repo: Option<PathBuf>,
    },
    /// Run the summary parser over a captured log
    Parse {
        /// Log file to scan
        log: PathBuf,
        /// Summary line recognizer (regex)
        #[arg(long, default_value = tally_core::parse::DEFAULT_SUMMARY_PATTERN)]
        pattern: String,
    },
    /// Re-render a chart from a saved series
    Render {
        /// series.json written by `tally run`
        series: PathBuf,
        /// Output path (default: chart.svg next to the series)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Chart title
        #[arg(long)]
        title: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.cmd {
        Command::Run {
            config,
            repo,
            dry_run,
            verbose,
            json_events,
        } => cmd_run::execute(cmd_run::RunParams {
            config: &config,
            repo: repo.as_deref(),
            dry_run,
            verbose,
            json_events,
        }),
        Command::Days { config, repo } => cmd_days::execute(&config, repo.as_deref()),
        Command::Parse { log, pattern } => cmd_parse::execute(&log, &pattern),
        Command::Render { series, out, title } => {
            cmd_render::execute(&series, out.as_deref(), title.as_deref())
        }
    }
}

/// Logs go to stderr; stdout carries progress and results.
fn init_logging() {
    let default_filter = "info";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TALLY_LOG")
                .or_else(|_| EnvFilter::try_new(default_filter))
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
