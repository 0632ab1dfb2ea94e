use anyhow::{bail, Result};
use std::path::Path;
use tally_core::day_label;
use tally_report::{ChartConfig, CsvSeries, JsonSeries, Reporter, SvgStepChart};
use tally_sweep::config::parser::{load_config, resolve};
use tally_sweep::config::schema::ResolvedSweep;
use tally_sweep::launcher::ShellLauncher;
use tally_sweep::runner::{sample_plan, sweep, SweepOutcome, SweepStatus};
use tokio_util::sync::CancellationToken;

pub struct RunParams<'a> {
    pub config: &'a Path,
    pub repo: Option<&'a Path>,
    pub dry_run: bool,
    pub verbose: bool,
    pub json_events: bool,
}

/// Load a config and resolve it relative to its own directory.
pub(crate) fn load_resolved(config_file: &Path, repo: Option<&Path>) -> Result<ResolvedSweep> {
    let config = load_config(config_file)?;
    let base = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    resolve(&config, base, repo)
}

/// Execute `tally run <config.yaml>`
pub fn execute(params: RunParams<'_>) -> Result<()> {
    let resolved = load_resolved(params.config, params.repo)?;
    let rt = tokio::runtime::Runtime::new()?;

    if params.dry_run {
        let (commits, plan) = rt.block_on(sample_plan(&resolved))?;
        let cfg = &resolved.config;
        println!("[dry-run] Sweep: {}", cfg.name);
        println!("  Repo:    {}", resolved.repo.display());
        println!("  Rev:     {}", cfg.rev);
        println!("  Window:  {}", window_text(&resolved));
        println!("  Command: {}", cfg.command);
        println!("  Stage:   {}", resolved.stage.display());
        println!("  Output:  {}", resolved.state_dir.display());
        println!("\n  {commits} commits → {} days:", plan.len());
        for (i, bucket) in plan.iter().enumerate() {
            println!(
                "  {:>4}. {} {} ({} commits)",
                i + 1,
                bucket.label(),
                bucket.commit.short_hash(),
                bucket.commit_count
            );
        }
        return Ok(());
    }

    println!(
        "Starting sweep \"{}\" over {}",
        resolved.config.name,
        resolved.repo.display()
    );

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let launcher = ShellLauncher::for_sweep(&resolved).with_verbose(params.verbose);
    let outcome = rt.block_on(sweep(&resolved, &launcher, cancel, params.json_events))?;

    write_outputs(&resolved, &outcome)?;
    print_summary(&resolved, &outcome);

    if let Some(err) = &outcome.restore_error {
        bail!("workspace was NOT restored: {err}");
    }
    if let SweepStatus::Aborted { day, error, .. } = &outcome.status {
        bail!("sweep aborted at {day}: {error}");
    }
    Ok(())
}

fn write_outputs(resolved: &ResolvedSweep, outcome: &SweepOutcome) -> Result<()> {
    JsonSeries.render(&outcome.series, &resolved.series_path())?;
    CsvSeries.render(&outcome.series, &resolved.csv_path())?;
    let chart = SvgStepChart::new(ChartConfig {
        title: format!("{}: passing tests per day", resolved.config.name),
        ..ChartConfig::default()
    });
    chart.render(&outcome.series, &resolved.chart_path())?;
    let days = serde_json::to_string_pretty(&outcome.days)?;
    tally_report::write_atomic(&resolved.days_path(), days.as_bytes())?;
    Ok(())
}

fn print_summary(resolved: &ResolvedSweep, outcome: &SweepOutcome) {
    let series = &outcome.series;
    println!(
        "\n{} of {} days measured, {} skipped",
        series.measured_days(),
        outcome.planned,
        outcome.skipped()
    );
    for drift in &series.drift {
        println!(
            "  ⚠ {}: {} tests (first day had {})",
            drift.day, drift.observed, drift.expected
        );
    }
    println!("  Series: {}", resolved.series_path().display());
    println!("  Chart:  {}", resolved.chart_path().display());
}

fn window_text(resolved: &ResolvedSweep) -> String {
    let w = &resolved.window;
    if w.is_unbounded() {
        return "all history".into();
    }
    format!(
        "{} .. {}",
        w.since.map(day_label).unwrap_or_default(),
        w.until.map(day_label).unwrap_or_default()
    )
}

/// SIGINT, SIGTERM and SIGHUP (Ctrl-C on Windows) end the sweep through the
/// normal cancellation path, so the tree is always restored.
fn cancel_on_signal(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}
