use crate::config::schema::ResolvedSweep;
use crate::launcher::{RunOutcome, TestLauncher};
use crate::runner::event_log::{Event, EventLogger};
use crate::workspace::fixture::{self, FixtureAsset};
use crate::workspace::{git, WorkspaceGuard};
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tally_core::aggregate::TimeSeriesAggregator;
use tally_core::parse::SummaryParser;
use tally_core::sample::CommitSampler;
use tally_core::{DayBucket, SweepError, SweepPlan, TestRunResult, TimeSeries};
use tokio_util::sync::CancellationToken;

/// Everything a sweep borrows for its duration.
pub struct SweepContext<'a> {
    pub workspace: &'a WorkspaceGuard,
    pub fixture: &'a FixtureAsset,
    /// Relative to the workspace root.
    pub stage: &'a Path,
    pub launcher: &'a dyn TestLauncher,
    pub parser: &'a SummaryParser,
}

/// What happened on one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DayStatus {
    Measured { result: TestRunResult },
    Skipped { code: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayRecord {
    pub day: String,
    pub commit: String,
    #[serde(flatten)]
    pub status: DayStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepStatus {
    Completed,
    Cancelled,
    Aborted {
        day: String,
        code: &'static str,
        error: String,
    },
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub series: TimeSeries,
    pub days: Vec<DayRecord>,
    pub status: SweepStatus,
    pub planned: usize,
    /// Set when the workspace could not be put back.
    pub restore_error: Option<String>,
}

impl SweepOutcome {
    pub fn skipped(&self) -> usize {
        self.days
            .iter()
            .filter(|d| matches!(d.status, DayStatus::Skipped { .. }))
            .count()
    }

    /// Whether the sweep ran to the end and left the tree as found.
    pub fn is_success(&self) -> bool {
        self.restore_error.is_none() && !matches!(self.status, SweepStatus::Aborted { .. })
    }
}

enum DayStep {
    Measured {
        result: TestRunResult,
        exit_code: Option<i32>,
    },
    Skipped(SweepError),
    Cancelled,
}

/// How a day ended. `abort` means the tree can no longer be trusted and the
/// sweep must stop after `step` (if any) is recorded.
struct DayReport {
    step: Option<DayStep>,
    abort: Option<SweepError>,
}

impl DayReport {
    fn aborted(err: SweepError) -> Self {
        Self {
            step: None,
            abort: Some(err),
        }
    }
}

/// Read history and sample it into days. Touches nothing.
pub async fn sample_plan(resolved: &ResolvedSweep) -> Result<(usize, SweepPlan), SweepError> {
    let commits = git::log_commits(&resolved.repo, &resolved.config.rev)
        .await
        .map_err(|e| SweepError::sampling(format!("{e:#}")))?;
    let plan = CommitSampler::new()
        .with_window(resolved.window)
        .sample(&commits)?;
    Ok((commits.len(), plan))
}

/// Run a whole sweep: sample, lock the tree, visit every day, restore.
///
/// Sampling problems fail before the tree is touched. Once the workspace is
/// acquired the tree is always restored, and a restoration failure is
/// reported in [`SweepOutcome::restore_error`].
pub async fn sweep(
    resolved: &ResolvedSweep,
    launcher: &dyn TestLauncher,
    cancel: CancellationToken,
    json_events: bool,
) -> Result<SweepOutcome> {
    let parser = SummaryParser::new(&resolved.config.summary_pattern)?;
    let (commits, plan) = sample_plan(resolved).await?;
    tracing::info!(
        sweep = %resolved.config.name,
        commits,
        days = plan.len(),
        "history sampled"
    );

    let fixture = FixtureAsset::snapshot(&resolved.fixture_source)?;
    let workspace = WorkspaceGuard::acquire(&resolved.repo, resolved.clean.clone()).await?;
    let head = workspace.original().to_string();

    let mut events = EventLogger::new(&resolved.state_dir).with_stdout_json(json_events);
    events.record(Event::SweepStart {
        sweep: resolved.config.name.clone(),
        repo: resolved.repo.display().to_string(),
        head: head.clone(),
        commits,
        days: plan.len(),
    });

    let ctx = SweepContext {
        workspace: &workspace,
        fixture: &fixture,
        stage: &resolved.stage,
        launcher,
        parser: &parser,
    };
    let mut outcome = run_sweep(&plan, &ctx, cancel, &mut events).await;

    match workspace.release().await {
        Ok(()) => {
            events.record(Event::WorkspaceRestored {
                head,
                ok: true,
                error: None,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, head = %head, "workspace restoration failed");
            events.record(Event::WorkspaceRestored {
                head,
                ok: false,
                error: Some(e.to_string()),
            });
            outcome.restore_error = Some(e.to_string());
        }
    }
    Ok(outcome)
}

/// Visit every day of `plan` in order. The main sweep loop.
///
/// Never restores the workspace itself; the caller owns the guard.
pub async fn run_sweep(
    plan: &SweepPlan,
    ctx: &SweepContext<'_>,
    cancel: CancellationToken,
    events: &mut EventLogger,
) -> SweepOutcome {
    let total = plan.len();
    let mut agg = TimeSeriesAggregator::new();
    let mut days = Vec::with_capacity(total);
    let mut status = SweepStatus::Completed;

    for (i, bucket) in plan.iter().enumerate() {
        if cancel.is_cancelled() {
            status = SweepStatus::Cancelled;
            break;
        }

        let label = bucket.label();
        let short = bucket.commit.short_hash().to_string();
        println!(
            "\n▶ [{}/{total}] {label} {short} ({} commit{})",
            i + 1,
            bucket.commit_count,
            if bucket.commit_count == 1 { "" } else { "s" }
        );
        tracing::info!(day = %label, commit = %short, "day start");
        events.record(Event::DayStart {
            day: label.clone(),
            commit: bucket.commit.hash.clone(),
            index: i + 1,
        });
        let day_start = Instant::now();

        let report = process_day(bucket, ctx, &cancel).await;
        let mut interrupted = false;
        match report.step {
            Some(DayStep::Measured { result, exit_code }) => {
                agg.record(label.clone(), Some(bucket.commit.hash.as_str()), &result);
                println!(
                    "  ✓ {label}: {}/{} passed ({})",
                    result.passed(),
                    result.total,
                    format_elapsed(day_start.elapsed())
                );
                events.record(Event::DayMeasured {
                    day: label.clone(),
                    commit: bucket.commit.hash.clone(),
                    result,
                    passed: result.passed(),
                    exit_code,
                    duration_ms: day_start.elapsed().as_millis() as u64,
                });
                days.push(DayRecord {
                    day: label.clone(),
                    commit: bucket.commit.hash.clone(),
                    status: DayStatus::Measured { result },
                });
            }
            Some(DayStep::Skipped(err)) => {
                tracing::warn!(day = %label, commit = %short, error = %err, "day skipped");
                println!(
                    "  ✗ {label} skipped ({}): {err}",
                    format_elapsed(day_start.elapsed())
                );
                events.record(Event::DaySkipped {
                    day: label.clone(),
                    commit: bucket.commit.hash.clone(),
                    code: err.code().into(),
                    reason: err.to_string(),
                });
                days.push(DayRecord {
                    day: label.clone(),
                    commit: bucket.commit.hash.clone(),
                    status: DayStatus::Skipped {
                        code: err.code().into(),
                        reason: err.to_string(),
                    },
                });
            }
            Some(DayStep::Cancelled) => {
                println!("  ⊘ {label} interrupted");
                interrupted = true;
            }
            None => {}
        }

        if let Some(err) = report.abort {
            tracing::error!(day = %label, commit = %short, error = %err, "sweep aborted");
            println!("  ✗ Sweep aborted at {label}: {err}");
            events.record(Event::SweepAborted {
                day: label.clone(),
                code: err.code().into(),
                error: err.to_string(),
                measured: agg.measured(),
            });
            status = SweepStatus::Aborted {
                day: label,
                code: err.code(),
                error: err.to_string(),
            };
            break;
        }
        if interrupted {
            status = SweepStatus::Cancelled;
            break;
        }
    }

    let series = agg.finish();
    let skipped = days
        .iter()
        .filter(|d| matches!(d.status, DayStatus::Skipped { .. }))
        .count();
    match &status {
        SweepStatus::Completed => println!(
            "\n✓ Sweep completed ({} measured, {skipped} skipped)",
            series.measured_days()
        ),
        SweepStatus::Cancelled => println!(
            "\nShutdown after {} of {total} days.",
            days.len()
        ),
        SweepStatus::Aborted { .. } => {}
    }
    if !matches!(status, SweepStatus::Aborted { .. }) {
        events.record(Event::SweepCompleted {
            measured: series.measured_days(),
            skipped,
            cancelled: status == SweepStatus::Cancelled,
        });
    }

    SweepOutcome {
        series,
        days,
        status,
        planned: total,
        restore_error: None,
    }
}

/// checkout → stage → run → unstage + scrub.
///
/// A result read before a failed scrub is still reported alongside the
/// abort.
async fn process_day(
    bucket: &DayBucket,
    ctx: &SweepContext<'_>,
    cancel: &CancellationToken,
) -> DayReport {
    let root = ctx.workspace.root();
    if let Err(e) = ctx.workspace.checkout(&bucket.commit).await {
        return DayReport::aborted(e);
    }

    let staged = match ctx.fixture.stage(root, ctx.stage) {
        Ok(path) => path,
        Err(e) if e.is_day_level() => {
            return DayReport {
                step: Some(DayStep::Skipped(e)),
                abort: ctx.workspace.scrub().await.err(),
            };
        }
        Err(e) => return DayReport::aborted(e),
    };

    let outcome = ctx
        .launcher
        .run_day(bucket, root, ctx.parser, cancel.child_token())
        .await;

    if let Err(e) = fixture::unstage(&staged) {
        tracing::warn!(path = %staged.display(), error = %e, "could not remove staged fixture");
    }
    let abort = ctx.workspace.scrub().await.err();

    let step = match outcome {
        Err(e) => DayStep::Skipped(SweepError::test_invocation(format!("{e:#}"))),
        Ok(RunOutcome::Measured {
            result, exit_code, ..
        }) => DayStep::Measured { result, exit_code },
        Ok(RunOutcome::NoSummary { lines, .. }) => DayStep::Skipped(SweepError::Parse { lines }),
        Ok(RunOutcome::SpawnFailed { error }) => {
            DayStep::Skipped(SweepError::test_invocation(format!("could not start: {error}")))
        }
        Ok(RunOutcome::TimedOut { lines }) => DayStep::Skipped(SweepError::test_invocation(
            format!("timed out after {lines} lines of output"),
        )),
        Ok(RunOutcome::Cancelled) => DayStep::Cancelled,
    };
    DayReport {
        step: Some(step),
        abort,
    }
}

fn format_elapsed(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}
