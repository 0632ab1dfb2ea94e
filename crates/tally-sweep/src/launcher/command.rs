use crate::config::schema::ResolvedSweep;
use crate::launcher::stream::{LineSink, OutputMonitor};
use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tally_core::parse::SummaryParser;
use tally_core::{DayBucket, TestRunResult};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How one day's test command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A summary line was parsed.
    Measured {
        result: TestRunResult,
        /// `None` if the child had to be killed after printing its summary.
        exit_code: Option<i32>,
        lines: usize,
    },
    /// Output ended without a summary line.
    NoSummary { exit_code: Option<i32>, lines: usize },
    /// The command could not be started.
    SpawnFailed { error: String },
    TimedOut { lines: usize },
    Cancelled,
}

/// Runs the test command for one day. Implemented by [`ShellLauncher`] and
/// [`MockLauncher`] (tests).
#[async_trait::async_trait]
pub trait TestLauncher: Send + Sync {
    async fn run_day(
        &self,
        day: &DayBucket,
        cwd: &Path,
        parser: &SummaryParser,
        cancel: CancellationToken,
    ) -> Result<RunOutcome>;
}

/// Shell program and args for the current platform.
#[cfg(windows)]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    // Prefer PowerShell over cmd.exe for better Unix-ism support
    static SHELL: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    let shell = SHELL.get_or_init(|| {
        if which_exists("pwsh") {
            "pwsh".into()
        } else if which_exists("powershell") {
            "powershell".into()
        } else {
            "cmd.exe".into()
        }
    });

    if shell == "cmd.exe" {
        (shell.clone(), vec!["/C".into(), cmd.into()])
    } else {
        (
            shell.clone(),
            vec!["-NoProfile".into(), "-Command".into(), cmd.into()],
        )
    }
}

#[cfg(not(windows))]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    ("sh".into(), vec!["-c".into(), cmd.into()])
}

#[cfg(windows)]
fn which_exists(name: &str) -> bool {
    std::process::Command::new("where")
        .arg(name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Runs a shell command at the repository root.
pub struct ShellLauncher {
    command: String,
    timeout: Duration,
    env: HashMap<String, String>,
    verbose: bool,
    log_dir: Option<PathBuf>,
}

impl ShellLauncher {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            env: HashMap::new(),
            verbose: false,
            log_dir: None,
        }
    }

    /// The configured command, timeout and env, logging to the state dir.
    pub fn for_sweep(resolved: &ResolvedSweep) -> Self {
        Self::new(
            resolved.config.command.clone(),
            Duration::from_secs(resolved.config.timeout_sec),
        )
        .with_env(resolved.config.env.clone())
        .with_log_dir(Some(resolved.log_dir()))
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Echo child output live.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Write each day's output to `<dir>/<day>-<short-hash>.log`.
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn log_path(&self, day: &DayBucket) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}-{}.log", day.label(), day.commit.short_hash())))
    }
}

#[async_trait::async_trait]
impl TestLauncher for ShellLauncher {
    async fn run_day(
        &self,
        day: &DayBucket,
        cwd: &Path,
        parser: &SummaryParser,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let (shell, args) = shell_cmd(&self.command);
        let mut cmd = Command::new(&shell);
        cmd.args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a kill reaches the build tool's children too.
        #[cfg(unix)]
        cmd.process_group(0);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(RunOutcome::SpawnFailed {
                    error: format!("{shell}: {e}"),
                })
            }
        };
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture stderr"))?;

        let sink = LineSink::new()
            .with_verbose(self.verbose)
            .with_tee(self.log_path(day));
        let mut monitor = OutputMonitor::spawn(stdout, stderr, sink);
        let deadline = Instant::now() + self.timeout;

        let mut lines = 0;
        let mut found = None;
        loop {
            tokio::select! {
                line = monitor.next_line() => match line {
                    Some(line) => {
                        lines += 1;
                        if let Some(result) = parser.parse_line(&line) {
                            found = Some(result);
                            break;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    terminate(&mut child, pid).await;
                    return Ok(RunOutcome::TimedOut { lines });
                }
                _ = cancel.cancelled() => {
                    terminate(&mut child, pid).await;
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }
        // Stop listening; the readers drain whatever is left.
        drop(monitor);

        let exit_code = tokio::select! {
            status = child.wait() => status.ok().and_then(|s| s.code()),
            _ = tokio::time::sleep_until(deadline) => {
                terminate(&mut child, pid).await;
                if found.is_none() {
                    return Ok(RunOutcome::TimedOut { lines });
                }
                None
            }
            _ = cancel.cancelled() => {
                terminate(&mut child, pid).await;
                return Ok(RunOutcome::Cancelled);
            }
        };
        // Leftover build daemons must not touch the tree during cleanup.
        kill_group(pid).await;

        Ok(match found {
            Some(result) => RunOutcome::Measured {
                result,
                exit_code,
                lines,
            },
            None => RunOutcome::NoSummary { exit_code, lines },
        })
    }
}

async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid).await;
    child.kill().await.ok();
}

/// Kill the child's process group. `pid` is captured at spawn, since the
/// child forgets it once reaped.
#[cfg(unix)]
async fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        let _ = Command::new("kill")
            .args(["-KILL", "--", &format!("-{pid}")])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

#[cfg(not(unix))]
async fn kill_group(_pid: Option<u32>) {}

/// Mock launcher for testing. Pops one scripted outcome per call; when the
/// script is exhausted every day measures 10/10.
pub struct MockLauncher {
    outcomes: std::sync::Mutex<Vec<RunOutcome>>,
    calls: std::sync::Mutex<Vec<String>>,
    cancel_at: Option<(usize, CancellationToken)>,
    artifact: Option<PathBuf>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            outcomes: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::Mutex::new(Vec::new()),
            cancel_at: None,
            artifact: None,
        }
    }

    pub fn with_outcomes(self, outcomes: Vec<RunOutcome>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes;
        self
    }

    /// On the `n`-th call (1-based), fire `token` and report cancellation,
    /// as if Ctrl-C arrived mid-run.
    pub fn with_cancel_at(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((n, token));
        self
    }

    /// Leave a build artifact at `cwd/rel` on every call.
    pub fn with_artifact(mut self, rel: impl Into<PathBuf>) -> Self {
        self.artifact = Some(rel.into());
        self
    }

    /// Day labels seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn measured(total: u32, failures: u32) -> RunOutcome {
        RunOutcome::Measured {
            result: TestRunResult::new(total, failures, 0, 0),
            exit_code: Some(if failures == 0 { 0 } else { 1 }),
            lines: 1,
        }
    }
}

#[async_trait::async_trait]
impl TestLauncher for MockLauncher {
    async fn run_day(
        &self,
        day: &DayBucket,
        cwd: &Path,
        _parser: &SummaryParser,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }

        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(day.label());
            calls.len()
        };

        if let Some(rel) = &self.artifact {
            let path = cwd.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, day.label())?;
        }

        if let Some((n, token)) = &self.cancel_at {
            if call == *n {
                token.cancel();
                return Ok(RunOutcome::Cancelled);
            }
        }

        let mut outcomes = self.outcomes.lock().unwrap();
        if !outcomes.is_empty() {
            return Ok(outcomes.remove(0));
        }
        Ok(Self::measured(10, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::parse::DEFAULT_SUMMARY_PATTERN;
    use tally_core::Commit;

    fn day() -> DayBucket {
        let commit = Commit::from_unix("0123456789abcdef", 1_425_168_000).unwrap();
        DayBucket {
            day: commit.utc_day(),
            commit,
            commit_count: 1,
        }
    }

    fn parser() -> SummaryParser {
        SummaryParser::new(DEFAULT_SUMMARY_PATTERN).unwrap()
    }

    async fn run(cmd: &str, timeout: Duration) -> RunOutcome {
        let dir = tempfile::tempdir().unwrap();
        ShellLauncher::new(cmd, timeout)
            .run_day(&day(), dir.path(), &parser(), CancellationToken::new())
            .await
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parses_summary_from_stdout() {
        let out = run(
            "echo building; echo 'Tests run: 42, Failures: 3, Errors: 1, Skipped: 0'",
            Duration::from_secs(10),
        )
        .await;
        match out {
            RunOutcome::Measured {
                result,
                exit_code,
                lines,
            } => {
                assert_eq!(result, TestRunResult::new(42, 3, 1, 0));
                assert_eq!(exit_code, Some(0));
                assert_eq!(lines, 2);
            }
            other => panic!("expected Measured, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn summary_on_stderr_counts() {
        let out = run(
            "echo 'Tests run: 5, Failures: 5, Errors: 0, Skipped: 0' >&2; exit 1",
            Duration::from_secs(10),
        )
        .await;
        assert!(matches!(
            out,
            RunOutcome::Measured {
                exit_code: Some(1),
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn no_summary() {
        let out = run("echo 'BUILD FAILURE'; exit 1", Duration::from_secs(10)).await;
        assert_eq!(
            out,
            RunOutcome::NoSummary {
                exit_code: Some(1),
                lines: 1
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_child() {
        let start = std::time::Instant::now();
        let out = run("sleep 30", Duration::from_secs(1)).await;
        assert_eq!(out, RunOutcome::TimedOut { lines: 0 });
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn noisy_output_after_summary_does_not_stall() {
        let out = run(
            "echo 'Tests run: 1, Failures: 0, Errors: 0, Skipped: 0'; seq 1 200000",
            Duration::from_secs(30),
        )
        .await;
        assert!(matches!(out, RunOutcome::Measured { exit_code: Some(0), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let out = ShellLauncher::new("sleep 30", Duration::from_secs(60))
            .run_day(&day(), dir.path(), &parser(), cancel)
            .await
            .unwrap();
        assert_eq!(out, RunOutcome::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn env_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([("TALLY_TEST_TOTAL".to_string(), "7".to_string())]);
        let out = ShellLauncher::new(
            "echo \"Tests run: $TALLY_TEST_TOTAL, Failures: 0, Errors: 0, Skipped: 0\"",
            Duration::from_secs(10),
        )
        .with_env(env)
        .run_day(&day(), dir.path(), &parser(), CancellationToken::new())
        .await
        .unwrap();
        assert!(matches!(out, RunOutcome::Measured { result, .. } if result.total == 7));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_log_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let launcher = ShellLauncher::new(
            "echo one; echo 'Tests run: 1, Failures: 0, Errors: 0, Skipped: 0'; echo three",
            Duration::from_secs(10),
        )
        .with_log_dir(Some(logs.clone()));
        launcher
            .run_day(&day(), dir.path(), &parser(), CancellationToken::new())
            .await
            .unwrap();

        let path = launcher.log_path(&day()).unwrap();
        assert!(path.ends_with("2015-03-01-0123456789.log"));
        // Readers drain in the background after the summary.
        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&path).unwrap_or_default();
            if content.contains("three") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(content.contains("one\n"));
        assert!(content.contains("three\n"));
    }

    #[tokio::test]
    async fn missing_cwd_is_a_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = ShellLauncher::new("true", Duration::from_secs(5))
            .run_day(
                &day(),
                &dir.path().join("does-not-exist"),
                &parser(),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(matches!(out, RunOutcome::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn mock_pops_then_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new().with_outcomes(vec![RunOutcome::TimedOut { lines: 0 }]);
        let cancel = CancellationToken::new();
        let first = launcher
            .run_day(&day(), dir.path(), &parser(), cancel.clone())
            .await
            .unwrap();
        assert_eq!(first, RunOutcome::TimedOut { lines: 0 });
        let second = launcher
            .run_day(&day(), dir.path(), &parser(), cancel)
            .await
            .unwrap();
        assert_eq!(second, MockLauncher::measured(10, 0));
        assert_eq!(launcher.calls().len(), 2);
    }

    #[tokio::test]
    async fn mock_cancel_at_fires_token() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let launcher = MockLauncher::new().with_cancel_at(1, cancel.clone());
        let out = launcher
            .run_day(&day(), dir.path(), &parser(), cancel.clone())
            .await
            .unwrap();
        assert_eq!(out, RunOutcome::Cancelled);
        assert!(cancel.is_cancelled());
    }
}
