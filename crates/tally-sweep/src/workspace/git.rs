//! Thin wrappers over the `git` binary.
//!
//! Every call sets `current_dir` explicitly; nothing depends on the process
//! working directory.

use crate::config::schema::CleanPolicy;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tally_core::Commit;
use tokio::process::Command;

/// Run git and return trimmed stdout, or fail with git's stderr.
pub async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    tracing::debug!(cwd = %cwd.display(), args = ?args, "git");
    let mut cmd = Command::new("git");
    cmd.args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(std::process::Stdio::null());
    // Own process group: a terminal Ctrl-C must reach tally, not kill git
    // halfway through a checkout.
    #[cfg(unix)]
    cmd.process_group(0);
    let output = cmd.output().await.context("git not available")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim())
    }
}

/// Blocking twin of [`run_git`], for `Drop` where no runtime is available.
pub fn run_git_blocking(cwd: &Path, args: &[&str]) -> Result<String> {
    let mut cmd = std::process::Command::new("git");
    cmd.args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(std::process::Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let output = cmd.output().context("git not available")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args.join(" "), stderr.trim())
    }
}

pub async fn toplevel(cwd: &Path) -> Result<PathBuf> {
    let out = run_git(cwd, &["rev-parse", "--show-toplevel"])
        .await
        .with_context(|| format!("{} is not a git work tree", cwd.display()))?;
    Ok(PathBuf::from(out))
}

pub async fn git_dir(cwd: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        run_git(cwd, &["rev-parse", "--absolute-git-dir"]).await?,
    ))
}

pub async fn head_commit(cwd: &Path) -> Result<String> {
    run_git(cwd, &["rev-parse", "--verify", "HEAD^{commit}"])
        .await
        .context("HEAD does not resolve to a commit")
}

/// Short branch name, or `None` when HEAD is detached.
pub async fn current_branch(cwd: &Path) -> Option<String> {
    run_git(cwd, &["symbolic-ref", "--quiet", "--short", "HEAD"])
        .await
        .ok()
        .filter(|b| !b.is_empty())
}

/// Commits reachable from `rev`, in `git log` order (newest first).
pub async fn log_commits(cwd: &Path, rev: &str) -> Result<Vec<Commit>> {
    let out = run_git(cwd, &["log", "--format=%H%x09%at", rev, "--"])
        .await
        .with_context(|| format!("reading history of {rev}"))?;
    out.lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_log_line)
        .collect()
}

/// Parse one `<hash>\t<unix-seconds>` line.
pub fn parse_log_line(line: &str) -> Result<Commit> {
    let (hash, secs) = line
        .split_once('\t')
        .with_context(|| format!("malformed log line: {line:?}"))?;
    let secs: i64 = secs
        .trim()
        .parse()
        .with_context(|| format!("bad author timestamp in {line:?}"))?;
    Commit::from_unix(hash.trim(), secs).with_context(|| format!("author timestamp out of range in {line:?}"))
}

/// Porcelain status lines for paths outside the policy's exclusions.
pub async fn dirty_paths(cwd: &Path, policy: &CleanPolicy) -> Result<Vec<String>> {
    let out = run_git(cwd, &["status", "--porcelain", "--untracked-files=all"]).await?;
    Ok(filter_status(&out, policy))
}

pub fn dirty_paths_blocking(cwd: &Path, policy: &CleanPolicy) -> Result<Vec<String>> {
    let out = run_git_blocking(cwd, &["status", "--porcelain", "--untracked-files=all"])?;
    Ok(filter_status(&out, policy))
}

fn filter_status(porcelain: &str, policy: &CleanPolicy) -> Vec<String> {
    porcelain
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !policy.is_excluded(&status_path(line)))
        .map(String::from)
        .collect()
}

/// Path of a porcelain v1 line (`XY path` or `XY from -> to`).
fn status_path(line: &str) -> String {
    let path = line.get(3..).unwrap_or_default();
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    path.trim_matches('"').to_string()
}

pub async fn checkout_detached(cwd: &Path, rev: &str) -> Result<()> {
    run_git(cwd, &["checkout", "--quiet", "--force", "--detach", rev]).await?;
    Ok(())
}

pub async fn checkout_branch(cwd: &Path, branch: &str) -> Result<()> {
    run_git(cwd, &["checkout", "--quiet", "--force", branch]).await?;
    Ok(())
}

pub async fn reset_hard(cwd: &Path) -> Result<()> {
    run_git(cwd, &["reset", "--quiet", "--hard", "HEAD"]).await?;
    Ok(())
}

/// Remove untracked files and directories, keeping the exclusions.
pub async fn clean(cwd: &Path, policy: &CleanPolicy) -> Result<()> {
    let args = clean_command(policy);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    run_git(cwd, &args).await?;
    Ok(())
}

pub fn clean_command(policy: &CleanPolicy) -> Vec<String> {
    let mut args: Vec<String> = vec!["clean".into(), "-f".into(), "-d".into(), "-q".into()];
    if policy.ignored {
        args.push("-x".into());
    }
    args.extend(policy.clean_args());
    args
}
