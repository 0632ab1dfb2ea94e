use crate::config::schema::CleanPolicy;
use crate::workspace::git;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tally_core::{Commit, SweepError};

/// Lock file name inside the git dir.
pub const LOCK_FILE: &str = "tally.lock";

/// Where HEAD pointed before the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalHead {
    pub commit: String,
    /// `None` when the sweep started detached.
    pub branch: Option<String>,
}

impl std::fmt::Display for OriginalHead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.branch {
            Some(b) => write!(f, "{b} ({})", self.commit),
            None => write!(f, "detached {}", self.commit),
        }
    }
}

/// Exclusive ownership of the shared working tree for one sweep.
///
/// Holds an advisory lock on `<git-dir>/tally.lock` and the pre-sweep HEAD.
/// [`release`](Self::release) scrubs the tree and puts HEAD back; if the
/// guard is dropped without it, `Drop` does the same synchronously.
pub struct WorkspaceGuard {
    root: PathBuf,
    original: OriginalHead,
    policy: CleanPolicy,
    _lock: File,
    released: bool,
}

impl WorkspaceGuard {
    /// Pre-flight and lock. Nothing in the tree is touched.
    pub async fn acquire(root: &Path, policy: CleanPolicy) -> Result<Self, SweepError> {
        let workspace = || root.display().to_string();

        let top = git::toplevel(root)
            .await
            .map_err(|e| SweepError::checkout(workspace(), format!("{e:#}")))?;
        let git_dir = git::git_dir(&top)
            .await
            .map_err(|e| SweepError::checkout(workspace(), format!("{e:#}")))?;

        let lock_path = git_dir.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| {
                SweepError::checkout(
                    workspace(),
                    format!("cannot open lock file {}: {e}", lock_path.display()),
                )
            })?;
        lock.try_lock_exclusive().map_err(|_| {
            SweepError::checkout(
                workspace(),
                format!("another sweep holds the lock ({})", lock_path.display()),
            )
        })?;

        let commit = git::head_commit(&top)
            .await
            .map_err(|e| SweepError::checkout("HEAD", format!("{e:#}")))?;
        let branch = git::current_branch(&top).await;

        let dirty = git::dirty_paths(&top, &policy)
            .await
            .map_err(|e| SweepError::checkout(workspace(), format!("{e:#}")))?;
        if !dirty.is_empty() {
            return Err(SweepError::checkout(workspace(), not_clean_message(&dirty)));
        }

        let original = OriginalHead { commit, branch };
        tracing::info!(root = %top.display(), head = %original, "workspace acquired");

        Ok(Self {
            root: top,
            original,
            policy,
            _lock: lock,
            released: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn original(&self) -> &OriginalHead {
        &self.original
    }

    pub fn policy(&self) -> &CleanPolicy {
        &self.policy
    }

    /// Detach HEAD at `commit`. The tree must be clean beforehand.
    pub async fn checkout(&self, commit: &Commit) -> Result<(), SweepError> {
        let target = commit.short_hash().to_string();

        let dirty = git::dirty_paths(&self.root, &self.policy)
            .await
            .map_err(|e| SweepError::checkout(&target, format!("{e:#}")))?;
        if !dirty.is_empty() {
            return Err(SweepError::checkout(&target, not_clean_message(&dirty)));
        }

        git::checkout_detached(&self.root, &commit.hash)
            .await
            .map_err(|e| SweepError::checkout(&target, format!("{e:#}")))?;

        let head = git::head_commit(&self.root)
            .await
            .map_err(|e| SweepError::checkout(&target, format!("{e:#}")))?;
        if head != commit.hash {
            return Err(SweepError::checkout(
                &target,
                format!("HEAD is {head} after checkout"),
            ));
        }
        Ok(())
    }

    /// Drop every local modification and untracked file outside the
    /// exclusions, then verify the tree is clean.
    pub async fn scrub(&self) -> Result<(), SweepError> {
        git::reset_hard(&self.root)
            .await
            .map_err(|e| SweepError::cleanup(format!("{e:#}")))?;
        git::clean(&self.root, &self.policy)
            .await
            .map_err(|e| SweepError::cleanup(format!("{e:#}")))?;
        let dirty = git::dirty_paths(&self.root, &self.policy)
            .await
            .map_err(|e| SweepError::cleanup(format!("{e:#}")))?;
        if !dirty.is_empty() {
            return Err(SweepError::cleanup(not_clean_message(&dirty)));
        }
        Ok(())
    }

    /// Scrub, put HEAD back where it was, and unlock.
    pub async fn release(mut self) -> Result<(), SweepError> {
        self.released = true;
        let scrubbed = self.scrub().await;

        let restore = match &self.original.branch {
            Some(branch) => git::checkout_branch(&self.root, branch).await,
            None => git::checkout_detached(&self.root, &self.original.commit).await,
        };
        restore.map_err(|e| self.restore_error(format!("{e:#}")))?;
        scrubbed?;
        // The checkout may have surfaced files ignored by the historical tree.
        self.scrub().await?;

        let head = git::head_commit(&self.root)
            .await
            .map_err(|e| self.restore_error(format!("{e:#}")))?;
        if head != self.original.commit {
            return Err(self.restore_error(format!("HEAD is {head} after restore")));
        }
        if let Some(branch) = &self.original.branch {
            if git::current_branch(&self.root).await.as_deref() != Some(branch.as_str()) {
                return Err(self.restore_error(format!("branch {branch} not re-attached")));
            }
        }

        tracing::info!(head = %self.original, "workspace restored");
        Ok(())
    }

    fn restore_error(&self, message: String) -> SweepError {
        SweepError::cleanup(format!(
            "could not restore {}: {message}; recover with `git checkout --force {}`",
            self.original,
            self.original.branch.as_deref().unwrap_or(&self.original.commit)
        ))
    }

    fn restore_blocking(&self) -> anyhow::Result<()> {
        git::run_git_blocking(&self.root, &["reset", "--quiet", "--hard", "HEAD"])?;
        let target = self
            .original
            .branch
            .as_deref()
            .unwrap_or(&self.original.commit);
        let mut args = vec!["checkout", "--quiet", "--force"];
        if self.original.branch.is_none() {
            args.push("--detach");
        }
        args.push(target);
        git::run_git_blocking(&self.root, &args)?;

        let clean = git::clean_command(&self.policy);
        let clean: Vec<&str> = clean.iter().map(String::as_str).collect();
        git::run_git_blocking(&self.root, &clean)?;

        let dirty = git::dirty_paths_blocking(&self.root, &self.policy)?;
        if !dirty.is_empty() {
            anyhow::bail!("{}", not_clean_message(&dirty));
        }
        Ok(())
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(head = %self.original, "workspace guard dropped without release; restoring");
        if let Err(e) = self.restore_blocking() {
            tracing::error!(
                error = %format!("{e:#}"),
                head = %self.original,
                "workspace restoration failed"
            );
        }
    }
}

fn not_clean_message(dirty: &[String]) -> String {
    let preview = dirty
        .iter()
        .take(5)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let extra = if dirty.len() > 5 {
        format!("\n... and {} more", dirty.len() - 5)
    } else {
        String::new()
    };
    format!("working tree not clean ({} files):\n{preview}{extra}", dirty.len())
}
