use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tally_core::SweepError;
use walkdir::WalkDir;

/// A private copy of the fixture directory, taken once at sweep start.
///
/// Staging copies from the snapshot, so edits to the permanent fixture
/// during a sweep cannot change later days.
pub struct FixtureAsset {
    source: PathBuf,
    snapshot: tempfile::TempDir,
    files: usize,
}

impl FixtureAsset {
    pub fn snapshot(source: &Path) -> Result<Self> {
        let snapshot = tempfile::Builder::new()
            .prefix("tally-fixture-")
            .tempdir()
            .context("creating fixture snapshot dir")?;
        let files = copy_tree(source, snapshot.path())
            .with_context(|| format!("copying fixture {}", source.display()))?;
        tracing::debug!(source = %source.display(), files, "fixture snapshot taken");
        Ok(Self {
            source: source.to_path_buf(),
            snapshot,
            files,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    /// Copy the fixture to `root/rel`.
    ///
    /// The target must not exist at the checked-out commit. A failed copy is
    /// rolled back; the error is day-level only if the rollback succeeded.
    pub fn stage(&self, root: &Path, rel: &Path) -> Result<PathBuf, SweepError> {
        let target = root.join(rel);
        if target.symlink_metadata().is_ok() {
            return Err(SweepError::Staging {
                message: format!("{} already exists at this commit", rel.display()),
                tree_consistent: true,
            });
        }

        match copy_tree(self.snapshot.path(), &target) {
            Ok(_) => Ok(target),
            Err(e) => {
                let rolled_back = match std::fs::remove_dir_all(&target) {
                    Ok(()) => true,
                    Err(err) => err.kind() == std::io::ErrorKind::NotFound,
                };
                Err(SweepError::Staging {
                    message: format!("copying fixture to {}: {e:#}", rel.display()),
                    tree_consistent: rolled_back,
                })
            }
        }
    }
}

/// Remove a staged fixture. Missing is fine.
pub fn unstage(staged: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(staged) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Recursively copy `src` into `dst`, returning the number of files.
fn copy_tree(src: &Path, dst: &Path) -> Result<usize> {
    let mut files = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let to = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&to).with_context(|| format!("creating {}", to.display()))?;
        } else {
            std::fs::copy(entry.path(), &to)
                .with_context(|| format!("copying {}", entry.path().display()))?;
            files += 1;
        }
    }
    Ok(files)
}
