use anyhow::Result;
use std::path::Path;
use tally_sweep::runner::sample_plan;

use crate::cmd_run::load_resolved;

/// Execute `tally days <config.yaml>`
pub fn execute(config: &Path, repo: Option<&Path>) -> Result<()> {
    let resolved = load_resolved(config, repo)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (commits, plan) = rt.block_on(sample_plan(&resolved))?;

    println!("{commits} commits → {} days", plan.len());
    for bucket in plan.iter() {
        println!(
            "{} {} ({} commits)",
            bucket.label(),
            bucket.commit.hash,
            bucket.commit_count
        );
    }
    Ok(())
}
