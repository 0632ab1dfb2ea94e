use anyhow::Result;
use std::path::{Path, PathBuf};
use tally_report::{load_series, ChartConfig, Reporter, SvgStepChart};

/// Execute `tally render <series.json>`
pub fn execute(series: &Path, out: Option<&Path>, title: Option<&str>) -> Result<()> {
    let data = load_series(series)?;
    let out = match out {
        Some(p) => p.to_path_buf(),
        None => default_out(series),
    };

    let mut config = ChartConfig::default();
    if let Some(t) = title {
        config.title = t.to_string();
    }
    SvgStepChart::new(config).render(&data, &out)?;
    println!("Wrote {} ({} points)", out.display(), data.points.len());
    Ok(())
}

fn default_out(series: &Path) -> PathBuf {
    series.with_file_name("chart.svg")
}
