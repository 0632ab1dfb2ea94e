//! Renderers for a finished [`TimeSeries`].
//!
//! Every reporter writes its whole output atomically, so a crash mid-write
//! never leaves a truncated chart or table behind.

pub mod svg;
pub mod table;

use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::Path;
use tally_core::TimeSeries;

pub use svg::{ChartConfig, SvgStepChart};
pub use table::{CsvSeries, JsonSeries};

/// Renders a series to a file.
pub trait Reporter {
    fn render(&self, series: &TimeSeries, out: &Path) -> anyhow::Result<()>;
}

/// Write data atomically: write to a temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

/// Read a series written by [`JsonSeries`].
pub fn load_series(path: &Path) -> anyhow::Result<TimeSeries> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing series {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out").join("series.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn load_series_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("series.json");
        fs::write(&path, "not json").unwrap();
        let err = load_series(&path).unwrap_err();
        assert!(format!("{err:#}").contains("series.json"));
    }
}
