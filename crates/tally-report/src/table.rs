use crate::{write_atomic, Reporter};
use std::path::Path;
use tally_core::TimeSeries;

/// Pretty-printed JSON, readable back with [`crate::load_series`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSeries;

impl Reporter for JsonSeries {
    fn render(&self, series: &TimeSeries, out: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(series)?;
        write_atomic(out, json.as_bytes())
    }
}

/// One row per point, baseline first. Count columns are empty for the
/// baseline.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSeries;

const HEADER: [&str; 8] = [
    "label", "passed", "total", "failures", "errors", "skipped", "denominator", "commit",
];

impl CsvSeries {
    pub fn to_bytes(series: &TimeSeries) -> anyhow::Result<Vec<u8>> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(HEADER)?;
        let denominator = series.denominator.to_string();
        for point in &series.points {
            let [total, failures, errors, skipped] = match &point.result {
                Some(r) => [
                    r.total.to_string(),
                    r.failures.to_string(),
                    r.errors.to_string(),
                    r.skipped.to_string(),
                ],
                None => Default::default(),
            };
            wtr.write_record(&[
                point.label.clone(),
                point.passed.to_string(),
                total,
                failures,
                errors,
                skipped,
                denominator.clone(),
                point.commit.clone().unwrap_or_default(),
            ])?;
        }
        wtr.into_inner()
            .map_err(|e| anyhow::anyhow!("flushing csv: {}", e.error()))
    }
}

impl Reporter for CsvSeries {
    fn render(&self, series: &TimeSeries, out: &Path) -> anyhow::Result<()> {
        write_atomic(out, &Self::to_bytes(series)?)
    }
}
