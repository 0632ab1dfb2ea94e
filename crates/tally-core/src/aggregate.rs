use crate::types::{SeriesPoint, TestRunResult, TimeSeries, TotalsDrift, BASELINE_LABEL};

/// Accumulates measured days in processing order.
///
/// The fixture suite is expected to have the same size on every day. When a
/// total differs from the first measured one it is kept as-is and reported
/// as [`TotalsDrift`].
#[derive(Debug, Default)]
pub struct TimeSeriesAggregator {
    points: Vec<SeriesPoint>,
    max_total: u32,
    first_total: Option<u32>,
    drift: Vec<TotalsDrift>,
}

impl TimeSeriesAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label: impl Into<String>, commit: Option<&str>, result: &TestRunResult) {
        let label = label.into();
        match self.first_total {
            None => self.first_total = Some(result.total),
            Some(expected) if expected != result.total => {
                tracing::warn!(
                    day = %label,
                    expected,
                    observed = result.total,
                    "fixture total differs from first measured day"
                );
                self.drift.push(TotalsDrift {
                    day: label.clone(),
                    expected,
                    observed: result.total,
                });
            }
            Some(_) => {}
        }
        self.max_total = self.max_total.max(result.total);
        self.points.push(SeriesPoint {
            label,
            passed: result.passed(),
            commit: commit.map(String::from),
            result: Some(*result),
        });
    }

    pub fn measured(&self) -> usize {
        self.points.len()
    }

    /// The series so far, baseline first.
    pub fn snapshot(&self) -> TimeSeries {
        let mut points = Vec::with_capacity(self.points.len() + 1);
        points.push(SeriesPoint {
            label: BASELINE_LABEL.into(),
            passed: 0,
            commit: None,
            result: None,
        });
        points.extend(self.points.iter().cloned());
        TimeSeries {
            points,
            denominator: self.max_total,
            drift: self.drift.clone(),
        }
    }

    pub fn finish(self) -> TimeSeries {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_series_is_just_baseline() {
        let series = TimeSeriesAggregator::new().finish();
        assert_eq!(series.labels(), vec!["baseline"]);
        assert_eq!(series.values(), vec![0]);
        assert_eq!(series.denominator, 0);
        assert_eq!(series.measured_days(), 0);
    }

    #[test]
    fn three_days_with_baseline() {
        let mut agg = TimeSeriesAggregator::new();
        agg.record("day1", None, &TestRunResult::new(50, 0, 0, 0));
        agg.record("day2", None, &TestRunResult::new(50, 2, 0, 0));
        agg.record("day3", None, &TestRunResult::new(50, 5, 0, 0));
        let series = agg.finish();

        assert_eq!(series.values(), vec![0, 50, 48, 45]);
        assert_eq!(series.labels(), vec!["baseline", "day1", "day2", "day3"]);
        assert_eq!(series.denominator, 50);
        assert!(series.is_consistent());
        assert_eq!(series.measured_days(), 3);
    }

    #[test]
    fn varying_totals_are_surfaced_not_averaged() {
        let mut agg = TimeSeriesAggregator::new();
        agg.record("d1", Some("aaa"), &TestRunResult::new(40, 0, 0, 0));
        agg.record("d2", Some("bbb"), &TestRunResult::new(45, 5, 0, 0));
        agg.record("d3", Some("ccc"), &TestRunResult::new(40, 1, 0, 0));
        let series = agg.finish();

        assert_eq!(series.denominator, 45);
        assert_eq!(series.values(), vec![0, 40, 40, 39]);
        assert_eq!(
            series.drift,
            vec![TotalsDrift {
                day: "d2".into(),
                expected: 40,
                observed: 45,
            }]
        );
        assert_eq!(series.points[2].commit.as_deref(), Some("bbb"));
    }

    #[test]
    fn snapshot_does_not_consume() {
        let mut agg = TimeSeriesAggregator::new();
        agg.record("d1", None, &TestRunResult::new(3, 0, 0, 0));
        assert_eq!(agg.snapshot().values(), vec![0, 3]);
        agg.record("d2", None, &TestRunResult::new(3, 1, 0, 0));
        assert_eq!(agg.finish().values(), vec![0, 3, 2]);
    }
}
