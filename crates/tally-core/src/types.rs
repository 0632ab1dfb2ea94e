use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Label of the implicit first series entry, before any sampled day.
pub const BASELINE_LABEL: &str = "baseline";

/// A commit as read from the history: hash plus authored instant (UTC).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub authored: OffsetDateTime,
}

impl Commit {
    pub fn new(hash: impl Into<String>, authored: OffsetDateTime) -> Self {
        Self {
            hash: hash.into(),
            authored: authored.to_offset(time::UtcOffset::UTC),
        }
    }

    /// Build from a unix timestamp, as printed by `git log --format=%at`.
    pub fn from_unix(hash: impl Into<String>, secs: i64) -> Result<Self, time::error::ComponentRange> {
        Ok(Self::new(hash, OffsetDateTime::from_unix_timestamp(secs)?))
    }

    /// Calendar day of the authored instant, always in UTC.
    pub fn utc_day(&self) -> Date {
        self.authored.to_offset(time::UtcOffset::UTC).date()
    }

    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(10)]
    }
}

/// One UTC calendar day and the last commit authored on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayBucket {
    pub day: Date,
    pub commit: Commit,
    /// How many history commits fell on this day.
    pub commit_count: usize,
}

impl DayBucket {
    /// `YYYY-MM-DD`
    pub fn label(&self) -> String {
        day_label(self.day)
    }
}

pub fn day_label(day: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        day.year(),
        u8::from(day.month()),
        day.day()
    )
}

/// Ordered, oldest-first list of days to sweep. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    days: Vec<DayBucket>,
}

impl SweepPlan {
    pub(crate) fn from_days(days: Vec<DayBucket>) -> Self {
        Self { days }
    }

    pub fn days(&self) -> &[DayBucket] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DayBucket> {
        self.days.iter()
    }

    /// Total number of history commits covered by the plan's buckets.
    pub fn commit_count(&self) -> usize {
        self.days.iter().map(|d| d.commit_count).sum()
    }
}

impl<'a> IntoIterator for &'a SweepPlan {
    type Item = &'a DayBucket;
    type IntoIter = std::slice::Iter<'a, DayBucket>;

    fn into_iter(self) -> Self::IntoIter {
        self.days.iter()
    }
}

/// Counts read from the runner's summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub total: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
}

impl TestRunResult {
    pub fn new(total: u32, failures: u32, errors: u32, skipped: u32) -> Self {
        Self {
            total,
            failures,
            errors,
            skipped,
        }
    }

    /// `total - failures`. Errors are not subtracted, matching how the
    /// runner's totals have always been read.
    pub fn passed(&self) -> u32 {
        self.total.saturating_sub(self.failures)
    }
}

/// One entry of the series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub passed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TestRunResult>,
}

/// A day whose total differs from the first measured total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsDrift {
    pub day: String,
    pub expected: u32,
    pub observed: u32,
}

/// Chronological passed-count series, baseline first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub points: Vec<SeriesPoint>,
    /// Largest total seen across measured days.
    pub denominator: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<TotalsDrift>,
}

impl TimeSeries {
    pub fn labels(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.label.as_str()).collect()
    }

    pub fn values(&self) -> Vec<u32> {
        self.points.iter().map(|p| p.passed).collect()
    }

    /// Number of measured days (the baseline is not counted).
    pub fn measured_days(&self) -> usize {
        self.points.iter().filter(|p| p.result.is_some()).count()
    }

    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    #[test]
    fn passed_is_total_minus_failures() {
        let r = TestRunResult::new(42, 3, 1, 0);
        assert_eq!(r.passed(), 39);
    }

    #[test]
    fn passed_saturates() {
        let r = TestRunResult::new(2, 5, 0, 0);
        assert_eq!(r.passed(), 0);
    }

    #[test]
    fn utc_day_ignores_author_offset() {
        // 2015-03-01 23:30 at -05:00 is already 2015-03-02 in UTC.
        let local = OffsetDateTime::from_unix_timestamp(1_425_270_600)
            .unwrap()
            .to_offset(time::UtcOffset::from_hms(-5, 0, 0).unwrap());
        assert_eq!(local.date(), Date::from_calendar_date(2015, Month::March, 1).unwrap());

        let commit = Commit::new("abc", local);
        assert_eq!(
            commit.utc_day(),
            Date::from_calendar_date(2015, Month::March, 2).unwrap()
        );
    }

    #[test]
    fn day_label_is_iso() {
        let d = Date::from_calendar_date(2015, Month::March, 7).unwrap();
        assert_eq!(day_label(d), "2015-03-07");
    }

    #[test]
    fn short_hash_handles_short_ids() {
        let c = Commit::from_unix("abc", 0).unwrap();
        assert_eq!(c.short_hash(), "abc");
        let c = Commit::from_unix("0123456789abcdef", 0).unwrap();
        assert_eq!(c.short_hash(), "0123456789");
    }

    #[test]
    fn series_serializes_without_empty_drift() {
        let series = TimeSeries {
            points: vec![SeriesPoint {
                label: BASELINE_LABEL.into(),
                passed: 0,
                commit: None,
                result: None,
            }],
            denominator: 0,
            drift: vec![],
        };
        let json = serde_json::to_string(&series).unwrap();
        assert!(json.contains(r#""label":"baseline""#));
        assert!(!json.contains("drift"));
        assert!(!json.contains("commit"));
    }
}
