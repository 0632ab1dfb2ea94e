use crate::error::SweepError;
use crate::types::{Commit, DayBucket, SweepPlan};
use std::collections::BTreeMap;
use time::Date;

/// Inclusive UTC date window applied after bucketing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayWindow {
    pub since: Option<Date>,
    pub until: Option<Date>,
}

impl DayWindow {
    pub fn contains(&self, day: Date) -> bool {
        self.since.is_none_or(|s| day >= s) && self.until.is_none_or(|u| day <= u)
    }

    pub fn is_unbounded(&self) -> bool {
        self.since.is_none() && self.until.is_none()
    }
}

/// Partitions history into one representative commit per UTC day.
#[derive(Debug, Clone, Default)]
pub struct CommitSampler {
    window: DayWindow,
}

impl CommitSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, window: DayWindow) -> Self {
        self.window = window;
        self
    }

    /// Build the sweep plan.
    ///
    /// `history` may be in any order; `git log` order (newest first) is the
    /// usual input. Within a day the commit with the latest authored instant
    /// represents it; on an exact tie the one listed first wins.
    pub fn sample(&self, history: &[Commit]) -> Result<SweepPlan, SweepError> {
        if history.is_empty() {
            return Err(SweepError::sampling("commit history is empty"));
        }

        // day -> (index of representative, commits on that day)
        let mut buckets: BTreeMap<Date, (usize, usize)> = BTreeMap::new();
        for (idx, commit) in history.iter().enumerate() {
            let entry = buckets.entry(commit.utc_day()).or_insert((idx, 0));
            entry.1 += 1;
            if commit.authored > history[entry.0].authored {
                entry.0 = idx;
            }
        }

        let days: Vec<DayBucket> = buckets
            .into_iter()
            .filter(|(day, _)| self.window.contains(*day))
            .map(|(day, (idx, count))| DayBucket {
                day,
                commit: history[idx].clone(),
                commit_count: count,
            })
            .collect();

        if days.is_empty() {
            return Err(SweepError::sampling(format!(
                "no commits inside the date window ({} commits all outside it)",
                history.len()
            )));
        }

        tracing::debug!(
            commits = history.len(),
            days = days.len(),
            "sampled history into day buckets"
        );
        Ok(SweepPlan::from_days(days))
    }
}

/// Shorthand for an unbounded [`CommitSampler`].
pub fn sample_days(history: &[Commit]) -> Result<SweepPlan, SweepError> {
    CommitSampler::new().sample(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    const DAY: i64 = 86_400;
    // 2015-03-01T00:00:00Z
    const MAR_1: i64 = 1_425_168_000;

    fn commit(hash: &str, secs: i64) -> Commit {
        Commit::from_unix(hash, secs).unwrap()
    }

    fn date(d: u8) -> Date {
        Date::from_calendar_date(2015, Month::March, d).unwrap()
    }

    #[test]
    fn empty_history_is_an_error() {
        let err = sample_days(&[]).unwrap_err();
        assert!(matches!(err, SweepError::Sampling { .. }));
    }

    #[test]
    fn single_day_collapses_to_last_authored() {
        // git log order: newest first
        let history = vec![
            commit("c3", MAR_1 + 3_600 * 18),
            commit("c2", MAR_1 + 3_600 * 12),
            commit("c1", MAR_1 + 3_600 * 6),
        ];
        let plan = sample_days(&history).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.days()[0].commit.hash, "c3");
        assert_eq!(plan.days()[0].commit_count, 3);
        assert_eq!(plan.days()[0].day, date(1));
    }

    #[test]
    fn representative_is_latest_authored_not_first_listed() {
        // A rebased commit can be listed first yet authored earlier.
        let history = vec![
            commit("rebased", MAR_1 + 100),
            commit("later", MAR_1 + 5_000),
        ];
        let plan = sample_days(&history).unwrap();
        assert_eq!(plan.days()[0].commit.hash, "later");
    }

    #[test]
    fn tie_keeps_first_listed() {
        let history = vec![commit("top", MAR_1 + 10), commit("below", MAR_1 + 10)];
        let plan = sample_days(&history).unwrap();
        assert_eq!(plan.days()[0].commit.hash, "top");
    }

    #[test]
    fn buckets_ascend_and_partition_history() {
        let history = vec![
            commit("e", MAR_1 + 4 * DAY + 50),
            commit("d", MAR_1 + 4 * DAY + 10),
            commit("c", MAR_1 + 2 * DAY),
            commit("b", MAR_1 + 60),
            commit("a", MAR_1 + 30),
        ];
        let plan = sample_days(&history).unwrap();

        let days: Vec<Date> = plan.iter().map(|b| b.day).collect();
        assert_eq!(days, vec![date(1), date(3), date(5)]);
        assert!(days.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(plan.commit_count(), history.len());
        for bucket in &plan {
            assert_eq!(bucket.commit.utc_day(), bucket.day);
        }
        let reps: Vec<&str> = plan.iter().map(|b| b.commit.hash.as_str()).collect();
        assert_eq!(reps, vec!["b", "c", "e"]);
    }

    #[test]
    fn no_placeholder_before_first_commit() {
        let history = vec![commit("only", MAR_1 + 2 * DAY + 1)];
        let plan = sample_days(&history).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.days()[0].day, date(3));
    }

    #[test]
    fn unordered_input_is_sorted_by_day() {
        let history = vec![
            commit("mid", MAR_1 + DAY),
            commit("new", MAR_1 + 2 * DAY),
            commit("old", MAR_1),
        ];
        let plan = sample_days(&history).unwrap();
        let reps: Vec<&str> = plan.iter().map(|b| b.commit.hash.as_str()).collect();
        assert_eq!(reps, vec!["old", "mid", "new"]);
    }

    #[test]
    fn midnight_boundary_is_utc() {
        let history = vec![commit("after", MAR_1 + DAY), commit("before", MAR_1 + DAY - 1)];
        let plan = sample_days(&history).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.days()[0].label(), "2015-03-01");
        assert_eq!(plan.days()[1].label(), "2015-03-02");
    }

    #[test]
    fn window_filters_days() {
        let history = vec![
            commit("c", MAR_1 + 2 * DAY),
            commit("b", MAR_1 + DAY),
            commit("a", MAR_1),
        ];
        let sampler = CommitSampler::new().with_window(DayWindow {
            since: Some(date(2)),
            until: Some(date(2)),
        });
        let plan = sampler.sample(&history).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.days()[0].commit.hash, "b");
    }

    #[test]
    fn window_excluding_everything_is_an_error() {
        let history = vec![commit("a", MAR_1)];
        let sampler = CommitSampler::new().with_window(DayWindow {
            since: Some(date(10)),
            until: None,
        });
        assert!(matches!(
            sampler.sample(&history),
            Err(SweepError::Sampling { .. })
        ));
    }
}
