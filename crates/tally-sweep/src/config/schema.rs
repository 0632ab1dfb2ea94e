use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tally_core::parse::DEFAULT_SUMMARY_PATTERN;
use tally_core::sample::DayWindow;

/// A sweep definition, as written in `tally.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Kebab-case sweep name; names the state dir.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Repository path, relative to the config file.
    #[serde(default = "default_repo")]
    pub repo: String,
    /// Revision or range handed to `git log`.
    #[serde(default = "default_rev")]
    pub rev: String,
    /// Inclusive UTC dates (`YYYY-MM-DD`).
    #[serde(default)]
    pub since: Option<String>,
    #[serde(default)]
    pub until: Option<String>,
    pub fixture: FixtureSpec,
    /// Shell command run at the repository root for each day.
    pub command: String,
    #[serde(default = "default_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "default_summary_pattern")]
    pub summary_pattern: String,
    #[serde(default)]
    pub clean: CleanSpec,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub output: OutputSpec,
}

/// Where the fixture lives permanently and where it is staged in the tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixtureSpec {
    /// Permanent copy, relative to the config file.
    pub source: String,
    /// Temporary location, relative to the repository root.
    pub stage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanSpec {
    /// Also remove ignored files (`git clean -x`), e.g. build outputs.
    #[serde(default = "default_true")]
    pub ignored: bool,
    /// Repository-relative paths that cleaning must leave alone.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for CleanSpec {
    fn default() -> Self {
        Self {
            ignored: true,
            exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputSpec {
    /// State dir, relative to the repository root. Default `.tally/<name>`.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_chart")]
    pub chart: String,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            dir: None,
            chart: default_chart(),
        }
    }
}

/// A validated config with every path made absolute.
#[derive(Debug, Clone)]
pub struct ResolvedSweep {
    pub config: SweepConfig,
    pub repo: PathBuf,
    pub fixture_source: PathBuf,
    /// Relative to `repo`.
    pub stage: PathBuf,
    pub state_dir: PathBuf,
    pub window: DayWindow,
    pub clean: CleanPolicy,
}

impl ResolvedSweep {
    pub fn chart_path(&self) -> PathBuf {
        self.state_dir.join(&self.config.output.chart)
    }

    pub fn series_path(&self) -> PathBuf {
        self.state_dir.join("series.json")
    }

    pub fn csv_path(&self) -> PathBuf {
        self.state_dir.join("series.csv")
    }

    /// Per-day outcomes, skipped days included.
    pub fn days_path(&self) -> PathBuf {
        self.state_dir.join("days.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}

/// What cleaning removes and what it keeps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanPolicy {
    pub ignored: bool,
    /// Repository-relative paths, `/`-separated, no trailing slash.
    pub exclude: Vec<String>,
}

impl CleanPolicy {
    /// Whether a repository-relative path falls under an exclusion.
    pub fn is_excluded(&self, rel: &str) -> bool {
        let rel = rel.trim_end_matches('/');
        self.exclude.iter().any(|ex| {
            rel == ex
                || rel
                    .strip_prefix(ex.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// `-e` patterns for `git clean`, anchored at the root.
    pub fn clean_args(&self) -> Vec<String> {
        self.exclude
            .iter()
            .flat_map(|ex| ["-e".to_string(), format!("/{ex}")])
            .collect()
    }
}

fn default_repo() -> String {
    ".".into()
}

fn default_rev() -> String {
    "HEAD".into()
}

fn default_timeout_sec() -> u64 {
    1800
}

fn default_summary_pattern() -> String {
    DEFAULT_SUMMARY_PATTERN.into()
}

fn default_chart() -> String {
    "chart.svg".into()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(exclude: &[&str]) -> CleanPolicy {
        CleanPolicy {
            ignored: true,
            exclude: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn excluded_on_component_boundary() {
        let p = policy(&[".tally", "fixtures/neg"]);
        assert!(p.is_excluded(".tally"));
        assert!(p.is_excluded(".tally/"));
        assert!(p.is_excluded(".tally/run/events.jsonl"));
        assert!(p.is_excluded("fixtures/neg/A.java"));
        assert!(!p.is_excluded(".tallyrc"));
        assert!(!p.is_excluded("fixtures/negatives"));
        assert!(!p.is_excluded("fixtures"));
    }

    #[test]
    fn clean_args_are_anchored() {
        let p = policy(&[".tally"]);
        assert_eq!(p.clean_args(), vec!["-e", "/.tally"]);
    }

    #[test]
    fn defaults_from_yaml() {
        let yaml = "name: x\nfixture: { source: f, stage: s }\ncommand: mvn test\n";
        let cfg: SweepConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(cfg.repo, ".");
        assert_eq!(cfg.rev, "HEAD");
        assert_eq!(cfg.timeout_sec, 1800);
        assert_eq!(cfg.summary_pattern, "Tests run:");
        assert!(cfg.clean.ignored);
        assert_eq!(cfg.output.chart, "chart.svg");
    }
}
