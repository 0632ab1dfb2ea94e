//! Structured event logging for sweeps.
//!
//! Writes append-only JSONL to `<state_dir>/events.jsonl`.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tally_core::TestRunResult;

// ── Event types ──

/// A sweep event. Serialized as tagged JSON (`"type": "sweep_start"`, etc.).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SweepStart {
        sweep: String,
        repo: String,
        head: String,
        commits: usize,
        days: usize,
    },
    DayStart {
        day: String,
        commit: String,
        index: usize,
    },
    DayMeasured {
        day: String,
        commit: String,
        result: TestRunResult,
        passed: u32,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    DaySkipped {
        day: String,
        commit: String,
        code: String,
        reason: String,
    },
    SweepAborted {
        day: String,
        code: String,
        error: String,
        measured: usize,
    },
    SweepCompleted {
        measured: usize,
        skipped: usize,
        cancelled: bool,
    },
    WorkspaceRestored {
        head: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Wrapper that adds sequence number and timestamp to each event.
#[derive(Debug, Serialize)]
pub struct FullEvent {
    pub seq: u32,
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

// ── EventLogger ──

/// Append-only JSONL event writer.
pub struct EventLogger {
    jsonl_path: Option<PathBuf>,
    seq: u32,
    stdout_json: bool,
}

impl EventLogger {
    /// Logger writing to `{state_dir}/events.jsonl`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            jsonl_path: Some(state_dir.join("events.jsonl")),
            seq: 0,
            stdout_json: false,
        }
    }

    /// Logger that records nothing to disk.
    pub fn disabled() -> Self {
        Self {
            jsonl_path: None,
            seq: 0,
            stdout_json: false,
        }
    }

    /// Also print each event as one JSON line on stdout.
    pub fn with_stdout_json(mut self, enabled: bool) -> Self {
        self.stdout_json = enabled;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.jsonl_path.as_deref()
    }

    /// Record an event. Best-effort: silently ignores write failures.
    pub fn record(&mut self, event: Event) {
        let full = FullEvent {
            seq: self.seq,
            ts: now_rfc3339(),
            event,
        };
        self.seq += 1;

        if let Ok(line) = serde_json::to_string(&full) {
            if self.stdout_json {
                println!("{line}");
            }
            if let Some(path) = &self.jsonl_path {
                let _ = append_line(path, &line);
            }
        }
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
