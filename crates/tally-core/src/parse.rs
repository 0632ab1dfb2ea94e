//! Summary-line parsing.
//!
//! The runner prints a totals line such as
//! `Tests run: 42, Failures: 3, Errors: 1, Skipped: 0`. A line is a summary
//! when it matches the recognizer pattern *and* yields four integers through
//! [`extract_counts`].

use crate::error::SweepError;
use crate::types::TestRunResult;
use regex::Regex;
use std::io::{BufRead, Read};
use std::sync::LazyLock;

/// Maven/Surefire totals marker.
pub const DEFAULT_SUMMARY_PATTERN: &str = "Tests run:";

/// Longest line held in memory. Longer output without a newline (progress
/// bars redrawn with `\r`) is read in pieces of this size.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// ASCII digit runs; dotted runs (`0.123`, `3.9.1`) stay whole.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+(?:\.[0-9]+)*").unwrap());

/// Tokenizer: the first four integers of `line`, as
/// (total, failures, errors, skipped).
///
/// Integers are maximal ASCII digit runs, wherever they sit: labels and
/// punctuation around them (`Tests run:42,`) are ignored. Decimals and
/// version numbers are not integers and are skipped. Returns `None` if fewer
/// than four integers are present, or if one of the first four does not fit
/// a `u32`: the line is then not a summary at all.
pub fn extract_counts(line: &str) -> Option<TestRunResult> {
    let mut ints = NUMBER
        .find_iter(line)
        .map(|m| m.as_str())
        .filter(|tok| !tok.contains('.'));
    let mut next = || ints.next()?.parse::<u32>().ok();

    Some(TestRunResult::new(next()?, next()?, next()?, next()?))
}

/// Recognizes and parses summary lines.
#[derive(Debug, Clone)]
pub struct SummaryParser {
    recognizer: Regex,
}

impl SummaryParser {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            recognizer: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.recognizer.as_str()
    }

    /// Parse one line. `None` if it is not a usable summary.
    pub fn parse_line(&self, line: &str) -> Option<TestRunResult> {
        if !self.recognizer.is_match(line) {
            return None;
        }
        extract_counts(line)
    }

    /// Scan lines in order and stop at the first summary.
    pub fn scan<I, S>(&self, lines: I) -> Result<TestRunResult, SweepError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scanned = 0;
        for line in lines {
            scanned += 1;
            if let Some(result) = self.parse_line(line.as_ref()) {
                return Ok(result);
            }
        }
        Err(SweepError::Parse { lines: scanned })
    }

    /// Like [`scan`](Self::scan) over a reader. Invalid UTF-8 is replaced,
    /// never fatal; read errors end the scan. Lines longer than
    /// [`MAX_LINE_BYTES`] count as several lines.
    pub fn scan_reader<R: BufRead>(&self, mut reader: R) -> Result<TestRunResult, SweepError> {
        let mut buf = Vec::new();
        let mut scanned = 0;
        loop {
            buf.clear();
            match (&mut reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut buf)
            {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            scanned += 1;
            let line = String::from_utf8_lossy(&buf);
            if let Some(result) = self.parse_line(line.trim_end()) {
                return Ok(result);
            }
        }
        Err(SweepError::Parse { lines: scanned })
    }
}
