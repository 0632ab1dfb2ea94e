use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tally_core::parse::SummaryParser;
use tally_core::SweepError;

/// Execute `tally parse <log>`
pub fn execute(log: &Path, pattern: &str) -> Result<()> {
    let parser = SummaryParser::new(pattern).with_context(|| format!("invalid pattern {pattern:?}"))?;
    let file = File::open(log).with_context(|| format!("opening {}", log.display()))?;

    match parser.scan_reader(BufReader::new(file)) {
        Ok(r) => {
            println!(
                "total={} failures={} errors={} skipped={} passed={}",
                r.total,
                r.failures,
                r.errors,
                r.skipped,
                r.passed()
            );
            Ok(())
        }
        Err(SweepError::Parse { lines }) => {
            bail!("no line matching {pattern:?} in {} ({lines} lines)", log.display())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_summary_in_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("build.log");
        std::fs::write(
            &log,
            "[INFO] compiling\nTests run: 12, Failures: 1, Errors: 0, Skipped: 2\n",
        )
        .unwrap();
        execute(&log, "Tests run:").unwrap();
    }

    #[test]
    fn missing_summary_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("build.log");
        std::fs::write(&log, "BUILD FAILURE\n").unwrap();
        let err = execute(&log, "Tests run:").unwrap_err();
        assert!(err.to_string().contains("1 lines"));
    }
}
