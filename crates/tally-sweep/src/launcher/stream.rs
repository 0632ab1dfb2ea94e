use std::io::{LineWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tally_core::parse::MAX_LINE_BYTES;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;

/// Lines buffered between the pipe readers and the parser.
const CHANNEL_CAPACITY: usize = 256;

/// Where every output line goes besides the parser: the terminal in
/// verbose mode, and the day's run log.
#[derive(Default)]
pub struct LineSink {
    verbose: bool,
    tee: Option<Mutex<LineWriter<std::fs::File>>>,
}

impl LineSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo child output to stdout as it arrives.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Tee lines to a log file.
    /// Best-effort: if the file can't be opened, tee is silently skipped.
    pub fn with_tee(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            if let Some(parent) = p.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&p)
            {
                self.tee = Some(Mutex::new(LineWriter::new(file)));
            }
        }
        self
    }

    fn emit(&self, line: &str) {
        if self.verbose {
            println!("    │ {line}");
        }
        if let Some(tee) = &self.tee {
            if let Ok(mut w) = tee.lock() {
                let _ = writeln!(w, "{line}");
            }
        }
    }
}

/// Merged stdout/stderr of a child, one line at a time.
///
/// Two reader tasks feed a bounded channel. Dropping the monitor stops
/// delivery but not reading: the readers keep draining both pipes (still
/// feeding the sink) so the child never blocks on a full pipe.
pub struct OutputMonitor {
    rx: mpsc::Receiver<String>,
}

impl OutputMonitor {
    pub fn spawn(stdout: ChildStdout, stderr: ChildStderr, sink: LineSink) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let sink = Arc::new(sink);
        tokio::spawn(pump(stdout, tx.clone(), Arc::clone(&sink)));
        tokio::spawn(pump(stderr, tx, sink));
        Self { rx }
    }

    /// Next line from either stream; `None` once both reached EOF.
    pub async fn next_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

async fn pump<R>(reader: R, tx: mpsc::Sender<String>, sink: Arc<LineSink>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut forwarding = true;
    let mut lines = 0;
    loop {
        buf.clear();
        match (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await
        {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        lines += 1;
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(['\n', '\r'])
            .to_string();
        sink.emit(&line);
        if forwarding && tx.send(line).await.is_err() {
            forwarding = false;
        }
    }
    lines
}
