//! A `tally run` stopped by a termination signal must still hand the
//! repository back on its original branch with no leftovers.

#![cfg(unix)]

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

fn git(cwd: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn commit(repo: &Path, rel: &str, content: &str, date: &str) {
    std::fs::write(repo.join(rel), content).unwrap();
    git(repo, &["add", "-A"]);
    let out = Command::new("git")
        .args(["commit", "-q", "-m", rel])
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .current_dir(repo)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
}

fn wait_for(what: &str, limit: Duration, mut ready: impl FnMut() -> bool) {
    let start = Instant::now();
    while !ready() {
        assert!(start.elapsed() < limit, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn wait_exit(child: &mut Child, limit: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().unwrap() {
            return status;
        }
        if start.elapsed() > limit {
            let _ = child.kill();
            panic!("tally did not exit after the signal");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Start a sweep whose test command hangs, and wait until day 1 is running.
fn start_hanging_sweep(root: &Path) -> Child {
    let repo = root.join("proj");
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&repo, &["config", "user.email", "test@test.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join(".gitignore"), ".tally/\n").unwrap();
    commit(&repo, "s.txt", "Tests run: 3, Failures: 0, Errors: 0, Skipped: 0", "2015-03-01T12:00:00+00:00");
    commit(&repo, "s.txt", "Tests run: 3, Failures: 1, Errors: 0, Skipped: 0", "2015-03-02T12:00:00+00:00");

    let fixture = root.join("fixture");
    std::fs::create_dir_all(&fixture).unwrap();
    std::fs::write(fixture.join("N.java"), "class N {}").unwrap();

    let config = root.join("tally.yaml");
    std::fs::write(
        &config,
        "name: signals\nrepo: proj\nfixture:\n  source: fixture\n  stage: tally_stage\ncommand: \"sleep 30; cat s.txt\"\ntimeout_sec: 120\n",
    )
    .unwrap();

    let child = Command::new(env!("CARGO_BIN_EXE_tally"))
        .arg("run")
        .arg(&config)
        .env("TALLY_LOG", "error")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let staged = repo.join("tally_stage/N.java");
    wait_for("day 1 to start", Duration::from_secs(30), || staged.exists());
    // Give the shell a moment to be running the test command.
    std::thread::sleep(Duration::from_millis(200));
    child
}

fn assert_restored(repo: &Path, head: &str) {
    assert_eq!(git(repo, &["symbolic-ref", "--short", "HEAD"]), "main");
    assert_eq!(git(repo, &["rev-parse", "HEAD"]), head);
    assert_eq!(git(repo, &["status", "--porcelain", "--untracked-files=all"]), "");
    assert!(!repo.join("tally_stage").exists());
}

fn signal_restores(signal: &str) {
    let root = tempfile::tempdir().unwrap();
    let mut child = start_hanging_sweep(root.path());
    let repo = root.path().join("proj");
    let head = git(&repo, &["rev-parse", "main"]);

    let sent = Command::new("kill")
        .args([signal, &child.id().to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let status = wait_exit(&mut child, Duration::from_secs(30));
    assert!(status.success(), "tally exited with {status:?}");
    assert_restored(&repo, &head);
}

#[test]
fn sigterm_restores_the_branch() {
    signal_restores("-TERM");
}

#[test]
fn sighup_restores_the_branch() {
    signal_restores("-HUP");
}

#[test]
fn sigint_restores_the_branch() {
    signal_restores("-INT");
}
