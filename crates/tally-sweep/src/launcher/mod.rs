pub mod command;
pub mod stream;

pub use command::{MockLauncher, RunOutcome, ShellLauncher, TestLauncher};
