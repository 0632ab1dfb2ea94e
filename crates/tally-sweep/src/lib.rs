pub mod config;
pub mod launcher;
pub mod runner;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;
