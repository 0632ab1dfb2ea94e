pub mod aggregate;
pub mod error;
pub mod parse;
pub mod sample;
pub mod types;

pub use error::{ErrorScope, SweepError};
pub use types::*;
