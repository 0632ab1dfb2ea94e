pub mod fixture;
pub mod git;
pub mod guard;

pub use fixture::FixtureAsset;
pub use guard::{OriginalHead, WorkspaceGuard};
