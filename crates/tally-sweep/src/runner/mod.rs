pub mod event_log;
pub mod sequential;

pub use sequential::{
    run_sweep, sample_plan, sweep, DayRecord, DayStatus, SweepContext, SweepOutcome, SweepStatus,
};
