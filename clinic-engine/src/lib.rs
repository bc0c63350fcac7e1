pub mod classifier;
pub mod demand;

pub use classifier::{classify, lead_hours, message_category, score_after, AttendanceOutcome};
pub use demand::{cell_key, DemandEngine, PEAK_CAP_FRACTION};
