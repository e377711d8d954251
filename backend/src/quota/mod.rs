pub mod clock;
pub mod tracker;

pub use tracker::{QuotaDecision, QuotaTracker};
