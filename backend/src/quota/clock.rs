use chrono::{Local, NaiveDate};

/// Source of "today" for daily quota accounting.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Calendar day in the server's local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}
