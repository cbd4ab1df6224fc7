use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// Source of "now" for timestamps and identifier years.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn year(&self) -> i32 {
        self.now().year()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant, for demos and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
