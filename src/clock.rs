//! Time source used for ids, creation stamps and due-date comparisons.

use chrono::{DateTime, Local, NaiveDate, Utc};

/// Supplies "now" and "today". Anything date-relative (overdue detection,
/// due-today counts, past-date validation) takes its day from here.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// The current calendar day in the user's local time zone.
    fn today(&self) -> NaiveDate;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock frozen at one instant, for tests and reproducible reports.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
}

impl FixedClock {
    /// Freeze at `now`, taking "today" as the UTC date of that instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        FixedClock {
            now,
            today: now.date_naive(),
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today(&self) -> NaiveDate {
        self.today
    }
}
