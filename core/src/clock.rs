//! Wall clock used to stamp created/updated times.
//!
//! Production code runs on the system clock. Tests pin a fixed instant so
//! timestamps in assertions are stable.

use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerClock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl LedgerClock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
        }
    }

    /// Fixed clock at the given epoch milliseconds.
    pub fn fixed_millis(ms: i64) -> Self {
        Self::Fixed(millis_to_datetime(ms).unwrap_or_default())
    }
}

/// Epoch milliseconds back to a UTC timestamp. `None` when out of range.
pub fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
