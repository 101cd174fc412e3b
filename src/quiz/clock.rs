use chrono::{DateTime, Utc};

/// Source of wall-clock time for countdowns.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    now: std::cell::Cell<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        let start = DateTime::parse_from_rfc3339("2025-04-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Self {
            now: std::cell::Cell::new(start),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        self.now.set(self.now.get() + chrono::Duration::milliseconds(millis));
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_millis(secs * 1000);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }
}
