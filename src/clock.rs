use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for time-range resolution and live tail windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug)]
pub struct MockClock {
    now: RwLock<DateTime<Utc>>,
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl MockClock {
    pub fn with_time(time: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(time),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = match self.now.write() {
            Ok(now) => now,
            Err(poisoned) => poisoned.into_inner(),
        };
        *now += duration;
    }
}
