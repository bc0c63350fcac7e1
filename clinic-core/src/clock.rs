use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Wall-clock source for all time-based decisions. Production code uses
/// [`SystemClock`]; tests inject a manually-advanced clock.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn tz(&self) -> Tz;

    fn now_local(&self) -> DateTime<Tz> {
        self.now_utc().with_timezone(&self.tz())
    }
}

pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn tz(&self) -> Tz {
        self.tz
    }
}

/// Manually-driven clock for tests.
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
    tz: Tz,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
            tz,
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn tz(&self) -> Tz {
        self.tz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start, chrono_tz::Asia::Riyadh);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now_utc(), start + Duration::hours(2));
        // Riyadh is UTC+3 year-round
        assert_eq!(clock.now_local().time(), chrono::NaiveTime::from_hms_opt(14, 0, 0).unwrap());
    }
}
