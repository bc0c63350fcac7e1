//! Job kinds, payloads, and the cadence of the periodic kinds.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ReminderFire,
    AutoMissCheck,
    MonthEndLearn,
    MonthlyRecalc,
    HourlyMaintenance,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ReminderFire => "reminder_fire",
            JobKind::AutoMissCheck => "auto_miss_check",
            JobKind::MonthEndLearn => "month_end_learn",
            JobKind::MonthlyRecalc => "monthly_recalc",
            JobKind::HourlyMaintenance => "hourly_maintenance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reminder_fire" => Some(JobKind::ReminderFire),
            "auto_miss_check" => Some(JobKind::AutoMissCheck),
            "month_end_learn" => Some(JobKind::MonthEndLearn),
            "monthly_recalc" => Some(JobKind::MonthlyRecalc),
            "hourly_maintenance" => Some(JobKind::HourlyMaintenance),
            _ => None,
        }
    }

    pub fn is_periodic(&self) -> bool {
        matches!(
            self,
            JobKind::MonthEndLearn | JobKind::MonthlyRecalc | JobKind::HourlyMaintenance
        )
    }
}

/// Singleton key shared by all periodic jobs.
pub const PERIODIC_KEY: &str = "periodic";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderFirePayload {
    pub appointment_id: i64,
    pub send_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMissPayload {
    pub appointment_id: i64,
}

pub fn reminder_key(appointment_id: i64, send_time: DateTime<Utc>) -> String {
    format!("{}:{}", appointment_id, send_time.timestamp())
}

pub fn auto_miss_key(appointment_id: i64) -> String {
    appointment_id.to_string()
}

/// Next occurrence of a periodic kind strictly after `after`, evaluated in
/// the clinic's zone. One-shot kinds have no cadence.
///
/// - hourly maintenance: top of every hour
/// - monthly recalc: 02:00 on the 1st
/// - month-end learning: 23:59 on days 28 through 31
pub fn next_fire(kind: JobKind, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let local = after.with_timezone(&tz);
    match kind {
        JobKind::HourlyMaintenance => {
            let top = local
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))?;
            Some((top + Duration::hours(1)).with_timezone(&Utc))
        }
        JobKind::MonthlyRecalc => {
            for offset in 0..=1 {
                let (year, month) = add_months((local.year(), local.month()), offset);
                if let Some(candidate) = tz.with_ymd_and_hms(year, month, 1, 2, 0, 0).earliest() {
                    if candidate > local {
                        return Some(candidate.with_timezone(&Utc));
                    }
                }
            }
            None
        }
        JobKind::MonthEndLearn => {
            for offset in 0..=1 {
                let (year, month) = add_months((local.year(), local.month()), offset);
                for day in 28..=31 {
                    let Some(candidate) = tz.with_ymd_and_hms(year, month, day, 23, 59, 0).earliest()
                    else {
                        continue;
                    };
                    if candidate > local {
                        return Some(candidate.with_timezone(&Utc));
                    }
                }
            }
            None
        }
        JobKind::ReminderFire | JobKind::AutoMissCheck => None,
    }
}

fn add_months((year, month): (i32, u32), offset: u32) -> (i32, u32) {
    let zero_based = month - 1 + offset;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RIYADH: Tz = chrono_tz::Asia::Riyadh;

    fn riyadh(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        RIYADH
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn hourly_fires_at_top_of_next_hour() {
        let next = next_fire(JobKind::HourlyMaintenance, riyadh(2025, 10, 7, 12, 30), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 10, 7, 13, 0));
        // exactly on the hour rolls to the next one
        let next = next_fire(JobKind::HourlyMaintenance, riyadh(2025, 10, 7, 13, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 10, 7, 14, 0));
    }

    #[test]
    fn monthly_recalc_fires_on_the_first_at_two() {
        let next = next_fire(JobKind::MonthlyRecalc, riyadh(2025, 10, 7, 12, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 11, 1, 2, 0));
        // before 02:00 on the 1st, fires the same day
        let next = next_fire(JobKind::MonthlyRecalc, riyadh(2025, 11, 1, 1, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 11, 1, 2, 0));
        // December rolls into January
        let next = next_fire(JobKind::MonthlyRecalc, riyadh(2025, 12, 15, 0, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2026, 1, 1, 2, 0));
    }

    #[test]
    fn month_end_learn_walks_days_28_to_31() {
        let next = next_fire(JobKind::MonthEndLearn, riyadh(2025, 10, 7, 12, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 10, 28, 23, 59));
        // after the 28th slot it moves to the 29th
        let next = next_fire(JobKind::MonthEndLearn, riyadh(2025, 10, 29, 0, 0), RIYADH).unwrap();
        assert_eq!(next, riyadh(2025, 10, 29, 23, 59));
        // after the 31st it rolls to the 28th of the next month; February
        // has no day 29-31 in 2026, so from Feb 28 23:59 it rolls to March
        let next = next_fire(JobKind::MonthEndLearn, riyadh(2026, 2, 28, 23, 59), RIYADH).unwrap();
        assert_eq!(next, riyadh(2026, 3, 28, 23, 59));
    }

    #[test]
    fn one_shot_kinds_have_no_cadence() {
        assert!(next_fire(JobKind::ReminderFire, Utc::now(), RIYADH).is_none());
        assert!(next_fire(JobKind::AutoMissCheck, Utc::now(), RIYADH).is_none());
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            JobKind::ReminderFire,
            JobKind::AutoMissCheck,
            JobKind::MonthEndLearn,
            JobKind::MonthlyRecalc,
            JobKind::HourlyMaintenance,
        ] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("bogus"), None);
    }
}
