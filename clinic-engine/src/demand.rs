//! Demand learning and admission control: per-hour attendance cells,
//! adaptive thresholds, peak capping, and late release of gated slots.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use clinic_core::clock::Clock;
use clinic_core::error::ClinicError;
use clinic_core::repo::Repository;
use clinic_core::types::{Appointment, CellSource, DemandCell, BASELINE_DOW};

/// Fraction of a month's busiest cells allowed to stay high-demand after
/// the monthly cap.
pub const PEAK_CAP_FRACTION: f64 = 0.5;

/// Slots starting within this window are released from the high-demand gate.
const LATE_RELEASE_WINDOW_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellKey {
    pub year: i32,
    pub month: i32,
    pub day_of_week: i32,
    pub hour: i32,
}

/// Derives the (year, month, dow, hour) cell coordinates of an instant in
/// the clinic's zone. Day-of-week is Sunday-based (0..=6).
pub fn cell_key(instant: DateTime<Utc>, tz: Tz) -> CellKey {
    let local = instant.with_timezone(&tz);
    CellKey {
        year: local.year(),
        month: local.month() as i32,
        day_of_week: local.weekday().num_days_from_sunday() as i32,
        hour: local.hour() as i32,
    }
}

/// Threshold for a month of learned totals.
///
/// Fewer than three cells is light mode: mean * 1.1. Otherwise the larger
/// of mean * 1.2 and the total at the descending rank floor(n * 0.25).
pub fn recalc_threshold(totals: &[i32]) -> Option<f64> {
    if totals.is_empty() {
        return None;
    }
    let avg = totals.iter().map(|t| *t as f64).sum::<f64>() / totals.len() as f64;
    if totals.len() < 3 {
        return Some(avg * 1.1);
    }
    let mut sorted = totals.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let rank = (totals.len() as f64 * 0.25).floor() as usize;
    Some((avg * 1.2).max(sorted[rank] as f64))
}

/// How many of `len` cells survive the peak cap.
pub fn peak_keep_count(len: usize, max_fraction: f64) -> usize {
    (len as f64 * max_fraction).floor() as usize
}

pub fn previous_month(year: i32, month: i32) -> (i32, i32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// UTC bounds [start, end) of a calendar month in the clinic's zone.
pub fn month_bounds_utc(year: i32, month: i32, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let start = tz.with_ymd_and_hms(year, month as u32, 1, 0, 0, 0).earliest()?;
    let end = tz
        .with_ymd_and_hms(next_year, next_month as u32, 1, 0, 0, 0)
        .earliest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

#[derive(Clone)]
pub struct DemandEngine {
    repo: Repository,
    clock: Arc<dyn Clock>,
}

impl DemandEngine {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Lazy per-month initialization: carries the previous year's same
    /// month forward (totals reset, thresholds kept, source demoted to
    /// auto). Idempotent; a month that already has cells is untouched.
    pub async fn ensure_month(&self, doctor: &str, date: DateTime<Utc>) -> Result<(), ClinicError> {
        let key = cell_key(date, self.clock.tz());
        if self.repo.month_has_cells(doctor, key.year, key.month).await? {
            return Ok(());
        }
        let previous = self
            .repo
            .list_demand_cells_for_month(doctor, key.year - 1, key.month)
            .await?;
        if previous.is_empty() {
            return Ok(());
        }
        let carried: Vec<_> = previous
            .iter()
            .map(|cell| {
                (
                    doctor.to_string(),
                    key.year,
                    key.month,
                    cell.day_of_week,
                    cell.hour,
                    0,
                    cell.high_demand_threshold,
                    CellSource::Auto,
                )
            })
            .collect();
        tracing::info!(
            "Seeding {}/{} demand cells for {} from previous year ({} cells)",
            key.year,
            key.month,
            doctor,
            carried.len()
        );
        self.repo.insert_demand_cells(&carried, self.clock.now_utc()).await
    }

    /// Incremental learning: one attended appointment bumps its cell.
    pub async fn record_attendance(&self, appt: &Appointment) -> Result<(), ClinicError> {
        let key = cell_key(appt.starts_at, self.clock.tz());
        self.ensure_month(&appt.doctor_name, appt.starts_at).await?;
        self.repo
            .bump_demand_cell(
                &appt.doctor_name,
                key.year,
                key.month,
                key.day_of_week,
                key.hour,
                self.clock.now_utc(),
            )
            .await
    }

    /// Effective cell for a slot: current-year weekday cell, previous-year
    /// weekday cell, then the admin baselines for either year.
    pub async fn effective(
        &self,
        doctor: &str,
        date: DateTime<Utc>,
    ) -> Result<Option<DemandCell>, ClinicError> {
        let key = cell_key(date, self.clock.tz());
        let lookups = [
            (key.year, key.day_of_week),
            (key.year - 1, key.day_of_week),
            (key.year, BASELINE_DOW),
            (key.year - 1, BASELINE_DOW),
        ];
        for (year, dow) in lookups {
            let cell = self
                .repo
                .find_demand_cell(doctor, year, key.month, dow, key.hour)
                .await?;
            if cell.is_some() {
                return Ok(cell);
            }
        }
        Ok(None)
    }

    pub async fn is_high_demand(
        &self,
        doctor: &str,
        date: DateTime<Utc>,
    ) -> Result<bool, ClinicError> {
        Ok(self
            .effective(doctor, date)
            .await?
            .map(|cell| cell.is_high_demand())
            .unwrap_or(false))
    }

    /// Recomputes the month's threshold from its learned totals and writes
    /// it back to every cell.
    pub async fn recalc(&self, doctor: &str, year: i32, month: i32) -> Result<(), ClinicError> {
        let cells = self.repo.list_demand_cells_for_month(doctor, year, month).await?;
        let totals: Vec<i32> = cells.iter().map(|c| c.total_appointments).collect();
        let Some(threshold) = recalc_threshold(&totals) else {
            return Ok(());
        };
        let now = self.clock.now_utc();
        for cell in &cells {
            self.repo.update_cell_threshold(cell.id, threshold, now).await?;
        }
        tracing::info!(
            "Recalculated {}/{} threshold for {}: {:.2} over {} cells",
            year,
            month,
            doctor,
            threshold,
            cells.len()
        );
        Ok(())
    }

    /// Caps the number of high-demand cells: everything outside the top
    /// fraction by total gets an unreachable threshold.
    pub async fn cap_peaks(
        &self,
        doctor: &str,
        year: i32,
        month: i32,
        max_fraction: f64,
    ) -> Result<(), ClinicError> {
        let mut cells = self.repo.list_demand_cells_for_month(doctor, year, month).await?;
        if cells.is_empty() {
            return Ok(());
        }
        cells.sort_by(|a, b| b.total_appointments.cmp(&a.total_appointments));
        let keep = peak_keep_count(cells.len(), max_fraction);
        let now = self.clock.now_utc();
        for cell in &cells[keep..] {
            self.repo
                .update_cell_threshold(cell.id, f64::INFINITY, now)
                .await?;
        }
        Ok(())
    }

    /// Replaces the month's admin baseline with one row per listed hour.
    pub async fn set_baseline(
        &self,
        doctor: &str,
        year: i32,
        month: i32,
        hours: &[i32],
        threshold: f64,
    ) -> Result<(), ClinicError> {
        self.repo.delete_admin_cells(doctor, year, month).await?;
        let rows: Vec<_> = hours
            .iter()
            .map(|hour| {
                (
                    doctor.to_string(),
                    year,
                    month,
                    BASELINE_DOW,
                    *hour,
                    0,
                    threshold,
                    CellSource::Admin,
                )
            })
            .collect();
        self.repo.insert_demand_cells(&rows, self.clock.now_utc()).await
    }

    /// Hourly late release: still-available slots starting inside the
    /// window lose their high-demand gate.
    pub async fn late_release(&self) -> Result<(), ClinicError> {
        let now = self.clock.now_utc();
        let window_end = now + Duration::hours(LATE_RELEASE_WINDOW_HOURS);
        let upcoming = self.repo.list_available_between(now, window_end).await?;
        for appt in &upcoming {
            let Some(cell) = self.effective(&appt.doctor_name, appt.starts_at).await? else {
                continue;
            };
            if cell.is_high_demand() {
                tracing::info!(
                    "Late release: opening {} slot at {} (cell {})",
                    appt.doctor_name,
                    appt.starts_at,
                    cell.id
                );
                self.repo
                    .update_cell_threshold(cell.id, f64::INFINITY, now)
                    .await?;
            }
        }
        Ok(())
    }

    /// Month-end learning pass: folds the month's attended appointments
    /// into their demand cells.
    pub async fn run_month_end_learn(&self) -> Result<(), ClinicError> {
        let local = self.clock.now_local();
        let tz = self.clock.tz();
        let Some((from, until)) = month_bounds_utc(local.year(), local.month() as i32, tz) else {
            tracing::warn!("Could not resolve month bounds; skipping learning pass");
            return Ok(());
        };
        let attended = self.repo.list_attended_in_month(from, until).await?;
        tracing::info!("Month-end learning over {} attended appointments", attended.len());
        for appt in &attended {
            self.record_attendance(appt).await?;
        }
        Ok(())
    }

    /// Monthly recalc + peak cap for every doctor, over the month that
    /// just ended.
    pub async fn run_monthly_recalc(&self) -> Result<(), ClinicError> {
        let local = self.clock.now_local();
        let (year, month) = previous_month(local.year(), local.month() as i32);
        for doctor in self.repo.distinct_doctors().await? {
            if let Err(e) = self.recalc(&doctor, year, month).await {
                tracing::error!("Recalc failed for {}: {}", doctor, e);
                continue;
            }
            if let Err(e) = self.cap_peaks(&doctor, year, month, PEAK_CAP_FRACTION).await {
                tracing::error!("Peak cap failed for {}: {}", doctor, e);
            }
        }
        Ok(())
    }

    /// Hourly maintenance: expired available slots are purged, gated
    /// near-term slots are released.
    pub async fn run_hourly_maintenance(&self) -> Result<(), ClinicError> {
        let deleted = self.repo.delete_expired_available(self.clock.now_utc()).await?;
        if deleted > 0 {
            tracing::info!("Purged {} expired available appointments", deleted);
        }
        self.late_release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RIYADH: Tz = chrono_tz::Asia::Riyadh;

    #[test]
    fn cell_key_uses_clinic_zone() {
        // 23:30 UTC on Monday is 02:30 Tuesday in Riyadh
        let instant = Utc.with_ymd_and_hms(2025, 10, 6, 23, 30, 0).unwrap();
        let key = cell_key(instant, RIYADH);
        assert_eq!(key.day_of_week, 2);
        assert_eq!(key.hour, 2);
        assert_eq!(key.month, 10);
    }

    #[test]
    fn cell_key_day_of_week_is_sunday_based() {
        // 2025-10-07 09:15 Riyadh is a Tuesday
        let instant = Utc.with_ymd_and_hms(2025, 10, 7, 6, 15, 0).unwrap();
        let key = cell_key(instant, RIYADH);
        assert_eq!(key.day_of_week, 2);
        assert_eq!(key.hour, 9);
    }

    #[test]
    fn recalc_threshold_empty_skips() {
        assert_eq!(recalc_threshold(&[]), None);
    }

    #[test]
    fn recalc_threshold_light_mode() {
        // two cells: mean 3.0 * 1.1
        let t = recalc_threshold(&[2, 4]).unwrap();
        assert!((t - 3.3).abs() < 1e-9);
    }

    #[test]
    fn recalc_threshold_full_mode_uses_max_of_avg_and_rank() {
        // totals [1,2,3,4,8]: avg 3.6, avg*1.2 = 4.32,
        // descending [8,4,3,2,1], rank floor(5*0.25)=1 -> 4
        let t = recalc_threshold(&[1, 2, 3, 4, 8]).unwrap();
        assert!((t - 4.32).abs() < 1e-9);
    }

    #[test]
    fn recalc_threshold_rank_can_win() {
        // totals [1,1,1,10]: avg 3.25, avg*1.2 = 3.9,
        // descending [10,1,1,1], rank floor(4*0.25)=1 -> 1; max = 3.9
        let t = recalc_threshold(&[1, 1, 1, 10]).unwrap();
        assert!((t - 3.9).abs() < 1e-9);
        // totals [9,9,9,9,1]: avg 7.4 * 1.2 = 8.88, rank 1 -> 9
        let t = recalc_threshold(&[9, 9, 9, 9, 1]).unwrap();
        assert!((t - 9.0).abs() < 1e-9);
    }

    #[test]
    fn peak_keep_count_floors() {
        assert_eq!(peak_keep_count(5, 0.5), 2);
        assert_eq!(peak_keep_count(4, 0.5), 2);
        assert_eq!(peak_keep_count(1, 0.5), 0);
    }

    #[test]
    fn previous_month_wraps_january() {
        assert_eq!(previous_month(2026, 1), (2025, 12));
        assert_eq!(previous_month(2025, 7), (2025, 6));
    }

    #[test]
    fn month_bounds_cover_local_month() {
        let (from, until) = month_bounds_utc(2025, 10, RIYADH).unwrap();
        // Oct 1 00:00 Riyadh is Sep 30 21:00 UTC
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 9, 30, 21, 0, 0).unwrap());
        assert_eq!(until, Utc.with_ymd_and_hms(2025, 10, 31, 21, 0, 0).unwrap());
    }
}
