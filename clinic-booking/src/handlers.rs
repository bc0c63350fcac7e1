//! Bridges fired scheduler jobs into the domain services.

use async_trait::async_trait;

use clinic_core::types::SchedulerJob;
use clinic_engine::demand::DemandEngine;
use clinic_scheduler::{AutoMissPayload, JobHandler, JobKind, ReminderFirePayload};

use crate::attendance::AttendanceService;
use crate::booking::BookingService;

pub struct ClinicJobHandler {
    booking: BookingService,
    attendance: AttendanceService,
    engine: DemandEngine,
}

impl ClinicJobHandler {
    pub fn new(
        booking: BookingService,
        attendance: AttendanceService,
        engine: DemandEngine,
    ) -> Self {
        Self {
            booking,
            attendance,
            engine,
        }
    }
}

#[async_trait]
impl JobHandler for ClinicJobHandler {
    async fn execute(&self, job: &SchedulerJob) -> anyhow::Result<()> {
        match JobKind::parse(&job.kind) {
            Some(JobKind::ReminderFire) => {
                let payload: ReminderFirePayload = serde_json::from_value(job.payload.clone())?;
                self.booking.handle_reminder_fire(payload).await?;
            }
            Some(JobKind::AutoMissCheck) => {
                let payload: AutoMissPayload = serde_json::from_value(job.payload.clone())?;
                self.attendance.handle_auto_miss(payload).await?;
            }
            Some(JobKind::MonthEndLearn) => self.engine.run_month_end_learn().await?,
            Some(JobKind::MonthlyRecalc) => self.engine.run_monthly_recalc().await?,
            Some(JobKind::HourlyMaintenance) => self.engine.run_hourly_maintenance().await?,
            None => anyhow::bail!("unknown job kind '{}'", job.kind),
        }
        Ok(())
    }
}
