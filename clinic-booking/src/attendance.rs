//! Attendance resolution: terminal appointment transitions, user counter
//! and class updates, demand learning, and the auto-miss check.

use std::sync::Arc;

use clinic_core::clock::Clock;
use clinic_core::error::ClinicError;
use clinic_core::repo::Repository;
use clinic_core::types::{Appointment, AppointmentStatus};
use clinic_engine::classifier::{classify, score_after, AttendanceOutcome};
use clinic_engine::demand::DemandEngine;
use clinic_notify::Notifier;
use clinic_scheduler::AutoMissPayload;

#[derive(Clone)]
pub struct AttendanceService {
    repo: Repository,
    clock: Arc<dyn Clock>,
    engine: DemandEngine,
    notifier: Notifier,
    public_base_url: Option<String>,
}

impl AttendanceService {
    pub fn new(
        repo: Repository,
        clock: Arc<dyn Clock>,
        engine: DemandEngine,
        notifier: Notifier,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            repo,
            clock,
            engine,
            notifier,
            public_base_url,
        }
    }

    /// Resolves a booked appointment to attended or missed. Repeating the
    /// same resolution is a no-op; a conflicting terminal resolution is
    /// rejected.
    pub async fn set_status(
        &self,
        appt_id: i64,
        target: AppointmentStatus,
    ) -> Result<Appointment, ClinicError> {
        self.resolve(appt_id, target, false).await
    }

    async fn resolve(
        &self,
        appt_id: i64,
        target: AppointmentStatus,
        via_auto_miss: bool,
    ) -> Result<Appointment, ClinicError> {
        if !target.is_terminal() {
            return Err(ClinicError::Validation(
                "status must be 'attended' or 'missed'".to_string(),
            ));
        }
        let appt = self
            .repo
            .find_appointment(appt_id)
            .await?
            .ok_or(ClinicError::NotFound)?;
        match appt.status() {
            status if status == target => return Ok(appt),
            AppointmentStatus::Attended | AppointmentStatus::Missed => {
                return Err(ClinicError::InvalidTransition)
            }
            AppointmentStatus::Available => {
                return Err(ClinicError::Validation(
                    "appointment has not been booked".to_string(),
                ))
            }
            AppointmentStatus::Booked => {}
        }

        if !self.repo.finalize_appointment_cas(appt_id, target).await? {
            // lost a race against a concurrent resolution
            let current = self
                .repo
                .find_appointment(appt_id)
                .await?
                .ok_or(ClinicError::NotFound)?;
            if current.status() == target {
                return Ok(current);
            }
            return Err(ClinicError::InvalidTransition);
        }
        tracing::info!("Appointment {} resolved as {}", appt_id, target.as_str());

        let resolved = Appointment {
            status: target.as_str().to_string(),
            ..appt
        };
        self.apply_user_update(&resolved, target, via_auto_miss).await?;
        Ok(resolved)
    }

    async fn apply_user_update(
        &self,
        appt: &Appointment,
        target: AppointmentStatus,
        via_auto_miss: bool,
    ) -> Result<(), ClinicError> {
        let Some(user_name) = appt.user_name.clone() else {
            return Ok(());
        };
        let Some(user) = self.repo.find_user_by_name(&user_name).await? else {
            tracing::warn!("Appointment {} references unknown user {}", appt.id, user_name);
            return Ok(());
        };

        let (attended, missed, outcome) = match target {
            AppointmentStatus::Attended => (
                user.attended_count + 1,
                user.missed_count,
                AttendanceOutcome::Attended,
            ),
            _ => (
                user.attended_count,
                user.missed_count + 1,
                AttendanceOutcome::Missed,
            ),
        };
        let score = score_after(user.score, outcome);
        let category = classify(attended, missed, user.category());
        self.repo
            .update_user_stats(
                &user.user_name,
                attended,
                missed,
                score,
                category,
                self.clock.now_utc(),
            )
            .await?;

        if target == AppointmentStatus::Attended {
            self.engine.record_attendance(appt).await?;
        }

        if target == AppointmentStatus::Missed && via_auto_miss {
            self.send_missed_survey(&user_name, appt).await;
        }
        Ok(())
    }

    /// Follow-up after an automatic miss; delivery failure is not an error.
    async fn send_missed_survey(&self, user_name: &str, appt: &Appointment) {
        let user = match self.repo.find_user_by_name(user_name).await {
            Ok(Some(user)) => user,
            _ => return,
        };
        let survey = self
            .public_base_url
            .as_deref()
            .map(|base| format!("{}/survey?appointment={}", base.trim_end_matches('/'), appt.id));
        let text = match survey {
            Some(link) => format!(
                "We missed you at your appointment with {}. Let us know what happened: {}",
                appt.doctor_name, link
            ),
            None => format!(
                "We missed you at your appointment with {}. Reply here if you'd like to rebook.",
                appt.doctor_name
            ),
        };
        self.notifier.send(&user, &text).await;
    }

    /// Fired at appointment time + 10 minutes: a still-booked appointment
    /// becomes missed, anything else is a no-op (including replays).
    pub async fn handle_auto_miss(&self, payload: AutoMissPayload) -> Result<(), ClinicError> {
        let Some(appt) = self.repo.find_appointment(payload.appointment_id).await? else {
            return Ok(());
        };
        if appt.status() != AppointmentStatus::Booked {
            tracing::debug!(
                "Auto-miss check: appointment {} already {}",
                appt.id,
                appt.status
            );
            return Ok(());
        }
        self.resolve(payload.appointment_id, AppointmentStatus::Missed, true)
            .await
            .map(|_| ())
    }
}
