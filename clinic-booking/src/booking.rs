//! Booking coordination: admission control, the compare-and-set status
//! transition, reminder planning with instant catch-up, and the reminder
//! fire handler.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use clinic_core::catalog::{personalize, visit_header, MessageCatalog};
use clinic_core::clock::Clock;
use clinic_core::error::ClinicError;
use clinic_core::repo::Repository;
use clinic_core::types::{
    Appointment, AppointmentStatus, MessageCategory, ReminderStatus, User, UserCategory,
};
use clinic_engine::classifier::{lead_hours, message_category};
use clinic_engine::demand::DemandEngine;
use clinic_notify::Notifier;
use clinic_scheduler::{
    auto_miss_key, reminder_key, AutoMissPayload, JobKind, ReminderFirePayload, Scheduler,
};

/// Auto-miss check fires this long after the appointment starts.
const AUTO_MISS_DELAY_MINUTES: i64 = 10;

#[derive(Debug)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    /// Text of the single synchronous catch-up nudge, when one was sent.
    pub instant_message: Option<String>,
}

struct ReminderPlan {
    past: Vec<DateTime<Utc>>,
    future: Vec<DateTime<Utc>>,
}

/// Splits the class's lead hours into elapsed and upcoming send times.
/// Leads are walked most-distant first, so `past[0]` is the earliest
/// missed send.
fn plan_reminders(starts_at: DateTime<Utc>, leads: &[i64], now: DateTime<Utc>) -> ReminderPlan {
    let mut plan = ReminderPlan {
        past: Vec::new(),
        future: Vec::new(),
    };
    for hours in leads {
        let send_time = starts_at - Duration::hours(*hours);
        if send_time <= now {
            plan.past.push(send_time);
        } else {
            plan.future.push(send_time);
        }
    }
    plan
}

#[derive(Clone)]
pub struct BookingService {
    repo: Repository,
    clock: Arc<dyn Clock>,
    catalog: MessageCatalog,
    notifier: Notifier,
    scheduler: Scheduler,
    engine: DemandEngine,
    clinic_name: String,
}

impl BookingService {
    pub fn new(
        repo: Repository,
        clock: Arc<dyn Clock>,
        catalog: MessageCatalog,
        notifier: Notifier,
        scheduler: Scheduler,
        engine: DemandEngine,
        clinic_name: String,
    ) -> Self {
        Self {
            repo,
            clock,
            catalog,
            notifier,
            scheduler,
            engine,
            clinic_name,
        }
    }

    /// Books an available appointment for a registered user, arming the
    /// reminder series and the auto-miss check.
    pub async fn book(
        &self,
        appt_id: i64,
        user_name: &str,
        phone: Option<&str>,
    ) -> Result<BookingOutcome, ClinicError> {
        let appt = self
            .repo
            .find_appointment(appt_id)
            .await?
            .ok_or(ClinicError::NotFound)?;
        if appt.status() != AppointmentStatus::Available {
            return Err(ClinicError::NotAvailable);
        }

        let user = self
            .repo
            .find_user_by_name(user_name)
            .await?
            .ok_or(ClinicError::UserNotRegistered)?;
        if let Some(phone) = phone {
            if user.phone.is_none() {
                self.repo
                    .set_user_phone_if_missing(&user.user_name, phone, self.clock.now_utc())
                    .await?;
            }
        }

        self.engine.ensure_month(&appt.doctor_name, appt.starts_at).await?;

        // Admission gate: at-risk users are kept out of high-demand slots.
        if user.category() == UserCategory::AtRisk
            && self.engine.is_high_demand(&appt.doctor_name, appt.starts_at).await?
        {
            return Err(ClinicError::AdmissionDenied {
                doctor: appt.doctor_name.clone(),
            });
        }

        if !self.repo.book_appointment_cas(appt_id, &user.user_name).await? {
            return Err(ClinicError::NotAvailable);
        }
        tracing::info!(
            "Appointment {} with {} booked by {}",
            appt_id,
            appt.doctor_name,
            user.user_name
        );

        let instant_message = self.arm_reminders(&appt, &user).await?;

        let booked = self
            .repo
            .find_appointment(appt_id)
            .await?
            .ok_or(ClinicError::NotFound)?;
        Ok(BookingOutcome {
            appointment: booked,
            instant_message,
        })
    }

    /// Persists the reminder rows and arms the future jobs. At most one
    /// already-elapsed lead is delivered synchronously; the rest are
    /// recorded as sent without delivery.
    async fn arm_reminders(
        &self,
        appt: &Appointment,
        user: &User,
    ) -> Result<Option<String>, ClinicError> {
        let category = user.category();
        let leads = lead_hours(category);
        let msg_category = message_category(category);
        let now = self.clock.now_utc();
        let plan = plan_reminders(appt.starts_at, leads, now);

        let mut used = HashSet::new();
        let mut instant_message = None;
        for (index, _send_time) in plan.past.iter().enumerate() {
            if index == 0 {
                instant_message = self
                    .deliver_catch_up(appt, user, msg_category, now, &mut used)
                    .await?;
            } else {
                self.repo
                    .insert_reminder(appt.id, msg_category.as_str(), now, ReminderStatus::Sent, None)
                    .await?;
            }
        }

        for send_time in &plan.future {
            self.repo
                .insert_reminder(
                    appt.id,
                    msg_category.as_str(),
                    *send_time,
                    ReminderStatus::Scheduled,
                    None,
                )
                .await?;
            let payload = serde_json::to_value(ReminderFirePayload {
                appointment_id: appt.id,
                send_time: *send_time,
            })
            .map_err(|e| ClinicError::Store(e.to_string()))?;
            self.scheduler
                .arm_at(
                    JobKind::ReminderFire,
                    &reminder_key(appt.id, *send_time),
                    *send_time,
                    payload,
                )
                .await?;
        }

        let auto_miss_at = appt.starts_at + Duration::minutes(AUTO_MISS_DELAY_MINUTES);
        let payload = serde_json::to_value(AutoMissPayload {
            appointment_id: appt.id,
        })
        .map_err(|e| ClinicError::Store(e.to_string()))?;
        self.scheduler
            .arm_at(JobKind::AutoMissCheck, &auto_miss_key(appt.id), auto_miss_at, payload)
            .await?;

        Ok(instant_message)
    }

    /// The single synchronous delivery at booking time. An empty template
    /// pool degrades to a sent row with no delivery.
    async fn deliver_catch_up(
        &self,
        appt: &Appointment,
        user: &User,
        msg_category: MessageCategory,
        now: DateTime<Utc>,
        used: &mut HashSet<String>,
    ) -> Result<Option<String>, ClinicError> {
        match self.catalog.pick_unique(msg_category, used).await {
            Ok(template) => {
                let text = self.render(appt, user, &template);
                self.repo
                    .insert_reminder(
                        appt.id,
                        msg_category.as_str(),
                        now,
                        ReminderStatus::Sent,
                        Some(&template),
                    )
                    .await?;
                self.notifier.send(user, &text).await;
                Ok(Some(text))
            }
            Err(ClinicError::EmptyCategory(category)) => {
                tracing::warn!(
                    "No templates for category '{}', recording catch-up without delivery",
                    category
                );
                self.repo
                    .insert_reminder(appt.id, msg_category.as_str(), now, ReminderStatus::Sent, None)
                    .await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Best-effort cancellation of everything armed for an appointment.
    /// Used when a slot is removed; an already-fired job re-checks state
    /// and backs off on its own.
    pub async fn disarm_appointment_jobs(&self, appt_id: i64) -> Result<(), ClinicError> {
        for reminder in self.repo.reminders_for(appt_id).await? {
            if reminder.status == ReminderStatus::Scheduled.as_str() {
                self.scheduler
                    .cancel(
                        JobKind::ReminderFire,
                        &reminder_key(appt_id, reminder.send_time),
                    )
                    .await?;
            }
        }
        self.scheduler
            .cancel(JobKind::AutoMissCheck, &auto_miss_key(appt_id))
            .await?;
        Ok(())
    }

    /// Fired by the scheduler at a reminder's send time. Re-checks the
    /// appointment is still booked; the scheduled->sent row transition is
    /// the idempotence guard against replays.
    pub async fn handle_reminder_fire(
        &self,
        payload: ReminderFirePayload,
    ) -> Result<(), ClinicError> {
        let Some(appt) = self.repo.find_appointment(payload.appointment_id).await? else {
            tracing::debug!("Reminder for deleted appointment {}", payload.appointment_id);
            return Ok(());
        };
        if appt.status() != AppointmentStatus::Booked {
            tracing::debug!(
                "Appointment {} is {}, skipping reminder",
                appt.id,
                appt.status
            );
            return Ok(());
        }
        let Some(user_name) = appt.user_name.clone() else {
            return Ok(());
        };
        let Some(user) = self.repo.find_user_by_name(&user_name).await? else {
            return Ok(());
        };

        let msg_category = message_category(user.category());
        let mut used: HashSet<String> = self
            .repo
            .reminders_for(appt.id)
            .await?
            .into_iter()
            .filter_map(|r| r.template_text)
            .collect();

        let template = match self.catalog.pick_unique(msg_category, &mut used).await {
            Ok(template) => Some(template),
            Err(ClinicError::ExhaustedPool) => {
                // every template was used for this appointment; allow reuse
                used.clear();
                Some(self.catalog.pick_unique(msg_category, &mut used).await?)
            }
            Err(ClinicError::EmptyCategory(category)) => {
                tracing::warn!("No templates for category '{}', marking reminder sent", category);
                None
            }
            Err(e) => return Err(e),
        };

        let transitioned = self
            .repo
            .mark_reminder_sent(appt.id, payload.send_time, template.as_deref())
            .await?;
        if !transitioned {
            // replayed job; the row was already sent
            return Ok(());
        }
        if let Some(template) = template {
            let text = self.render(&appt, &user, &template);
            self.notifier.send(&user, &text).await;
        }
        Ok(())
    }

    fn render(&self, appt: &Appointment, user: &User, template: &str) -> String {
        let local = appt.starts_at.with_timezone(&self.clock.tz());
        let header = visit_header(&self.clinic_name, &appt.doctor_name, local);
        format!("{}\n{}", header, personalize(template, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn plan_splits_past_and_future() {
        let now = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let starts_at = now + Duration::hours(5);
        // at-risk leads: 48h and 6h are past, 1h is future
        let plan = plan_reminders(starts_at, &[48, 6, 1], now);
        assert_eq!(plan.past, vec![starts_at - Duration::hours(48), starts_at - Duration::hours(6)]);
        assert_eq!(plan.future, vec![starts_at - Duration::hours(1)]);
    }

    #[test]
    fn plan_for_imminent_appointment_is_all_past() {
        // appointment one hour out: both Good leads (24h, 2h) have elapsed
        let now = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let starts_at = now + Duration::hours(1);
        let plan = plan_reminders(starts_at, &[24, 2], now);
        assert_eq!(plan.past.len(), 2);
        assert!(plan.future.is_empty());
        // the catch-up candidate is the most distant lead
        assert_eq!(plan.past[0], starts_at - Duration::hours(24));
    }

    #[test]
    fn plan_for_distant_appointment_is_all_future() {
        let now = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let starts_at = now + Duration::hours(72);
        let plan = plan_reminders(starts_at, &[48, 6, 1], now);
        assert!(plan.past.is_empty());
        assert_eq!(plan.future.len(), 3);
        // future sends stay ordered earliest-first
        assert!(plan.future[0] < plan.future[1] && plan.future[1] < plan.future[2]);
    }

    #[test]
    fn boundary_send_time_counts_as_past() {
        let now = Utc.with_ymd_and_hms(2025, 10, 7, 9, 0, 0).unwrap();
        let starts_at = now + Duration::hours(2);
        let plan = plan_reminders(starts_at, &[24, 2], now);
        // the 2h lead lands exactly on `now`
        assert_eq!(plan.past.len(), 2);
        assert!(plan.future.is_empty());
    }
}
