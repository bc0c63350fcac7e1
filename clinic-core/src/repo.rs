use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use std::sync::Arc;

use crate::db::{DbConnection, DbPool};
use crate::error::ClinicError;
use crate::schema::{appointments, demand_cells, messages, reminders, scheduler_jobs, users};
use crate::types::{
    Appointment, AppointmentStatus, CellSource, DemandCell, JobStatus, Message, Reminder,
    ReminderStatus, SchedulerJob, User, UserCategory,
};

/// Threshold assigned to cells created before any recalculation has run.
pub const DEFAULT_HIGH_DEMAND_THRESHOLD: f64 = 3.0;

diesel::define_sql_function! {
    #[sql_name = "coalesce"]
    fn coalesce_text(
        x: diesel::sql_types::Nullable<diesel::sql_types::Text>,
        y: diesel::sql_types::Nullable<diesel::sql_types::Text>
    ) -> diesel::sql_types::Nullable<diesel::sql_types::Text>;
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        user_name TEXT NOT NULL,
        user_name_normalized TEXT NOT NULL UNIQUE,
        display_name TEXT,
        phone TEXT,
        notify_channel_id TEXT,
        attended_count INTEGER NOT NULL DEFAULT 0,
        missed_count INTEGER NOT NULL DEFAULT 0,
        score INTEGER NOT NULL DEFAULT 0,
        category TEXT NOT NULL DEFAULT 'good',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS appointments (
        id BIGSERIAL PRIMARY KEY,
        doctor_name TEXT NOT NULL,
        starts_at TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'available',
        user_name TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS reminders (
        id BIGSERIAL PRIMARY KEY,
        appointment_id BIGINT NOT NULL REFERENCES appointments(id) ON DELETE CASCADE,
        message_category TEXT NOT NULL,
        send_time TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'scheduled',
        template_text TEXT
    );
    CREATE INDEX IF NOT EXISTS reminders_appointment_idx ON reminders(appointment_id);

    CREATE TABLE IF NOT EXISTS demand_cells (
        id BIGSERIAL PRIMARY KEY,
        doctor_name TEXT NOT NULL,
        year INTEGER NOT NULL,
        month INTEGER NOT NULL,
        day_of_week INTEGER NOT NULL,
        hour INTEGER NOT NULL,
        total_appointments INTEGER NOT NULL DEFAULT 0,
        high_demand_threshold DOUBLE PRECISION NOT NULL,
        source TEXT NOT NULL DEFAULT 'auto',
        last_updated TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (doctor_name, year, month, day_of_week, hour)
    );

    CREATE TABLE IF NOT EXISTS messages (
        id BIGSERIAL PRIMARY KEY,
        category TEXT NOT NULL,
        text TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS messages_category_idx ON messages(category);

    CREATE TABLE IF NOT EXISTS scheduler_jobs (
        id BIGSERIAL PRIMARY KEY,
        kind TEXT NOT NULL,
        job_key TEXT NOT NULL,
        fire_at TIMESTAMPTZ NOT NULL,
        payload JSONB NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (kind, job_key)
    );
";

/// Typed persistence facade over the connection pool. Every method is a
/// single aggregate-level write or read; no cross-aggregate transactions.
#[derive(Clone)]
pub struct Repository {
    pool: Arc<DbPool>,
}

impl Repository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<DbConnection, ClinicError> {
        Ok(self.pool.get().await?)
    }

    pub async fn init_schema(&self) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| ClinicError::Store(e.to_string()))?;
        Ok(())
    }

    // ─── Users ───────────────────────────────────────────────

    pub async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, ClinicError> {
        let mut conn = self.conn().await?;
        let user = users::table
            .filter(users::user_name_normalized.eq(name.to_lowercase()))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(user)
    }

    /// Idempotent registration: inserts a new user or refreshes the
    /// optional profile fields of an existing one, never clearing them.
    pub async fn upsert_user(
        &self,
        user_name: &str,
        display_name: Option<&str>,
        phone: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<User, ClinicError> {
        let mut conn = self.conn().await?;
        let normalized = user_name.to_lowercase();
        let user = diesel::insert_into(users::table)
            .values((
                users::user_name.eq(user_name),
                users::user_name_normalized.eq(&normalized),
                users::display_name.eq(display_name),
                users::phone.eq(phone),
                users::category.eq(UserCategory::Good.as_str()),
                users::created_at.eq(now),
                users::updated_at.eq(now),
            ))
            .on_conflict(users::user_name_normalized)
            .do_update()
            .set((
                users::display_name.eq(coalesce_text(excluded(users::display_name), users::display_name)),
                users::phone.eq(coalesce_text(excluded(users::phone), users::phone)),
                users::updated_at.eq(now),
            ))
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = users::table
            .order(users::user_name.asc())
            .select(User::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Writes the full attendance outcome of one resolution in one shot.
    pub async fn update_user_stats(
        &self,
        user_name: &str,
        attended_count: i32,
        missed_count: i32,
        score: i32,
        category: UserCategory,
        now: DateTime<Utc>,
    ) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::update(users::table.filter(users::user_name_normalized.eq(user_name.to_lowercase())))
            .set((
                users::attended_count.eq(attended_count),
                users::missed_count.eq(missed_count),
                users::score.eq(score),
                users::category.eq(category.as_str()),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn set_user_category(
        &self,
        user_name: &str,
        category: UserCategory,
        now: DateTime<Utc>,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            users::table.filter(users::user_name_normalized.eq(user_name.to_lowercase())),
        )
        .set((users::category.eq(category.as_str()), users::updated_at.eq(now)))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    /// Backfills the phone only when the user has none yet.
    pub async fn set_user_phone_if_missing(
        &self,
        user_name: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::update(
            users::table
                .filter(users::user_name_normalized.eq(user_name.to_lowercase()))
                .filter(users::phone.is_null()),
        )
        .set((users::phone.eq(phone), users::updated_at.eq(now)))
        .execute(&mut conn)
        .await?;
        Ok(())
    }

    pub async fn link_notify_channel(
        &self,
        user_name: &str,
        channel_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            users::table.filter(users::user_name_normalized.eq(user_name.to_lowercase())),
        )
        .set((users::notify_channel_id.eq(channel_id), users::updated_at.eq(now)))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    // ─── Appointments ────────────────────────────────────────

    pub async fn create_appointments(
        &self,
        doctor_name: &str,
        slots: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> Result<usize, ClinicError> {
        if slots.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let rows: Vec<_> = slots
            .iter()
            .map(|starts_at| {
                (
                    appointments::doctor_name.eq(doctor_name),
                    appointments::starts_at.eq(*starts_at),
                    appointments::status.eq(AppointmentStatus::Available.as_str()),
                    appointments::created_at.eq(now),
                )
            })
            .collect();
        let inserted = diesel::insert_into(appointments::table)
            .values(&rows)
            .execute(&mut conn)
            .await?;
        Ok(inserted)
    }

    pub async fn find_appointment(&self, id: i64) -> Result<Option<Appointment>, ClinicError> {
        let mut conn = self.conn().await?;
        let appt = appointments::table
            .find(id)
            .select(Appointment::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(appt)
    }

    pub async fn list_appointments(
        &self,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<Appointment>, ClinicError> {
        let mut conn = self.conn().await?;
        let mut query = appointments::table
            .order(appointments::starts_at.asc())
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(appointments::status.eq(status.as_str()));
        }
        let rows = query.select(Appointment::as_select()).load(&mut conn).await?;
        Ok(rows)
    }

    pub async fn list_available_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = appointments::table
            .filter(appointments::status.eq(AppointmentStatus::Available.as_str()))
            .filter(appointments::starts_at.ge(from))
            .filter(appointments::starts_at.le(until))
            .select(Appointment::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn list_attended_in_month(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = appointments::table
            .filter(appointments::status.eq(AppointmentStatus::Attended.as_str()))
            .filter(appointments::starts_at.ge(from))
            .filter(appointments::starts_at.lt(until))
            .select(Appointment::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Compare-and-set `available -> booked`. Returns false when another
    /// booking won the race.
    pub async fn book_appointment_cas(
        &self,
        id: i64,
        user_name: &str,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            appointments::table
                .filter(appointments::id.eq(id))
                .filter(appointments::status.eq(AppointmentStatus::Available.as_str())),
        )
        .set((
            appointments::status.eq(AppointmentStatus::Booked.as_str()),
            appointments::user_name.eq(user_name),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    /// Compare-and-set `booked -> attended|missed`. Of two concurrent
    /// terminal transitions exactly one observes `true`.
    pub async fn finalize_appointment_cas(
        &self,
        id: i64,
        to: AppointmentStatus,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            appointments::table
                .filter(appointments::id.eq(id))
                .filter(appointments::status.eq(AppointmentStatus::Booked.as_str())),
        )
        .set(appointments::status.eq(to.as_str()))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    pub async fn delete_appointment(&self, id: i64) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(appointments::table.find(id))
            .execute(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    pub async fn delete_expired_available(
        &self,
        before: DateTime<Utc>,
    ) -> Result<usize, ClinicError> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            appointments::table
                .filter(appointments::status.eq(AppointmentStatus::Available.as_str()))
                .filter(appointments::starts_at.lt(before)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted)
    }

    pub async fn distinct_doctors(&self) -> Result<Vec<String>, ClinicError> {
        let mut conn = self.conn().await?;
        let doctors = appointments::table
            .select(appointments::doctor_name)
            .distinct()
            .load(&mut conn)
            .await?;
        Ok(doctors)
    }

    // ─── Reminders ───────────────────────────────────────────

    pub async fn insert_reminder(
        &self,
        appointment_id: i64,
        category: &str,
        send_time: DateTime<Utc>,
        status: ReminderStatus,
        template_text: Option<&str>,
    ) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(reminders::table)
            .values((
                reminders::appointment_id.eq(appointment_id),
                reminders::message_category.eq(category),
                reminders::send_time.eq(send_time),
                reminders::status.eq(status.as_str()),
                reminders::template_text.eq(template_text),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn reminders_for(&self, appointment_id: i64) -> Result<Vec<Reminder>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = reminders::table
            .filter(reminders::appointment_id.eq(appointment_id))
            .order(reminders::send_time.asc())
            .select(Reminder::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Transitions one reminder row scheduled -> sent. The scheduled-status
    /// filter makes a replayed job a no-op.
    pub async fn mark_reminder_sent(
        &self,
        appointment_id: i64,
        send_time: DateTime<Utc>,
        template_text: Option<&str>,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            reminders::table
                .filter(reminders::appointment_id.eq(appointment_id))
                .filter(reminders::send_time.eq(send_time))
                .filter(reminders::status.eq(ReminderStatus::Scheduled.as_str())),
        )
        .set((
            reminders::status.eq(ReminderStatus::Sent.as_str()),
            reminders::template_text.eq(template_text),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    // ─── Demand cells ────────────────────────────────────────

    /// Atomic upsert-increment of one cell's learned total.
    pub async fn bump_demand_cell(
        &self,
        doctor_name: &str,
        year: i32,
        month: i32,
        day_of_week: i32,
        hour: i32,
        now: DateTime<Utc>,
    ) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(demand_cells::table)
            .values((
                demand_cells::doctor_name.eq(doctor_name),
                demand_cells::year.eq(year),
                demand_cells::month.eq(month),
                demand_cells::day_of_week.eq(day_of_week),
                demand_cells::hour.eq(hour),
                demand_cells::total_appointments.eq(1),
                demand_cells::high_demand_threshold.eq(DEFAULT_HIGH_DEMAND_THRESHOLD),
                demand_cells::source.eq(CellSource::Auto.as_str()),
                demand_cells::last_updated.eq(now),
            ))
            .on_conflict((
                demand_cells::doctor_name,
                demand_cells::year,
                demand_cells::month,
                demand_cells::day_of_week,
                demand_cells::hour,
            ))
            .do_update()
            .set((
                demand_cells::total_appointments.eq(demand_cells::total_appointments + 1),
                demand_cells::last_updated.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn find_demand_cell(
        &self,
        doctor_name: &str,
        year: i32,
        month: i32,
        day_of_week: i32,
        hour: i32,
    ) -> Result<Option<DemandCell>, ClinicError> {
        let mut conn = self.conn().await?;
        let cell = demand_cells::table
            .filter(demand_cells::doctor_name.eq(doctor_name))
            .filter(demand_cells::year.eq(year))
            .filter(demand_cells::month.eq(month))
            .filter(demand_cells::day_of_week.eq(day_of_week))
            .filter(demand_cells::hour.eq(hour))
            .select(DemandCell::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(cell)
    }

    pub async fn list_demand_cells_for_month(
        &self,
        doctor_name: &str,
        year: i32,
        month: i32,
    ) -> Result<Vec<DemandCell>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = demand_cells::table
            .filter(demand_cells::doctor_name.eq(doctor_name))
            .filter(demand_cells::year.eq(year))
            .filter(demand_cells::month.eq(month))
            .order((demand_cells::day_of_week.asc(), demand_cells::hour.asc()))
            .select(DemandCell::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn month_has_cells(
        &self,
        doctor_name: &str,
        year: i32,
        month: i32,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let count: i64 = demand_cells::table
            .filter(demand_cells::doctor_name.eq(doctor_name))
            .filter(demand_cells::year.eq(year))
            .filter(demand_cells::month.eq(month))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count > 0)
    }

    /// Bulk-inserts carried-over or baseline cells. Conflicting keys are
    /// left untouched.
    pub async fn insert_demand_cells(
        &self,
        cells: &[(String, i32, i32, i32, i32, i32, f64, CellSource)],
        now: DateTime<Utc>,
    ) -> Result<(), ClinicError> {
        if cells.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let rows: Vec<_> = cells
            .iter()
            .map(|(doctor, year, month, dow, hour, total, threshold, source)| {
                (
                    demand_cells::doctor_name.eq(doctor.as_str()),
                    demand_cells::year.eq(*year),
                    demand_cells::month.eq(*month),
                    demand_cells::day_of_week.eq(*dow),
                    demand_cells::hour.eq(*hour),
                    demand_cells::total_appointments.eq(*total),
                    demand_cells::high_demand_threshold.eq(*threshold),
                    demand_cells::source.eq(source.as_str()),
                    demand_cells::last_updated.eq(now),
                )
            })
            .collect();
        diesel::insert_into(demand_cells::table)
            .values(&rows)
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn update_cell_threshold(
        &self,
        id: i64,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::update(demand_cells::table.find(id))
            .set((
                demand_cells::high_demand_threshold.eq(threshold),
                demand_cells::last_updated.eq(now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn delete_admin_cells(
        &self,
        doctor_name: &str,
        year: i32,
        month: i32,
    ) -> Result<usize, ClinicError> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            demand_cells::table
                .filter(demand_cells::doctor_name.eq(doctor_name))
                .filter(demand_cells::year.eq(year))
                .filter(demand_cells::month.eq(month))
                .filter(demand_cells::source.eq(CellSource::Admin.as_str())),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted)
    }

    // ─── Messages ────────────────────────────────────────────

    pub async fn messages_for(&self, category: &str) -> Result<Vec<Message>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = messages::table
            .filter(messages::category.eq(category))
            .select(Message::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    pub async fn insert_message(&self, category: &str, text: &str) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(messages::table)
            .values((messages::category.eq(category), messages::text.eq(text)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    // ─── Scheduler jobs ──────────────────────────────────────

    /// Arms or re-arms a job; (kind, key) is the identity, so re-arming
    /// replaces the prior schedule.
    pub async fn upsert_job(
        &self,
        kind: &str,
        job_key: &str,
        fire_at: DateTime<Utc>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SchedulerJob, ClinicError> {
        let mut conn = self.conn().await?;
        let job = diesel::insert_into(scheduler_jobs::table)
            .values((
                scheduler_jobs::kind.eq(kind),
                scheduler_jobs::job_key.eq(job_key),
                scheduler_jobs::fire_at.eq(fire_at),
                scheduler_jobs::payload.eq(&payload),
                scheduler_jobs::status.eq(JobStatus::Pending.as_str()),
                scheduler_jobs::created_at.eq(now),
            ))
            .on_conflict((scheduler_jobs::kind, scheduler_jobs::job_key))
            .do_update()
            .set((
                scheduler_jobs::fire_at.eq(fire_at),
                scheduler_jobs::payload.eq(&payload),
                scheduler_jobs::status.eq(JobStatus::Pending.as_str()),
                scheduler_jobs::attempts.eq(0),
            ))
            .returning(SchedulerJob::as_returning())
            .get_result(&mut conn)
            .await?;
        Ok(job)
    }

    pub async fn cancel_job(&self, kind: &str, job_key: &str) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            scheduler_jobs::table
                .filter(scheduler_jobs::kind.eq(kind))
                .filter(scheduler_jobs::job_key.eq(job_key))
                .filter(scheduler_jobs::status.eq(JobStatus::Pending.as_str())),
        )
        .set(scheduler_jobs::status.eq(JobStatus::Cancelled.as_str()))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    pub async fn pending_jobs(&self) -> Result<Vec<SchedulerJob>, ClinicError> {
        let mut conn = self.conn().await?;
        let rows = scheduler_jobs::table
            .filter(scheduler_jobs::status.eq(JobStatus::Pending.as_str()))
            .order(scheduler_jobs::fire_at.asc())
            .select(SchedulerJob::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows)
    }

    /// Claims a pending job for execution. The fire-time guard makes a
    /// heap entry from before a re-arm lose the claim; cancels lose it
    /// through the status filter.
    pub async fn claim_job(
        &self,
        id: i64,
        expected_fire_at: DateTime<Utc>,
    ) -> Result<bool, ClinicError> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            scheduler_jobs::table
                .filter(scheduler_jobs::id.eq(id))
                .filter(scheduler_jobs::status.eq(JobStatus::Pending.as_str()))
                .filter(scheduler_jobs::fire_at.eq(expected_fire_at)),
        )
        .set((
            scheduler_jobs::status.eq(JobStatus::Running.as_str()),
            scheduler_jobs::attempts.eq(scheduler_jobs::attempts + 1),
        ))
        .execute(&mut conn)
        .await?;
        Ok(updated > 0)
    }

    pub async fn finish_job(&self, id: i64, status: JobStatus) -> Result<(), ClinicError> {
        let mut conn = self.conn().await?;
        diesel::update(scheduler_jobs::table.find(id))
            .set(scheduler_jobs::status.eq(status.as_str()))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Boot-time grace policy: anything pending and overdue past the cutoff
    /// is marked skipped rather than replayed.
    pub async fn skip_stale_jobs(&self, before: DateTime<Utc>) -> Result<usize, ClinicError> {
        let mut conn = self.conn().await?;
        let skipped = diesel::update(
            scheduler_jobs::table
                .filter(scheduler_jobs::status.eq(JobStatus::Pending.as_str()))
                .filter(scheduler_jobs::fire_at.lt(before)),
        )
        .set(scheduler_jobs::status.eq(JobStatus::Skipped.as_str()))
        .execute(&mut conn)
        .await?;
        Ok(skipped)
    }
}
