use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Baseline demand rows apply to every weekday; stored with this sentinel
/// instead of NULL so the (doctor, year, month, dow, hour) upsert key
/// stays a plain unique constraint.
pub const BASELINE_DOW: i32 = -1;

/// Behavior class derived from a user's attendance history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserCategory {
    Good,
    VeryGood,
    AtRisk,
}

impl UserCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserCategory::Good => "good",
            UserCategory::VeryGood => "very_good",
            UserCategory::AtRisk => "at_risk",
        }
    }

    /// Accepts both the stored form and the admin UI spellings
    /// ("Good", "Very Good", "At-Risk").
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "good" => Some(UserCategory::Good),
            "very_good" | "verygood" => Some(UserCategory::VeryGood),
            "at_risk" | "atrisk" => Some(UserCategory::AtRisk),
            _ => None,
        }
    }

    pub fn display(&self) -> &'static str {
        match self {
            UserCategory::Good => "Good",
            UserCategory::VeryGood => "Very Good",
            UserCategory::AtRisk => "At-Risk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Available,
    Booked,
    Attended,
    Missed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Available => "available",
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Attended => "attended",
            AppointmentStatus::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "available" => Some(AppointmentStatus::Available),
            "booked" => Some(AppointmentStatus::Booked),
            "attended" => Some(AppointmentStatus::Attended),
            "missed" => Some(AppointmentStatus::Missed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Attended | AppointmentStatus::Missed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Scheduled,
    Sent,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Scheduled => "scheduled",
            ReminderStatus::Sent => "sent",
        }
    }
}

/// Message pool categories for reminder nudges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageCategory {
    DefaultNudge,
    PositiveNudge,
    Reengagement,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::DefaultNudge => "default_nudge",
            MessageCategory::PositiveNudge => "positive_nudge",
            MessageCategory::Reengagement => "reengagement",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default_nudge" => Some(MessageCategory::DefaultNudge),
            "positive_nudge" => Some(MessageCategory::PositiveNudge),
            "reengagement" => Some(MessageCategory::Reengagement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSource {
    Admin,
    Auto,
}

impl CellSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellSource::Admin => "admin",
            CellSource::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub user_name_normalized: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
    pub notify_channel_id: Option<String>,
    pub attended_count: i32,
    pub missed_count: i32,
    pub score: i32,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn total_marks(&self) -> i32 {
        self.attended_count + self.missed_count
    }

    pub fn attendance_rate(&self) -> f64 {
        let total = self.total_marks();
        if total == 0 {
            0.0
        } else {
            100.0 * self.attended_count as f64 / total as f64
        }
    }

    pub fn category(&self) -> UserCategory {
        UserCategory::parse(&self.category).unwrap_or(UserCategory::Good)
    }

    /// Name used inside rendered message templates.
    pub fn salutation(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_name)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Appointment {
    pub id: i64,
    pub doctor_name: String,
    pub starts_at: DateTime<Utc>,
    pub status: String,
    pub user_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    pub fn status(&self) -> AppointmentStatus {
        AppointmentStatus::parse(&self.status).unwrap_or(AppointmentStatus::Available)
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::reminders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Reminder {
    pub id: i64,
    pub appointment_id: i64,
    pub message_category: String,
    pub send_time: DateTime<Utc>,
    pub status: String,
    pub template_text: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::demand_cells)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DemandCell {
    pub id: i64,
    pub doctor_name: String,
    pub year: i32,
    pub month: i32,
    pub day_of_week: i32,
    pub hour: i32,
    pub total_appointments: i32,
    pub high_demand_threshold: f64,
    pub source: String,
    pub last_updated: DateTime<Utc>,
}

impl DemandCell {
    pub fn is_admin(&self) -> bool {
        self.source == CellSource::Admin.as_str()
    }

    /// High-demand iff the cell was pinned by an admin or learned demand
    /// reached the threshold.
    pub fn is_high_demand(&self) -> bool {
        self.is_admin() || (self.total_appointments as f64) >= self.high_demand_threshold
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: i64,
    pub category: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Cancelled,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::scheduler_jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SchedulerJob {
    pub id: i64,
    pub kind: String,
    pub job_key: String,
    pub fire_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_accepts_ui_spellings() {
        assert_eq!(UserCategory::parse("Very Good"), Some(UserCategory::VeryGood));
        assert_eq!(UserCategory::parse("At-Risk"), Some(UserCategory::AtRisk));
        assert_eq!(UserCategory::parse("good"), Some(UserCategory::Good));
        assert_eq!(UserCategory::parse("unknown"), None);
    }

    #[test]
    fn attendance_rate_handles_zero_total() {
        let user = sample_user(0, 0);
        assert_eq!(user.attendance_rate(), 0.0);
        let user = sample_user(3, 1);
        assert!((user.attendance_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn high_demand_requires_admin_or_threshold() {
        let mut cell = DemandCell {
            id: 1,
            doctor_name: "Dr. Sara".to_string(),
            year: 2025,
            month: 10,
            day_of_week: 2,
            hour: 9,
            total_appointments: 2,
            high_demand_threshold: 3.0,
            source: "auto".to_string(),
            last_updated: Utc::now(),
        };
        assert!(!cell.is_high_demand());
        cell.total_appointments = 3;
        assert!(cell.is_high_demand());
        cell.total_appointments = 0;
        cell.source = "admin".to_string();
        assert!(cell.is_high_demand());
        cell.source = "auto".to_string();
        cell.high_demand_threshold = f64::INFINITY;
        cell.total_appointments = 1000;
        assert!(!cell.is_high_demand());
    }

    fn sample_user(attended: i32, missed: i32) -> User {
        User {
            id: 1,
            user_name: "Huda".to_string(),
            user_name_normalized: "huda".to_string(),
            display_name: None,
            phone: None,
            notify_channel_id: None,
            attended_count: attended,
            missed_count: missed,
            score: 0,
            category: "good".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
