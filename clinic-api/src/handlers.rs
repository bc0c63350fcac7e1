use axum::{
    extract::{Extension, Path, Query},
    response::Json,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};

use clinic_booking::{AttendanceService, BookingService};
use clinic_core::error::ClinicError;
use clinic_core::types::{AppointmentStatus, User, UserCategory};
use clinic_core::ClinicContext;
use clinic_engine::demand::DemandEngine;
use clinic_notify::{Notifier, TelegramUpdate};

use crate::error::ApiError;

#[derive(Clone)]
pub struct ApiState {
    pub ctx: ClinicContext,
    pub booking: BookingService,
    pub attendance: AttendanceService,
    pub engine: DemandEngine,
    pub notifier: Notifier,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "clinic-api"
    }))
}

// ─── Appointments ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAppointmentsRequest {
    pub doctor_name: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub start_hour: u32,
    #[serde(default)]
    pub start_minute: u32,
    pub end_hour: Option<u32>,
    #[serde(default)]
    pub end_minute: u32,
    pub interval_minutes: Option<i64>,
}

/// Expands an add request into concrete slot instants: a single slot, one
/// slot per day, or an interval grid per day.
fn expand_slots(req: &AddAppointmentsRequest, tz: Tz) -> Result<Vec<DateTime<Utc>>, ClinicError> {
    if req.doctor_name.trim().is_empty() {
        return Err(ClinicError::Validation("doctorName is required".to_string()));
    }
    if req.start_hour > 23 || req.start_minute > 59 || req.end_minute > 59 {
        return Err(ClinicError::Validation("invalid start time".to_string()));
    }
    if let Some(end_hour) = req.end_hour {
        if end_hour > 23 {
            return Err(ClinicError::Validation("invalid endHour".to_string()));
        }
    }
    let end_date = req.end_date.unwrap_or(req.start_date);
    if end_date < req.start_date {
        return Err(ClinicError::Validation(
            "endDate must not precede startDate".to_string(),
        ));
    }
    let interval = req.interval_minutes.unwrap_or(60);
    if interval <= 0 {
        return Err(ClinicError::Validation(
            "intervalMinutes must be positive".to_string(),
        ));
    }

    let to_utc = |naive: chrono::NaiveDateTime| -> Result<DateTime<Utc>, ClinicError> {
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| ClinicError::Validation("time does not exist in clinic zone".to_string()))
    };

    let mut slots = Vec::new();
    let mut day = req.start_date;
    while day <= end_date {
        let start = day
            .and_hms_opt(req.start_hour, req.start_minute, 0)
            .ok_or_else(|| ClinicError::Validation("invalid start time".to_string()))?;
        match req.end_hour {
            None => slots.push(to_utc(start)?),
            Some(end_hour) => {
                let end = day
                    .and_hms_opt(end_hour, req.end_minute, 0)
                    .ok_or_else(|| ClinicError::Validation("invalid end time".to_string()))?;
                if end < start {
                    return Err(ClinicError::Validation(
                        "end time must not precede start time".to_string(),
                    ));
                }
                let mut cursor = start;
                while cursor <= end {
                    slots.push(to_utc(cursor)?);
                    cursor += Duration::minutes(interval);
                }
            }
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    Ok(slots)
}

pub async fn add_appointments(
    Extension(state): Extension<ApiState>,
    Json(req): Json<AddAppointmentsRequest>,
) -> Result<Json<Value>, ApiError> {
    let slots = expand_slots(&req, state.ctx.clock.tz())?;
    let created = state
        .ctx
        .repo()
        .create_appointments(req.doctor_name.trim(), &slots, state.ctx.clock.now_utc())
        .await?;
    tracing::info!("Created {} slots for {}", created, req.doctor_name.trim());
    Ok(Json(json!({ "created": created })))
}

pub async fn delete_appointment(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    state.booking.disarm_appointment_jobs(id).await?;
    if !state.ctx.repo().delete_appointment(id).await? {
        return Err(ClinicError::NotFound.into());
    }
    Ok(Json(json!({ "deleted": true })))
}

pub async fn available_appointments(
    Extension(state): Extension<ApiState>,
) -> Result<Json<Value>, ApiError> {
    let slots = state
        .ctx
        .repo()
        .list_appointments(Some(AppointmentStatus::Available))
        .await?;
    Ok(Json(json!({ "slots": slots })))
}

pub async fn booked_appointments(
    Extension(state): Extension<ApiState>,
) -> Result<Json<Value>, ApiError> {
    let appointments = state
        .ctx
        .repo()
        .list_appointments(Some(AppointmentStatus::Booked))
        .await?;
    Ok(Json(json!({ "appointments": appointments })))
}

pub async fn all_appointments(
    Extension(state): Extension<ApiState>,
) -> Result<Json<Value>, ApiError> {
    let appointments = state.ctx.repo().list_appointments(None).await?;
    Ok(Json(json!({ "appointments": appointments })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookRequest {
    pub user_name: String,
    pub phone: Option<String>,
}

pub async fn book_appointment(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
    Json(req): Json<BookRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.user_name.trim().is_empty() {
        return Err(ClinicError::Validation("userName is required".to_string()).into());
    }
    let outcome = state
        .booking
        .book(id, req.user_name.trim(), req.phone.as_deref())
        .await?;
    Ok(Json(json!({
        "appointment": outcome.appointment,
        "instantMessage": outcome.instant_message,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

pub async fn set_appointment_status(
    Extension(state): Extension<ApiState>,
    Path(id): Path<i64>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = AppointmentStatus::parse(&req.status)
        .filter(|s| s.is_terminal())
        .ok_or_else(|| {
            ClinicError::Validation("status must be 'attended' or 'missed'".to_string())
        })?;
    let appointment = state.attendance.set_status(id, status).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

// ─── Users ───────────────────────────────────────────────────

fn user_summary(user: &User, admin: bool) -> Value {
    let mut summary = json!({
        "userName": user.user_name,
        "displayName": user.display_name,
        "phone": user.phone,
    });
    if admin {
        summary["attendedCount"] = json!(user.attended_count);
        summary["missedCount"] = json!(user.missed_count);
        summary["attendanceRate"] = json!(user.attendance_rate());
        summary["score"] = json!(user.score);
        summary["category"] = json!(user.category().display());
        summary["channelLinked"] = json!(user.notify_channel_id.is_some());
    }
    summary
}

#[derive(Debug, Deserialize)]
pub struct UserViewQuery {
    pub view: Option<String>,
}

pub async fn get_user(
    Extension(state): Extension<ApiState>,
    Path(user_name): Path<String>,
    Query(query): Query<UserViewQuery>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .ctx
        .repo()
        .find_user_by_name(&user_name)
        .await?
        .ok_or(ClinicError::UserNotRegistered)?;
    let admin = query.view.as_deref() == Some("admin");
    Ok(Json(user_summary(&user, admin)))
}

pub async fn list_users(Extension(state): Extension<ApiState>) -> Result<Json<Value>, ApiError> {
    let users = state.ctx.repo().list_users().await?;
    let summaries: Vec<Value> = users.iter().map(|u| user_summary(u, true)).collect();
    Ok(Json(json!({ "users": summaries })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub user_name: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

pub async fn register_user(
    Extension(state): Extension<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.user_name.trim().is_empty() {
        return Err(ClinicError::Validation("userName is required".to_string()).into());
    }
    let user = state
        .ctx
        .repo()
        .upsert_user(
            req.user_name.trim(),
            req.display_name.as_deref(),
            req.phone.as_deref(),
            state.ctx.clock.now_utc(),
        )
        .await?;
    Ok(Json(user_summary(&user, false)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCategoryRequest {
    pub user_name: String,
    pub category: String,
}

pub async fn set_category(
    Extension(state): Extension<ApiState>,
    Json(req): Json<SetCategoryRequest>,
) -> Result<Json<Value>, ApiError> {
    let category = UserCategory::parse(&req.category).ok_or_else(|| {
        ClinicError::Validation("category must be Good, Very Good or At-Risk".to_string())
    })?;
    let updated = state
        .ctx
        .repo()
        .set_user_category(&req.user_name, category, state.ctx.clock.now_utc())
        .await?;
    if !updated {
        return Err(ClinicError::UserNotRegistered.into());
    }
    Ok(Json(json!({ "userName": req.user_name, "category": category.display() })))
}

// ─── High-demand administration ──────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighDemandSetupRequest {
    pub doctor_name: String,
    pub year: i32,
    pub month: i32,
    pub hours: Vec<i32>,
    pub high_demand_threshold: Option<f64>,
}

pub async fn setup_high_demand(
    Extension(state): Extension<ApiState>,
    Json(req): Json<HighDemandSetupRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.doctor_name.trim().is_empty() {
        return Err(ClinicError::Validation("doctorName is required".to_string()).into());
    }
    if !(1..=12).contains(&req.month) {
        return Err(ClinicError::Validation("month must be 1-12".to_string()).into());
    }
    if req.hours.iter().any(|h| !(0..=23).contains(h)) {
        return Err(ClinicError::Validation("hours must be 0-23".to_string()).into());
    }
    let threshold = req.high_demand_threshold.unwrap_or(3.0);
    state
        .engine
        .set_baseline(req.doctor_name.trim(), req.year, req.month, &req.hours, threshold)
        .await?;
    Ok(Json(json!({
        "doctorName": req.doctor_name.trim(),
        "year": req.year,
        "month": req.month,
        "hours": req.hours,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighDemandQuery {
    pub doctor_name: String,
    pub year: i32,
    pub month: i32,
}

pub async fn get_high_demand(
    Extension(state): Extension<ApiState>,
    Query(query): Query<HighDemandQuery>,
) -> Result<Json<Value>, ApiError> {
    let cells = state
        .ctx
        .repo()
        .list_demand_cells_for_month(&query.doctor_name, query.year, query.month)
        .await?;
    let mut high_demand_hours: Vec<i32> = cells
        .iter()
        .filter(|cell| cell.is_high_demand())
        .map(|cell| cell.hour)
        .collect();
    high_demand_hours.sort_unstable();
    high_demand_hours.dedup();
    Ok(Json(json!({
        "cells": cells,
        "summary": {
            "totalSlots": cells.len(),
            "highDemandHours": high_demand_hours,
        }
    })))
}

// ─── Messenger webhook ───────────────────────────────────────

/// Always answers 200: a webhook retry storm helps nobody.
pub async fn webhook(Extension(state): Extension<ApiState>, body: String) -> Json<Value> {
    match serde_json::from_str::<TelegramUpdate>(&body) {
        Ok(update) => {
            if let Err(e) = link_from_update(&state, update).await {
                tracing::warn!("Webhook processing failed: {}", e);
            }
        }
        Err(e) => tracing::debug!("Ignoring unrecognized webhook payload: {}", e),
    }
    Json(json!({ "ok": true }))
}

async fn link_from_update(state: &ApiState, update: TelegramUpdate) -> Result<(), ClinicError> {
    let Some(message) = update.message else {
        return Ok(());
    };
    let Some(text) = message.text else {
        return Ok(());
    };
    let chat_id = message.chat.id.to_string();
    let candidate = text.trim().trim_start_matches("/start").trim();
    if candidate.is_empty() {
        state
            .notifier
            .send_chat(&chat_id, "Send your username to link appointment reminders.")
            .await;
        return Ok(());
    }
    match state.ctx.repo().find_user_by_name(candidate).await? {
        Some(user) => {
            state
                .ctx
                .repo()
                .link_notify_channel(&user.user_name, &chat_id, state.ctx.clock.now_utc())
                .await?;
            tracing::info!("Linked chat {} to user {}", chat_id, user.user_name);
            state
                .notifier
                .send_chat(
                    &chat_id,
                    &format!("Linked! Reminders for {} will arrive here.", user.salutation()),
                )
                .await;
        }
        None => {
            state
                .notifier
                .send_chat(&chat_id, "No registration found under that username.")
                .await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIYADH: Tz = chrono_tz::Asia::Riyadh;

    fn base_request() -> AddAppointmentsRequest {
        AddAppointmentsRequest {
            doctor_name: "Dr. Sara".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 10, 7).unwrap(),
            end_date: None,
            start_hour: 9,
            start_minute: 0,
            end_hour: None,
            end_minute: 0,
            interval_minutes: None,
        }
    }

    #[test]
    fn single_slot_when_no_end() {
        let slots = expand_slots(&base_request(), RIYADH).unwrap();
        assert_eq!(slots.len(), 1);
        // 09:00 Riyadh is 06:00 UTC
        assert_eq!(slots[0], Utc.with_ymd_and_hms(2025, 10, 7, 6, 0, 0).unwrap());
    }

    #[test]
    fn one_slot_per_day_over_a_range() {
        let mut req = base_request();
        req.end_date = NaiveDate::from_ymd_opt(2025, 10, 9);
        let slots = expand_slots(&req, RIYADH).unwrap();
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn interval_grid_within_a_day() {
        let mut req = base_request();
        req.end_hour = Some(11);
        req.interval_minutes = Some(30);
        let slots = expand_slots(&req, RIYADH).unwrap();
        // 9:00 through 11:00 inclusive at 30-minute steps
        assert_eq!(slots.len(), 5);
    }

    #[test]
    fn grid_over_multiple_days() {
        let mut req = base_request();
        req.end_date = NaiveDate::from_ymd_opt(2025, 10, 8);
        req.end_hour = Some(10);
        let slots = expand_slots(&req, RIYADH).unwrap();
        // two days, hours 9 and 10 each
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn reversed_dates_are_rejected() {
        let mut req = base_request();
        req.end_date = NaiveDate::from_ymd_opt(2025, 10, 1);
        assert!(matches!(
            expand_slots(&req, RIYADH),
            Err(ClinicError::Validation(_))
        ));
    }

    #[test]
    fn empty_doctor_is_rejected() {
        let mut req = base_request();
        req.doctor_name = "  ".to_string();
        assert!(matches!(
            expand_slots(&req, RIYADH),
            Err(ClinicError::Validation(_))
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut req = base_request();
        req.end_hour = Some(11);
        req.interval_minutes = Some(0);
        assert!(matches!(
            expand_slots(&req, RIYADH),
            Err(ClinicError::Validation(_))
        ));
    }
}
