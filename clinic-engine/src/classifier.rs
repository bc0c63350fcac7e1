//! Behavior classification: pure functions of a user's attendance counters.

use clinic_core::types::{MessageCategory, UserCategory};

/// Below this many resolved appointments the stored category is kept as-is.
pub const MIN_MARKS_FOR_CLASSIFICATION: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceOutcome {
    Attended,
    Missed,
}

/// Re-derives the behavior class after an attendance update. With fewer
/// than three resolved appointments the current class stands.
pub fn classify(attended: i32, missed: i32, current: UserCategory) -> UserCategory {
    let total = attended + missed;
    if total < MIN_MARKS_FOR_CLASSIFICATION {
        return current;
    }
    let rate = 100.0 * attended as f64 / total as f64;
    if rate >= 80.0 {
        UserCategory::VeryGood
    } else if rate >= 60.0 {
        UserCategory::Good
    } else {
        UserCategory::AtRisk
    }
}

/// Hours before the appointment at which nudges fire, most distant first.
pub fn lead_hours(category: UserCategory) -> &'static [i64] {
    match category {
        UserCategory::VeryGood => &[24],
        UserCategory::Good => &[24, 2],
        UserCategory::AtRisk => &[48, 6, 1],
    }
}

pub fn message_category(category: UserCategory) -> MessageCategory {
    match category {
        UserCategory::VeryGood => MessageCategory::PositiveNudge,
        UserCategory::Good => MessageCategory::DefaultNudge,
        UserCategory::AtRisk => MessageCategory::Reengagement,
    }
}

/// Score never goes below zero.
pub fn score_after(score: i32, outcome: AttendanceOutcome) -> i32 {
    match outcome {
        AttendanceOutcome::Attended => score + 10,
        AttendanceOutcome::Missed => (score - 5).max(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_three_marks_keeps_current_category() {
        assert_eq!(classify(2, 0, UserCategory::AtRisk), UserCategory::AtRisk);
        assert_eq!(classify(1, 1, UserCategory::Good), UserCategory::Good);
    }

    #[test]
    fn rate_boundaries() {
        // 3/1 = 75% -> Good
        assert_eq!(classify(3, 1, UserCategory::Good), UserCategory::Good);
        // 4/1 = 80% -> VeryGood
        assert_eq!(classify(4, 1, UserCategory::Good), UserCategory::VeryGood);
        // 3/2 = 60% -> Good
        assert_eq!(classify(3, 2, UserCategory::Good), UserCategory::Good);
        // 1/2 ≈ 33% -> AtRisk
        assert_eq!(classify(1, 2, UserCategory::Good), UserCategory::AtRisk);
    }

    #[test]
    fn category_transition_sequence() {
        // attended=2, missed=1: 66.6% with three marks -> Good
        let mut category = classify(2, 1, UserCategory::Good);
        assert_eq!(category, UserCategory::Good);
        // one more attended: 3/1 = 75% stays Good
        category = classify(3, 1, category);
        assert_eq!(category, UserCategory::Good);
        // next attended: 4/1 = 80% -> VeryGood
        category = classify(4, 1, category);
        assert_eq!(category, UserCategory::VeryGood);
    }

    #[test]
    fn reminder_plans_by_class() {
        assert_eq!(lead_hours(UserCategory::VeryGood), &[24]);
        assert_eq!(lead_hours(UserCategory::Good), &[24, 2]);
        assert_eq!(lead_hours(UserCategory::AtRisk), &[48, 6, 1]);
    }

    #[test]
    fn score_clamps_at_zero() {
        assert_eq!(score_after(0, AttendanceOutcome::Missed), 0);
        assert_eq!(score_after(3, AttendanceOutcome::Missed), 0);
        assert_eq!(score_after(7, AttendanceOutcome::Missed), 2);
        assert_eq!(score_after(7, AttendanceOutcome::Attended), 17);
    }

    #[test]
    fn message_category_mapping() {
        assert_eq!(message_category(UserCategory::VeryGood), MessageCategory::PositiveNudge);
        assert_eq!(message_category(UserCategory::Good), MessageCategory::DefaultNudge);
        assert_eq!(message_category(UserCategory::AtRisk), MessageCategory::Reengagement);
    }
}
