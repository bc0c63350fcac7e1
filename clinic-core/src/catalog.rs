use chrono::DateTime;
use chrono_tz::Tz;
use rand::seq::SliceRandom;
use std::collections::HashSet;

use crate::error::ClinicError;
use crate::repo::Repository;
use crate::types::{MessageCategory, User};

/// Category-keyed template pool. Uniqueness of picked templates is scoped
/// to a single appointment: callers carry the used-set (derived from the
/// appointment's rendered reminders) across picks.
#[derive(Clone)]
pub struct MessageCatalog {
    repo: Repository,
}

impl MessageCatalog {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn pick_unique(
        &self,
        category: MessageCategory,
        used: &mut HashSet<String>,
    ) -> Result<String, ClinicError> {
        let pool: Vec<String> = self
            .repo
            .messages_for(category.as_str())
            .await?
            .into_iter()
            .map(|m| m.text)
            .collect();
        let picked = pick_from(&pool, used, category)?.to_string();
        used.insert(picked.clone());
        Ok(picked)
    }
}

fn pick_from<'a>(
    pool: &'a [String],
    used: &HashSet<String>,
    category: MessageCategory,
) -> Result<&'a String, ClinicError> {
    if pool.is_empty() {
        return Err(ClinicError::EmptyCategory(category.as_str().to_string()));
    }
    let remaining: Vec<&String> = pool.iter().filter(|text| !used.contains(*text)).collect();
    remaining
        .choose(&mut rand::thread_rng())
        .copied()
        .ok_or(ClinicError::ExhaustedPool)
}

/// Substitutes the literal `name` token with the user's preferred name.
pub fn personalize(template: &str, user: &User) -> String {
    template.replace("name", user.salutation())
}

/// Standard header carried by every nudge.
pub fn visit_header(clinic_name: &str, doctor: &str, starts_at: DateTime<Tz>) -> String {
    format!(
        "{}: appointment with {} on {}",
        clinic_name,
        doctor,
        starts_at.format("%A %d %B %Y at %H:%M")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn pool(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn empty_pool_is_an_error() {
        let err = pick_from(&[], &HashSet::new(), MessageCategory::DefaultNudge).unwrap_err();
        assert!(matches!(err, ClinicError::EmptyCategory(_)));
    }

    #[test]
    fn exhausted_pool_is_an_error() {
        let pool = pool(&["a", "b"]);
        let used: HashSet<String> = pool.iter().cloned().collect();
        let err = pick_from(&pool, &used, MessageCategory::DefaultNudge).unwrap_err();
        assert!(matches!(err, ClinicError::ExhaustedPool));
    }

    #[test]
    fn picks_only_unused_templates() {
        let pool = pool(&["a", "b", "c"]);
        let mut used = HashSet::new();
        used.insert("a".to_string());
        used.insert("c".to_string());
        for _ in 0..20 {
            let picked = pick_from(&pool, &used, MessageCategory::DefaultNudge).unwrap();
            assert_eq!(picked, "b");
        }
    }

    #[test]
    fn personalize_substitutes_token() {
        let user = User {
            id: 1,
            user_name: "huda".to_string(),
            user_name_normalized: "huda".to_string(),
            display_name: Some("Huda".to_string()),
            phone: None,
            notify_channel_id: None,
            attended_count: 0,
            missed_count: 0,
            score: 0,
            category: "good".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(personalize("Hi name, see you soon", &user), "Hi Huda, see you soon");
    }

    #[test]
    fn header_formats_local_time() {
        let starts = Utc
            .with_ymd_and_hms(2025, 10, 7, 6, 30, 0)
            .unwrap()
            .with_timezone(&chrono_tz::Asia::Riyadh);
        let header = visit_header("The Clinic", "Dr. Sara", starts);
        assert!(header.contains("Dr. Sara"));
        assert!(header.contains("09:30"));
    }
}
