use std::collections::BTreeSet;

use chrono::{Datelike, Timelike, Weekday};

use crate::workflows::royalty::domain::{normalize_key, ArticleSnapshot, AuthorRef};
use crate::workflows::royalty::rules::MultiplierType;

/// Attribute sets a multiplier key can match, derived from one article.
#[derive(Debug, Clone, Default)]
pub(crate) struct ArticleAttributes {
    flags: BTreeSet<String>,
    tags: BTreeSet<String>,
    category: BTreeSet<String>,
    author_type: BTreeSet<String>,
    calendar: BTreeSet<String>,
}

impl ArticleAttributes {
    pub(crate) fn derive(article: &ArticleSnapshot, author: &AuthorRef) -> Self {
        let collect = |values: &[String]| {
            values
                .iter()
                .map(|value| normalize_key(value))
                .filter(|value| !value.is_empty())
                .collect::<BTreeSet<_>>()
        };

        let category = article
            .category_id
            .iter()
            .map(|category| normalize_key(&category.0))
            .collect();

        Self {
            flags: collect(&article.flags),
            tags: collect(&article.tags),
            category,
            author_type: BTreeSet::from([normalize_key(&author.author_type)]),
            calendar: calendar_keys(article),
        }
    }

    pub(crate) fn matches(&self, kind: MultiplierType, key: &str) -> bool {
        let set = match kind {
            MultiplierType::Flag => &self.flags,
            MultiplierType::Tag => &self.tags,
            MultiplierType::Category => &self.category,
            MultiplierType::AuthorType => &self.author_type,
            MultiplierType::Calendar => &self.calendar,
        };
        set.contains(&normalize_key(key))
    }
}

/// Weekday name, `WEEKEND`/`WEEKDAY`, and `NIGHT` for 22:00-05:59, all in UTC.
fn calendar_keys(article: &ArticleSnapshot) -> BTreeSet<String> {
    let published = article.published_at;
    let weekday = published.weekday();
    let mut keys = BTreeSet::new();

    keys.insert(weekday_name(weekday).to_string());
    if matches!(weekday, Weekday::Sat | Weekday::Sun) {
        keys.insert("WEEKEND".to_string());
    } else {
        keys.insert("WEEKDAY".to_string());
    }

    let hour = published.hour();
    if hour >= 22 || hour < 6 {
        keys.insert("NIGHT".to_string());
    }
    keys
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::workflows::royalty::domain::{ArticleId, AuthorId, CategoryId};

    fn published_at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, day, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    fn article(published_at: DateTime<Utc>) -> ArticleSnapshot {
        ArticleSnapshot {
            article_id: ArticleId("a-1".to_string()),
            article_type: "NEWS".to_string(),
            word_count: 700,
            category_id: Some(CategoryId(" politics ".to_string())),
            published_at,
            tags: vec!["Election".to_string(), "  ".to_string()],
            flags: vec!["exclusive".to_string()],
            media: Vec::new(),
            currency: None,
            bonus_amount: None,
            manual_base_amount: None,
        }
    }

    fn author(author_type: &str) -> AuthorRef {
        AuthorRef {
            author_id: AuthorId("writer-1".to_string()),
            author_type: author_type.to_string(),
            email: "writer-1@newsroom.test".to_string(),
        }
    }

    fn attributes_at(published_at: DateTime<Utc>) -> ArticleAttributes {
        ArticleAttributes::derive(&article(published_at), &author("STAFF"))
    }

    #[test]
    fn each_type_matches_only_its_own_attribute_set() {
        let attributes =
            ArticleAttributes::derive(&article(published_at(2, 10, 0)), &author("freelance"));

        assert!(attributes.matches(MultiplierType::Flag, "EXCLUSIVE"));
        assert!(attributes.matches(MultiplierType::Tag, "election"));
        assert!(attributes.matches(MultiplierType::Category, "POLITICS"));
        assert!(attributes.matches(MultiplierType::AuthorType, " Freelance "));

        assert!(!attributes.matches(MultiplierType::Tag, "EXCLUSIVE"));
        assert!(!attributes.matches(MultiplierType::Flag, "ELECTION"));
        assert!(!attributes.matches(MultiplierType::AuthorType, "STAFF"));
        assert!(!attributes.matches(MultiplierType::Category, "SPORTS"));
        assert!(!attributes.matches(MultiplierType::Tag, ""));
    }

    #[test]
    fn missing_category_matches_nothing() {
        let mut uncategorised = article(published_at(2, 10, 0));
        uncategorised.category_id = None;
        let attributes = ArticleAttributes::derive(&uncategorised, &author("STAFF"));

        assert!(!attributes.matches(MultiplierType::Category, "POLITICS"));
        assert!(!attributes.matches(MultiplierType::Category, ""));
    }

    #[test]
    fn weekday_names_and_weekend_split() {
        let monday = attributes_at(published_at(2, 10, 0));
        assert!(monday.matches(MultiplierType::Calendar, "MONDAY"));
        assert!(monday.matches(MultiplierType::Calendar, "weekday"));
        assert!(!monday.matches(MultiplierType::Calendar, "WEEKEND"));
        assert!(!monday.matches(MultiplierType::Calendar, "TUESDAY"));

        let friday = attributes_at(published_at(6, 12, 0));
        assert!(friday.matches(MultiplierType::Calendar, "FRIDAY"));
        assert!(friday.matches(MultiplierType::Calendar, "WEEKDAY"));

        let saturday = attributes_at(published_at(7, 12, 0));
        assert!(saturday.matches(MultiplierType::Calendar, "SATURDAY"));
        assert!(saturday.matches(MultiplierType::Calendar, "WEEKEND"));
        assert!(!saturday.matches(MultiplierType::Calendar, "WEEKDAY"));

        let sunday = attributes_at(published_at(8, 12, 0));
        assert!(sunday.matches(MultiplierType::Calendar, "SUNDAY"));
        assert!(sunday.matches(MultiplierType::Calendar, "WEEKEND"));
    }

    #[test]
    fn night_window_runs_from_22_to_just_before_6() {
        let night = |hour, minute| {
            attributes_at(published_at(2, hour, minute)).matches(MultiplierType::Calendar, "NIGHT")
        };

        assert!(night(0, 0));
        assert!(night(5, 59));
        assert!(!night(6, 0));
        assert!(!night(12, 0));
        assert!(!night(21, 59));
        assert!(night(22, 0));
        assert!(night(23, 59));
    }
}
