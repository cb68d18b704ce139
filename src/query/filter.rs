//! Filter predicates for item queries.
//!
//! One optional predicate per field; the struct shape itself enforces the
//! one-operator-per-field rule, and set fields combine with AND.
//! Substring tests are case-insensitive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Item, ItemStatus, Priority};

/// Predicate over an enum-valued field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarPred<T> {
    Eq(T),
    Ne(T),
    In(Vec<T>),
}

impl<T: PartialEq> ScalarPred<T> {
    fn matches(&self, value: &T) -> bool {
        match self {
            Self::Eq(want) => value == want,
            Self::Ne(want) => value != want,
            Self::In(set) => set.contains(value),
        }
    }
}

/// Predicate over a string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextPred {
    Eq(String),
    Ne(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
}

impl TextPred {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Eq(want) => value == want,
            Self::Ne(want) => value != want,
            Self::Contains(needle) => value.to_lowercase().contains(&needle.to_lowercase()),
            Self::StartsWith(prefix) => value.to_lowercase().starts_with(&prefix.to_lowercase()),
            Self::EndsWith(suffix) => value.to_lowercase().ends_with(&suffix.to_lowercase()),
        }
    }
}

/// Inclusive timestamp range. Both bounds optional; together they form a
/// single range predicate, not two operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub gte: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lte: Option<DateTime<Utc>>,
}

impl DateRange {
    fn matches(&self, value: DateTime<Utc>) -> bool {
        self.gte.is_none_or(|min| value >= min) && self.lte.is_none_or(|max| value <= max)
    }
}

/// Filter over items. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    #[serde(default)]
    pub status: Option<ScalarPred<ItemStatus>>,
    #[serde(default)]
    pub priority: Option<ScalarPred<Priority>>,
    #[serde(default)]
    pub decision: Option<TextPred>,
    #[serde(default)]
    pub context: Option<TextPred>,
    #[serde(default)]
    pub conversation_ref: Option<TextPred>,
    #[serde(default)]
    pub created_at: Option<DateRange>,
    #[serde(default)]
    pub updated_at: Option<DateRange>,
    /// Matches items whose tag set contains this tag exactly.
    #[serde(default)]
    pub has_tag: Option<String>,
}

impl ItemFilter {
    /// Whether no predicates are set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.priority.is_none()
            && self.decision.is_none()
            && self.context.is_none()
            && self.conversation_ref.is_none()
            && self.created_at.is_none()
            && self.updated_at.is_none()
            && self.has_tag.is_none()
    }

    /// Evaluate the filter against one item. All set predicates must hold.
    #[must_use]
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(pred) = &self.status {
            if !pred.matches(&item.status) {
                return false;
            }
        }
        if let Some(pred) = &self.priority {
            if !pred.matches(&item.priority) {
                return false;
            }
        }
        if let Some(pred) = &self.decision {
            if !pred.matches(&item.decision) {
                return false;
            }
        }
        if let Some(pred) = &self.context {
            if !pred.matches(&item.context) {
                return false;
            }
        }
        if let Some(pred) = &self.conversation_ref {
            match &item.conversation_ref {
                Some(value) => {
                    if !pred.matches(value) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(range) = &self.created_at {
            if !range.matches(item.created_at) {
                return false;
            }
        }
        if let Some(range) = &self.updated_at {
            if !range.matches(item.updated_at) {
                return false;
            }
        }
        if let Some(tag) = &self.has_tag {
            if !item.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewItem;

    fn item(decision: &str, priority: Priority, tags: &[&str]) -> Item {
        NewItem {
            decision: decision.into(),
            context: "ctx".into(),
            priority: Some(priority),
            tags: Some(tags.iter().map(ToString::to_string).collect()),
            ..NewItem::default()
        }
        .into_item(1, Utc::now())
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ItemFilter::default();
        assert!(filter.matches(&item("anything", Priority::Low, &[])));
    }

    #[test]
    fn test_priority_eq() {
        let filter = ItemFilter {
            priority: Some(ScalarPred::Eq(Priority::High)),
            ..ItemFilter::default()
        };
        assert!(filter.matches(&item("a", Priority::High, &[])));
        assert!(!filter.matches(&item("a", Priority::Medium, &[])));
        assert!(!filter.matches(&item("a", Priority::Low, &[])));
    }

    #[test]
    fn test_status_in() {
        let filter = ItemFilter {
            status: Some(ScalarPred::In(vec![
                ItemStatus::Pending,
                ItemStatus::InProgress,
            ])),
            ..ItemFilter::default()
        };
        let mut it = item("a", Priority::Medium, &[]);
        assert!(filter.matches(&it));
        it.status = ItemStatus::Done;
        assert!(!filter.matches(&it));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let filter = ItemFilter {
            decision: Some(TextPred::Contains("SQLite".into())),
            ..ItemFilter::default()
        };
        assert!(filter.matches(&item("adopt sqlite backend", Priority::Low, &[])));
        assert!(!filter.matches(&item("adopt postgres", Priority::Low, &[])));
    }

    #[test]
    fn test_starts_and_ends_with() {
        let starts = ItemFilter {
            decision: Some(TextPred::StartsWith("Adopt".into())),
            ..ItemFilter::default()
        };
        let ends = ItemFilter {
            decision: Some(TextPred::EndsWith("BACKEND".into())),
            ..ItemFilter::default()
        };
        let it = item("adopt sqlite backend", Priority::Low, &[]);
        assert!(starts.matches(&it));
        assert!(ends.matches(&it));
    }

    #[test]
    fn test_has_tag_is_exact() {
        let filter = ItemFilter {
            has_tag: Some("infra".into()),
            ..ItemFilter::default()
        };
        assert!(filter.matches(&item("a", Priority::Low, &["infra", "db"])));
        assert!(!filter.matches(&item("a", Priority::Low, &["infrastructure"])));
    }

    #[test]
    fn test_fields_combine_with_and() {
        let filter = ItemFilter {
            priority: Some(ScalarPred::Eq(Priority::High)),
            has_tag: Some("db".into()),
            ..ItemFilter::default()
        };
        assert!(filter.matches(&item("a", Priority::High, &["db"])));
        assert!(!filter.matches(&item("a", Priority::High, &["infra"])));
        assert!(!filter.matches(&item("a", Priority::Low, &["db"])));
    }

    #[test]
    fn test_missing_conversation_ref_never_matches() {
        let filter = ItemFilter {
            conversation_ref: Some(TextPred::Contains("conv".into())),
            ..ItemFilter::default()
        };
        assert!(!filter.matches(&item("a", Priority::Low, &[])));
    }

    #[test]
    fn test_date_range_bounds_inclusive() {
        let it = item("a", Priority::Low, &[]);
        let filter = ItemFilter {
            created_at: Some(DateRange {
                gte: Some(it.created_at),
                lte: Some(it.created_at),
            }),
            ..ItemFilter::default()
        };
        assert!(filter.matches(&it));
    }
}
