//! Relationship and retrospective records.
//!
//! Dependencies are directed edges between items; retrospectives,
//! reminders, and commit links each reference a single item and are
//! removed by cascade when that item is hard-deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dependency edge type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    Blocks,
    RelatesTo,
    Duplicates,
    ParentOf,
}

impl DependencyType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Blocks => "blocks",
            Self::RelatesTo => "relates-to",
            Self::Duplicates => "duplicates",
            Self::ParentOf => "parent-of",
        }
    }

    /// Parse from string, defaulting to `Blocks` for unknown values.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "relates-to" | "relates_to" => Self::RelatesTo,
            "duplicates" => Self::Duplicates,
            "parent-of" | "parent_of" => Self::ParentOf,
            _ => Self::Blocks,
        }
    }

    /// Whether edges of this type participate in cycle rejection.
    ///
    /// `relates-to` and `duplicates` are annotations, not ordering
    /// constraints, so they may form cycles freely.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentOf)
    }
}

/// A directed dependency edge: `item_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub item_id: i64,
    pub depends_on_id: i64,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDependency {
    pub item_id: i64,
    pub depends_on_id: i64,
    pub dependency_type: DependencyType,
}

/// Retrospective outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Partial,
}

impl Outcome {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
        }
    }

    /// Parse from string, defaulting to `Partial` for unknown values.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "failure" => Self::Failure,
            _ => Self::Partial,
        }
    }
}

/// Retrospective data for a completed item. One per item; saving again
/// replaces the previous record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrospective {
    pub item_id: i64,
    pub outcome: Outcome,
    #[serde(default)]
    pub effort: Option<f64>,
    #[serde(default)]
    pub impact: Option<f64>,
    pub completed_at: DateTime<Utc>,
}

/// Input for saving a retrospective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRetrospective {
    pub item_id: i64,
    pub outcome: Outcome,
    #[serde(default)]
    pub effort: Option<f64>,
    #[serde(default)]
    pub impact: Option<f64>,
}

/// Reminder trigger kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Time,
    Dependency,
    FileChange,
    Activity,
}

impl TriggerType {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Dependency => "dependency",
            Self::FileChange => "file_change",
            Self::Activity => "activity",
        }
    }

    /// Parse from string, defaulting to `Time` for unknown values.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dependency" => Self::Dependency,
            "file_change" | "file-change" => Self::FileChange,
            "activity" => Self::Activity,
            _ => Self::Time,
        }
    }
}

/// A reminder attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub item_id: i64,
    pub trigger_type: TriggerType,
    /// Trigger-specific configuration, opaque to the store.
    #[serde(default)]
    pub trigger_config: Option<serde_json::Value>,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    /// Active means not dismissed and not currently snoozed.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.dismissed_at.is_none() && self.snoozed_until.is_none_or(|until| until <= now)
    }
}

/// Input for creating a reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReminder {
    pub item_id: i64,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Option<serde_json::Value>,
}

/// Partial update for a reminder. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderPatch {
    #[serde(default)]
    pub trigger_config: Option<serde_json::Value>,
    #[serde(default)]
    pub triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dismissed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
}

/// A version-control reference attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub item_id: i64,
    /// Commit hash, globally unique within a store.
    pub commit_hash: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub commit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_path: Option<String>,
    pub detected_at: DateTime<Utc>,
}

/// Input for creating a commit link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLink {
    pub item_id: i64,
    pub commit_hash: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub commit_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_type_structural() {
        assert!(DependencyType::Blocks.is_structural());
        assert!(DependencyType::ParentOf.is_structural());
        assert!(!DependencyType::RelatesTo.is_structural());
        assert!(!DependencyType::Duplicates.is_structural());
    }

    #[test]
    fn test_dependency_type_serde_kebab() {
        let json = serde_json::to_string(&DependencyType::ParentOf).unwrap();
        assert_eq!(json, "\"parent-of\"");
        let json = serde_json::to_string(&DependencyType::RelatesTo).unwrap();
        assert_eq!(json, "\"relates-to\"");
    }

    #[test]
    fn test_trigger_type_snake_case() {
        let json = serde_json::to_string(&TriggerType::FileChange).unwrap();
        assert_eq!(json, "\"file_change\"");
    }

    #[test]
    fn test_reminder_active_states() {
        let now = Utc::now();
        let mut reminder = Reminder {
            id: 1,
            item_id: 1,
            trigger_type: TriggerType::Time,
            trigger_config: None,
            triggered_at: None,
            dismissed_at: None,
            snoozed_until: None,
            created_at: now,
        };
        assert!(reminder.is_active(now));

        // Snoozed into the future: inactive until the snooze passes.
        reminder.snoozed_until = Some(now + chrono::Duration::hours(1));
        assert!(!reminder.is_active(now));
        assert!(reminder.is_active(now + chrono::Duration::hours(2)));

        reminder.snoozed_until = None;
        reminder.dismissed_at = Some(now);
        assert!(!reminder.is_active(now));
    }
}
