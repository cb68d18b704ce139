//! Item model for docket.
//!
//! An item is one recorded decision or task. Items are created by the
//! store (which assigns the id and stamps both timestamps), mutated in
//! place by updates, and only ever leave the store through a hard delete —
//! soft deletion flips the status to `archived` and nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Archived,
}

impl ItemStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }

    /// Parse from string, defaulting to `Pending` for unknown values.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "in-progress" | "in_progress" => Self::InProgress,
            "done" => Self::Done,
            "archived" => Self::Archived,
            _ => Self::Pending,
        }
    }

    /// Domain sort rank: in-progress > pending > done > archived.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::InProgress => 3,
            Self::Pending => 2,
            Self::Done => 1,
            Self::Archived => 0,
        }
    }

    /// Whether this status counts as resolved for blocking purposes.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Done | Self::Archived)
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse from string, defaulting to `Medium` for unknown values.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    /// Domain sort rank: high > medium > low.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// A recorded decision or task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Store-assigned identifier, positive and immutable.
    pub id: i64,

    /// The decision or task statement.
    pub decision: String,

    /// Surrounding context for the decision.
    pub context: String,

    /// Lifecycle status.
    #[serde(default)]
    pub status: ItemStatus,

    /// Ordered tag set. The store does not deduplicate.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Priority.
    #[serde(default)]
    pub priority: Priority,

    /// Optional reference to the conversation the item came from.
    #[serde(default)]
    pub conversation_ref: Option<String>,

    /// Denormalized dependency target ids. The authoritative relation is
    /// the Dependency entity; this field is a read convenience.
    #[serde(default)]
    pub dependencies: Vec<i64>,

    /// Opaque PII-scrubbing metadata, passed through untouched.
    #[serde(default)]
    pub pii_metadata: Option<serde_json::Value>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last-update timestamp. Always >= `created_at`.
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Apply a patch in place, refreshing `updated_at`.
    ///
    /// Only fields present in the patch are changed.
    pub fn apply(&mut self, patch: &ItemPatch, now: DateTime<Utc>) {
        if let Some(decision) = &patch.decision {
            self.decision = decision.clone();
        }
        if let Some(context) = &patch.context {
            self.context = context.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(conversation_ref) = &patch.conversation_ref {
            self.conversation_ref = Some(conversation_ref.clone());
        }
        if let Some(dependencies) = &patch.dependencies {
            self.dependencies = dependencies.clone();
        }
        if let Some(pii) = &patch.pii_metadata {
            self.pii_metadata = Some(pii.clone());
        }
        self.updated_at = now;
    }
}

/// Input for creating an item.
///
/// Omitted fields take store defaults: status `pending`, priority
/// `medium`, empty tag set. The caller never supplies an id or
/// timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
    pub decision: String,
    pub context: String,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub conversation_ref: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<i64>>,
    #[serde(default)]
    pub pii_metadata: Option<serde_json::Value>,
}

impl NewItem {
    /// Materialize a full item with the given id and timestamp.
    #[must_use]
    pub fn into_item(self, id: i64, now: DateTime<Utc>) -> Item {
        Item {
            id,
            decision: self.decision,
            context: self.context,
            status: self.status.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
            priority: self.priority.unwrap_or_default(),
            conversation_ref: self.conversation_ref,
            dependencies: self.dependencies.unwrap_or_default(),
            pii_metadata: self.pii_metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update for an item. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub conversation_ref: Option<String>,
    #[serde(default)]
    pub dependencies: Option<Vec<i64>>,
    #[serde(default)]
    pub pii_metadata: Option<serde_json::Value>,
}

impl ItemPatch {
    /// Whether the patch changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.decision.is_none()
            && self.context.is_none()
            && self.status.is_none()
            && self.tags.is_none()
            && self.priority.is_none()
            && self.conversation_ref.is_none()
            && self.dependencies.is_none()
            && self.pii_metadata.is_none()
    }
}
