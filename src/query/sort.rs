//! Multi-key sorting for item listings.
//!
//! Sort keys apply left-to-right as successive tie-breaks. Priority and
//! status compare by their domain rank orders (high > medium > low;
//! in-progress > pending > done > archived), not lexically. Id ascending
//! is always the final implicit tie-break so the ordering is total and
//! cursor pagination stays deterministic under equal keys.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::Item;

/// Sortable item fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    Decision,
    Status,
    Priority,
    CreatedAt,
    UpdatedAt,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

/// One sort key: a field and a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: SortField,
    pub dir: SortDir,
}

impl SortKey {
    /// Ascending key for a field.
    #[must_use]
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            dir: SortDir::Asc,
        }
    }

    /// Descending key for a field.
    #[must_use]
    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            dir: SortDir::Desc,
        }
    }
}

fn compare_field(a: &Item, b: &Item, field: SortField) -> Ordering {
    match field {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Decision => a.decision.to_lowercase().cmp(&b.decision.to_lowercase()),
        SortField::Status => a.status.rank().cmp(&b.status.rank()),
        SortField::Priority => a.priority.rank().cmp(&b.priority.rank()),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
    }
}

/// Compare two items under an ordered key list.
#[must_use]
pub fn compare_items(a: &Item, b: &Item, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ord = compare_field(a, b, key.field);
        let ord = match key.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // Total order: equal sort keys fall back to id ascending.
    a.id.cmp(&b.id)
}

/// Sort items in place under the given keys.
///
/// With no keys the result is id-ascending.
pub fn sort_items(items: &mut [Item], keys: &[SortKey]) {
    items.sort_by(|a, b| compare_items(a, b, keys));
}
