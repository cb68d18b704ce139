//! Pagination: opaque cursors for the public listing contract, plus
//! plain offset/limit paging for backend-internal reads.
//!
//! A cursor encodes the id of the record it points at. Cursors that fail
//! to decode degrade to "no cursor" (start or end of the set) instead of
//! erroring, so a stale token from a deleted record never breaks a
//! listing call.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Item;

/// Simple offset/limit paging used inside the backends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    /// Apply the page to an already-sorted vector.
    #[must_use]
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        let mut out: Vec<T> = items.into_iter().skip(offset).collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

/// Cursor-based page request. `first`/`after` page forward, `last`/
/// `before` page backward; the two pairs are mutually exclusive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorPage {
    #[serde(default)]
    pub first: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub last: Option<usize>,
    #[serde(default)]
    pub before: Option<String>,
}

impl CursorPage {
    /// Forward page of `n` items from the start.
    #[must_use]
    pub fn forward(n: usize) -> Self {
        Self {
            first: Some(n),
            ..Self::default()
        }
    }

    /// Forward page of `n` items after a cursor.
    #[must_use]
    pub fn forward_after(n: usize, cursor: impl Into<String>) -> Self {
        Self {
            first: Some(n),
            after: Some(cursor.into()),
            ..Self::default()
        }
    }

    /// Backward page of `n` items from the end.
    #[must_use]
    pub fn backward(n: usize) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    /// Backward page of `n` items before a cursor.
    #[must_use]
    pub fn backward_before(n: usize, cursor: impl Into<String>) -> Self {
        Self {
            last: Some(n),
            before: Some(cursor.into()),
            ..Self::default()
        }
    }

    fn is_forward(&self) -> bool {
        self.first.is_some() || self.after.is_some()
    }

    fn is_backward(&self) -> bool {
        self.last.is_some() || self.before.is_some()
    }
}

/// Encode an item id as an opaque cursor token.
#[must_use]
pub fn encode_cursor(id: i64) -> String {
    URL_SAFE_NO_PAD.encode(format!("item:{id}"))
}

/// Decode a cursor token back to an item id.
///
/// Returns `None` for anything unrecognizable — malformed base64, wrong
/// prefix, or a non-numeric id.
#[must_use]
pub fn decode_cursor(cursor: &str) -> Option<i64> {
    let bytes = URL_SAFE_NO_PAD.decode(cursor).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let id = text.strip_prefix("item:")?;
    id.parse().ok()
}

/// Apply cursor pagination to an already-sorted item list.
///
/// The cursor is exclusive: `after` returns items strictly past the
/// referenced record, `before` strictly ahead of it. A cursor whose id
/// is absent from the list (or fails to decode) degrades to the start
/// (forward) or end (backward) of the set.
///
/// # Errors
///
/// Returns `InvalidArgument` if forward and backward fields are mixed.
pub fn paginate(items: Vec<Item>, page: &CursorPage) -> Result<Vec<Item>> {
    if page.is_forward() && page.is_backward() {
        return Err(Error::InvalidArgument(
            "cannot combine first/after with last/before".into(),
        ));
    }

    if page.is_backward() {
        let end = page
            .before
            .as_deref()
            .and_then(decode_cursor)
            .and_then(|id| items.iter().position(|item| item.id == id))
            .unwrap_or(items.len());
        let count = page.last.unwrap_or(end);
        let start = end.saturating_sub(count);
        return Ok(items[start..end].to_vec());
    }

    let start = page
        .after
        .as_deref()
        .and_then(decode_cursor)
        .and_then(|id| items.iter().position(|item| item.id == id))
        .map_or(0, |pos| pos + 1);
    let mut out: Vec<Item> = items.into_iter().skip(start).collect();
    if let Some(count) = page.first {
        out.truncate(count);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewItem;
    use chrono::Utc;

    fn items(n: i64) -> Vec<Item> {
        (1..=n)
            .map(|id| {
                NewItem {
                    decision: format!("d{id}"),
                    context: String::new(),
                    ..NewItem::default()
                }
                .into_item(id, Utc::now())
            })
            .collect()
    }

    #[test]
    fn test_cursor_roundtrip() {
        let cursor = encode_cursor(42);
        assert_eq!(decode_cursor(&cursor), Some(42));
    }

    #[test]
    fn test_bad_cursor_decodes_to_none() {
        assert_eq!(decode_cursor("definitely not base64!!!"), None);
        assert_eq!(decode_cursor(&URL_SAFE_NO_PAD.encode("other:9")), None);
        assert_eq!(decode_cursor(&URL_SAFE_NO_PAD.encode("item:abc")), None);
    }

    #[test]
    fn test_forward_pages_have_no_overlap_or_gap() {
        let all = items(10);
        let first = paginate(all.clone(), &CursorPage::forward(4)).unwrap();
        assert_eq!(first.len(), 4);

        let cursor = encode_cursor(first.last().unwrap().id);
        let second = paginate(all.clone(), &CursorPage::forward_after(4, cursor)).unwrap();

        let mut combined: Vec<i64> = first.iter().chain(second.iter()).map(|i| i.id).collect();
        let expected: Vec<i64> = all.iter().take(8).map(|i| i.id).collect();
        combined.dedup();
        assert_eq!(combined, expected);
    }

    #[test]
    fn test_backward_pages_mirror_forward() {
        let all = items(10);
        let last = paginate(all.clone(), &CursorPage::backward(3)).unwrap();
        let ids: Vec<i64> = last.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![8, 9, 10]);

        let cursor = encode_cursor(8);
        let prev = paginate(all, &CursorPage::backward_before(3, cursor)).unwrap();
        let ids: Vec<i64> = prev.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 6, 7]);
    }

    #[test]
    fn test_unparsable_cursor_degrades_to_full_range() {
        let all = items(5);
        let page = CursorPage::forward_after(2, "garbage");
        let out = paginate(all, &page).unwrap();
        let ids: Vec<i64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_cursor_for_deleted_record_degrades() {
        let mut all = items(5);
        all.retain(|i| i.id != 3);
        let page = CursorPage::forward_after(2, encode_cursor(3));
        let out = paginate(all, &page).unwrap();
        let ids: Vec<i64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_mixed_directions_rejected() {
        let page = CursorPage {
            first: Some(2),
            last: Some(2),
            ..CursorPage::default()
        };
        let err = paginate(items(3), &page).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_offset_limit_page() {
        let page = Page {
            offset: Some(2),
            limit: Some(2),
        };
        let out = page.apply(items(6));
        let ids: Vec<i64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }
}
