//! SQLite storage backend.
//!
//! WAL-mode database with foreign-key cascades and an FTS5 index scored
//! by `bm25` with column weights favoring decision over context over
//! tags. Filtering for non-search listings is compiled to SQL predicates
//! that mirror [`crate::query::filter`] exactly, so the two backends
//! agree on filtered results for identical data.
//!
//! Transactions are real: begin/commit/rollback map onto native SQLite
//! transactions, one open at a time per store instance.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{
    Dependency, DependencyType, Item, ItemPatch, ItemStatus, Link, NewDependency, NewItem,
    NewLink, NewReminder, NewRetrospective, Outcome, Priority, Reminder, ReminderPatch,
    Retrospective, TriggerType,
};
use crate::query::{ItemFilter, Page, ScalarPred, SortDir, SortField, SortKey, TextPred};
use crate::storage::schema::apply_schema;
use crate::storage::{BulkError, BulkOutcome, SearchHit, StorageType, StoragePort, StoreMetadata};

/// Database file name inside a data directory.
pub const DB_FILENAME: &str = "docket.db";

/// bm25 column weights: decision, context, tags.
const SEARCH_WEIGHTS: &str = "2.0, 1.0, 0.5";

/// SQLite-backed store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    tx_open: bool,
}

fn to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

fn from_ms_opt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(from_ms)
}

fn json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    text: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

const ITEM_COLUMNS: &str = "id, decision, context, status, tags, priority, conversation_ref, \
                            dependencies, pii_metadata, created_at, updated_at";

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let tags_text: String = row.get(4)?;
    let deps_text: String = row.get(7)?;
    let pii_text: Option<String> = row.get(8)?;
    let pii_metadata = match pii_text {
        Some(text) => Some(json_column(8, &text)?),
        None => None,
    };

    Ok(Item {
        id: row.get(0)?,
        decision: row.get(1)?,
        context: row.get(2)?,
        status: ItemStatus::from_str(&row.get::<_, String>(3)?),
        tags: json_column(4, &tags_text)?,
        priority: Priority::from_str(&row.get::<_, String>(5)?),
        conversation_ref: row.get(6)?,
        dependencies: json_column(7, &deps_text)?,
        pii_metadata,
        created_at: from_ms(row.get(9)?),
        updated_at: from_ms(row.get(10)?),
    })
}

fn row_to_dependency(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        item_id: row.get(0)?,
        depends_on_id: row.get(1)?,
        dependency_type: DependencyType::from_str(&row.get::<_, String>(2)?),
        created_at: from_ms(row.get(3)?),
    })
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let config_text: Option<String> = row.get(3)?;
    let trigger_config = match config_text {
        Some(text) => Some(json_column(3, &text)?),
        None => None,
    };
    Ok(Reminder {
        id: row.get(0)?,
        item_id: row.get(1)?,
        trigger_type: TriggerType::from_str(&row.get::<_, String>(2)?),
        trigger_config,
        triggered_at: from_ms_opt(row.get(4)?),
        dismissed_at: from_ms_opt(row.get(5)?),
        snoozed_until: from_ms_opt(row.get(6)?),
        created_at: from_ms(row.get(7)?),
    })
}

fn row_to_link(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        item_id: row.get(1)?,
        commit_hash: row.get(2)?,
        message: row.get(3)?,
        commit_date: from_ms_opt(row.get(4)?),
        file_path: row.get(5)?,
        detected_at: from_ms(row.get(6)?),
    })
}

/// Escape LIKE wildcards in user input.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Compile an [`ItemFilter`] into SQL conditions and parameters.
///
/// `col` prefixes column references so the same compiler serves plain
/// listings and FTS joins.
fn compile_filter(
    filter: &ItemFilter,
    col: &str,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn ToSql>>,
) {
    let mut scalar = |field: &str, pred: &ScalarPred<String>| match pred {
        ScalarPred::Eq(v) => {
            conditions.push(format!("{col}{field} = ?"));
            params.push(Box::new(v.clone()));
        }
        ScalarPred::Ne(v) => {
            conditions.push(format!("{col}{field} <> ?"));
            params.push(Box::new(v.clone()));
        }
        ScalarPred::In(set) => {
            let marks = vec!["?"; set.len()].join(", ");
            conditions.push(format!("{col}{field} IN ({marks})"));
            for v in set {
                params.push(Box::new(v.clone()));
            }
        }
    };

    if let Some(pred) = &filter.status {
        let mapped = match pred {
            ScalarPred::Eq(v) => ScalarPred::Eq(v.as_str().to_string()),
            ScalarPred::Ne(v) => ScalarPred::Ne(v.as_str().to_string()),
            ScalarPred::In(set) => {
                ScalarPred::In(set.iter().map(|v| v.as_str().to_string()).collect())
            }
        };
        scalar("status", &mapped);
    }
    if let Some(pred) = &filter.priority {
        let mapped = match pred {
            ScalarPred::Eq(v) => ScalarPred::Eq(v.as_str().to_string()),
            ScalarPred::Ne(v) => ScalarPred::Ne(v.as_str().to_string()),
            ScalarPred::In(set) => {
                ScalarPred::In(set.iter().map(|v| v.as_str().to_string()).collect())
            }
        };
        scalar("priority", &mapped);
    }

    let mut text = |field: &str, pred: &TextPred| match pred {
        TextPred::Eq(v) => {
            conditions.push(format!("{col}{field} = ?"));
            params.push(Box::new(v.clone()));
        }
        TextPred::Ne(v) => {
            conditions.push(format!("{col}{field} <> ?"));
            params.push(Box::new(v.clone()));
        }
        TextPred::Contains(v) => {
            conditions.push(format!("{col}{field} LIKE ? ESCAPE '\\'"));
            params.push(Box::new(format!("%{}%", like_escape(v))));
        }
        TextPred::StartsWith(v) => {
            conditions.push(format!("{col}{field} LIKE ? ESCAPE '\\'"));
            params.push(Box::new(format!("{}%", like_escape(v))));
        }
        TextPred::EndsWith(v) => {
            conditions.push(format!("{col}{field} LIKE ? ESCAPE '\\'"));
            params.push(Box::new(format!("%{}", like_escape(v))));
        }
    };

    if let Some(pred) = &filter.decision {
        text("decision", pred);
    }
    if let Some(pred) = &filter.context {
        text("context", pred);
    }
    if let Some(pred) = &filter.conversation_ref {
        text("conversation_ref", pred);
    }

    if let Some(range) = &filter.created_at {
        if let Some(min) = range.gte {
            conditions.push(format!("{col}created_at >= ?"));
            params.push(Box::new(to_ms(min)));
        }
        if let Some(max) = range.lte {
            conditions.push(format!("{col}created_at <= ?"));
            params.push(Box::new(to_ms(max)));
        }
    }
    if let Some(range) = &filter.updated_at {
        if let Some(min) = range.gte {
            conditions.push(format!("{col}updated_at >= ?"));
            params.push(Box::new(to_ms(min)));
        }
        if let Some(max) = range.lte {
            conditions.push(format!("{col}updated_at <= ?"));
            params.push(Box::new(to_ms(max)));
        }
    }
    if let Some(tag) = &filter.has_tag {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM json_each({col}tags) WHERE json_each.value = ?)"
        ));
        params.push(Box::new(tag.clone()));
    }
}

/// Compile sort keys into an ORDER BY clause with the id tiebreak.
fn compile_sort(sort: &[SortKey], col: &str) -> String {
    let mut terms: Vec<String> = Vec::new();
    for key in sort {
        let expr = match key.field {
            SortField::Id => format!("{col}id"),
            SortField::Decision => format!("LOWER({col}decision)"),
            SortField::Status => format!(
                "CASE {col}status WHEN 'in-progress' THEN 3 WHEN 'pending' THEN 2 \
                 WHEN 'done' THEN 1 ELSE 0 END"
            ),
            SortField::Priority => format!(
                "CASE {col}priority WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END"
            ),
            SortField::CreatedAt => format!("{col}created_at"),
            SortField::UpdatedAt => format!("{col}updated_at"),
        };
        let dir = match key.dir {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        };
        terms.push(format!("{expr} {dir}"));
    }
    terms.push(format!("{col}id ASC"));
    format!("ORDER BY {}", terms.join(", "))
}

/// Build an FTS5 MATCH expression: quoted terms joined with OR, matching
/// the flat-file backend's any-term semantics.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl SqliteStore {
    /// Open a database at the given path, creating and migrating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or the
    /// schema fails to apply.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            tx_open: false,
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            tx_open: false,
        })
    }

    fn item_exists(&self, id: i64) -> Result<bool> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM items WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn require_item(&self, id: i64) -> Result<()> {
        if self.item_exists(id)? {
            Ok(())
        } else {
            Err(Error::ItemNotFound { id })
        }
    }

    fn insert_item(&self, item: &Item) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO items ({ITEM_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                item.id,
                item.decision,
                item.context,
                item.status.as_str(),
                serde_json::to_string(&item.tags)?,
                item.priority.as_str(),
                item.conversation_ref,
                serde_json::to_string(&item.dependencies)?,
                item.pii_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                to_ms(item.created_at),
                to_ms(item.updated_at),
            ],
        )?;
        Ok(())
    }

    fn write_item(&self, item: &Item) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE items SET decision = ?2, context = ?3, status = ?4, tags = ?5,
                    priority = ?6, conversation_ref = ?7, dependencies = ?8,
                    pii_metadata = ?9, updated_at = ?10
             WHERE id = ?1",
            rusqlite::params![
                item.id,
                item.decision,
                item.context,
                item.status.as_str(),
                serde_json::to_string(&item.tags)?,
                item.priority.as_str(),
                item.conversation_ref,
                serde_json::to_string(&item.dependencies)?,
                item.pii_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                to_ms(item.updated_at),
            ],
        )?;
        Ok(rows)
    }
}

impl StoragePort for SqliteStore {
    fn create_item(&mut self, input: NewItem) -> Result<Item> {
        // max+1 under SQLite's own write lock, same id law as the
        // flat-file backend.
        let next_id: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM items",
            [],
            |row| row.get(0),
        )?;
        let item = input.into_item(next_id, Utc::now());
        self.insert_item(&item)?;
        debug!(id = item.id, "created item");
        Ok(item)
    }

    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1"),
                [id],
                row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn get_items(&self, ids: &[i64]) -> Result<Vec<Item>> {
        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(item) = self.get_item(id)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    fn update_item(&mut self, id: i64, patch: ItemPatch) -> Result<Item> {
        let mut item = self.get_item(id)?.ok_or(Error::ItemNotFound { id })?;
        item.apply(&patch, Utc::now());
        self.write_item(&item)?;
        Ok(item)
    }

    fn delete_item(&mut self, id: i64, hard: bool) -> Result<()> {
        if hard {
            let rows = self.conn.execute("DELETE FROM items WHERE id = ?1", [id])?;
            if rows == 0 {
                return Err(Error::ItemNotFound { id });
            }
            debug!(id, "hard-deleted item with cascade");
            return Ok(());
        }

        let rows = self.conn.execute(
            "UPDATE items SET status = 'archived', updated_at = ?2 WHERE id = ?1",
            rusqlite::params![id, to_ms(Utc::now())],
        )?;
        if rows == 0 {
            return Err(Error::ItemNotFound { id });
        }
        Ok(())
    }

    fn list_items(&self, filter: &ItemFilter, sort: &[SortKey], page: Page) -> Result<Vec<Item>> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        compile_filter(filter, "", &mut conditions, &mut params);

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let order_clause = compile_sort(sort, "");

        let limit = page.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = page.offset.map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items{where_clause} {order_clause} LIMIT {limit} OFFSET {offset}"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_item)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn count_items(&self, filter: &ItemFilter) -> Result<u64> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        compile_filter(filter, "", &mut conditions, &mut params);

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!("SELECT COUNT(*) FROM items{where_clause}");

        let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let count: i64 = self
            .conn
            .query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn search_items(&self, query: &str, filter: &ItemFilter, page: Page) -> Result<Vec<SearchHit>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut conditions = vec!["items_fts MATCH ?".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(match_expr)];
        compile_filter(filter, "i.", &mut conditions, &mut params);

        let limit = page.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = page.offset.map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));
        let sql = format!(
            "SELECT i.id, i.decision, i.context, i.status, i.tags, i.priority,
                    i.conversation_ref, i.dependencies, i.pii_metadata, i.created_at, i.updated_at,
                    bm25(items_fts, {SEARCH_WEIGHTS}) AS score,
                    snippet(items_fts, 0, '[', ']', '…', 12) AS snip_decision,
                    snippet(items_fts, 1, '[', ']', '…', 12) AS snip_context
             FROM items_fts
             JOIN items i ON i.id = items_fts.rowid
             WHERE {}
             ORDER BY bm25(items_fts, {SEARCH_WEIGHTS}), i.id
             LIMIT {limit} OFFSET {offset}",
            conditions.join(" AND ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let item = row_to_item(row)?;
            let score: f64 = row.get(11)?;
            let snip_decision: String = row.get(12)?;
            let snip_context: String = row.get(13)?;
            Ok((item, score, snip_decision, snip_context))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (item, score, snip_decision, snip_context) = row?;
            let mut highlights = Vec::new();
            for snippet in [snip_decision, snip_context] {
                if snippet.contains('[') {
                    highlights.push(snippet);
                }
            }
            // bm25 scores are better when smaller; negate so callers see
            // higher-is-better.
            hits.push(SearchHit {
                item,
                score: -score,
                highlights,
            });
        }
        Ok(hits)
    }

    fn bulk_update_items(&mut self, ids: &[i64], patch: &ItemPatch) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.update_item(id, patch.clone()) {
                Ok(_) => outcome.ok(),
                Err(err) => outcome.fail(BulkError::for_id(id, err.to_string())),
            }
        }
        Ok(outcome)
    }

    fn bulk_delete_items(&mut self, ids: &[i64], hard: bool) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        for &id in ids {
            match self.delete_item(id, hard) {
                Ok(()) => outcome.ok(),
                Err(err) => outcome.fail(BulkError::for_id(id, err.to_string())),
            }
        }
        Ok(outcome)
    }

    fn create_dependency(&mut self, input: NewDependency) -> Result<Dependency> {
        self.require_item(input.item_id)?;
        self.require_item(input.depends_on_id)?;

        self.conn.execute(
            "INSERT OR IGNORE INTO dependencies (item_id, depends_on_id, dependency_type, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                input.item_id,
                input.depends_on_id,
                input.dependency_type.as_str(),
                to_ms(Utc::now()),
            ],
        )?;

        let dep = self.conn.query_row(
            "SELECT item_id, depends_on_id, dependency_type, created_at
             FROM dependencies WHERE item_id = ?1 AND depends_on_id = ?2",
            [input.item_id, input.depends_on_id],
            row_to_dependency,
        )?;
        Ok(dep)
    }

    fn get_dependencies(&self, item_id: i64) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, depends_on_id, dependency_type, created_at
             FROM dependencies WHERE item_id = ?1 ORDER BY depends_on_id",
        )?;
        let rows = stmt.query_map([item_id], row_to_dependency)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn get_dependents(&self, item_id: i64) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, depends_on_id, dependency_type, created_at
             FROM dependencies WHERE depends_on_id = ?1 ORDER BY item_id",
        )?;
        let rows = stmt.query_map([item_id], row_to_dependency)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn delete_dependency(&mut self, item_id: i64, depends_on_id: i64) -> Result<()> {
        let rows = self.conn.execute(
            "DELETE FROM dependencies WHERE item_id = ?1 AND depends_on_id = ?2",
            [item_id, depends_on_id],
        )?;
        if rows == 0 {
            return Err(Error::DependencyNotFound {
                item_id,
                depends_on_id,
            });
        }
        Ok(())
    }

    fn all_dependencies(&self) -> Result<Vec<Dependency>> {
        let mut stmt = self.conn.prepare(
            "SELECT item_id, depends_on_id, dependency_type, created_at
             FROM dependencies ORDER BY item_id, depends_on_id",
        )?;
        let rows = stmt.query_map([], row_to_dependency)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn get_blocked_items(&self) -> Result<Vec<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {} FROM items i
             JOIN dependencies d ON d.item_id = i.id AND d.dependency_type = 'blocks'
             JOIN items target ON target.id = d.depends_on_id
             WHERE target.status NOT IN ('done', 'archived')
             ORDER BY i.id",
            ITEM_COLUMNS
                .split(", ")
                .map(|c| format!("i.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let rows = stmt.query_map([], row_to_item)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn save_retrospective(&mut self, input: NewRetrospective) -> Result<Retrospective> {
        self.require_item(input.item_id)?;

        let retro = Retrospective {
            item_id: input.item_id,
            outcome: input.outcome,
            effort: input.effort,
            impact: input.impact,
            completed_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO retrospectives (item_id, outcome, effort, impact, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(item_id) DO UPDATE SET
                 outcome = excluded.outcome,
                 effort = excluded.effort,
                 impact = excluded.impact,
                 completed_at = excluded.completed_at",
            rusqlite::params![
                retro.item_id,
                retro.outcome.as_str(),
                retro.effort,
                retro.impact,
                to_ms(retro.completed_at),
            ],
        )?;
        Ok(retro)
    }

    fn get_retrospective(&self, item_id: i64) -> Result<Option<Retrospective>> {
        let retro = self
            .conn
            .query_row(
                "SELECT item_id, outcome, effort, impact, completed_at
                 FROM retrospectives WHERE item_id = ?1",
                [item_id],
                |row| {
                    Ok(Retrospective {
                        item_id: row.get(0)?,
                        outcome: Outcome::from_str(&row.get::<_, String>(1)?),
                        effort: row.get(2)?,
                        impact: row.get(3)?,
                        completed_at: from_ms(row.get(4)?),
                    })
                },
            )
            .optional()?;
        Ok(retro)
    }

    fn delete_retrospective(&mut self, item_id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute("DELETE FROM retrospectives WHERE item_id = ?1", [item_id])?;
        if rows == 0 {
            return Err(Error::RetrospectiveNotFound { item_id });
        }
        Ok(())
    }

    fn create_reminder(&mut self, input: NewReminder) -> Result<Reminder> {
        self.require_item(input.item_id)?;

        let reminder = Reminder {
            id: self.conn.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM reminders",
                [],
                |row| row.get(0),
            )?,
            item_id: input.item_id,
            trigger_type: input.trigger_type,
            trigger_config: input.trigger_config,
            triggered_at: None,
            dismissed_at: None,
            snoozed_until: None,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO reminders (id, item_id, trigger_type, trigger_config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reminder.id,
                reminder.item_id,
                reminder.trigger_type.as_str(),
                reminder
                    .trigger_config
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                to_ms(reminder.created_at),
            ],
        )?;
        Ok(reminder)
    }

    fn get_reminder(&self, id: i64) -> Result<Option<Reminder>> {
        let reminder = self
            .conn
            .query_row(
                "SELECT id, item_id, trigger_type, trigger_config, triggered_at,
                        dismissed_at, snoozed_until, created_at
                 FROM reminders WHERE id = ?1",
                [id],
                row_to_reminder,
            )
            .optional()?;
        Ok(reminder)
    }

    fn list_reminders(&self, item_id: Option<i64>, active_only: bool) -> Result<Vec<Reminder>> {
        let mut conditions = vec!["1=1".to_string()];
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(id) = item_id {
            conditions.push("item_id = ?".to_string());
            params.push(Box::new(id));
        }
        if active_only {
            conditions.push("dismissed_at IS NULL".to_string());
            conditions.push("(snoozed_until IS NULL OR snoozed_until <= ?)".to_string());
            params.push(Box::new(to_ms(Utc::now())));
        }

        let sql = format!(
            "SELECT id, item_id, trigger_type, trigger_config, triggered_at,
                    dismissed_at, snoozed_until, created_at
             FROM reminders WHERE {} ORDER BY id",
            conditions.join(" AND ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_reminder)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn update_reminder(&mut self, id: i64, patch: ReminderPatch) -> Result<Reminder> {
        let mut reminder = self
            .get_reminder(id)?
            .ok_or(Error::ReminderNotFound { id })?;

        if let Some(config) = patch.trigger_config {
            reminder.trigger_config = Some(config);
        }
        if let Some(at) = patch.triggered_at {
            reminder.triggered_at = Some(at);
        }
        if let Some(at) = patch.dismissed_at {
            reminder.dismissed_at = Some(at);
        }
        if let Some(until) = patch.snoozed_until {
            reminder.snoozed_until = Some(until);
        }

        self.conn.execute(
            "UPDATE reminders SET trigger_config = ?2, triggered_at = ?3,
                    dismissed_at = ?4, snoozed_until = ?5
             WHERE id = ?1",
            rusqlite::params![
                id,
                reminder
                    .trigger_config
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                reminder.triggered_at.map(to_ms),
                reminder.dismissed_at.map(to_ms),
                reminder.snoozed_until.map(to_ms),
            ],
        )?;
        Ok(reminder)
    }

    fn delete_reminder(&mut self, id: i64) -> Result<()> {
        let rows = self.conn.execute("DELETE FROM reminders WHERE id = ?1", [id])?;
        if rows == 0 {
            return Err(Error::ReminderNotFound { id });
        }
        Ok(())
    }

    fn create_link(&mut self, input: NewLink) -> Result<Link> {
        self.require_item(input.item_id)?;
        if self.get_link_by_commit(&input.commit_hash)?.is_some() {
            return Err(Error::DuplicateCommit {
                commit_hash: input.commit_hash,
            });
        }

        let link = Link {
            id: self.conn.query_row(
                "SELECT COALESCE(MAX(id), 0) + 1 FROM links",
                [],
                |row| row.get(0),
            )?,
            item_id: input.item_id,
            commit_hash: input.commit_hash,
            message: input.message,
            commit_date: input.commit_date,
            file_path: input.file_path,
            detected_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO links (id, item_id, commit_hash, message, commit_date, file_path, detected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                link.id,
                link.item_id,
                link.commit_hash,
                link.message,
                link.commit_date.map(to_ms),
                link.file_path,
                to_ms(link.detected_at),
            ],
        )?;
        Ok(link)
    }

    fn get_links(&self, item_id: i64) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, item_id, commit_hash, message, commit_date, file_path, detected_at
             FROM links WHERE item_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([item_id], row_to_link)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
    }

    fn get_link_by_commit(&self, commit_hash: &str) -> Result<Option<Link>> {
        let link = self
            .conn
            .query_row(
                "SELECT id, item_id, commit_hash, message, commit_date, file_path, detected_at
                 FROM links WHERE commit_hash = ?1",
                [commit_hash],
                row_to_link,
            )
            .optional()?;
        Ok(link)
    }

    fn delete_link(&mut self, id: i64) -> Result<()> {
        let rows = self.conn.execute("DELETE FROM links WHERE id = ?1", [id])?;
        if rows == 0 {
            return Err(Error::LinkNotFound { id });
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.tx_open {
            return Err(Error::TransactionAlreadyOpen);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.tx_open = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        if !self.tx_open {
            return Err(Error::NoOpenTransaction);
        }
        self.conn.execute_batch("COMMIT")?;
        self.tx_open = false;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if !self.tx_open {
            return Err(Error::NoOpenTransaction);
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.tx_open = false;
        Ok(())
    }

    fn export_to_jsonl(&self) -> Result<String> {
        let items = self.list_items(&ItemFilter::default(), &[], Page::default())?;
        let mut out = String::new();
        for item in items {
            out.push_str(&serde_json::to_string(&item)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn import_from_jsonl(&mut self, data: &str, merge: bool) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();

        for (line_num, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let incoming: Item = match serde_json::from_str(line) {
                Ok(item) => item,
                Err(err) => {
                    outcome.fail(BulkError::for_line(line_num + 1, err.to_string()));
                    continue;
                }
            };
            if incoming.id <= 0 {
                outcome.fail(BulkError::for_line(
                    line_num + 1,
                    format!("invalid item id {}", incoming.id),
                ));
                continue;
            }

            let exists = self.item_exists(incoming.id)?;
            if exists && !merge {
                outcome.fail(BulkError::for_id(incoming.id, "item id already exists"));
                continue;
            }

            let result = if exists {
                self.write_item(&incoming).map(|_| ())
            } else {
                self.insert_item(&incoming)
            };
            match result {
                Ok(()) => outcome.ok(),
                Err(err) => outcome.fail(BulkError::for_id(incoming.id, err.to_string())),
            }
        }

        debug!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "imported items from jsonl"
        );
        Ok(outcome)
    }

    fn metadata(&self) -> Result<StoreMetadata> {
        let (count, last): (i64, Option<i64>) = self.conn.query_row(
            "SELECT COUNT(*), MAX(updated_at) FROM items",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(StoreMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            item_count: u64::try_from(count).unwrap_or(0),
            last_updated: from_ms_opt(last),
            storage_type: StorageType::Sqlite,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DependencyType, TriggerType};
    use crate::query::{DateRange, ScalarPred};
    use crate::storage::with_transaction;

    fn new_item(decision: &str) -> NewItem {
        NewItem {
            decision: decision.into(),
            context: "some context".into(),
            ..NewItem::default()
        }
    }

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let mut store = SqliteStore::open_memory().unwrap();
        for expected in 1..=5 {
            assert_eq!(store.create_item(new_item("x")).unwrap().id, expected);
        }
    }

    #[test]
    fn test_create_get_roundtrip_preserves_fields() {
        let mut store = SqliteStore::open_memory().unwrap();
        let created = store
            .create_item(NewItem {
                decision: "adopt sqlite".into(),
                context: "storage backend".into(),
                tags: Some(vec!["db".into()]),
                priority: Some(Priority::High),
                conversation_ref: Some("conv-9".into()),
                dependencies: Some(vec![7]),
                pii_metadata: Some(serde_json::json!({"scrubbed": true})),
                ..NewItem::default()
            })
            .unwrap();

        let fetched = store.get_item(created.id).unwrap().unwrap();
        assert_eq!(fetched.decision, created.decision);
        assert_eq!(fetched.tags, created.tags);
        assert_eq!(fetched.conversation_ref, created.conversation_ref);
        assert_eq!(fetched.dependencies, created.dependencies);
        assert_eq!(fetched.pii_metadata, created.pii_metadata);
        assert_eq!(fetched.created_at, fetched.updated_at);
    }

    #[test]
    fn test_soft_delete_then_hard_delete() {
        let mut store = SqliteStore::open_memory().unwrap();
        let item = store.create_item(new_item("a")).unwrap();

        store.delete_item(item.id, false).unwrap();
        assert_eq!(
            store.get_item(item.id).unwrap().unwrap().status,
            ItemStatus::Archived
        );

        store.delete_item(item.id, true).unwrap();
        assert!(store.get_item(item.id).unwrap().is_none());
        assert!(store.delete_item(item.id, true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_hard_delete_cascades_via_foreign_keys() {
        let mut store = SqliteStore::open_memory().unwrap();
        let a = store.create_item(new_item("a")).unwrap();
        let b = store.create_item(new_item("b")).unwrap();
        store
            .create_dependency(NewDependency {
                item_id: b.id,
                depends_on_id: a.id,
                dependency_type: DependencyType::Blocks,
            })
            .unwrap();
        store
            .save_retrospective(NewRetrospective {
                item_id: a.id,
                outcome: Outcome::Success,
                effort: None,
                impact: None,
            })
            .unwrap();
        store
            .create_reminder(NewReminder {
                item_id: a.id,
                trigger_type: TriggerType::Time,
                trigger_config: None,
            })
            .unwrap();
        store
            .create_link(NewLink {
                item_id: a.id,
                commit_hash: "abc".into(),
                message: None,
                commit_date: None,
                file_path: None,
            })
            .unwrap();

        store.delete_item(a.id, true).unwrap();

        assert!(store.get_dependencies(b.id).unwrap().is_empty());
        assert!(store.get_retrospective(a.id).unwrap().is_none());
        assert!(store.list_reminders(Some(a.id), false).unwrap().is_empty());
        assert!(store.get_links(a.id).unwrap().is_empty());
    }

    #[test]
    fn test_list_filter_matches_query_engine() {
        let mut store = SqliteStore::open_memory().unwrap();
        for (decision, priority, tags) in [
            ("low item", Priority::Low, vec!["infra"]),
            ("high item", Priority::High, vec!["db", "infra"]),
            ("medium item", Priority::Medium, vec![]),
        ] {
            store
                .create_item(NewItem {
                    decision: decision.into(),
                    context: String::new(),
                    priority: Some(priority),
                    tags: Some(tags.into_iter().map(String::from).collect()),
                    ..NewItem::default()
                })
                .unwrap();
        }

        let filter = ItemFilter {
            priority: Some(ScalarPred::Eq(Priority::High)),
            ..ItemFilter::default()
        };
        let high = store
            .list_items(&filter, &[SortKey::desc(SortField::Priority)], Page::default())
            .unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].decision, "high item");

        let tagged = store
            .list_items(
                &ItemFilter {
                    has_tag: Some("infra".into()),
                    ..ItemFilter::default()
                },
                &[],
                Page::default(),
            )
            .unwrap();
        assert_eq!(tagged.len(), 2);

        let contains = store
            .list_items(
                &ItemFilter {
                    decision: Some(TextPred::Contains("HIGH".into())),
                    ..ItemFilter::default()
                },
                &[],
                Page::default(),
            )
            .unwrap();
        assert_eq!(contains.len(), 1);

        assert_eq!(store.count_items(&filter).unwrap(), 1);
    }

    #[test]
    fn test_priority_sort_uses_domain_rank() {
        let mut store = SqliteStore::open_memory().unwrap();
        for priority in [Priority::Low, Priority::High, Priority::Medium] {
            store
                .create_item(NewItem {
                    decision: "x".into(),
                    context: String::new(),
                    priority: Some(priority),
                    ..NewItem::default()
                })
                .unwrap();
        }

        let sorted = store
            .list_items(
                &ItemFilter::default(),
                &[SortKey::desc(SortField::Priority)],
                Page::default(),
            )
            .unwrap();
        let priorities: Vec<Priority> = sorted.iter().map(|i| i.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_date_range_filter() {
        let mut store = SqliteStore::open_memory().unwrap();
        let item = store.create_item(new_item("a")).unwrap();

        let hit = store
            .count_items(&ItemFilter {
                created_at: Some(DateRange {
                    gte: Some(item.created_at - chrono::Duration::seconds(1)),
                    lte: Some(item.created_at + chrono::Duration::seconds(1)),
                }),
                ..ItemFilter::default()
            })
            .unwrap();
        assert_eq!(hit, 1);

        let miss = store
            .count_items(&ItemFilter {
                created_at: Some(DateRange {
                    gte: Some(item.created_at + chrono::Duration::seconds(1)),
                    lte: None,
                }),
                ..ItemFilter::default()
            })
            .unwrap();
        assert_eq!(miss, 0);
    }

    #[test]
    fn test_search_ranks_decision_above_context() {
        let mut store = SqliteStore::open_memory().unwrap();
        let in_context = store
            .create_item(NewItem {
                decision: "unrelated title".into(),
                context: "the database matters here".into(),
                ..NewItem::default()
            })
            .unwrap();
        let in_decision = store
            .create_item(NewItem {
                decision: "pick a database".into(),
                context: "no relevant words".into(),
                ..NewItem::default()
            })
            .unwrap();

        let hits = store
            .search_items("database", &ItemFilter::default(), Page::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item.id, in_decision.id);
        assert!(hits[0].score >= hits[1].score);
        assert_eq!(hits[1].item.id, in_context.id);
        assert!(!hits[0].highlights.is_empty());
    }

    #[test]
    fn test_search_empty_and_unmatched_queries() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.create_item(new_item("anything")).unwrap();

        assert!(store
            .search_items("", &ItemFilter::default(), Page::default())
            .unwrap()
            .is_empty());
        assert!(store
            .search_items("zzzznomatch", &ItemFilter::default(), Page::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_index_follows_updates_and_deletes() {
        let mut store = SqliteStore::open_memory().unwrap();
        let item = store.create_item(new_item("original wording")).unwrap();

        store
            .update_item(
                item.id,
                ItemPatch {
                    decision: Some("rewritten phrasing".into()),
                    ..ItemPatch::default()
                },
            )
            .unwrap();
        assert!(store
            .search_items("original", &ItemFilter::default(), Page::default())
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .search_items("rewritten", &ItemFilter::default(), Page::default())
                .unwrap()
                .len(),
            1
        );

        store.delete_item(item.id, true).unwrap();
        assert!(store
            .search_items("rewritten", &ItemFilter::default(), Page::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transactions_roll_back() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.create_item(new_item("keep")).unwrap();

        let result: Result<()> = with_transaction(&mut store, |s| {
            s.create_item(new_item("discard"))?;
            Err(Error::InvalidArgument("boom".into()))
        });
        assert!(result.is_err());

        assert_eq!(store.count_items(&ItemFilter::default()).unwrap(), 1);
        // State is resolved; a new transaction can begin.
        store.begin_transaction().unwrap();
        store.commit_transaction().unwrap();
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let mut store = SqliteStore::open_memory().unwrap();
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction().unwrap_err(),
            Error::TransactionAlreadyOpen
        ));
        store.rollback_transaction().unwrap();
        assert!(matches!(
            store.rollback_transaction().unwrap_err(),
            Error::NoOpenTransaction
        ));
    }

    #[test]
    fn test_with_transaction_commits_on_success() {
        let mut store = SqliteStore::open_memory().unwrap();
        let id = with_transaction(&mut store, |s| {
            Ok(s.create_item(new_item("committed"))?.id)
        })
        .unwrap();
        assert!(store.get_item(id).unwrap().is_some());
    }

    #[test]
    fn test_bulk_delete_attempts_every_id() {
        let mut store = SqliteStore::open_memory().unwrap();
        let a = store.create_item(new_item("a")).unwrap();
        let b = store.create_item(new_item("b")).unwrap();

        let outcome = store.bulk_delete_items(&[a.id, 999, b.id], true).unwrap();
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.errors[0].id, Some(999));
        assert_eq!(store.count_items(&ItemFilter::default()).unwrap(), 0);
    }

    #[test]
    fn test_export_import_preserves_ids() {
        let mut source = SqliteStore::open_memory().unwrap();
        source.create_item(new_item("first")).unwrap();
        source.create_item(new_item("second")).unwrap();
        source.delete_item(1, false).unwrap();

        let exported = source.export_to_jsonl().unwrap();

        let mut target = SqliteStore::open_memory().unwrap();
        let outcome = target.import_from_jsonl(&exported, false).unwrap();
        assert!(outcome.is_clean());
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(
            target.get_item(1).unwrap().unwrap().status,
            ItemStatus::Archived
        );

        // Re-import without merge reports conflicts for every id.
        let outcome = target.import_from_jsonl(&exported, false).unwrap();
        assert_eq!(outcome.failed, 2);

        // With merge it replaces.
        let outcome = target.import_from_jsonl(&exported, true).unwrap();
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_cycle_scenario() {
        let mut store = SqliteStore::open_memory().unwrap();
        let one = store.create_item(new_item("one")).unwrap();
        let two = store.create_item(new_item("two")).unwrap();
        store.create_item(new_item("three")).unwrap();

        store
            .create_dependency(NewDependency {
                item_id: two.id,
                depends_on_id: one.id,
                dependency_type: DependencyType::Blocks,
            })
            .unwrap();

        assert!(store.would_create_cycle(one.id, two.id).unwrap());
        assert!(!store.would_create_cycle(3, one.id).unwrap());
        assert!(store.get_dependencies(one.id).unwrap().is_empty());
    }

    #[test]
    fn test_blocked_items_join() {
        let mut store = SqliteStore::open_memory().unwrap();
        let gate = store.create_item(new_item("gate")).unwrap();
        let blocked = store.create_item(new_item("blocked")).unwrap();
        store
            .create_dependency(NewDependency {
                item_id: blocked.id,
                depends_on_id: gate.id,
                dependency_type: DependencyType::Blocks,
            })
            .unwrap();

        let ids: Vec<i64> = store
            .get_blocked_items()
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![blocked.id]);

        store.delete_item(gate.id, false).unwrap();
        assert!(store.get_blocked_items().unwrap().is_empty());
    }

    #[test]
    fn test_metadata() {
        let mut store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.metadata().unwrap().item_count, 0);
        assert!(store.metadata().unwrap().last_updated.is_none());

        store.create_item(new_item("a")).unwrap();
        let meta = store.metadata().unwrap();
        assert_eq!(meta.item_count, 1);
        assert_eq!(meta.storage_type, StorageType::Sqlite);
        assert!(meta.last_updated.is_some());
    }
}
