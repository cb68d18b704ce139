//! Storage port and backends.
//!
//! [`StoragePort`] is the single contract the application layer depends
//! on. Two backends implement it:
//!
//! - [`flatfile::FlatFileStore`] - JSONL files coordinated by a
//!   directory-wide advisory lock
//! - [`sqlite::SqliteStore`] - embedded SQLite with WAL, cascades, and a
//!   ranked FTS5 index
//!
//! The backend is selected once at startup via [`open_store`] and held as
//! a `Box<dyn StoragePort>`.

pub mod flatfile;
pub mod fsio;
pub mod lock;
pub mod schema;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BackendKind, StoreConfig};
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::model::{
    Dependency, Item, ItemPatch, Link, NewDependency, NewItem, NewLink, NewReminder,
    NewRetrospective, Reminder, ReminderPatch, Retrospective,
};
use crate::query::{ItemFilter, Page, SortKey};

/// Which backend a store instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageType {
    FlatFile,
    Sqlite,
}

impl StorageType {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FlatFile => "flat-file",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub item: Item,
    /// Relevance score, higher is better. Decision-field matches outrank
    /// context matches, which outrank tag matches.
    pub score: f64,
    /// Matched-field excerpts.
    pub highlights: Vec<String>,
}

/// Per-record error from a bulk operation or import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkError {
    /// Offending item id, when known.
    #[serde(default)]
    pub id: Option<i64>,
    /// Offending input line, for imports.
    #[serde(default)]
    pub line: Option<usize>,
    pub message: String,
}

impl BulkError {
    /// Error attached to a known item id.
    #[must_use]
    pub fn for_id(id: i64, message: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            line: None,
            message: message.into(),
        }
    }

    /// Error attached to an input line.
    #[must_use]
    pub fn for_line(line: usize, message: impl Into<String>) -> Self {
        Self {
            id: None,
            line: Some(line),
            message: message.into(),
        }
    }
}

/// Aggregated result of a bulk operation. One record's failure never
/// blocks the rest; every record is attempted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BulkError>,
}

impl BulkOutcome {
    /// Record one success.
    pub fn ok(&mut self) {
        self.succeeded += 1;
    }

    /// Record one failure.
    pub fn fail(&mut self, error: BulkError) {
        self.failed += 1;
        self.errors.push(error);
    }

    /// Whether every attempted record succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Outcome of a cycle check for a proposed dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleCheck {
    pub would_cycle: bool,
    /// Existing chain from the proposed target back to the source, present
    /// when the edge would close a cycle.
    #[serde(default)]
    pub path: Option<Vec<i64>>,
}

/// Store-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: String,
    pub item_count: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    pub storage_type: StorageType,
}

/// The common storage contract both backends implement.
///
/// Reads take `&self`, writes `&mut self`. All operations may block on
/// I/O or lock acquisition. Callers hold a single instance selected at
/// startup; see [`open_store`].
pub trait StoragePort {
    // ── Items ─────────────────────────────────────────────────

    /// Create an item: assigns the next id, fills defaults, stamps both
    /// timestamps.
    fn create_item(&mut self, input: NewItem) -> Result<Item>;

    /// Fetch one item, `None` if absent.
    fn get_item(&self, id: i64) -> Result<Option<Item>>;

    /// Fetch several items. Unknown ids are silently dropped.
    fn get_items(&self, ids: &[i64]) -> Result<Vec<Item>>;

    /// Apply a partial update. `updated_at` is always refreshed.
    fn update_item(&mut self, id: i64, patch: ItemPatch) -> Result<Item>;

    /// Soft delete (archive) or, with `hard`, physically remove the item
    /// and cascade over its dependencies, retrospective, reminders, and
    /// links.
    fn delete_item(&mut self, id: i64, hard: bool) -> Result<()>;

    /// List items matching a filter, sorted, with offset/limit paging.
    fn list_items(&self, filter: &ItemFilter, sort: &[SortKey], page: Page) -> Result<Vec<Item>>;

    /// Count items matching a filter.
    fn count_items(&self, filter: &ItemFilter) -> Result<u64>;

    /// Ranked full-text search. Empty queries match nothing; a query with
    /// no matches returns an empty list, never an error.
    fn search_items(&self, query: &str, filter: &ItemFilter, page: Page) -> Result<Vec<SearchHit>>;

    /// Patch many items. Every id is attempted; failures are aggregated.
    fn bulk_update_items(&mut self, ids: &[i64], patch: &ItemPatch) -> Result<BulkOutcome>;

    /// Delete many items. Every id is attempted; failures are aggregated.
    fn bulk_delete_items(&mut self, ids: &[i64], hard: bool) -> Result<BulkOutcome>;

    // ── Dependencies ──────────────────────────────────────────

    /// Persist a dependency edge. Cycle enforcement happens upstream via
    /// [`StoragePort::would_create_cycle`]; the store itself does not
    /// reject cyclic edges.
    fn create_dependency(&mut self, input: NewDependency) -> Result<Dependency>;

    /// Edges where `item_id` is the depending side.
    fn get_dependencies(&self, item_id: i64) -> Result<Vec<Dependency>>;

    /// Edges where `item_id` is the depended-on side.
    fn get_dependents(&self, item_id: i64) -> Result<Vec<Dependency>>;

    fn delete_dependency(&mut self, item_id: i64, depends_on_id: i64) -> Result<()>;

    /// The full current edge set across all items.
    fn all_dependencies(&self) -> Result<Vec<Dependency>>;

    /// Whether persisting `item_id -> depends_on_id` would close a cycle
    /// over existing `blocks`/`parent-of` edges.
    fn would_create_cycle(&self, item_id: i64, depends_on_id: i64) -> Result<bool> {
        Ok(self.check_cycle(item_id, depends_on_id)?.would_cycle)
    }

    /// Cycle check with the offending path for caller-facing rejection.
    fn check_cycle(&self, item_id: i64, depends_on_id: i64) -> Result<CycleCheck> {
        let graph = DependencyGraph::from_edges(&self.all_dependencies()?);
        let path = graph.cycle_path(item_id, depends_on_id);
        Ok(CycleCheck {
            would_cycle: path.is_some(),
            path,
        })
    }

    /// Items with at least one unresolved `blocks` dependency — an edge
    /// whose target is not done or archived.
    fn get_blocked_items(&self) -> Result<Vec<Item>> {
        let deps = self.all_dependencies()?;
        let mut blocked_ids: Vec<i64> = Vec::new();
        for dep in deps {
            if dep.dependency_type != crate::model::DependencyType::Blocks {
                continue;
            }
            let unresolved = self
                .get_item(dep.depends_on_id)?
                .is_some_and(|target| !target.status.is_resolved());
            if unresolved && !blocked_ids.contains(&dep.item_id) {
                blocked_ids.push(dep.item_id);
            }
        }
        self.get_items(&blocked_ids)
    }

    // ── Retrospectives ────────────────────────────────────────

    /// Upsert the retrospective for an item; a second save replaces the
    /// first.
    fn save_retrospective(&mut self, input: NewRetrospective) -> Result<Retrospective>;

    fn get_retrospective(&self, item_id: i64) -> Result<Option<Retrospective>>;

    fn delete_retrospective(&mut self, item_id: i64) -> Result<()>;

    // ── Reminders ─────────────────────────────────────────────

    fn create_reminder(&mut self, input: NewReminder) -> Result<Reminder>;

    fn get_reminder(&self, id: i64) -> Result<Option<Reminder>>;

    /// List reminders, optionally scoped to one item and/or restricted to
    /// active ones (not dismissed, not currently snoozed).
    fn list_reminders(&self, item_id: Option<i64>, active_only: bool) -> Result<Vec<Reminder>>;

    fn update_reminder(&mut self, id: i64, patch: ReminderPatch) -> Result<Reminder>;

    fn delete_reminder(&mut self, id: i64) -> Result<()>;

    // ── Links ─────────────────────────────────────────────────

    /// Record a commit link. Commit hashes are unique per store.
    fn create_link(&mut self, input: NewLink) -> Result<Link>;

    fn get_links(&self, item_id: i64) -> Result<Vec<Link>>;

    fn get_link_by_commit(&self, commit_hash: &str) -> Result<Option<Link>>;

    fn delete_link(&mut self, id: i64) -> Result<()>;

    // ── Transactions ──────────────────────────────────────────

    /// Begin a transaction. Starting a second one while open is an error.
    ///
    /// The flat-file backend tracks state only — it provides no isolation
    /// or rollback (documented limitation).
    fn begin_transaction(&mut self) -> Result<()>;

    fn commit_transaction(&mut self) -> Result<()>;

    fn rollback_transaction(&mut self) -> Result<()>;

    // ── Wire format ───────────────────────────────────────────

    /// Serialize every item as canonical JSONL: one self-contained record
    /// per line, legacy snake_case field names, RFC3339 timestamps.
    fn export_to_jsonl(&self) -> Result<String>;

    /// Import items from canonical JSONL, preserving ids. With `merge`,
    /// an existing id is replaced; without, it is reported as a per-line
    /// conflict. Malformed lines are collected, never fatal.
    fn import_from_jsonl(&mut self, data: &str, merge: bool) -> Result<BulkOutcome>;

    /// Store metadata: version, item count, last update, backend type.
    fn metadata(&self) -> Result<StoreMetadata>;
}

/// Run `f` inside a transaction, committing on success and rolling back
/// on error. The transaction is resolved on every exit path.
///
/// # Errors
///
/// Propagates the closure's error after rolling back, or any
/// begin/commit failure.
pub fn with_transaction<S, T, F>(store: &mut S, f: F) -> Result<T>
where
    S: StoragePort + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin_transaction()?;
    match f(store) {
        Ok(value) => {
            store.commit_transaction()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = store.rollback_transaction() {
                tracing::warn!("rollback after failed transaction also failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

/// Open the backend named by the config.
///
/// # Errors
///
/// Returns an error if the data directory or database cannot be opened.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn StoragePort>> {
    match config.backend {
        BackendKind::FlatFile => Ok(Box::new(flatfile::FlatFileStore::open(
            &config.data_dir,
            config.lock.clone(),
        )?)),
        BackendKind::Sqlite => Ok(Box::new(sqlite::SqliteStore::open(
            &config.data_dir.join(sqlite::DB_FILENAME),
        )?)),
    }
}
