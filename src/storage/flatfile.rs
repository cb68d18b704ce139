//! Flat-file storage backend.
//!
//! One JSONL file per entity type inside a single data directory, plus a
//! lock file. Every write across every entity file serializes through
//! the one directory-wide advisory lock; id assignment is `max + 1`
//! computed under that lock, which is what makes it race-free. Mutations
//! are read-modify-rewrite with an atomic rename; pure inserts append.
//!
//! Reads take no lock. The rename-on-write pattern guarantees a reader
//! sees either the old or the new complete file, never a torn one.
//!
//! Transactions here are not real: begin/commit/rollback only track
//! state so misuse is surfaced. There is no isolation and no rollback —
//! a multi-step failure can leave partial state. Known limitation.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::model::{
    Dependency, Item, ItemPatch, ItemStatus, Link, NewDependency, NewItem, NewLink, NewReminder,
    NewRetrospective, Reminder, ReminderPatch, Retrospective,
};
use crate::query::{sort_items, ItemFilter, Page, SortKey};
use crate::storage::fsio::{append_line, read_records, write_records};
use crate::storage::lock::DirLock;
use crate::storage::{BulkError, BulkOutcome, SearchHit, StorageType, StoragePort, StoreMetadata};

const ITEMS_FILE: &str = "items.jsonl";
const DEPENDENCIES_FILE: &str = "dependencies.jsonl";
const RETROSPECTIVES_FILE: &str = "retrospectives.jsonl";
const REMINDERS_FILE: &str = "reminders.jsonl";
const LINKS_FILE: &str = "links.jsonl";

/// Search field weights: decision > context > tags.
const DECISION_WEIGHT: f64 = 2.0;
const CONTEXT_WEIGHT: f64 = 1.0;
const TAG_WEIGHT: f64 = 0.5;

/// JSONL-backed store coordinated by a directory-wide advisory lock.
#[derive(Debug)]
pub struct FlatFileStore {
    data_dir: PathBuf,
    lock_config: LockConfig,
    tx_open: bool,
}

impl FlatFileStore {
    /// Open (creating if needed) a store rooted at `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(data_dir: &Path, lock_config: LockConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            lock_config,
            tx_open: false,
        })
    }

    /// The data directory this store reads and writes.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Run `f` holding the directory lock.
    fn with_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _lock = DirLock::acquire(&self.data_dir, &self.lock_config)?;
        f()
    }

    fn read_items(&self) -> Result<Vec<Item>> {
        read_records(&self.file(ITEMS_FILE))
    }

    fn read_dependencies(&self) -> Result<Vec<Dependency>> {
        read_records(&self.file(DEPENDENCIES_FILE))
    }

    fn read_retrospectives(&self) -> Result<Vec<Retrospective>> {
        read_records(&self.file(RETROSPECTIVES_FILE))
    }

    fn read_reminders(&self) -> Result<Vec<Reminder>> {
        read_records(&self.file(REMINDERS_FILE))
    }

    fn read_links(&self) -> Result<Vec<Link>> {
        read_records(&self.file(LINKS_FILE))
    }

    fn require_item(&self, id: i64) -> Result<()> {
        if self.read_items()?.iter().any(|item| item.id == id) {
            Ok(())
        } else {
            Err(Error::ItemNotFound { id })
        }
    }
}

fn next_id<T>(records: &[T], id_of: impl Fn(&T) -> i64) -> i64 {
    records.iter().map(id_of).max().unwrap_or(0) + 1
}

/// Bracket the first occurrence of `term` in `text`, with a window of
/// surrounding context. Mirrors the snippet markers the SQLite backend
/// emits.
fn highlight(text: &str, term: &str) -> Option<String> {
    let needle = term.to_lowercase();
    let lower = text.to_lowercase();
    let pos = lower.find(&needle)?;
    let end = pos + needle.len();

    // Case folding can shift byte offsets for non-ASCII text; when the
    // offsets do not land on boundaries of the original, return it whole.
    if end > text.len() || !text.is_char_boundary(pos) || !text.is_char_boundary(end) {
        return Some(text.to_string());
    }

    let window = 30;
    let start = text[..pos]
        .char_indices()
        .rev()
        .nth(window)
        .map_or(0, |(i, _)| i);
    let stop = text[end..]
        .char_indices()
        .nth(window)
        .map_or(text.len(), |(i, _)| end + i);

    let mut out = String::new();
    if start > 0 {
        out.push('…');
    }
    out.push_str(&text[start..pos]);
    out.push('[');
    out.push_str(&text[pos..end]);
    out.push(']');
    out.push_str(&text[end..stop]);
    if stop < text.len() {
        out.push('…');
    }
    Some(out)
}

fn score_item(item: &Item, terms: &[String]) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut highlights = Vec::new();

    for term in terms {
        if let Some(snippet) = highlight(&item.decision, term) {
            score += DECISION_WEIGHT;
            highlights.push(snippet);
        }
        if let Some(snippet) = highlight(&item.context, term) {
            score += CONTEXT_WEIGHT;
            highlights.push(snippet);
        }
        if item
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&term.to_lowercase()))
        {
            score += TAG_WEIGHT;
        }
    }

    (score, highlights)
}

impl StoragePort for FlatFileStore {
    fn create_item(&mut self, input: NewItem) -> Result<Item> {
        self.with_lock(|| {
            let items = self.read_items()?;
            let id = next_id(&items, |item| item.id);
            let item = input.into_item(id, Utc::now());
            append_line(
                &self.file(ITEMS_FILE),
                &serde_json::to_string(&item)?,
            )?;
            debug!(id, "created item");
            Ok(item)
        })
    }

    fn get_item(&self, id: i64) -> Result<Option<Item>> {
        Ok(self.read_items()?.into_iter().find(|item| item.id == id))
    }

    fn get_items(&self, ids: &[i64]) -> Result<Vec<Item>> {
        let items = self.read_items()?;
        Ok(ids
            .iter()
            .filter_map(|id| items.iter().find(|item| item.id == *id).cloned())
            .collect())
    }

    fn update_item(&mut self, id: i64, patch: ItemPatch) -> Result<Item> {
        self.with_lock(|| {
            let mut items = self.read_items()?;
            let item = items
                .iter_mut()
                .find(|item| item.id == id)
                .ok_or(Error::ItemNotFound { id })?;
            item.apply(&patch, Utc::now());
            let updated = item.clone();
            write_records(&self.file(ITEMS_FILE), &items)?;
            Ok(updated)
        })
    }

    fn delete_item(&mut self, id: i64, hard: bool) -> Result<()> {
        if !hard {
            return self
                .update_item(
                    id,
                    ItemPatch {
                        status: Some(ItemStatus::Archived),
                        ..ItemPatch::default()
                    },
                )
                .map(|_| ());
        }

        self.with_lock(|| {
            let mut items = self.read_items()?;
            let before = items.len();
            items.retain(|item| item.id != id);
            if items.len() == before {
                return Err(Error::ItemNotFound { id });
            }
            write_records(&self.file(ITEMS_FILE), &items)?;

            // Cascade over the other entity files.
            let mut deps = self.read_dependencies()?;
            deps.retain(|d| d.item_id != id && d.depends_on_id != id);
            write_records(&self.file(DEPENDENCIES_FILE), &deps)?;

            let mut retros = self.read_retrospectives()?;
            retros.retain(|r| r.item_id != id);
            write_records(&self.file(RETROSPECTIVES_FILE), &retros)?;

            let mut reminders = self.read_reminders()?;
            reminders.retain(|r| r.item_id != id);
            write_records(&self.file(REMINDERS_FILE), &reminders)?;

            let mut links = self.read_links()?;
            links.retain(|l| l.item_id != id);
            write_records(&self.file(LINKS_FILE), &links)?;

            debug!(id, "hard-deleted item with cascade");
            Ok(())
        })
    }

    fn list_items(&self, filter: &ItemFilter, sort: &[SortKey], page: Page) -> Result<Vec<Item>> {
        let mut items: Vec<Item> = self
            .read_items()?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();
        sort_items(&mut items, sort);
        Ok(page.apply(items))
    }

    fn count_items(&self, filter: &ItemFilter) -> Result<u64> {
        let count = self
            .read_items()?
            .iter()
            .filter(|item| filter.matches(item))
            .count();
        Ok(count as u64)
    }

    fn search_items(&self, query: &str, filter: &ItemFilter, page: Page) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .read_items()?
            .into_iter()
            .filter(|item| filter.matches(item))
            .filter_map(|item| {
                let (score, highlights) = score_item(&item, &terms);
                (score > 0.0).then_some(SearchHit {
                    item,
                    score,
                    highlights,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.item.id.cmp(&b.item.id))
        });
        Ok(page.apply(hits))
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
        self.with_lock(|| {
            self.require_item(input.item_id)?;
            self.require_item(input.depends_on_id)?;

            let deps = self.read_dependencies()?;
            if let Some(existing) = deps
                .iter()
                .find(|d| d.item_id == input.item_id && d.depends_on_id == input.depends_on_id)
            {
                // Composite key already present; keep the original edge.
                return Ok(existing.clone());
            }

            let dep = Dependency {
                item_id: input.item_id,
                depends_on_id: input.depends_on_id,
                dependency_type: input.dependency_type,
                created_at: Utc::now(),
            };
            append_line(
                &self.file(DEPENDENCIES_FILE),
                &serde_json::to_string(&dep)?,
            )?;
            Ok(dep)
        })
    }

    fn get_dependencies(&self, item_id: i64) -> Result<Vec<Dependency>> {
        Ok(self
            .read_dependencies()?
            .into_iter()
            .filter(|d| d.item_id == item_id)
            .collect())
    }

    fn get_dependents(&self, item_id: i64) -> Result<Vec<Dependency>> {
        Ok(self
            .read_dependencies()?
            .into_iter()
            .filter(|d| d.depends_on_id == item_id)
            .collect())
    }

    fn delete_dependency(&mut self, item_id: i64, depends_on_id: i64) -> Result<()> {
        self.with_lock(|| {
            let mut deps = self.read_dependencies()?;
            let before = deps.len();
            deps.retain(|d| !(d.item_id == item_id && d.depends_on_id == depends_on_id));
            if deps.len() == before {
                return Err(Error::DependencyNotFound {
                    item_id,
                    depends_on_id,
                });
            }
            write_records(&self.file(DEPENDENCIES_FILE), &deps)
        })
    }

    fn all_dependencies(&self) -> Result<Vec<Dependency>> {
        self.read_dependencies()
    }

    fn save_retrospective(&mut self, input: NewRetrospective) -> Result<Retrospective> {
        self.with_lock(|| {
            self.require_item(input.item_id)?;

            let retro = Retrospective {
                item_id: input.item_id,
                outcome: input.outcome,
                effort: input.effort,
                impact: input.impact,
                completed_at: Utc::now(),
            };

            let mut retros = self.read_retrospectives()?;
            match retros.iter_mut().find(|r| r.item_id == input.item_id) {
                Some(existing) => *existing = retro.clone(),
                None => retros.push(retro.clone()),
            }
            write_records(&self.file(RETROSPECTIVES_FILE), &retros)?;
            Ok(retro)
        })
    }

    fn get_retrospective(&self, item_id: i64) -> Result<Option<Retrospective>> {
        Ok(self
            .read_retrospectives()?
            .into_iter()
            .find(|r| r.item_id == item_id))
    }

    fn delete_retrospective(&mut self, item_id: i64) -> Result<()> {
        self.with_lock(|| {
            let mut retros = self.read_retrospectives()?;
            let before = retros.len();
            retros.retain(|r| r.item_id != item_id);
            if retros.len() == before {
                return Err(Error::RetrospectiveNotFound { item_id });
            }
            write_records(&self.file(RETROSPECTIVES_FILE), &retros)
        })
    }

    fn create_reminder(&mut self, input: NewReminder) -> Result<Reminder> {
        self.with_lock(|| {
            self.require_item(input.item_id)?;

            let reminders = self.read_reminders()?;
            let reminder = Reminder {
                id: next_id(&reminders, |r| r.id),
                item_id: input.item_id,
                trigger_type: input.trigger_type,
                trigger_config: input.trigger_config,
                triggered_at: None,
                dismissed_at: None,
                snoozed_until: None,
                created_at: Utc::now(),
            };
            append_line(
                &self.file(REMINDERS_FILE),
                &serde_json::to_string(&reminder)?,
            )?;
            Ok(reminder)
        })
    }

    fn get_reminder(&self, id: i64) -> Result<Option<Reminder>> {
        Ok(self.read_reminders()?.into_iter().find(|r| r.id == id))
    }

    fn list_reminders(&self, item_id: Option<i64>, active_only: bool) -> Result<Vec<Reminder>> {
        let now = Utc::now();
        Ok(self
            .read_reminders()?
            .into_iter()
            .filter(|r| item_id.is_none_or(|id| r.item_id == id))
            .filter(|r| !active_only || r.is_active(now))
            .collect())
    }

    fn update_reminder(&mut self, id: i64, patch: ReminderPatch) -> Result<Reminder> {
        self.with_lock(|| {
            let mut reminders = self.read_reminders()?;
            let reminder = reminders
                .iter_mut()
                .find(|r| r.id == id)
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

            let updated = reminder.clone();
            write_records(&self.file(REMINDERS_FILE), &reminders)?;
            Ok(updated)
        })
    }

    fn delete_reminder(&mut self, id: i64) -> Result<()> {
        self.with_lock(|| {
            let mut reminders = self.read_reminders()?;
            let before = reminders.len();
            reminders.retain(|r| r.id != id);
            if reminders.len() == before {
                return Err(Error::ReminderNotFound { id });
            }
            write_records(&self.file(REMINDERS_FILE), &reminders)
        })
    }

    fn create_link(&mut self, input: NewLink) -> Result<Link> {
        self.with_lock(|| {
            self.require_item(input.item_id)?;

            let links = self.read_links()?;
            if links.iter().any(|l| l.commit_hash == input.commit_hash) {
                return Err(Error::DuplicateCommit {
                    commit_hash: input.commit_hash,
                });
            }

            let link = Link {
                id: next_id(&links, |l| l.id),
                item_id: input.item_id,
                commit_hash: input.commit_hash,
                message: input.message,
                commit_date: input.commit_date,
                file_path: input.file_path,
                detected_at: Utc::now(),
            };
            append_line(&self.file(LINKS_FILE), &serde_json::to_string(&link)?)?;
            Ok(link)
        })
    }

    fn get_links(&self, item_id: i64) -> Result<Vec<Link>> {
        Ok(self
            .read_links()?
            .into_iter()
            .filter(|l| l.item_id == item_id)
            .collect())
    }

    fn get_link_by_commit(&self, commit_hash: &str) -> Result<Option<Link>> {
        Ok(self
            .read_links()?
            .into_iter()
            .find(|l| l.commit_hash == commit_hash))
    }

    fn delete_link(&mut self, id: i64) -> Result<()> {
        self.with_lock(|| {
            let mut links = self.read_links()?;
            let before = links.len();
            links.retain(|l| l.id != id);
            if links.len() == before {
                return Err(Error::LinkNotFound { id });
            }
            write_records(&self.file(LINKS_FILE), &links)
        })
    }

    fn begin_transaction(&mut self) -> Result<()> {
        if self.tx_open {
            return Err(Error::TransactionAlreadyOpen);
        }
        self.tx_open = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        if !self.tx_open {
            return Err(Error::NoOpenTransaction);
        }
        self.tx_open = false;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        if !self.tx_open {
            return Err(Error::NoOpenTransaction);
        }
        // No staged state to discard; writes already hit the files.
        self.tx_open = false;
        Ok(())
    }

    fn export_to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for item in self.read_items()? {
            out.push_str(&serde_json::to_string(&item)?);
            out.push('\n');
        }
        Ok(out)
    }

    fn import_from_jsonl(&mut self, data: &str, merge: bool) -> Result<BulkOutcome> {
        self.with_lock(|| {
            let mut items = self.read_items()?;
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

                match items.iter_mut().find(|item| item.id == incoming.id) {
                    Some(existing) => {
                        if merge {
                            *existing = incoming;
                            outcome.ok();
                        } else {
                            outcome.fail(BulkError::for_id(
                                incoming.id,
                                "item id already exists",
                            ));
                        }
                    }
                    None => {
                        items.push(incoming);
                        outcome.ok();
                    }
                }
            }

            write_records(&self.file(ITEMS_FILE), &items)?;
            debug!(
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                "imported items from jsonl"
            );
            Ok(outcome)
        })
    }

    fn metadata(&self) -> Result<StoreMetadata> {
        let items = self.read_items()?;
        Ok(StoreMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            item_count: items.len() as u64,
            last_updated: items.iter().map(|item| item.updated_at).max(),
            storage_type: StorageType::FlatFile,
        })
    }
}
