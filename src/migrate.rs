//! Migration between storage backends.
//!
//! The service treats both sides as opaque [`StoragePort`] instances and
//! moves records only through the public export/import contract — it has
//! no private knowledge of either engine. No joint lock is taken across
//! the two stores; correctness relies on each store's own locking plus
//! strictly sequential access from this single caller.
//!
//! Every phase reports structured results. Partial failure is data, not
//! an exception: per-item errors are aggregated and the rest of the
//! migration proceeds.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::Item;
use crate::query::{ItemFilter, Page};
use crate::storage::{fsio, BulkError, StoragePort};

/// Pre-migration check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPrecheck {
    pub source_count: u64,
    pub target_count: u64,
    pub warnings: Vec<String>,
}

/// Options for [`MigrationService::migrate`].
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Snapshot the source to a timestamped backup file first.
    pub create_backup: bool,
    /// Directory the backup file is written into (conventionally the
    /// source store's data directory).
    pub backup_dir: PathBuf,
    /// Merge into existing target data instead of clearing it.
    pub merge: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            backup_dir: PathBuf::from("."),
            merge: false,
        }
    }
}

/// Per-item statistics gathered while copying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationStats {
    pub by_priority: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub with_tags: usize,
    pub with_dependencies: usize,
    pub with_context: usize,
}

impl MigrationStats {
    fn record(&mut self, item: &Item) {
        *self
            .by_priority
            .entry(item.priority.as_str().to_string())
            .or_default() += 1;
        *self
            .by_status
            .entry(item.status.as_str().to_string())
            .or_default() += 1;
        if !item.tags.is_empty() {
            self.with_tags += 1;
        }
        if !item.dependencies.is_empty() {
            self.with_dependencies += 1;
        }
        if !item.context.is_empty() {
            self.with_context += 1;
        }
    }
}

/// Result of one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub failed: usize,
    pub errors: Vec<BulkError>,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    pub stats: MigrationStats,
}

/// Result of restoring a backup into the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub restored: usize,
    pub failed: usize,
    pub errors: Vec<BulkError>,
}

/// Options for [`MigrationService::validate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Also compare field values, not just the id sets.
    pub check_data_integrity: bool,
}

/// One field difference between source and target copies of an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMismatch {
    pub id: i64,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// Result of comparing source and target after a migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub source_count: u64,
    pub target_count: u64,
    pub missing_ids: Vec<i64>,
    pub mismatches: Vec<FieldMismatch>,
}

/// Counts plus the heuristic migrated flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub source_count: u64,
    pub target_count: u64,
    /// Source is non-empty and the target holds at least as many items.
    pub migrated: bool,
}

/// Orchestrates backup, copy, validation, and rollback between two
/// storage ports.
pub struct MigrationService<'a> {
    source: &'a mut dyn StoragePort,
    target: &'a mut dyn StoragePort,
}

impl<'a> MigrationService<'a> {
    pub fn new(source: &'a mut dyn StoragePort, target: &'a mut dyn StoragePort) -> Self {
        Self { source, target }
    }

    /// Report item counts and warn if the target already holds data.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be counted.
    pub fn can_migrate(&self) -> Result<MigrationPrecheck> {
        let source_count = self.source.count_items(&ItemFilter::default())?;
        let target_count = self.target.count_items(&ItemFilter::default())?;

        let mut warnings = Vec::new();
        if target_count > 0 {
            warnings.push(format!(
                "target already holds {target_count} items; they will be deleted unless merging"
            ));
        }
        if source_count == 0 {
            warnings.push("source store is empty".to_string());
        }

        Ok(MigrationPrecheck {
            source_count,
            target_count,
            warnings,
        })
    }

    /// Move every source item into the target.
    ///
    /// Phases: optional backup of the source, optional clear of the
    /// target (skipped when merging), then one import through the
    /// canonical JSONL contract. Per-item failures never abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error only for whole-run failures: an unreadable
    /// source, an unwritable backup file, or a target that rejects the
    /// import outright.
    pub fn migrate(&mut self, options: &MigrateOptions) -> Result<MigrationReport> {
        let items = self
            .source
            .list_items(&ItemFilter::default(), &[], Page::default())?;
        info!(count = items.len(), "starting migration");

        let backup_path = if options.create_backup {
            Some(self.write_backup(&options.backup_dir)?)
        } else {
            None
        };

        if !options.merge {
            let existing = self
                .target
                .list_items(&ItemFilter::default(), &[], Page::default())?;
            if !existing.is_empty() {
                let ids: Vec<i64> = existing.iter().map(|item| item.id).collect();
                let cleared = self.target.bulk_delete_items(&ids, true)?;
                debug!(cleared = cleared.succeeded, "cleared target before copy");
            }
        }

        let mut stats = MigrationStats::default();
        let mut data = String::new();
        for item in &items {
            stats.record(item);
            data.push_str(&serde_json::to_string(item)?);
            data.push('\n');
        }

        let outcome = self.target.import_from_jsonl(&data, options.merge)?;
        if !outcome.is_clean() {
            warn!(failed = outcome.failed, "migration finished with per-item errors");
        }

        Ok(MigrationReport {
            migrated: outcome.succeeded,
            failed: outcome.failed,
            errors: outcome.errors,
            backup_path,
            stats,
        })
    }

    /// Snapshot the source into a timestamped backup file.
    fn write_backup(&self, dir: &Path) -> Result<PathBuf> {
        let data = self.source.export_to_jsonl()?;
        let name = format!("backup-{}.jsonl", Utc::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(name);
        fsio::atomic_write(&path, &data)?;
        info!(path = %path.display(), "wrote migration backup");
        Ok(path)
    }

    /// Clear the target and restore it from a backup file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty path and an I/O error if
    /// the file is missing; the target is untouched in both cases.
    pub fn rollback(&mut self, backup_path: &Path) -> Result<RollbackReport> {
        if backup_path.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("backup path is empty".into()));
        }
        if !backup_path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup file not found: {}", backup_path.display()),
            )));
        }

        let data = std::fs::read_to_string(backup_path)?;

        let existing = self
            .target
            .list_items(&ItemFilter::default(), &[], Page::default())?;
        if !existing.is_empty() {
            let ids: Vec<i64> = existing.iter().map(|item| item.id).collect();
            self.target.bulk_delete_items(&ids, true)?;
        }

        let outcome = self.target.import_from_jsonl(&data, false)?;
        info!(
            restored = outcome.succeeded,
            path = %backup_path.display(),
            "rolled back target from backup"
        );
        Ok(RollbackReport {
            restored: outcome.succeeded,
            failed: outcome.failed,
            errors: outcome.errors,
        })
    }

    /// Compare source and target by id set and, optionally, field values.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be read.
    pub fn validate(&self, options: ValidateOptions) -> Result<ValidationReport> {
        let source_items = self
            .source
            .list_items(&ItemFilter::default(), &[], Page::default())?;
        let target_items = self
            .target
            .list_items(&ItemFilter::default(), &[], Page::default())?;

        let target_ids: HashSet<i64> = target_items.iter().map(|item| item.id).collect();
        let missing_ids: Vec<i64> = source_items
            .iter()
            .map(|item| item.id)
            .filter(|id| !target_ids.contains(id))
            .collect();

        let mut mismatches = Vec::new();
        if options.check_data_integrity {
            for expected in &source_items {
                let Some(actual) = target_items.iter().find(|item| item.id == expected.id)
                else {
                    continue;
                };
                compare_field(&mut mismatches, expected.id, "decision", &expected.decision, &actual.decision);
                compare_field(&mut mismatches, expected.id, "context", &expected.context, &actual.context);
                compare_field(
                    &mut mismatches,
                    expected.id,
                    "priority",
                    expected.priority.as_str(),
                    actual.priority.as_str(),
                );
                if expected.tags != actual.tags {
                    mismatches.push(FieldMismatch {
                        id: expected.id,
                        field: "tags".to_string(),
                        expected: expected.tags.join(","),
                        actual: actual.tags.join(","),
                    });
                }
            }
        }

        Ok(ValidationReport {
            valid: missing_ids.is_empty() && mismatches.is_empty(),
            source_count: source_items.len() as u64,
            target_count: target_items.len() as u64,
            missing_ids,
            mismatches,
        })
    }

    /// Counts on both sides plus the heuristic migrated flag.
    ///
    /// # Errors
    ///
    /// Returns an error if either store cannot be counted.
    pub fn status(&self) -> Result<MigrationStatus> {
        let source_count = self.source.count_items(&ItemFilter::default())?;
        let target_count = self.target.count_items(&ItemFilter::default())?;
        Ok(MigrationStatus {
            source_count,
            target_count,
            migrated: source_count > 0 && target_count >= source_count,
        })
    }
}

fn compare_field(
    mismatches: &mut Vec<FieldMismatch>,
    id: i64,
    field: &str,
    expected: &str,
    actual: &str,
) {
    if expected != actual {
        mismatches.push(FieldMismatch {
            id,
            field: field.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
}
