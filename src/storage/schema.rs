//! SQLite schema for the relational backend.
//!
//! Timestamps are stored as INTEGER Unix milliseconds. Tag and
//! dependency lists are stored as JSON text and queried through the
//! `json_each` table-valued function. The FTS5 index is external-content
//! over the items table and kept in sync by triggers, so search never
//! drifts from the canonical rows.

use rusqlite::Connection;

use crate::error::Result;

/// The complete schema, applied idempotently at open.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Core Tables
-- ====================

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY,
    decision TEXT NOT NULL,
    context TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'pending',
    tags TEXT NOT NULL DEFAULT '[]',
    priority TEXT NOT NULL DEFAULT 'medium',
    conversation_ref TEXT,
    dependencies TEXT NOT NULL DEFAULT '[]',
    pii_metadata TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK (id > 0)
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
CREATE INDEX IF NOT EXISTS idx_items_priority ON items(priority);
CREATE INDEX IF NOT EXISTS idx_items_updated ON items(updated_at DESC);

CREATE TABLE IF NOT EXISTS dependencies (
    item_id INTEGER NOT NULL,
    depends_on_id INTEGER NOT NULL,
    dependency_type TEXT NOT NULL DEFAULT 'blocks',
    created_at INTEGER NOT NULL,
    PRIMARY KEY (item_id, depends_on_id),
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE,
    FOREIGN KEY (depends_on_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id);

CREATE TABLE IF NOT EXISTS retrospectives (
    item_id INTEGER PRIMARY KEY,
    outcome TEXT NOT NULL,
    effort REAL,
    impact REAL,
    completed_at INTEGER NOT NULL,
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS reminders (
    id INTEGER PRIMARY KEY,
    item_id INTEGER NOT NULL,
    trigger_type TEXT NOT NULL,
    trigger_config TEXT,
    triggered_at INTEGER,
    dismissed_at INTEGER,
    snoozed_until INTEGER,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_reminders_item ON reminders(item_id);

CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY,
    item_id INTEGER NOT NULL,
    commit_hash TEXT NOT NULL UNIQUE,
    message TEXT,
    commit_date INTEGER,
    file_path TEXT,
    detected_at INTEGER NOT NULL,
    FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_links_item ON links(item_id);

-- ====================
-- Full-Text Search
-- ====================

CREATE VIRTUAL TABLE IF NOT EXISTS items_fts USING fts5(
    decision, context, tags,
    content='items', content_rowid='id'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS items_ai AFTER INSERT ON items BEGIN
    INSERT INTO items_fts(rowid, decision, context, tags)
    VALUES (NEW.id, NEW.decision, NEW.context, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS items_ad AFTER DELETE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, decision, context, tags)
    VALUES ('delete', OLD.id, OLD.decision, OLD.context, OLD.tags);
END;

CREATE TRIGGER IF NOT EXISTS items_au AFTER UPDATE ON items BEGIN
    INSERT INTO items_fts(items_fts, rowid, decision, context, tags)
    VALUES ('delete', OLD.id, OLD.decision, OLD.context, OLD.tags);
    INSERT INTO items_fts(rowid, decision, context, tags)
    VALUES (NEW.id, NEW.decision, NEW.context, NEW.tags);
END;
";

/// Configure pragmas and apply the schema to a connection.
///
/// # Errors
///
/// Returns an error if any pragma or DDL statement fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // WAL for concurrent-read-friendly durability; NORMAL sync is the
    // usual pairing.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_twice() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let on: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(on, 1);
    }

    #[test]
    fn test_fts_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'items_fts'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
