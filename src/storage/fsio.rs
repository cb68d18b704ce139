//! Atomic file operations for the flat-file backend.
//!
//! All rewrites go through write-temp-then-rename so a reader never
//! observes a half-written file: it sees either the old contents or the
//! new contents, nothing in between. Appends fsync before returning.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Write content to a file atomically.
///
/// Writes to a sibling `.tmp` file, fsyncs, then renames over the
/// target. If any step fails the temp file is best-effort removed before
/// the original error propagates; the target is left untouched.
///
/// # Errors
///
/// Returns an error if any file operation fails.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("jsonl.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let write_and_rename = || -> Result<()> {
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(content.as_bytes())?;
            writer.flush()?;
            // Sync to disk before rename
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    };

    write_and_rename().inspect_err(|_| {
        // Cleanup failures are swallowed; the original error matters more.
        let _ = fs::remove_file(&temp_path);
    })
}

/// Append one line to a file, fsync'd for durability.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    file.sync_all()?;

    Ok(())
}

/// Read every record from a JSONL file.
///
/// A missing file reads as empty. Blank lines are skipped. A malformed
/// line is a [`Error::CorruptRecord`] carrying the line number.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line cannot be
/// parsed.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        let record: T = serde_json::from_str(&line).map_err(|e| Error::CorruptRecord {
            file: path.display().to_string(),
            line: line_num + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Atomically replace a JSONL file with the given records.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut content = String::new();
    for record in records {
        content.push_str(&serde_json::to_string(record)?);
        content.push('\n');
    }
    atomic_write(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        name: String,
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");

        atomic_write(&path, "old\n").unwrap();
        atomic_write(&path, "new\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn test_write_and_read_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");

        let rows = vec![
            Row {
                id: 1,
                name: "a".into(),
            },
            Row {
                id: 2,
                name: "b".into(),
            },
        ];
        write_records(&path, &rows).unwrap();

        let read: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(read, rows);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let rows: Vec<Row> = read_records(&dir.path().join("absent.jsonl")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_append_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");

        append_line(&path, r#"{"id":1,"name":"a"}"#).unwrap();
        append_line(&path, r#"{"id":2,"name":"b"}"#).unwrap();

        let read: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].id, 2);
    }

    #[test]
    fn test_corrupt_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");

        append_line(&path, r#"{"id":1,"name":"a"}"#).unwrap();
        append_line(&path, "not json").unwrap();

        let err = read_records::<Row>(&path).unwrap_err();
        match err {
            Error::CorruptRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("expected CorruptRecord, got {other}"),
        }
    }

    #[test]
    fn test_blank_lines_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"id\":1,\"name\":\"a\"}\n\n{\"id\":2,\"name\":\"b\"}\n").unwrap();

        let read: Vec<Row> = read_records(&path).unwrap();
        assert_eq!(read.len(), 2);
    }
}
