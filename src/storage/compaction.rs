//! Log compaction
//!
//! Pass 1 only looks for garbage (a repeated `Id` or a tombstone). Pass 2
//! keeps the latest non-deleted entry per `Id`, writes those payloads
//! verbatim and in append order to `<log>.compact`, syncs, and renames
//! the result over the log.

use crate::common::{format_bytes, Error, Result};
use crate::model::Schema;
use crate::storage::log::{scan_entries, LEN_PREFIX};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Result of the detection pass
#[derive(Debug, Clone, Default)]
pub struct LogScan {
    pub entries: u64,
    pub bytes: u64,
    pub repeated_ids: bool,
    pub tombstones: bool,
}

impl LogScan {
    pub fn needs_rewrite(&self) -> bool {
        self.repeated_ids || self.tombstones
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactReport {
    pub entries_before: u64,
    pub entries_after: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub rewritten: bool,
}

impl CompactReport {
    pub(crate) fn untouched(scan: &LogScan) -> Self {
        Self {
            entries_before: scan.entries,
            entries_after: scan.entries,
            bytes_before: scan.bytes,
            bytes_after: scan.bytes,
            rewritten: false,
        }
    }

    pub fn bytes_freed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Pass 1: does the log hold anything compaction would drop?
pub fn scan(path: &Path, schema: &std::sync::Arc<Schema>) -> Result<LogScan> {
    let mut result = LogScan::default();
    let mut seen: HashSet<Uuid> = HashSet::new();

    scan_entries(path, |offset, payload| {
        let record = schema.decode(&payload).map_err(|e| {
            Error::Corrupted(format!("entry at offset {} of {:?}: {}", offset, path, e))
        })?;
        result.entries += 1;
        result.bytes += LEN_PREFIX + payload.len() as u64;
        if record.is_deleted() {
            result.tombstones = true;
        }
        if !seen.insert(record.id()) {
            result.repeated_ids = true;
        }
        Ok(())
    })?;

    Ok(result)
}

/// Pass 2: rewrite the log with only the latest live entry per `Id`.
pub fn rewrite(
    path: &Path,
    schema: &std::sync::Arc<Schema>,
    scan: &LogScan,
) -> Result<CompactReport> {
    let mut latest: HashMap<Uuid, (u64, Vec<u8>, bool)> = HashMap::new();
    let mut seq = 0u64;

    scan_entries(path, |offset, payload| {
        let record = schema.decode(&payload).map_err(|e| {
            Error::Corrupted(format!("entry at offset {} of {:?}: {}", offset, path, e))
        })?;
        latest.insert(record.id(), (seq, payload, record.is_deleted()));
        seq += 1;
        Ok(())
    })?;

    let mut survivors: Vec<(u64, Vec<u8>)> = latest
        .into_values()
        .filter(|(_, _, deleted)| !deleted)
        .map(|(seq, payload, _)| (seq, payload))
        .collect();
    survivors.sort_by_key(|(seq, _)| *seq);

    let temp_path = temp_path(path);
    let bytes_after = match write_entries(&temp_path, &survivors) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::CompactFailed(format!(
            "rename {:?} -> {:?}: {}",
            temp_path, path, e
        )));
    }
    sync_parent_dir(path);

    let report = CompactReport {
        entries_before: scan.entries,
        entries_after: survivors.len() as u64,
        bytes_before: scan.bytes,
        bytes_after,
        rewritten: true,
    };

    tracing::info!(
        "Compacted {:?}: {} -> {} entries, freed {}",
        path,
        report.entries_before,
        report.entries_after,
        format_bytes(report.bytes_freed())
    );

    Ok(report)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".compact");
    path.with_file_name(name)
}

fn write_entries(path: &Path, entries: &[(u64, Vec<u8>)]) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut bytes = 0u64;

    for (_, payload) in entries {
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(payload)?;
        bytes += LEN_PREFIX + payload.len() as u64;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(bytes)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::FlushPolicy;
    use crate::model::{FieldType, Record, Value};
    use crate::storage::log::{LogOptions, LogStore};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::builder("item", 1)
                .field(2, "label", FieldType::String)
                .field(3, "qty", FieldType::I64)
                .build()
                .unwrap(),
        )
    }

    fn item(schema: &Arc<Schema>, label: &str, qty: i64) -> Record {
        schema
            .new_blank()
            .with(2, Value::String(label.into()))
            .unwrap()
            .with(3, Value::I64(qty))
            .unwrap()
    }

    fn open(path: &Path, schema: &Arc<Schema>) -> LogStore {
        LogStore::open(
            path,
            schema.clone(),
            LogOptions {
                flush_policy: FlushPolicy::Never,
                flush_interval: Duration::from_secs(1),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_compact_clean_log_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item.log");
        let schema = schema();
        let mut log = open(&path, &schema);

        for i in 0..10 {
            log.append(&item(&schema, "x", i).encode().unwrap()).unwrap();
        }
        log.flush().unwrap();
        let before = fs::read(&path).unwrap();

        let report = log.compact().unwrap();
        assert!(!report.rewritten);
        assert_eq!(report.entries_before, 10);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_compact_drops_garbage_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item.log");
        let schema = schema();
        let mut log = open(&path, &schema);

        let mut kept = item(&schema, "kept", 1);
        let mut gone = item(&schema, "gone", 2);
        let other = item(&schema, "other", 3);

        log.append(&kept.encode().unwrap()).unwrap();
        log.append(&gone.encode().unwrap()).unwrap();
        log.append(&other.encode().unwrap()).unwrap();
        kept.set(3, Value::I64(10)).unwrap();
        log.append(&kept.encode().unwrap()).unwrap();
        gone.set_deleted(true);
        log.append(&gone.encode().unwrap()).unwrap();

        let visible_before = log.read_all().unwrap();

        let report = log.compact().unwrap();
        assert!(report.rewritten);
        assert_eq!(report.entries_before, 5);
        assert_eq!(report.entries_after, 2);
        assert!(report.bytes_freed() > 0);

        assert_eq!(log.read_all().unwrap(), visible_before);
        assert_eq!(log.entry_count().unwrap(), 2);

        let bytes = fs::read(&path).unwrap();
        let again = log.compact().unwrap();
        assert!(!again.rewritten);
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn test_append_after_compact_lands_in_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item.log");
        let schema = schema();
        let mut log = open(&path, &schema);

        let mut a = item(&schema, "a", 1);
        log.append(&a.encode().unwrap()).unwrap();
        a.set(3, Value::I64(2)).unwrap();
        log.append(&a.encode().unwrap()).unwrap();
        log.compact().unwrap();

        let b = item(&schema, "b", 5);
        log.append(&b.encode().unwrap()).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_compact_error_leaves_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("item.log");
        let schema = schema();

        {
            let log = open(&path, &schema);
            let mut a = item(&schema, "a", 1);
            log.append(&a.encode().unwrap()).unwrap();
            a.set_deleted(true);
            log.append(&a.encode().unwrap()).unwrap();
        }
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&64u64.to_le_bytes()).unwrap();
        drop(file);
        let before = fs::read(&path).unwrap();

        let mut log = open(&path, &schema);
        assert!(matches!(log.compact(), Err(Error::TruncatedEntry { .. })));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!temp_path(&path).exists());
    }
}
