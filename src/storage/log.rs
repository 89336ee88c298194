//! Append-only record log
//!
//! One file per record type. Log format: repeating
//! [LEN: u64 little-endian][PAYLOAD: LEN bytes], each payload being one
//! encoded record. Updates and deletes are new entries; a record whose
//! `Deleted` flag is set is a tombstone.
//!
//! Appends go through a buffered writer guarded by a mutex. A background
//! thread flushes the buffer on a timer, so data written since the last
//! flush may be lost on a crash. Use [`FlushPolicy::Always`] to trade
//! latency for durability.

use crate::common::{Error, FlushPolicy, Result, StorageConfig};
use crate::model::{Record, Schema};
use crate::storage::compaction::{self, CompactReport};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

/// Size of the length prefix of every entry
pub const LEN_PREFIX: u64 = 8;

/// Floor for the background flush period
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Flush behaviour of a log
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub flush_policy: FlushPolicy,
    pub flush_interval: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            flush_policy: FlushPolicy::Interval,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl From<&StorageConfig> for LogOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            flush_policy: config.flush_policy,
            flush_interval: config.flush_interval(),
        }
    }
}

type SharedWriter = Arc<Mutex<BufWriter<File>>>;

/// Append-only log of one record type
pub struct LogStore {
    path: PathBuf,
    schema: Arc<Schema>,
    writer: SharedWriter,
    options: LogOptions,
    flusher: Option<Flusher>,
    /// Set when the file at `path` could not be reopened after a rewrite
    detached: AtomicBool,
}

impl LogStore {
    /// Open or create the log file and start its flush timer.
    pub fn open(path: impl AsRef<Path>, schema: Arc<Schema>, options: LogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Arc::new(Mutex::new(BufWriter::new(open_append(&path)?)));

        let flusher = match options.flush_policy {
            FlushPolicy::Interval => Some(Flusher::spawn(
                writer.clone(),
                options.flush_interval.max(MIN_FLUSH_INTERVAL),
                schema.name(),
            )?),
            FlushPolicy::Always | FlushPolicy::Never => None,
        };

        tracing::debug!("Opened log {:?} ({:?})", path, options.flush_policy);

        Ok(Self {
            path,
            schema,
            writer,
            options,
            flusher,
            detached: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Append one encoded record.
    pub fn append(&self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::InvalidRecord("empty log payload".into()));
        }

        let mut writer = self.lock_writer()?;
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(payload)?;

        if self.options.flush_policy == FlushPolicy::Always {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        Ok(())
    }

    /// Flush buffered entries to the OS.
    pub fn flush(&self) -> Result<()> {
        self.lock_writer()?.flush()?;
        Ok(())
    }

    /// Flush and fsync.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.lock_writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Replay the whole log and return the live records.
    ///
    /// Keeps the latest entry per `Id`; a tombstone drops the `Id`.
    /// Survivors come back in the order of their latest append.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let mut writer = self.lock_writer()?;
        writer.flush()?;

        let mut latest: HashMap<Uuid, (u64, Record)> = HashMap::new();
        let mut seq = 0u64;
        scan_entries(&self.path, |offset, payload| {
            let record = self.schema.decode(&payload).map_err(|e| {
                Error::Corrupted(format!("entry at offset {} of {:?}: {}", offset, self.path, e))
            })?;
            if record.is_deleted() {
                latest.remove(&record.id());
            } else {
                latest.insert(record.id(), (seq, record));
            }
            seq += 1;
            Ok(())
        })?;
        drop(writer);

        let mut records: Vec<(u64, Record)> = latest.into_values().collect();
        records.sort_by_key(|(seq, _)| *seq);

        tracing::debug!(
            "Replayed {} entries from {:?}: {} live records",
            seq,
            self.path,
            records.len()
        );

        Ok(records.into_iter().map(|(_, record)| record).collect())
    }

    /// Number of physical entries in the file
    pub fn entry_count(&self) -> Result<u64> {
        let mut writer = self.lock_writer()?;
        writer.flush()?;
        let mut count = 0u64;
        scan_entries(&self.path, |_, _| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Drop superseded entries and tombstones.
    ///
    /// Clean logs (no repeated `Id`, no tombstone) are left untouched.
    /// The rewrite goes to a temporary file that is renamed over the log
    /// only once it is complete and synced.
    pub fn compact(&mut self) -> Result<CompactReport> {
        let mut writer = self.lock_writer()?;
        writer.flush()?;

        let scan = compaction::scan(&self.path, &self.schema)?;
        if !scan.needs_rewrite() {
            tracing::debug!("Log {:?} is clean, skipping compaction", self.path);
            return Ok(CompactReport::untouched(&scan));
        }

        let report = compaction::rewrite(&self.path, &self.schema, &scan)?;

        // The old handle points at the replaced file
        self.reattach(&mut writer, open_append(&self.path))?;

        Ok(report)
    }

    /// Swap in the handle of the rewritten file. If it cannot be opened the
    /// log refuses every further operation.
    fn reattach(&self, writer: &mut BufWriter<File>, reopened: std::io::Result<File>) -> Result<()> {
        match reopened {
            Ok(file) => {
                *writer = BufWriter::new(file);
                Ok(())
            }
            Err(e) => {
                self.detached.store(true, Ordering::SeqCst);
                tracing::error!("Log {:?} lost its append handle: {}", self.path, e);
                Err(Error::CompactFailed(format!(
                    "reopening {:?} after rewrite: {}",
                    self.path, e
                )))
            }
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, BufWriter<File>>> {
        if self.detached.load(Ordering::SeqCst) {
            return Err(Error::CompactFailed(format!(
                "log {:?} is detached from its file",
                self.path
            )));
        }
        Ok(self.writer.lock()?)
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Some(flusher) = self.flusher.take() {
            flusher.stop();
        }
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush log {:?} on close: {}", self.path, e);
        }
    }
}

/// Background flush timer of one log
struct Flusher {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    fn spawn(writer: SharedWriter, interval: Duration, name: &str) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let log_name = name.to_string();

        let handle = thread::Builder::new()
            .name(format!("keeldb-flush-{}", name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let flushed = writer
                            .lock()
                            .map_err(Error::from)
                            .and_then(|mut w| w.flush().map_err(Error::from));
                        if let Err(e) = flushed {
                            tracing::warn!("Background flush of {} failed: {}", log_name, e);
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(Self { stop_tx, handle })
    }

    fn stop(self) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::warn!("Flush thread panicked");
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)
}

/// Walk every `(offset, payload)` entry of a log file.
///
/// A missing file is an empty log. A partial length prefix, or a payload
/// shorter than its prefix, is a [`Error::TruncatedEntry`].
pub(crate) fn scan_entries<F>(path: &Path, mut callback: F) -> Result<()>
where
    F: FnMut(u64, Vec<u8>) -> Result<()>,
{
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut offset = 0u64;

    loop {
        let mut len_bytes = [0u8; LEN_PREFIX as usize];
        let got = read_full(&mut reader, &mut len_bytes)?;
        if got == 0 {
            break;
        }
        if got < len_bytes.len() {
            return Err(Error::TruncatedEntry {
                offset,
                expected: LEN_PREFIX,
                available: got as u64,
            });
        }
        let len = u64::from_le_bytes(len_bytes);

        // Grows with the data actually present, so a corrupt length
        // cannot force a huge allocation
        let mut payload = Vec::new();
        (&mut reader).take(len).read_to_end(&mut payload)?;
        if (payload.len() as u64) < len {
            return Err(Error::TruncatedEntry {
                offset,
                expected: len,
                available: payload.len() as u64,
            });
        }

        callback(offset, payload)?;
        offset += LEN_PREFIX + len;
    }

    Ok(())
}

/// Read until `buf` is full or EOF; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
