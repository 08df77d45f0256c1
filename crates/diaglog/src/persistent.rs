//! Persistent store implementation
//!
//! This module provides a file-based persistent implementation of the record
//! store, using an append-only log of length-prefixed postcard frames. The
//! log is replayed on startup to reconstruct the in-memory record cache.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::error::StoreError;
use crate::record::{LogRecord, Severity};
use crate::retention::RetentionPolicy;
use crate::{INITIAL_SEQUENCE, RecordStore};

/// Name of the log file under the base directory
const LOG_FILE_NAME: &str = "records.log";

/// Upper bound on a single frame's payload, enforced on write and on replay
///
/// Replay treats a larger length prefix as a corrupt tail, so the write path
/// must refuse to produce one.
const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Configuration for the persistent store
#[derive(Debug, Clone)]
pub struct PersistentStoreConfig {
    /// Base directory for the log file
    pub base_dir: PathBuf,
    /// Whether to sync writes to disk immediately (durability vs performance)
    pub sync_on_write: bool,
}

impl Default for PersistentStoreConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/diaglog"),
            sync_on_write: true,
        }
    }
}

/// Frame type in the append-only log
#[derive(Debug, Clone, Serialize, Deserialize)]
enum StoredOp {
    /// A record appended to the store
    Append(LogRecord),
    /// Oldest records up to and including this sequence were evicted
    Evict { through_sequence: u64 },
}

/// Mutable store state guarded by a single lock
///
/// The write handle and the replayed cache live behind one lock so durable
/// and visible state cannot diverge, and so a clear is atomic with respect
/// to in-flight reads.
#[derive(Debug)]
struct PersistentState {
    /// Write handle for the append-only log (opened in append mode)
    file: File,
    /// Replayed record cache keyed by sequence
    records: BTreeMap<u64, LogRecord>,
    /// Next sequence to assign
    next_sequence: u64,
    /// High-water mark keeping timestamps non-decreasing
    last_timestamp: DateTime<Utc>,
    /// Bytes of intact frames on disk; a torn write is cut back to this
    file_len: u64,
}

/// What a replay pass recovered from the log file
struct ReplayOutcome {
    records: BTreeMap<u64, LogRecord>,
    next_sequence: u64,
    last_timestamp: DateTime<Utc>,
    corrupt_frames: u64,
    /// Length of the intact frame prefix
    valid_len: u64,
    /// Whether unreadable bytes follow `valid_len`
    truncated_tail: bool,
}

impl ReplayOutcome {
    fn fresh() -> Self {
        Self {
            records: BTreeMap::new(),
            next_sequence: INITIAL_SEQUENCE,
            last_timestamp: DateTime::<Utc>::MIN_UTC,
            corrupt_frames: 0,
            valid_len: 0,
            truncated_tail: false,
        }
    }
}

/// Persistent implementation of [`RecordStore`]
///
/// Every mutation is written to the log before it becomes visible in the
/// cache, so a failed write never advances the sequence counter. Eviction
/// under a retention cap is recorded as its own frame and replayed on open.
///
/// Each record is stored as one frame, capped at 10 MiB of encoded payload.
/// An append over the cap fails with [`StoreError::WriteFailed`] without
/// touching the log, since replay treats an oversized frame as a corrupt
/// tail and would drop it along with everything written after it.
#[derive(Debug)]
pub struct PersistentRecordStore {
    /// All mutable state under one lock
    state: RwLock<PersistentState>,
    /// Path to the log file
    log_path: PathBuf,
    /// Whether to sync writes immediately
    sync_on_write: bool,
    /// Capacity cap applied after each append
    retention: RetentionPolicy,
    /// Frames skipped because they failed to deserialize
    corrupt_skipped: AtomicU64,
}

impl PersistentRecordStore {
    /// Open an unbounded persistent store with the given configuration
    pub async fn open(config: PersistentStoreConfig) -> Result<Self, StoreError> {
        Self::with_retention(config, RetentionPolicy::unbounded()).await
    }

    /// Open with a custom retention policy
    pub async fn with_retention(
        config: PersistentStoreConfig,
        retention: RetentionPolicy,
    ) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;

        let log_path = config.base_dir.join(LOG_FILE_NAME);
        info!(path = %log_path.display(), "Opening record log");

        let outcome = if log_path.exists() {
            Self::replay_log(&log_path).await?
        } else {
            debug!(path = ?log_path, "No existing log file, starting fresh");
            ReplayOutcome::fresh()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;

        if outcome.truncated_tail {
            warn!(len = outcome.valid_len, "Dropping unreadable log tail");
            file.set_len(outcome.valid_len)
                .await
                .map_err(|e| StoreError::unavailable(e.to_string()))?;
        }

        debug!(
            sequence = outcome.next_sequence,
            records = outcome.records.len(),
            skipped = outcome.corrupt_frames,
            "Record log opened"
        );

        Ok(Self {
            state: RwLock::new(PersistentState {
                file,
                records: outcome.records,
                next_sequence: outcome.next_sequence,
                last_timestamp: outcome.last_timestamp,
                file_len: outcome.valid_len,
            }),
            log_path,
            sync_on_write: config.sync_on_write,
            retention,
            corrupt_skipped: AtomicU64::new(outcome.corrupt_frames),
        })
    }

    /// Number of frames skipped during replay because they failed to decode
    pub fn corrupt_frames_skipped(&self) -> u64 {
        self.corrupt_skipped.load(Ordering::SeqCst)
    }

    /// Get a reference to the retention policy
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Replay a log file to rebuild the record cache
    async fn replay_log(path: &Path) -> Result<ReplayOutcome, StoreError> {
        let file = File::open(path)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?
            .len();

        let mut reader = BufReader::new(file);
        let mut outcome = ReplayOutcome::fresh();
        let mut offset = 0u64;

        while offset < file_size {
            // Read length prefix (4 bytes)
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).await.is_err() {
                warn!(offset = offset, "Truncated log frame, stopping replay");
                outcome.truncated_tail = true;
                break;
            }

            let frame_len = u32::from_be_bytes(len_buf) as usize;

            if frame_len == 0 || frame_len > MAX_FRAME_LEN {
                warn!(offset = offset, len = frame_len, "Invalid frame length, stopping replay");
                outcome.truncated_tail = true;
                break;
            }

            // Read the frame payload
            let mut frame = vec![0u8; frame_len];
            if reader.read_exact(&mut frame).await.is_err() {
                warn!(offset = offset, "Truncated log frame, stopping replay");
                outcome.truncated_tail = true;
                break;
            }

            match postcard::from_bytes::<StoredOp>(&frame) {
                Ok(StoredOp::Append(record)) => {
                    outcome.next_sequence = outcome.next_sequence.max(record.sequence + 1);
                    outcome.last_timestamp = outcome.last_timestamp.max(record.timestamp);
                    outcome.records.insert(record.sequence, record);
                }
                Ok(StoredOp::Evict { through_sequence }) => {
                    outcome.records = outcome.records.split_off(&(through_sequence + 1));
                }
                Err(e) => {
                    // Framing is intact, so skip just this record and go on
                    outcome.corrupt_frames += 1;
                    warn!(offset = offset, error = %e, "Skipping corrupt frame");
                }
            }

            offset += 4 + frame_len as u64;
        }

        outcome.valid_len = offset;
        info!(records = outcome.records.len(), "Replayed record log");
        Ok(outcome)
    }

    /// Encode an operation as a length-prefixed frame
    ///
    /// The writer must never emit a frame replay refuses: a length prefix
    /// over [`MAX_FRAME_LEN`] reads back as a corrupt tail, taking the frame
    /// and every record behind it with it. Oversized payloads are rejected
    /// here, before anything reaches the file.
    fn encode_frame(op: &StoredOp) -> Result<Vec<u8>, StoreError> {
        let payload =
            postcard::to_allocvec(op).map_err(|e| StoreError::write_failed(e.to_string()))?;

        if payload.len() > MAX_FRAME_LEN {
            return Err(StoreError::write_failed(format!(
                "record frame of {} bytes exceeds the {} byte limit",
                payload.len(),
                MAX_FRAME_LEN
            )));
        }

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Append a single frame to the live log
    ///
    /// A failed write cuts the file back to the last intact frame, so a
    /// torn frame cannot stop a later replay short.
    async fn write_frame(
        state: &mut PersistentState,
        op: &StoredOp,
        sync: bool,
    ) -> Result<(), StoreError> {
        let frame = Self::encode_frame(op)?;

        let mut result = state.file.write_all(&frame).await;
        if result.is_ok() && sync {
            result = state.file.sync_data().await;
        }

        match result {
            Ok(()) => {
                state.file_len += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = state.file.set_len(state.file_len).await {
                    warn!(error = %rollback, "Failed to cut torn frame from log");
                }
                Err(StoreError::write_failed(e.to_string()))
            }
        }
    }

    /// Compact the log file by rewriting only the live records
    ///
    /// This drops evicted records and any skipped corrupt frames from disk.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let temp_path = self.log_path.with_extension("log.tmp");

        info!("Compacting record log");

        {
            let mut temp = File::create(&temp_path)
                .await
                .map_err(|e| StoreError::write_failed(e.to_string()))?;

            for record in state.records.values() {
                let frame = Self::encode_frame(&StoredOp::Append(record.clone()))?;
                temp.write_all(&frame)
                    .await
                    .map_err(|e| StoreError::write_failed(e.to_string()))?;
            }

            temp.sync_all()
                .await
                .map_err(|e| StoreError::write_failed(e.to_string()))?;
        }

        // Atomic rename, then reopen the writer against the compacted file
        tokio::fs::rename(&temp_path, &self.log_path)
            .await
            .map_err(|e| StoreError::write_failed(e.to_string()))?;

        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?;
        state.file_len = state
            .file
            .metadata()
            .await
            .map_err(|e| StoreError::unavailable(e.to_string()))?
            .len();

        self.corrupt_skipped.store(0, Ordering::SeqCst);

        info!(records = state.records.len(), "Record log compaction complete");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PersistentRecordStore {
    async fn append(&self, level: Severity, message: String) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;

        let sequence = state.next_sequence;
        // Clamp so timestamps never regress even if the wall clock does
        let timestamp = Utc::now().max(state.last_timestamp);
        let record = LogRecord::new(sequence, timestamp, level, message);

        trace!(sequence = sequence, level = %level, "Appending record");

        // Durable first, visible second; a failed write leaves the
        // sequence counter untouched.
        let op = StoredOp::Append(record.clone());
        Self::write_frame(&mut state, &op, self.sync_on_write).await?;

        state.records.insert(sequence, record);
        state.next_sequence += 1;
        state.last_timestamp = timestamp;

        // Evict oldest records only after the new one is durable
        let to_evict = self.retention.records_to_evict(state.records.len());
        if to_evict > 0
            && let Some(through_sequence) = state.records.keys().nth(to_evict - 1).copied()
        {
            let evict_op = StoredOp::Evict { through_sequence };
            match Self::write_frame(&mut state, &evict_op, self.sync_on_write).await {
                Ok(()) => {
                    state.records = state.records.split_off(&(through_sequence + 1));
                    debug!(
                        through = through_sequence,
                        "Evicted oldest records to stay within retention cap"
                    );
                }
                Err(e) => {
                    // Keep the records; the next append retries the eviction
                    warn!(error = %e, "Failed to persist eviction");
                }
            }
        }

        Ok(sequence)
    }

    async fn read_range(
        &self,
        after_sequence: u64,
        max_count: usize,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let state = self.state.read().await;

        Ok(state
            .records
            .range((Excluded(after_sequence), Unbounded))
            .take(max_count)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn read_before(
        &self,
        before_sequence: Option<u64>,
        max_count: usize,
    ) -> Result<Vec<LogRecord>, StoreError> {
        let state = self.state.read().await;

        let records = match before_sequence {
            Some(before) => state
                .records
                .range(..before)
                .rev()
                .take(max_count)
                .map(|(_, record)| record.clone())
                .collect(),
            None => state
                .records
                .iter()
                .rev()
                .take(max_count)
                .map(|(_, record)| record.clone())
                .collect(),
        };

        Ok(records)
    }

    async fn earliest_sequence(&self) -> Result<Option<u64>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.first_key_value().map(|(sequence, _)| *sequence))
    }

    async fn latest_sequence(&self) -> Result<Option<u64>, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.last_key_value().map(|(sequence, _)| *sequence))
    }

    async fn record_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().await;
        Ok(state.records.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // Truncate the log first; the cache is untouched if this fails
        state
            .file
            .set_len(0)
            .await
            .map_err(|e| StoreError::write_failed(e.to_string()))?;
        if self.sync_on_write {
            state
                .file
                .sync_data()
                .await
                .map_err(|e| StoreError::write_failed(e.to_string()))?;
        }

        state.records.clear();
        state.next_sequence = INITIAL_SEQUENCE;
        state.file_len = 0;

        debug!("Cleared all records from store");
        Ok(())
    }
}
