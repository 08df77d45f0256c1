//! In-memory store implementation
//!
//! This module provides an in-memory implementation of the record store,
//! suitable for tests and for ephemeral debugging sessions where durability
//! across restarts is not needed.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::record::{LogRecord, Severity};
use crate::retention::RetentionPolicy;
use crate::{INITIAL_SEQUENCE, RecordStore};

/// Mutable store state guarded by a single lock
///
/// Records, the sequence counter, and the timestamp high-water mark live
/// behind one lock so that a clear is atomic with respect to in-flight
/// reads: a concurrent read sees either the full pre-clear state or the
/// empty post-clear state.
#[derive(Debug)]
struct MemoryState {
    /// Stored records keyed by sequence (iteration order = append order)
    records: BTreeMap<u64, LogRecord>,
    /// Next sequence to assign
    next_sequence: u64,
    /// High-water mark keeping timestamps non-decreasing
    last_timestamp: DateTime<Utc>,
}

/// In-memory implementation of [`RecordStore`]
///
/// Uses a `BTreeMap` keyed by sequence number, so ascending and descending
/// range scans are direct map walks.
#[derive(Debug)]
pub struct InMemoryRecordStore {
    /// All mutable state under one lock
    state: RwLock<MemoryState>,
    /// Capacity cap applied after each append
    retention: RetentionPolicy,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordStore {
    /// Create a new unbounded in-memory store
    pub fn new() -> Self {
        Self::with_retention(RetentionPolicy::unbounded())
    }

    /// Create with a custom retention policy
    pub fn with_retention(retention: RetentionPolicy) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                records: BTreeMap::new(),
                next_sequence: INITIAL_SEQUENCE,
                last_timestamp: DateTime::<Utc>::MIN_UTC,
            }),
            retention,
        }
    }

    /// Get a reference to the retention policy
    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append(&self, level: Severity, message: String) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;

        let sequence = state.next_sequence;
        // Clamp so timestamps never regress even if the wall clock does
        let timestamp = Utc::now().max(state.last_timestamp);

        trace!(sequence = sequence, level = %level, "Appending record");

        state
            .records
            .insert(sequence, LogRecord::new(sequence, timestamp, level, message));
        state.next_sequence += 1;
        state.last_timestamp = timestamp;

        // Evict oldest records only after the new one is stored
        let to_evict = self.retention.records_to_evict(state.records.len());
        for _ in 0..to_evict {
            if let Some((evicted, _)) = state.records.pop_first() {
                debug!(sequence = evicted, "Evicted oldest record to stay within retention cap");
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

        state.records.clear();
        state.next_sequence = INITIAL_SEQUENCE;

        debug!("Cleared all records from store");
        Ok(())
    }
}
