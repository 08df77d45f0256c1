//! Embedded asynchronous log store
//!
//! Durable persistence and filtered paging for diagnostic log records.
//! Designed to sit inside a host application: the host appends records as
//! they happen and pages through them newest-first when a debugging surface
//! needs them.
//!
//! ## Features
//!
//! - **Total ordering**: every record carries a monotonically increasing
//!   sequence number and a non-decreasing timestamp
//! - **Durability first**: records become visible only after they are
//!   written to the append-only log, and eviction under a retention cap
//!   happens only after the new record is stored
//! - **Newest-first queries**: severity threshold and case-insensitive
//!   keyword filters, with widening scans so selective filters still fill
//!   their pages
//! - **Serialized dispatch**: a single worker task applies commands in
//!   arrival order, so appends, queries, and clears never race
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use diaglog::{
//!     Direction, DispatchConfig, LogManager, PersistentRecordStore,
//!     PersistentStoreConfig, QueryRequest, Severity,
//! };
//!
//! # async fn example() -> Result<(), diaglog::StoreError> {
//! let store = PersistentRecordStore::open(PersistentStoreConfig::default()).await?;
//! let (manager, _worker) = LogManager::spawn(Arc::new(store), DispatchConfig::default());
//!
//! // Fire-and-forget append
//! manager.append(Severity::Info, "service started")?;
//!
//! // Page through matching records, newest first
//! let page = manager
//!     .query(QueryRequest {
//!         level: Severity::Debug,
//!         keyword: None,
//!         direction: Direction::Reset,
//!         page_size: 50,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod error;
pub mod memory;
pub mod persistent;
pub mod query;
pub mod record;
pub mod retention;

pub use dispatch::{DispatchConfig, LogManager};
pub use error::StoreError;
pub use memory::InMemoryRecordStore;
pub use persistent::{PersistentRecordStore, PersistentStoreConfig};
pub use query::{Direction, LogFilter, QueryCursor, QueryRequest, SessionState, run_query};
pub use record::{LogRecord, Severity};
pub use retention::RetentionPolicy;

use async_trait::async_trait;

/// Sequence number assigned to the first record in an empty store
pub const INITIAL_SEQUENCE: u64 = 1;

/// Trait for record storage backends
///
/// Implementations assign sequence numbers, keep records ordered by
/// sequence, and enforce their retention cap. All methods take `&self`;
/// implementations handle their own locking.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record, assigning it the next sequence number
    ///
    /// The timestamp is taken at append time and clamped so it never
    /// precedes the previous record's timestamp.
    ///
    /// # Arguments
    ///
    /// * `level` - Severity of the record
    /// * `message` - Log message text
    ///
    /// # Returns
    ///
    /// The sequence number assigned to the record
    ///
    /// # Errors
    ///
    /// On failure the store is unchanged and the sequence is not consumed
    async fn append(&self, level: Severity, message: String) -> Result<u64, StoreError>;

    /// Read up to `max_count` records with sequences strictly greater than
    /// `after_sequence`, in ascending sequence order
    async fn read_range(
        &self,
        after_sequence: u64,
        max_count: usize,
    ) -> Result<Vec<LogRecord>, StoreError>;

    /// Read up to `max_count` records with sequences strictly less than
    /// `before_sequence`, newest first
    ///
    /// `None` starts from the newest retained record.
    async fn read_before(
        &self,
        before_sequence: Option<u64>,
        max_count: usize,
    ) -> Result<Vec<LogRecord>, StoreError>;

    /// Sequence of the oldest retained record, if any
    async fn earliest_sequence(&self) -> Result<Option<u64>, StoreError>;

    /// Sequence of the newest retained record, if any
    async fn latest_sequence(&self) -> Result<Option<u64>, StoreError>;

    /// Number of retained records
    async fn record_count(&self) -> Result<usize, StoreError>;

    /// Remove every record and reset sequence numbering
    ///
    /// Atomic: on failure the store keeps its pre-clear contents and
    /// numbering.
    async fn clear(&self) -> Result<(), StoreError>;
}
