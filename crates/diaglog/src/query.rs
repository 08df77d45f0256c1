//! Query engine
//!
//! Serves filtered pages of records in newest-first order. A paging session
//! is tracked by a [`QueryCursor`]: each page continues below the oldest
//! record served so far, and changing the filter starts a new session.
//!
//! Filters are applied after reading candidate windows from the store;
//! selective filters widen the window and retry until the page fills or the
//! store runs out of older records.

use tracing::{debug, trace};

use crate::RecordStore;
use crate::error::StoreError;
use crate::record::{LogRecord, Severity};

/// Paging direction for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Start a new session from the newest record
    Reset,
    /// Continue the current session toward older records
    Forward,
}

/// A single page request against the store
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Least severe level to include; a record matches when its level is
    /// at or above this severity
    pub level: Severity,
    /// Optional case-insensitive substring to match in the message
    pub keyword: Option<String>,
    /// Whether to restart the session or continue it
    pub direction: Direction,
    /// Maximum number of records in the returned page
    pub page_size: usize,
}

/// Filter identity for a paging session
///
/// Two filters are the same session if their level and normalized keyword
/// are equal. The keyword is case-folded on construction, and an empty
/// keyword means no keyword at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    level: Severity,
    keyword: Option<String>,
}

impl LogFilter {
    pub fn new(level: Severity, keyword: Option<&str>) -> Self {
        let keyword = keyword
            .filter(|k| !k.is_empty())
            .map(|k| k.to_lowercase());
        Self { level, keyword }
    }

    /// Whether a record passes this filter
    fn matches(&self, record: &LogRecord) -> bool {
        if record.level > self.level {
            return false;
        }
        match &self.keyword {
            Some(keyword) => record.message.to_lowercase().contains(keyword.as_str()),
            None => true,
        }
    }
}

/// Where a paging session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session started but no page served yet
    Fresh,
    /// Mid-session, older records may remain
    Paging,
    /// The oldest retained record has been served
    Exhausted,
}

/// Continuation state for a paging session
///
/// Returned by every query and passed back in to continue. The cursor never
/// touches the store; it only remembers the filter and how far down the
/// session has read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCursor {
    filter: LogFilter,
    /// Sequence of the oldest record served so far
    position: Option<u64>,
    state: SessionState,
}

impl QueryCursor {
    fn fresh(filter: LogFilter) -> Self {
        Self {
            filter,
            position: None,
            state: SessionState::Fresh,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn position(&self) -> Option<u64> {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == SessionState::Exhausted
    }
}

/// Serve one page of records matching the request
///
/// Pass the cursor from the previous call to continue a session; pass
/// `None` (or direction [`Direction::Reset`], or a changed filter) to start
/// from the newest record.
///
/// # Returns
///
/// The page in newest-first order, and the cursor to continue with. Once a
/// session is exhausted, further forward pages are empty and leave the
/// cursor unchanged.
pub async fn run_query(
    store: &dyn RecordStore,
    request: &QueryRequest,
    cursor: Option<QueryCursor>,
) -> Result<(Vec<LogRecord>, QueryCursor), StoreError> {
    let filter = LogFilter::new(request.level, request.keyword.as_deref());

    // A changed filter or an explicit reset starts a new session
    let mut cursor = match (request.direction, cursor) {
        (Direction::Forward, Some(existing)) if existing.filter == filter => existing,
        (Direction::Forward, _) => QueryCursor::fresh(filter),
        (Direction::Reset, _) => QueryCursor::fresh(filter),
    };

    if cursor.state == SessionState::Exhausted {
        trace!("Session exhausted, returning empty page");
        return Ok((Vec::new(), cursor));
    }

    if request.page_size == 0 {
        return Ok((Vec::new(), cursor));
    }

    let mut page: Vec<LogRecord> = Vec::with_capacity(request.page_size);
    let mut scan_position = cursor.position;
    let mut window = request.page_size;
    let mut floor_reached = false;

    while page.len() < request.page_size && !floor_reached {
        let candidates = store.read_before(scan_position, window).await?;
        if candidates.len() < window {
            floor_reached = true;
        }

        for candidate in candidates {
            scan_position = Some(candidate.sequence);
            if cursor.filter.matches(&candidate) {
                page.push(candidate);
                if page.len() == request.page_size {
                    break;
                }
            }
        }

        // Widen so selective filters converge in a few passes
        window = window.saturating_mul(2);
    }

    // The next page resumes below the oldest record actually served, so
    // candidates scanned past a full page are revisited, not skipped
    if let Some(last) = page.last() {
        cursor.position = Some(last.sequence);
    }

    let exhausted = if page.len() < request.page_size {
        true
    } else {
        match (store.earliest_sequence().await?, cursor.position) {
            (Some(earliest), Some(position)) => position <= earliest,
            (None, _) => true,
            (Some(_), None) => false,
        }
    };

    cursor.state = if exhausted {
        SessionState::Exhausted
    } else {
        SessionState::Paging
    };

    debug!(
        returned = page.len(),
        exhausted = exhausted,
        "Query page served"
    );

    Ok((page, cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRecordStore;

    /// Five info records then one error record ("boom", sequence 6)
    async fn seeded_store() -> InMemoryRecordStore {
        let store = InMemoryRecordStore::new();
        for i in 1..=5 {
            store
                .append(Severity::Info, format!("message {i}"))
                .await
                .unwrap();
        }
        store.append(Severity::Error, "boom".into()).await.unwrap();
        store
    }

    fn request(
        level: Severity,
        keyword: Option<&str>,
        direction: Direction,
        page_size: usize,
    ) -> QueryRequest {
        QueryRequest {
            level,
            keyword: keyword.map(String::from),
            direction,
            page_size,
        }
    }

    fn sequences(records: &[LogRecord]) -> Vec<u64> {
        records.iter().map(|r| r.sequence).collect()
    }

    #[tokio::test]
    async fn test_severity_threshold() {
        let store = seeded_store().await;

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Error, None, Direction::Reset, 10),
            None,
        )
        .await
        .unwrap();

        assert_eq!(sequences(&page), vec![6]);
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_keyword_is_case_insensitive() {
        let store = seeded_store().await;

        let (page, _) = run_query(
            &store,
            &request(Severity::Debug, Some("boom"), Direction::Reset, 10),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6]);

        let (page, _) = run_query(
            &store,
            &request(Severity::Debug, Some("BOOM"), Direction::Reset, 10),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6]);
    }

    #[tokio::test]
    async fn test_paging_to_exhaustion() {
        let store = seeded_store().await;

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 3),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5, 4]);
        assert_eq!(cursor.state(), SessionState::Paging);

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![3, 2, 1]);
        assert!(cursor.is_exhausted());

        // Paging past the end is idempotent
        let before = cursor.clone();
        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert!(page.is_empty());
        assert_eq!(cursor, before);
    }

    #[tokio::test]
    async fn test_filter_change_restarts_session() {
        let store = seeded_store().await;

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 3),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5, 4]);

        // Forward with a different level starts over from the newest record
        let (page, cursor) = run_query(
            &store,
            &request(Severity::Info, None, Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5, 4]);
        assert_eq!(cursor.state(), SessionState::Paging);
    }

    #[tokio::test]
    async fn test_forward_without_session_starts_fresh() {
        let store = seeded_store().await;

        let (page, _) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Forward, 2),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5]);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = InMemoryRecordStore::new();

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 10),
            None,
        )
        .await
        .unwrap();
        assert!(page.is_empty());
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_zero_page_size_leaves_session_untouched() {
        let store = seeded_store().await;

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 0),
            None,
        )
        .await
        .unwrap();
        assert!(page.is_empty());
        assert_eq!(cursor.state(), SessionState::Fresh);

        // The session still serves from the top afterwards
        let (page, _) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5, 4]);
    }

    #[tokio::test]
    async fn test_empty_keyword_means_no_keyword() {
        let store = seeded_store().await;

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 3),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![6, 5, 4]);

        // An empty keyword is the same filter, so the session continues
        let (page, _) = run_query(
            &store,
            &request(Severity::Debug, Some(""), Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_widening_scan_over_sparse_matches() {
        let store = InMemoryRecordStore::new();
        for i in 1..=50u64 {
            let level = if i % 10 == 0 {
                Severity::Error
            } else {
                Severity::Info
            };
            store.append(level, format!("record {i}")).await.unwrap();
        }

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Error, None, Direction::Reset, 3),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![50, 40, 30]);
        assert_eq!(cursor.state(), SessionState::Paging);

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Error, None, Direction::Forward, 3),
            Some(cursor),
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![20, 10]);
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_full_final_page_is_exhausted_immediately() {
        let store = InMemoryRecordStore::new();
        for i in 1..=4 {
            store.append(Severity::Info, format!("{i}")).await.unwrap();
        }

        let (page, cursor) = run_query(
            &store,
            &request(Severity::Debug, None, Direction::Reset, 4),
            None,
        )
        .await
        .unwrap();
        assert_eq!(sequences(&page), vec![4, 3, 2, 1]);
        assert!(cursor.is_exhausted());
    }
}
