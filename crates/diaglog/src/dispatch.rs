//! Async dispatch layer
//!
//! All store access funnels through a single worker task, so mutations and
//! queries are strictly serialized in arrival order. Callers hold a cheap
//! cloneable [`LogManager`] handle; appends are fire-and-forget by default,
//! while queries and clears wait for the worker's reply.
//!
//! The worker also owns the paging session, so successive queries from any
//! handle continue the same walk through the store.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use crate::RecordStore;
use crate::error::StoreError;
use crate::query::{QueryCursor, QueryRequest, run_query};
use crate::record::{LogRecord, Severity};

/// Default bound on queued commands
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Commands processed by the log worker
enum LogCommand {
    /// Persist a record; the ack channel is present only for acknowledged
    /// appends
    Append {
        level: Severity,
        message: String,
        ack: Option<oneshot::Sender<Result<u64, StoreError>>>,
    },
    /// Serve one page of the worker's paging session
    Query {
        request: QueryRequest,
        reply: oneshot::Sender<Result<Vec<LogRecord>, StoreError>>,
    },
    /// Drop all records and reset sequence numbering
    Clear {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Map a rejected queue submission to the dispatch error it stands for
fn submission_error<T>(error: mpsc::error::TrySendError<T>) -> StoreError {
    match error {
        mpsc::error::TrySendError::Full(_) => StoreError::Backpressure,
        mpsc::error::TrySendError::Closed(_) => StoreError::Shutdown,
    }
}

/// Configuration for the dispatch layer
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Bound on queued commands before fire-and-forget appends are
    /// rejected; values below 1 are treated as 1
    pub queue_capacity: usize,
    /// Runtime callback completions are delivered on; defaults to the
    /// runtime the worker is spawned on
    pub callback_runtime: Option<Handle>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            callback_runtime: None,
        }
    }
}

/// Handle for submitting log operations
///
/// All clones feed the same worker, which applies commands one at a time in
/// the order they were queued. Dropping every handle closes the queue; the
/// worker drains what was already queued and then stops.
#[derive(Clone)]
pub struct LogManager {
    command_tx: mpsc::Sender<LogCommand>,
    callback_runtime: Handle,
}

impl LogManager {
    /// Spawn a worker over the given store and return a handle to it
    ///
    /// Must be called from within a tokio runtime. The second element is
    /// the worker's join handle; await it after dropping every manager
    /// clone to wait for queued commands to drain.
    pub fn spawn(store: Arc<dyn RecordStore>, config: DispatchConfig) -> (Self, JoinHandle<()>) {
        // The bounded channel needs at least one slot
        let (command_tx, command_rx) = mpsc::channel(config.queue_capacity.max(1));
        let callback_runtime = config.callback_runtime.unwrap_or_else(Handle::current);

        let worker = LogWorker {
            store,
            command_rx,
            session: None,
        };
        let join_handle = tokio::spawn(async move { worker.run().await });

        (
            Self {
                command_tx,
                callback_runtime,
            },
            join_handle,
        )
    }

    /// Queue a record without waiting for it to reach storage
    ///
    /// # Errors
    ///
    /// [`StoreError::Backpressure`] when the queue is full and
    /// [`StoreError::Shutdown`] when the worker is gone; the record is
    /// dropped in either case.
    pub fn append(&self, level: Severity, message: impl Into<String>) -> Result<(), StoreError> {
        let message = message.into();
        trace!(level = %level, "Queueing append");

        self.command_tx
            .try_send(LogCommand::Append {
                level,
                message,
                ack: None,
            })
            .map_err(|e| {
                let error = submission_error(e);
                if matches!(error, StoreError::Backpressure) {
                    warn!("Dispatch queue full, dropping record");
                }
                error
            })
    }

    /// Append and wait until the record is durably stored
    ///
    /// # Returns
    ///
    /// The sequence number assigned to the record
    pub async fn append_acked(
        &self,
        level: Severity,
        message: impl Into<String>,
    ) -> Result<u64, StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.command_tx
            .send(LogCommand::Append {
                level,
                message: message.into(),
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| StoreError::Shutdown)?;

        ack_rx.await.map_err(|_| StoreError::Shutdown)?
    }

    /// Serve one page of the worker's paging session
    pub async fn query(&self, request: QueryRequest) -> Result<Vec<LogRecord>, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(LogCommand::Query {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::Shutdown)?;

        reply_rx.await.map_err(|_| StoreError::Shutdown)?
    }

    /// Remove all records and reset sequence numbering
    pub async fn clear(&self) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(LogCommand::Clear { reply: reply_tx })
            .await
            .map_err(|_| StoreError::Shutdown)?;

        reply_rx.await.map_err(|_| StoreError::Shutdown)?
    }

    /// Like [`query`](Self::query), delivering the page to a callback on
    /// the configured callback runtime
    ///
    /// The command is queued before this returns, so a callback query
    /// issued after a clear observes that clear. The callback runs exactly
    /// once: with the page, with [`StoreError::Backpressure`] when the
    /// queue is full, or with [`StoreError::Shutdown`] when the worker is
    /// gone.
    pub fn query_callback<F>(&self, request: QueryRequest, callback: F)
    where
        F: FnOnce(Result<Vec<LogRecord>, StoreError>) + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self
            .command_tx
            .try_send(LogCommand::Query {
                request,
                reply: reply_tx,
            })
            .map_err(submission_error);

        // Only the wait for the reply runs on the callback runtime
        self.callback_runtime.spawn(async move {
            let result = match submitted {
                Ok(()) => match reply_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Shutdown),
                },
                Err(error) => Err(error),
            };
            callback(result);
        });
    }

    /// Like [`clear`](Self::clear), delivering completion to a callback on
    /// the configured callback runtime
    ///
    /// Queued before returning, with the same delivery contract as
    /// [`query_callback`](Self::query_callback).
    pub fn clear_callback<F>(&self, callback: F)
    where
        F: FnOnce(Result<(), StoreError>) + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self
            .command_tx
            .try_send(LogCommand::Clear { reply: reply_tx })
            .map_err(submission_error);

        self.callback_runtime.spawn(async move {
            let result = match submitted {
                Ok(()) => match reply_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Shutdown),
                },
                Err(error) => Err(error),
            };
            callback(result);
        });
    }
}

/// The single task that owns all store access
struct LogWorker {
    store: Arc<dyn RecordStore>,
    command_rx: mpsc::Receiver<LogCommand>,
    /// Paging session carried between queries
    session: Option<QueryCursor>,
}

impl LogWorker {
    async fn run(mut self) {
        info!("Log worker started");

        while let Some(command) = self.command_rx.recv().await {
            self.handle_command(command).await;
        }

        info!("Log worker stopped");
    }

    async fn handle_command(&mut self, command: LogCommand) {
        match command {
            LogCommand::Append {
                level,
                message,
                ack,
            } => {
                let result = self.store.append(level, message).await;
                if let Err(error) = &result {
                    warn!(error = %error, "Failed to persist log record");
                }
                if let Some(ack) = ack {
                    // The caller may have given up waiting
                    let _ = ack.send(result);
                }
            }
            LogCommand::Query { request, reply } => {
                // A failed page drops the session; the next query restarts
                // from the newest record
                let session = self.session.take();
                let result = match run_query(self.store.as_ref(), &request, session).await {
                    Ok((page, cursor)) => {
                        self.session = Some(cursor);
                        Ok(page)
                    }
                    Err(error) => Err(error),
                };
                let _ = reply.send(result);
            }
            LogCommand::Clear { reply } => {
                let result = self.store.clear().await;
                if result.is_ok() {
                    // A cursor from before the clear must not skip records
                    // appended after it
                    self.session = None;
                }
                let _ = reply.send(result);
            }
        }
    }
}
