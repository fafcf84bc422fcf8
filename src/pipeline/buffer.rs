//! Buffered batch handler
//!
//! Accumulates items and hands full buffers to a bounded pool of background
//! flush tasks. A failing batch is bisected until the offending records are
//! isolated, so one malformed record cannot sink the rest of its batch.
//!
//! ```text
//!  Idle ──handle──▶ Accumulating ──full / flush──▶ Flushing ──dispatch──▶ Accumulating / Idle
//!                                                                    close ──▶ Closed
//! ```

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use super::Handler;
use crate::context::RunContext;
use crate::error::{Result, SieveError};
use crate::models::Identified;
use crate::repository::BatchStore;

/// Default number of buffered items before a flush
pub const DEFAULT_BUFFER_SIZE: usize = 50;

/// Default number of concurrent flush tasks
pub const DEFAULT_FLUSH_CONCURRENCY: usize = 10;

/// What to do once a batch has produced its first isolated failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BisectPolicy {
    /// Keep bisecting every failing range until all bad records are found
    #[default]
    Exhaustive,
    /// Stop bisecting after the first isolated record; later failing
    /// ranges are reported whole
    FirstFailure,
}

impl BisectPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "exhaustive" => Some(Self::Exhaustive),
            "first_failure" | "first-failure" | "first" => Some(Self::FirstFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhaustive => "exhaustive",
            Self::FirstFailure => "first_failure",
        }
    }
}

/// Records that could not be persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// Identities of the records in the failing unit
    pub records: Vec<String>,
    /// Error reported by the store for that unit
    pub error: String,
}

impl BatchFailure {
    /// The failing unit was narrowed down to a single record
    pub fn is_isolated(&self) -> bool {
        self.records.len() == 1
    }
}

/// Callback invoked for every reported failure
pub type FailureCallback = Arc<dyn Fn(&BatchFailure) + Send + Sync>;

/// Flush counters of one handler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Non-empty batches handed to the background pool
    pub batches: u64,
    /// Calls made to the store, retries included
    pub write_attempts: u64,
    /// Records the store accepted
    pub persisted: u64,
    pub failures: Vec<BatchFailure>,
}

impl FlushStats {
    pub fn failed_records(&self) -> usize {
        self.failures.iter().map(|f| f.records.len()).sum()
    }
}

struct BufferState<T> {
    buffer: Vec<T>,
    closed: bool,
}

struct Shared<T> {
    ctx: RunContext,
    name: String,
    store: Arc<dyn BatchStore<T>>,
    capacity: usize,
    policy: BisectPolicy,
    permits: Arc<Semaphore>,
    on_failure: Option<FailureCallback>,
    state: Mutex<BufferState<T>>,
    tasks: Mutex<JoinSet<()>>,
    /// Set once the first `close` has joined every flush task
    drained: watch::Sender<bool>,
    stats: Mutex<FlushStats>,
}

/// Sizing and failure handling of a [`BufferedBatchHandler`]
#[derive(Clone)]
pub struct BufferSettings {
    /// Items buffered before a flush is dispatched
    pub capacity: usize,
    /// Flush tasks allowed to write at the same time
    pub concurrency: usize,
    pub policy: BisectPolicy,
    pub on_failure: Option<FailureCallback>,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_FLUSH_CONCURRENCY,
            policy: BisectPolicy::default(),
            on_failure: None,
        }
    }
}

impl BufferSettings {
    pub fn new(capacity: usize, concurrency: usize) -> Self {
        Self {
            capacity,
            concurrency,
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: BisectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_callback(mut self, callback: FailureCallback) -> Self {
        self.on_failure = Some(callback);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(SieveError::InvalidConfig(
                "buffer capacity must be at least 1".into(),
            ));
        }
        if self.concurrency == 0 {
            return Err(SieveError::InvalidConfig(
                "flush concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Buffering handler flushing into a [`BatchStore`]
pub struct BufferedBatchHandler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> BufferedBatchHandler<T>
where
    T: Identified + Send + Sync + 'static,
{
    /// Create a handler named after what it stores, e.g. `"proxy"`
    pub fn new(
        ctx: &RunContext,
        name: &str,
        store: Arc<dyn BatchStore<T>>,
        settings: BufferSettings,
    ) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                ctx: ctx.clone(),
                name: name.to_string(),
                store,
                capacity: settings.capacity,
                policy: settings.policy,
                permits: Arc::new(Semaphore::new(settings.concurrency)),
                on_failure: settings.on_failure,
                state: Mutex::new(BufferState {
                    buffer: Vec::with_capacity(settings.capacity),
                    closed: false,
                }),
                tasks: Mutex::new(JoinSet::new()),
                drained: watch::channel(false).0,
                stats: Mutex::new(FlushStats::default()),
            }),
        })
    }

    /// Number of items currently waiting in the buffer
    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn stats(&self) -> FlushStats {
        self.shared.stats.lock().clone()
    }

    /// Drain the buffer and dispatch it to the flush pool
    ///
    /// Does not wait for the write. Draining an empty buffer dispatches
    /// nothing.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SieveError::HandlerClosed);
        }
        let batch = std::mem::take(&mut state.buffer);
        self.dispatch(batch);
        Ok(())
    }

    /// Hand a batch to the background pool
    ///
    /// Callers hold the state lock, so no dispatch can slip past `close`.
    fn dispatch(&self, batch: Vec<T>) {
        if batch.is_empty() {
            debug!(handler = %self.shared.name, "Nothing to flush");
            return;
        }

        debug!(handler = %self.shared.name, size = batch.len(), "Dispatching batch");
        self.shared.stats.lock().batches += 1;

        let shared = Arc::clone(&self.shared);
        let span = self.shared.ctx.span().clone();
        self.shared.tasks.lock().spawn(
            async move {
                let permits = Arc::clone(&shared.permits);
                let Ok(_permit) = permits.acquire_owned().await else {
                    error!(handler = %shared.name, "Flush pool shut down, batch dropped");
                    return;
                };
                shared.write_batch(batch).await;
            }
            .instrument(span),
        );
    }
}

impl<T> Shared<T>
where
    T: Identified + Send + Sync + 'static,
{
    /// Divide-and-conquer write over index ranges of the batch
    async fn write_batch(&self, batch: Vec<T>) {
        let mut pending: Vec<Range<usize>> = vec![0..batch.len()];
        let mut isolated_any = false;

        while let Some(range) = pending.pop() {
            let records = &batch[range.clone()];
            self.stats.lock().write_attempts += 1;

            let err = match self.store.batch_write(records).await {
                Ok(_) => {
                    self.stats.lock().persisted += records.len() as u64;
                    continue;
                }
                Err(e) => e,
            };

            if records.len() == 1 {
                isolated_any = true;
                self.report(records, &err);
                continue;
            }

            if isolated_any && self.policy == BisectPolicy::FirstFailure {
                self.report(records, &err);
                continue;
            }

            warn!(
                handler = %self.name,
                size = records.len(),
                error = %err,
                "Batch write failed, bisecting"
            );

            let mid = range.start + records.len() / 2;
            // Pushed so that the upper half is retried first.
            pending.push(range.start..mid);
            pending.push(mid..range.end);
        }
    }

    fn report(&self, records: &[T], err: &SieveError) {
        let failure = BatchFailure {
            records: records.iter().map(Identified::identity).collect(),
            error: err.to_string(),
        };

        if failure.is_isolated() {
            error!(
                job = %self.ctx.job_name(),
                handler = %self.name,
                record = %failure.records[0],
                error = %failure.error,
                "Failed to persist record"
            );
        } else {
            error!(
                job = %self.ctx.job_name(),
                handler = %self.name,
                records = failure.records.len(),
                error = %failure.error,
                "Failed to persist unresolved batch"
            );
        }

        if let Some(callback) = &self.on_failure {
            callback(&failure);
        }
        self.stats.lock().failures.push(failure);
    }
}

#[async_trait]
impl<T> Handler<T> for BufferedBatchHandler<T>
where
    T: Identified + Send + Sync + 'static,
{
    async fn handle(&self, item: T) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(SieveError::HandlerClosed);
        }

        if state.buffer.len() >= self.shared.capacity {
            let full = std::mem::replace(
                &mut state.buffer,
                Vec::with_capacity(self.shared.capacity),
            );
            self.dispatch(full);
        }
        state.buffer.push(item);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let first = {
            let mut state = self.shared.state.lock();
            if state.closed {
                false
            } else {
                state.closed = true;
                let rest = std::mem::take(&mut state.buffer);
                self.dispatch(rest);
                true
            }
        };

        if !first {
            // Another caller owns the flush tasks; wait until it has joined them.
            let mut drained = self.shared.drained.subscribe();
            let _ = drained.wait_for(|done| *done).await;
            return Ok(());
        }

        let mut tasks = std::mem::take(&mut *self.shared.tasks.lock());
        let mut crashed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(handler = %self.shared.name, error = %e, "Flush task crashed");
                crashed += 1;
            }
        }
        self.shared.drained.send_replace(true);

        let stats = self.stats();
        info!(
            handler = %self.shared.name,
            batches = stats.batches,
            persisted = stats.persisted,
            failed = stats.failed_records(),
            "Handler closed"
        );

        if crashed > 0 {
            return Err(SieveError::Internal(format!(
                "{} flush task(s) of handler {} crashed",
                crashed, self.shared.name
            )));
        }
        Ok(())
    }
}
