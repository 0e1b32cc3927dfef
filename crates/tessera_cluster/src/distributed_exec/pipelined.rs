//! Scatter-gather orchestrator.
//!
//! `PipelinedExpression` collects local and remote sub-queries, then
//! `execute()` hands back a [`GatherCursor`] immediately while a fixed pool of
//! at most `max_concurrency` worker threads admits sub-queries one at a time
//! and streams their rows into the bounded [`GatherChannel`].
//!
//! Rows of one sub-query keep their emission order; rows of different
//! sub-queries interleave arbitrarily. The first sub-query failure cancels the
//! rest and is surfaced to the consumer after the rows already buffered.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tessera_common::config::DistributedQueryConfig;
use tessera_common::datum::OwnedRow;
use tessera_common::error::{TesseraError, TesseraResult};

use super::channel::{GatherChannel, GatherStats, Pulled, Terminal};
use super::{
    execute_local, execute_remote, ExecutionContext, PlanFragment, ReplicaRef, ResultCursor,
    RowSink, SubQuery, TableExpression,
};
use crate::job::Job;

/// Job counter: rows handed to the consumer buffer.
pub const COUNTER_ROWS_PRODUCED: &str = "rows_produced";
/// Job counter: sub-queries admitted to a worker.
pub const COUNTER_SUBQUERIES_STARTED: &str = "subqueries_started";
/// Job counter: sub-queries that returned (successfully or not).
pub const COUNTER_SUBQUERIES_FINISHED: &str = "subqueries_finished";
/// Job counter: replica hosts abandoned on connectivity failures.
pub const COUNTER_HOST_FAILOVERS: &str = "host_failovers";

/// Table expression merging the output of many sub-queries.
pub struct PipelinedExpression {
    name: String,
    ctx: ExecutionContext,
    max_concurrency: usize,
    buffer_capacity: usize,
    num_columns: Option<usize>,
    queries: Vec<SubQuery>,
}

impl PipelinedExpression {
    pub fn new(ctx: ExecutionContext, config: &DistributedQueryConfig) -> TesseraResult<Self> {
        config.validate()?;
        Ok(Self {
            name: "pipelined-gather".into(),
            ctx,
            max_concurrency: config.max_concurrency,
            buffer_capacity: config.buffer_capacity,
            num_columns: None,
            queries: Vec::new(),
        })
    }

    /// Name used for the gather job and worker threads.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn add_local(&mut self, expr: Box<dyn TableExpression>) -> TesseraResult<()> {
        self.register(SubQuery::Local(expr))
    }

    /// Register a remote sub-query. `hosts` are failover alternatives tried
    /// first to last.
    pub fn add_remote(
        &mut self,
        plan: Arc<PlanFragment>,
        hosts: Vec<ReplicaRef>,
    ) -> TesseraResult<()> {
        if hosts.is_empty() {
            return Err(TesseraError::contract_violation(
                "E-GATHER-002",
                format!("remote sub-query on '{}' registered without hosts", plan.table),
            ));
        }
        self.register(SubQuery::Remote { plan, hosts })
    }

    /// Resolve a local partition through the context's partition map and
    /// register its reader.
    pub fn add_partition(&mut self, table: &str, partition_key: &str) -> TesseraResult<()> {
        let expr = self
            .ctx
            .partitions()
            .open_partition(self.ctx.namespace(), table, partition_key)?;
        self.add_local(expr)
    }

    fn register(&mut self, query: SubQuery) -> TesseraResult<()> {
        let columns = query.column_count();
        match self.num_columns {
            None => self.num_columns = Some(columns),
            Some(expected) if expected != columns => {
                return Err(TesseraError::contract_violation(
                    "E-GATHER-001",
                    format!(
                        "sub-query #{} has {} columns, expected {}",
                        self.queries.len(),
                        columns,
                        expected
                    ),
                ));
            }
            Some(_) => {}
        }
        self.queries.push(query);
        Ok(())
    }

    /// Column count of the first registered sub-query (0 when empty).
    pub fn column_count(&self) -> usize {
        self.num_columns.unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Start the gather and return the consumer cursor.
    pub fn execute(self) -> TesseraResult<GatherCursor> {
        let total = self.queries.len();
        let column_count = self.column_count();
        let pool_size = self.max_concurrency.min(total);

        let job = Job::new(self.name.clone());
        let channel = Arc::new(GatherChannel::new(self.buffer_capacity, self.queries));
        {
            let channel = Arc::clone(&channel);
            job.on_cancel(move || {
                channel.cancel();
            });
        }
        if total == 0 {
            job.complete()?;
        }

        tracing::debug!(
            gather = %self.name,
            subqueries = total,
            workers = pool_size,
            buffer = self.buffer_capacity,
            "starting gather"
        );

        let mut cursor = GatherCursor {
            column_count,
            channel: Arc::clone(&channel),
            job: Arc::clone(&job),
            workers: Vec::with_capacity(pool_size),
        };
        for slot in 0..pool_size {
            let worker = GatherWorker {
                channel: Arc::clone(&channel),
                job: Arc::clone(&job),
                ctx: self.ctx.clone(),
            };
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", self.name, slot))
                .spawn(move || worker.run())
                .map_err(|e| {
                    TesseraError::Internal(format!("failed to spawn gather worker: {}", e))
                })?;
            // On error the partially built cursor is dropped, which cancels and
            // joins the workers already spawned.
            cursor.workers.push(handle);
        }
        Ok(cursor)
    }
}

impl TableExpression for PipelinedExpression {
    fn column_count(&self) -> usize {
        self.num_columns.unwrap_or(0)
    }

    fn execute(self: Box<Self>) -> TesseraResult<Box<dyn ResultCursor>> {
        let cursor = PipelinedExpression::execute(*self)?;
        Ok(Box::new(cursor))
    }
}

struct GatherWorker {
    channel: Arc<GatherChannel>,
    job: Arc<Job>,
    ctx: ExecutionContext,
}

impl GatherWorker {
    fn run(self) {
        while let Some((idx, query)) = self.channel.admit() {
            self.job.incr_counter(COUNTER_SUBQUERIES_STARTED, 1.0);
            tracing::debug!(
                gather = %self.job.name(),
                subquery = idx,
                local = query.is_local(),
                "sub-query admitted"
            );

            let sink = WorkerSink {
                channel: &self.channel,
                job: &self.job,
                rows: AtomicU64::new(0),
            };
            let result = catch_unwind(AssertUnwindSafe(|| match query {
                SubQuery::Local(expr) => execute_local(expr, &sink),
                SubQuery::Remote { plan, hosts } => execute_remote(&self.ctx, &plan, &hosts, &sink),
            }))
            .unwrap_or_else(|_| {
                Err(TesseraError::Internal(format!(
                    "sub-query #{} panicked during execution",
                    idx
                )))
            });

            let rows = sink.rows.load(Ordering::Relaxed);
            self.job.incr_counter(COUNTER_ROWS_PRODUCED, rows as f64);
            self.job.incr_counter(COUNTER_SUBQUERIES_FINISHED, 1.0);
            match &result {
                Ok(()) => tracing::info!(
                    gather = %self.job.name(),
                    subquery = idx,
                    rows,
                    "sub-query finished"
                ),
                Err(e) if e.is_cancelled() => tracing::debug!(
                    gather = %self.job.name(),
                    subquery = idx,
                    rows,
                    "sub-query stopped: {}",
                    e
                ),
                Err(e) => tracing::error!(
                    gather = %self.job.name(),
                    subquery = idx,
                    rows,
                    "sub-query failed: {}",
                    e
                ),
            }

            match self.channel.complete(result) {
                Some(Terminal::Done) => {
                    tracing::info!(gather = %self.job.name(), "gather complete");
                    if let Err(e) = self.job.complete() {
                        tracing::debug!(gather = %self.job.name(), "job already finished: {}", e);
                    }
                }
                Some(Terminal::Failed(err)) => {
                    if let Err(e) = self.job.send_error(err.to_string()) {
                        tracing::debug!(gather = %self.job.name(), "job already finished: {}", e);
                    }
                }
                None => {}
            }
        }
    }
}

struct WorkerSink<'a> {
    channel: &'a GatherChannel,
    job: &'a Job,
    rows: AtomicU64,
}

impl RowSink for WorkerSink<'_> {
    fn push(&self, row: OwnedRow) -> bool {
        let accepted = self.channel.push(row);
        if accepted {
            self.rows.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    fn is_cancelled(&self) -> bool {
        self.channel.is_cancelled()
    }

    fn record_failover(&self) {
        self.job.incr_counter(COUNTER_HOST_FAILOVERS, 1.0);
    }
}

/// Single-consumer pull cursor over a running gather.
///
/// Dropping the cursor cancels outstanding work and joins every worker.
pub struct GatherCursor {
    column_count: usize,
    channel: Arc<GatherChannel>,
    job: Arc<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl GatherCursor {
    /// Next row, `Ok(None)` at end of stream, or the gather's first failure
    /// once every row buffered before it has been returned.
    ///
    /// The job is terminal by the time end of stream or an error is returned.
    pub fn pull(&mut self) -> TesseraResult<Option<OwnedRow>> {
        let terminal = match self.channel.pull() {
            Pulled::Row(row) => return Ok(Some(row)),
            Pulled::EndOfStream => Ok(None),
            Pulled::Error(e) => Err(e),
        };
        // The worker that moved the channel to Done/Failed settles the job
        // right after releasing the channel lock.
        self.job.wait();
        terminal
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Job tracking this gather; cancelling it cancels the gather.
    pub fn job(&self) -> Arc<Job> {
        Arc::clone(&self.job)
    }

    pub fn stats(&self) -> GatherStats {
        self.channel.stats()
    }

    /// Stop the gather. A gather that already finished or failed keeps its
    /// outcome; only a running one moves the job to `Cancelled`.
    pub fn cancel(&self) {
        if self.channel.cancel() {
            self.job.cancel();
        }
    }

    /// Drain the remaining rows.
    pub fn collect_rows(&mut self) -> TesseraResult<Vec<OwnedRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.pull()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

impl ResultCursor for GatherCursor {
    fn column_count(&self) -> usize {
        self.column_count
    }

    fn next(&mut self) -> TesseraResult<Option<OwnedRow>> {
        self.pull()
    }
}

impl Drop for GatherCursor {
    fn drop(&mut self) {
        self.cancel();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!(gather = %self.job.name(), "gather worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for GatherCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatherCursor")
            .field("column_count", &self.column_count)
            .field("stats", &self.stats())
            .field("job", &self.job)
            .finish()
    }
}
