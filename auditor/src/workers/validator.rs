//! Validation pipeline: sampling, batching and point-lookup verification.
//!
//! A single consumer task owns the statistics and the sampling buffer. It
//! multiplexes incoming records, the periodic flush and stats ticks, verdict
//! feedback from the validation workers, subscriber errors and the shutdown
//! signal. Lookups run on a separate worker task so a slow verification side
//! never stalls stream accounting; when that worker falls behind, flushes
//! spill onto transient one-shot workers instead of dropping sampled records.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::config::AuditConfig;
use crate::error::{AuditError, AuditResult, ErrorKind};
use crate::keys::extract_key_values;
use crate::provider::TableApi;
use crate::stats::{Stats, StatsSnapshot};
use crate::types::{BatchOutcome, ItemKey, Mutation, StreamRecord, ValidationRecord};
use crate::workers::base::{Worker, WorkerHandle};

/// Wait before the first lookup of a batch, covering replication lag between
/// the two tables.
pub const REPLICATION_WAIT: Duration = Duration::from_secs(5);

/// Wait before the single retry after a missed lookup.
pub const RETRY_WAIT: Duration = Duration::from_secs(2);

/// Interval between validation-buffer flushes.
const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between rolling statistics reports.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Capacity of the batch channel feeding the validation worker.
const BATCH_CHANNEL_CAPACITY: usize = 10;

/// Capacity of the verdict feedback channel.
const OUTCOME_CHANNEL_CAPACITY: usize = 10;

/// Everything a validation worker needs to look a sampled record up.
struct LookupContext<T> {
    api: T,
    table_name: String,
    partition_key: String,
    sort_key: Option<String>,
    verbose: bool,
}

impl<T: Clone> Clone for LookupContext<T> {
    fn clone(&self) -> Self {
        LookupContext {
            api: self.api.clone(),
            table_name: self.table_name.clone(),
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
            verbose: self.verbose,
        }
    }
}

/// Handle to a running [`ValidationPipeline`].
pub struct ValidationHandle {
    consumer: JoinHandle<AuditResult<()>>,
    worker: JoinHandle<()>,
    stats_rx: watch::Receiver<StatsSnapshot>,
}

impl WorkerHandle<watch::Receiver<StatsSnapshot>> for ValidationHandle {
    fn state(&self) -> watch::Receiver<StatsSnapshot> {
        self.stats_rx.clone()
    }

    async fn wait(self) -> AuditResult<()> {
        let result = self.consumer.await.map_err(|err| {
            AuditError::with_source(
                ErrorKind::WorkerPanicked,
                "validation consumer terminated abnormally",
                err,
            )
        })?;

        // The worker drains its channel and exits once the consumer is gone.
        if let Err(err) = self.worker.await
            && !err.is_cancelled()
        {
            warn!(error = %err, "validation worker panicked");
        }

        result
    }
}

/// Samples stream records and verifies them by point lookup.
pub struct ValidationPipeline<T> {
    lookup_api: T,
    table_name: String,
    partition_key: String,
    sort_key: Option<String>,
    sample_rate: u64,
    verbose: bool,
    records_rx: mpsc::Receiver<StreamRecord>,
    errors_rx: mpsc::Receiver<AuditError>,
    shutdown_rx: ShutdownRx,
}

impl<T> ValidationPipeline<T>
where
    T: TableApi + Clone + Send + Sync + 'static,
{
    pub fn new(
        lookup_api: T,
        config: &AuditConfig,
        records_rx: mpsc::Receiver<StreamRecord>,
        errors_rx: mpsc::Receiver<AuditError>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        ValidationPipeline {
            lookup_api,
            table_name: config.table_name.clone(),
            partition_key: config.partition_key.clone(),
            sort_key: config.sort_key.clone(),
            sample_rate: config.sample_rate,
            verbose: config.verbose,
            records_rx,
            errors_rx,
            shutdown_rx,
        }
    }
}

impl<T> Worker<ValidationHandle, watch::Receiver<StatsSnapshot>> for ValidationPipeline<T>
where
    T: TableApi + Clone + Send + Sync + 'static,
{
    type Error = AuditError;

    async fn start(self) -> Result<ValidationHandle, Self::Error> {
        info!(
            table = %self.table_name,
            sample_rate = self.sample_rate,
            "starting validation pipeline"
        );

        let (batches_tx, batches_rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let (outcomes_tx, outcomes_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(StatsSnapshot::default());

        let lookup = LookupContext {
            api: self.lookup_api.clone(),
            table_name: self.table_name.clone(),
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
            verbose: self.verbose,
        };

        let worker = tokio::spawn(batch_worker_task(
            lookup.clone(),
            batches_rx,
            outcomes_tx.clone(),
            self.shutdown_rx.clone(),
        ));

        let consumer = tokio::spawn(consumer_task(
            self,
            lookup,
            batches_tx,
            outcomes_tx,
            outcomes_rx,
            stats_tx,
        ));

        Ok(ValidationHandle {
            consumer,
            worker,
            stats_rx,
        })
    }
}

/// The consumer loop: sole owner of the stats and the sampling buffer.
async fn consumer_task<T>(
    mut pipeline: ValidationPipeline<T>,
    lookup: LookupContext<T>,
    batches_tx: mpsc::Sender<Vec<ValidationRecord>>,
    outcomes_tx: mpsc::Sender<BatchOutcome>,
    mut outcomes_rx: mpsc::Receiver<BatchOutcome>,
    stats_tx: watch::Sender<StatsSnapshot>,
) -> AuditResult<()>
where
    T: TableApi + Clone + Send + Sync + 'static,
{
    let mut stats = Stats::new();
    let mut buffer: Vec<ValidationRecord> = Vec::new();

    let mut flush_ticks = interval_at(Instant::now() + FLUSH_INTERVAL, FLUSH_INTERVAL);
    let mut stats_ticks = interval_at(Instant::now() + STATS_INTERVAL, STATS_INTERVAL);

    let mut outcomes_open = true;
    let mut errors_open = true;

    loop {
        tokio::select! {
            _ = pipeline.shutdown_rx.wait_for_shutdown() => {
                info!("shutdown received, stopping validation consumer");
                break;
            }
            maybe_record = pipeline.records_rx.recv() => {
                let Some(record) = maybe_record else {
                    info!("record channel closed, stopping validation consumer");
                    break;
                };

                handle_record(&pipeline, &mut stats, &mut buffer, record);
                let _ = stats_tx.send(stats.snapshot());
            }
            _ = flush_ticks.tick() => {
                flush_buffer(
                    &mut buffer,
                    &batches_tx,
                    &lookup,
                    &outcomes_tx,
                    &pipeline.shutdown_rx,
                );
            }
            _ = stats_ticks.tick() => {
                stats.log_summary();
            }
            maybe_outcome = outcomes_rx.recv(), if outcomes_open => {
                match maybe_outcome {
                    Some(outcome) => {
                        stats.apply_outcome(outcome);
                        let _ = stats_tx.send(stats.snapshot());
                    }
                    None => outcomes_open = false,
                }
            }
            maybe_err = pipeline.errors_rx.recv(), if errors_open => {
                match maybe_err {
                    Some(err) => warn!(error = %err, "stream processing error"),
                    None => errors_open = false,
                }
            }
        }
    }

    // Best-effort drain: hand the remaining buffer to the workers once, then
    // report the final numbers.
    flush_buffer(
        &mut buffer,
        &batches_tx,
        &lookup,
        &outcomes_tx,
        &pipeline.shutdown_rx,
    );

    let _ = stats_tx.send(stats.snapshot());
    stats.log_summary();

    Ok(())
}

/// Accounts one record and samples it for validation when due.
fn handle_record<T>(
    pipeline: &ValidationPipeline<T>,
    stats: &mut Stats,
    buffer: &mut Vec<ValidationRecord>,
    record: StreamRecord,
) {
    // The migration only inserts and modifies; removals on the stream are
    // operator cleanup and carry no validation signal.
    if record.mutation == Mutation::Remove {
        return;
    }

    stats.record_event(&record);

    let keys = extract_key_values(&record, &pipeline.partition_key, pipeline.sort_key.as_deref());

    info!(
        event_id = %record.event_id,
        mutation = %record.mutation,
        partition_key = %format_key(&pipeline.partition_key, &keys.partition),
        sort_key = %format_key(pipeline.sort_key.as_deref().unwrap_or_default(), &keys.sort),
        "stream record received"
    );

    if stats.total() % pipeline.sample_rate == 0 && !keys.partition.is_empty() {
        buffer.push(ValidationRecord {
            partition_value: keys.partition,
            sort_value: keys.sort,
        });
    }
}

/// Moves the buffered samples into a batch and hands it to a worker.
///
/// Flushing an empty buffer is a no-op. A full batch channel spills onto a
/// transient worker so a congested verification side never drops a sample.
fn flush_buffer<T>(
    buffer: &mut Vec<ValidationRecord>,
    batches_tx: &mpsc::Sender<Vec<ValidationRecord>>,
    lookup: &LookupContext<T>,
    outcomes_tx: &mpsc::Sender<BatchOutcome>,
    shutdown_rx: &ShutdownRx,
) where
    T: TableApi + Clone + Send + Sync + 'static,
{
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    debug!(batch_size = batch.len(), "flushing validation buffer");

    match batches_tx.try_send(batch) {
        Ok(()) => {}
        Err(TrySendError::Full(batch)) => {
            debug!(
                batch_size = batch.len(),
                "validation worker saturated, spawning one-shot worker"
            );

            let lookup = lookup.clone();
            let outcomes_tx = outcomes_tx.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                validate_batch(&lookup, batch, &outcomes_tx, &shutdown_rx).await;
            });
        }
        Err(TrySendError::Closed(batch)) => {
            warn!(
                batch_size = batch.len(),
                "validation worker stopped, discarding batch"
            );
        }
    }
}

/// The long-lived validation worker: verifies batches in arrival order.
async fn batch_worker_task<T>(
    lookup: LookupContext<T>,
    mut batches_rx: mpsc::Receiver<Vec<ValidationRecord>>,
    outcomes_tx: mpsc::Sender<BatchOutcome>,
    shutdown_rx: ShutdownRx,
) where
    T: TableApi + Clone + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => {
                debug!("validation worker stopping on shutdown");
                return;
            }
            maybe_batch = batches_rx.recv() => {
                match maybe_batch {
                    Some(batch) => {
                        validate_batch(&lookup, batch, &outcomes_tx, &shutdown_rx).await;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Verifies one batch of sampled records against the lookup side.
///
/// Waits out the replication lag before the first lookup, retries each miss
/// once after [`RETRY_WAIT`], and feeds the aggregated verdicts back to the
/// consumer. A shutdown mid-batch reports whatever was verified so far.
async fn validate_batch<T>(
    lookup: &LookupContext<T>,
    batch: Vec<ValidationRecord>,
    outcomes_tx: &mpsc::Sender<BatchOutcome>,
    shutdown_rx: &ShutdownRx,
) where
    T: TableApi + Clone + Send + Sync + 'static,
{
    if !sleep_unless_shutdown(REPLICATION_WAIT, shutdown_rx).await {
        return;
    }

    let mut outcome = BatchOutcome::default();

    for record in batch {
        let key = record.item_key(&lookup.partition_key, lookup.sort_key.as_deref());

        let mut exists = lookup_exists(lookup, &key).await;
        if !exists {
            if !sleep_unless_shutdown(RETRY_WAIT, shutdown_rx).await {
                break;
            }
            exists = lookup_exists(lookup, &key).await;
        }

        outcome.validated += 1;
        if exists {
            outcome.succeeded += 1;
            if lookup.verbose {
                info!(
                    partition_key = %format_key(&lookup.partition_key, &record.partition_value),
                    sort_key = %format_key(lookup.sort_key.as_deref().unwrap_or_default(), &record.sort_value),
                    "validation hit: item exists"
                );
            }
        } else {
            outcome.failed += 1;
            warn!(
                partition_key = %format_key(&lookup.partition_key, &record.partition_value),
                sort_key = %format_key(lookup.sort_key.as_deref().unwrap_or_default(), &record.sort_value),
                "validation miss: item not found"
            );
        }
    }

    if outcome.validated > 0 {
        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => {}
            _ = outcomes_tx.send(outcome) => {}
        }
    }
}

/// Runs a point lookup; a failed call logs and counts as a miss for this
/// attempt.
async fn lookup_exists<T>(lookup: &LookupContext<T>, key: &ItemKey) -> bool
where
    T: TableApi,
{
    match lookup.api.item_exists(&lookup.table_name, key).await {
        Ok(exists) => exists,
        Err(err) => {
            warn!(error = %err, "validation lookup failed");
            false
        }
    }
}

async fn sleep_unless_shutdown(duration: Duration, shutdown_rx: &ShutdownRx) -> bool {
    tokio::select! {
        _ = shutdown_rx.wait_for_shutdown() => false,
        _ = sleep(duration) => true,
    }
}

fn format_key(name: &str, value: &str) -> String {
    format!("{name}={value}")
}
