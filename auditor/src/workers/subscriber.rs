//! Stream subscriber: shard discovery and reader dispatch.
//!
//! Three cooperating tasks manage an evolving shard set. A ticker signals
//! periodic refresh, the discovery task resolves the newest stream and
//! enqueues iterator requests for shards it has not seen before, and the
//! dispatcher spawns shard readers under a bounded concurrency limit. The
//! known-shard set is monotonic for the lifetime of the run: once a shard id
//! is inserted it is never removed, so at most one reader ever starts per
//! shard even across reader failures and repeated refreshes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, warn};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{AuditError, AuditResult, ErrorKind};
use crate::provider::{StreamApi, TableApi};
use crate::types::{IteratorRequest, Shard, ShardId, StreamPosition, StreamRecord};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::reader::ShardReader;

/// Maximum number of concurrently consumed shards.
pub const SHARD_CONCURRENCY: usize = 5;

/// Interval between shard discovery refreshes.
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);

/// Head start granted to the first discovery before dispatch begins, so all
/// preexisting leaves are batched into one spawn round and the first readers
/// cover the broadest shard surface immediately.
const DISPATCH_HEAD_START: Duration = Duration::from_secs(10);

/// Returns the first listed shard whose parent is `prev`.
///
/// Supports sequential single-shard consumption, where a finished reader
/// hands off to its closed shard's child. The concurrent subscriber performs
/// this handoff implicitly through discovery.
pub fn find_child(prev: &ShardId, shards: &[Shard]) -> Option<ShardId> {
    shards
        .iter()
        .find(|shard| shard.parent_id.as_ref() == Some(prev))
        .map(|shard| shard.id.clone())
}

/// Observable state of a running subscriber.
#[derive(Debug, Clone)]
pub struct SubscriberState {
    known_shards: Arc<Mutex<HashSet<ShardId>>>,
}

impl SubscriberState {
    /// Returns a copy of the shard ids adopted so far.
    pub async fn known_shards(&self) -> HashSet<ShardId> {
        self.known_shards.lock().await.clone()
    }
}

/// Handle to a running [`StreamSubscriber`].
pub struct SubscriberHandle {
    state: SubscriberState,
    ticker: JoinHandle<()>,
    discovery: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl WorkerHandle<SubscriberState> for SubscriberHandle {
    fn state(&self) -> SubscriberState {
        self.state.clone()
    }

    async fn wait(self) -> AuditResult<()> {
        for task in [self.ticker, self.discovery, self.dispatcher] {
            task.await.map_err(|err| {
                AuditError::with_source(
                    ErrorKind::WorkerPanicked,
                    "subscriber task terminated abnormally",
                    err,
                )
            })?;
        }
        Ok(())
    }
}

/// Coordinates shard discovery and the bounded pool of shard readers.
pub struct StreamSubscriber<S, T> {
    stream_api: S,
    table_api: T,
    table_name: String,
    position: StreamPosition,
    batch_limit: Option<u32>,
    records_tx: mpsc::Sender<StreamRecord>,
    errors_tx: mpsc::Sender<AuditError>,
    shutdown_rx: ShutdownRx,
}

impl<S, T> StreamSubscriber<S, T>
where
    S: StreamApi + Clone + Send + Sync + 'static,
    T: TableApi + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream_api: S,
        table_api: T,
        table_name: impl Into<String>,
        position: StreamPosition,
        batch_limit: Option<u32>,
        records_tx: mpsc::Sender<StreamRecord>,
        errors_tx: mpsc::Sender<AuditError>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        StreamSubscriber {
            stream_api,
            table_api,
            table_name: table_name.into(),
            position,
            batch_limit,
            records_tx,
            errors_tx,
            shutdown_rx,
        }
    }
}

impl<S, T> Worker<SubscriberHandle, SubscriberState> for StreamSubscriber<S, T>
where
    S: StreamApi + Clone + Send + Sync + 'static,
    T: TableApi + Send + Sync + 'static,
{
    type Error = AuditError;

    async fn start(self) -> Result<SubscriberHandle, Self::Error> {
        info!(
            table = %self.table_name,
            position = %self.position,
            concurrency = SHARD_CONCURRENCY,
            "starting stream subscriber"
        );

        let state = SubscriberState {
            known_shards: Arc::new(Mutex::new(HashSet::new())),
        };

        let (refresh_tx, refresh_rx) = mpsc::channel::<()>(1);
        let (pending_tx, pending_rx) = mpsc::channel::<IteratorRequest>(SHARD_CONCURRENCY);

        // Seed the first refresh so discovery runs immediately on startup.
        let _ = refresh_tx.try_send(());

        let ticker = tokio::spawn(ticker_task(refresh_tx, self.shutdown_rx.clone()));

        let discovery = tokio::spawn(discovery_task(
            self.stream_api.clone(),
            self.table_api,
            self.table_name,
            self.position,
            state.known_shards.clone(),
            refresh_rx,
            pending_tx,
            self.errors_tx.clone(),
            self.shutdown_rx.clone(),
        ));

        let dispatcher = tokio::spawn(dispatcher_task(
            self.stream_api,
            self.batch_limit,
            self.records_tx,
            self.errors_tx,
            pending_rx,
            self.shutdown_rx,
        ));

        Ok(SubscriberHandle {
            state,
            ticker,
            discovery,
            dispatcher,
        })
    }
}

/// Signals a discovery refresh once per interval.
///
/// The send is non-blocking: a tick that finds a refresh already pending is
/// redundant and dropped.
async fn ticker_task(refresh_tx: mpsc::Sender<()>, shutdown_rx: ShutdownRx) {
    let mut ticks = interval_at(Instant::now() + DISCOVERY_INTERVAL, DISCOVERY_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => {
                debug!("discovery ticker stopping on shutdown");
                return;
            }
            _ = ticks.tick() => {
                let _ = refresh_tx.try_send(());
            }
        }
    }
}

/// Adopts previously unseen shards on every refresh signal.
#[allow(clippy::too_many_arguments)]
async fn discovery_task<S, T>(
    stream_api: S,
    table_api: T,
    table_name: String,
    position: StreamPosition,
    known_shards: Arc<Mutex<HashSet<ShardId>>>,
    mut refresh_rx: mpsc::Receiver<()>,
    pending_tx: mpsc::Sender<IteratorRequest>,
    errors_tx: mpsc::Sender<AuditError>,
    shutdown_rx: ShutdownRx,
) where
    S: StreamApi + Send + Sync + 'static,
    T: TableApi + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => {
                debug!("shard discovery stopping on shutdown");
                return;
            }
            maybe_signal = refresh_rx.recv() => {
                if maybe_signal.is_none() {
                    return;
                }

                refresh_shards(
                    &stream_api,
                    &table_api,
                    &table_name,
                    position,
                    &known_shards,
                    &pending_tx,
                    &errors_tx,
                    &shutdown_rx,
                )
                .await;
            }
        }
    }
}

/// Runs one discovery pass.
///
/// Resolution and listing failures are published to the error channel and end
/// only this pass; the known-shard set is never cleared, so the next refresh
/// starts from the same adopted state.
#[allow(clippy::too_many_arguments)]
async fn refresh_shards<S, T>(
    stream_api: &S,
    table_api: &T,
    table_name: &str,
    position: StreamPosition,
    known_shards: &Mutex<HashSet<ShardId>>,
    pending_tx: &mpsc::Sender<IteratorRequest>,
    errors_tx: &mpsc::Sender<AuditError>,
    shutdown_rx: &ShutdownRx,
) where
    S: StreamApi + Send + Sync,
    T: TableApi + Send + Sync,
{
    // Re-resolve every pass: the active stream rotates when it is disabled
    // and re-enabled, and the newest value always wins.
    let stream_arn = match table_api.latest_stream_arn(table_name).await {
        Ok(stream_arn) => stream_arn,
        Err(err) => {
            publish_error(errors_tx, shutdown_rx, err).await;
            return;
        }
    };

    let shards = match stream_api.list_shards(&stream_arn).await {
        Ok(shards) => shards,
        Err(err) => {
            publish_error(errors_tx, shutdown_rx, err).await;
            return;
        }
    };

    let fresh: Vec<ShardId> = {
        let mut known = known_shards.lock().await;
        shards
            .into_iter()
            .filter(|shard| known.insert(shard.id.clone()))
            .map(|shard| shard.id)
            .collect()
    };

    if fresh.is_empty() {
        debug!(stream_arn = %stream_arn, "no new shards discovered");
        return;
    }

    info!(stream_arn = %stream_arn, count = fresh.len(), "adopting new shards");

    for shard_id in fresh {
        let request = IteratorRequest {
            stream_arn: stream_arn.clone(),
            shard_id,
            position,
        };

        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => return,
            result = pending_tx.send(request) => {
                if result.is_err() {
                    return;
                }
            }
        }
    }
}

/// Spawns shard readers for pending requests under the concurrency limit.
async fn dispatcher_task<S>(
    stream_api: S,
    batch_limit: Option<u32>,
    records_tx: mpsc::Sender<StreamRecord>,
    errors_tx: mpsc::Sender<AuditError>,
    mut pending_rx: mpsc::Receiver<IteratorRequest>,
    shutdown_rx: ShutdownRx,
) where
    S: StreamApi + Clone + Send + Sync + 'static,
{
    tokio::select! {
        _ = shutdown_rx.wait_for_shutdown() => return,
        _ = sleep(DISPATCH_HEAD_START) => {}
    }

    let limiter = Arc::new(Semaphore::new(SHARD_CONCURRENCY));
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.wait_for_shutdown() => break,
            maybe_request = pending_rx.recv() => {
                let Some(request) = maybe_request else {
                    break;
                };

                let permit = tokio::select! {
                    _ = shutdown_rx.wait_for_shutdown() => break,
                    permit = limiter.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                };

                debug!(shard_id = %request.shard_id, "dispatching shard reader");

                let reader = ShardReader::new(
                    stream_api.clone(),
                    request,
                    batch_limit,
                    records_tx.clone(),
                    shutdown_rx.clone(),
                );
                let reader_errors_tx = errors_tx.clone();
                let reader_shutdown_rx = shutdown_rx.clone();

                readers.spawn(async move {
                    let _permit = permit;
                    if let Err(err) = reader.run().await {
                        publish_error(&reader_errors_tx, &reader_shutdown_rx, err).await;
                    }
                });
            }
        }
    }

    // Drain in-flight readers; each observes shutdown on its own.
    while let Some(result) = readers.join_next().await {
        if let Err(err) = result {
            if err.is_cancelled() {
                debug!("shard reader cancelled");
            } else {
                warn!(error = %err, "shard reader panicked");
            }
        }
    }
}

/// Publishes an error without outliving shutdown.
///
/// The error channel has capacity 1; when the consumer has already stopped
/// draining it, the send is abandoned on the shutdown signal instead of
/// keeping the task alive.
async fn publish_error(
    errors_tx: &mpsc::Sender<AuditError>,
    shutdown_rx: &ShutdownRx,
    err: AuditError,
) {
    tokio::select! {
        _ = shutdown_rx.wait_for_shutdown() => {}
        _ = errors_tx.send(err) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(id: &str, parent: Option<&str>) -> Shard {
        Shard {
            id: ShardId::new(id),
            parent_id: parent.map(ShardId::new),
        }
    }

    #[test]
    fn find_child_returns_first_match() {
        let shards = vec![
            shard("a", None),
            shard("b", Some("a")),
            shard("c", Some("a")),
        ];

        assert_eq!(
            find_child(&ShardId::new("a"), &shards),
            Some(ShardId::new("b"))
        );
    }

    #[test]
    fn find_child_returns_none_without_descendants() {
        let shards = vec![shard("a", None), shard("b", Some("a"))];

        assert_eq!(find_child(&ShardId::new("b"), &shards), None);
        assert_eq!(find_child(&ShardId::new("missing"), &shards), None);
    }
}
