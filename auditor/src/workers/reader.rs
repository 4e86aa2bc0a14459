//! Shard reader: consumes one shard of the change stream.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{AuditResult, ErrorKind};
use crate::provider::StreamApi;
use crate::types::{IteratorRequest, StreamRecord};

/// Pause before terminating once the shard reports closed.
const CLOSED_SHARD_PAUSE: Duration = Duration::from_millis(10);

/// Pause between reads in steady state.
const READ_PAUSE: Duration = Duration::from_secs(1);

/// Back-off after a read that returned zero records.
const EMPTY_READ_BACKOFF: Duration = Duration::from_secs(10);

/// Reads one shard from its acquired iterator until the shard closes.
///
/// Records are published to the capacity-1 record channel in provider order,
/// so a slow consumer back-pressures the reader instead of dropping events.
/// Reads behind the retention window terminate the reader cleanly; any other
/// provider failure is returned to the dispatcher, which surfaces it without
/// restarting the reader (the shard id stays known, so no replacement reader
/// ever starts).
pub struct ShardReader<S> {
    stream_api: S,
    request: IteratorRequest,
    batch_limit: Option<u32>,
    records_tx: mpsc::Sender<StreamRecord>,
    shutdown_rx: ShutdownRx,
}

impl<S> ShardReader<S>
where
    S: StreamApi + Send + Sync + 'static,
{
    pub fn new(
        stream_api: S,
        request: IteratorRequest,
        batch_limit: Option<u32>,
        records_tx: mpsc::Sender<StreamRecord>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        ShardReader {
            stream_api,
            request,
            batch_limit,
            records_tx,
            shutdown_rx,
        }
    }

    /// Consumes the shard to completion.
    pub async fn run(self) -> AuditResult<()> {
        let shard_id = self.request.shard_id.clone();

        let Some(mut iterator) = self.stream_api.shard_iterator(&self.request).await? else {
            // No readable range left in this shard, nothing to do.
            debug!(%shard_id, "shard has no iterator, terminating reader");
            return Ok(());
        };

        info!(%shard_id, position = %self.request.position, "shard reader started");

        loop {
            let batch = tokio::select! {
                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!(%shard_id, "shard reader stopping on shutdown");
                    return Ok(());
                }
                result = self.stream_api.read_records(&iterator, self.batch_limit) => {
                    match result {
                        Ok(batch) => batch,
                        Err(err) if err.kind() == ErrorKind::TrimmedData => {
                            // Reading behind the retention window closes the
                            // shard for our purposes.
                            info!(%shard_id, "shard trimmed, terminating reader");
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    }
                }
            };

            let record_count = batch.records.len();
            for record in batch.records {
                tokio::select! {
                    _ = self.shutdown_rx.wait_for_shutdown() => {
                        info!(%shard_id, "shard reader stopping on shutdown");
                        return Ok(());
                    }
                    result = self.records_tx.send(record) => {
                        if result.is_err() {
                            // Consumer is gone, there is nobody left to read for.
                            return Ok(());
                        }
                    }
                }
            }

            let pause = if batch.next.is_none() {
                CLOSED_SHARD_PAUSE
            } else if record_count == 0 {
                EMPTY_READ_BACKOFF
            } else {
                READ_PAUSE
            };

            tokio::select! {
                _ = self.shutdown_rx.wait_for_shutdown() => {
                    info!(%shard_id, "shard reader stopping on shutdown");
                    return Ok(());
                }
                _ = sleep(pause) => {}
            }

            match batch.next {
                Some(next) => iterator = next,
                None => {
                    info!(%shard_id, "shard closed, reader finished");
                    return Ok(());
                }
            }
        }
    }
}
