//! Orchestrator wiring the subscriber and the validation pipeline together.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::AuditConfig;
use crate::error::{AuditResult, ErrorKind};
use crate::provider::{StreamApi, TableApi};
use crate::stats::StatsSnapshot;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::subscriber::{StreamSubscriber, SubscriberHandle, SubscriberState};
use crate::workers::validator::{ValidationHandle, ValidationPipeline};

/// Capacity of the record channel between shard readers and the consumer.
///
/// Capacity 1 makes producers block when the consumer falls behind, slowing
/// discovery and reading rather than dropping events.
const RECORD_CHANNEL_CAPACITY: usize = 1;

/// Capacity of the error channel feeding the consumer.
const ERROR_CHANNEL_CAPACITY: usize = 1;

enum AuditorState {
    Created,
    Started {
        subscriber: SubscriberHandle,
        validation: ValidationHandle,
    },
}

/// Core orchestrator for one audit run.
///
/// Wires the stream subscriber to the validation pipeline over a capacity-1
/// record channel and owns the shutdown signal both observe. The stream-side
/// and lookup-side table clients are independent parameters; a front end
/// decides the pairing.
///
/// Call [`Auditor::start`] to begin consumption, [`Auditor::shutdown`] (or a
/// signal handler holding [`Auditor::shutdown_tx`]) to stop it, and
/// [`Auditor::wait`] to drain: the consumer flushes its validation buffer
/// once, reports final statistics and returns, while in-flight readers exit
/// after their current read resolves.
pub struct Auditor<S, T> {
    config: Arc<AuditConfig>,
    stream_api: S,
    stream_table_api: T,
    lookup_api: T,
    state: AuditorState,
    shutdown_tx: ShutdownTx,
}

impl<S, T> Auditor<S, T>
where
    S: StreamApi + Clone + Send + Sync + 'static,
    T: TableApi + Clone + Send + Sync + 'static,
{
    /// Creates a new auditor in the created state.
    pub fn new(config: AuditConfig, stream_api: S, stream_table_api: T, lookup_api: T) -> Self {
        let (shutdown_tx, _shutdown_rx) = create_shutdown_channel();
        Auditor {
            config: Arc::new(config),
            stream_api,
            stream_table_api,
            lookup_api,
            state: AuditorState::Created,
            shutdown_tx,
        }
    }

    /// Starts stream consumption and validation.
    ///
    /// Confirms the audited table has an active stream before any worker is
    /// started; a missing stream is fatal here, while later rotations are
    /// picked up by periodic discovery.
    pub async fn start(&mut self) -> AuditResult<()> {
        self.config
            .validate()
            .map_err(|err| crate::auditor_error!(ErrorKind::InvalidConfig, "invalid audit config", err))?;

        let stream_arn = self
            .stream_table_api
            .latest_stream_arn(&self.config.table_name)
            .await?;

        info!(
            table = %self.config.table_name,
            stream_arn = %stream_arn,
            position = %self.config.position,
            sample_rate = self.config.sample_rate,
            "starting audit"
        );

        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let subscriber = StreamSubscriber::new(
            self.stream_api.clone(),
            self.stream_table_api.clone(),
            self.config.table_name.clone(),
            self.config.position,
            self.config.batch_limit,
            records_tx,
            errors_tx,
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        let validation = ValidationPipeline::new(
            self.lookup_api.clone(),
            &self.config,
            records_rx,
            errors_rx,
            self.shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        self.state = AuditorState::Started {
            subscriber,
            validation,
        };

        Ok(())
    }

    /// Returns the shutdown transmitter, for signal handlers.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Initiates a graceful shutdown.
    pub fn shutdown(&self) {
        info!("sending shutdown signal to audit workers");
        self.shutdown_tx.shutdown();
    }

    /// Returns a watch over the rolling statistics, once started.
    pub fn stats(&self) -> Option<watch::Receiver<StatsSnapshot>> {
        match &self.state {
            AuditorState::Created => None,
            AuditorState::Started { validation, .. } => Some(validation.state()),
        }
    }

    /// Returns the subscriber's observable state, once started.
    pub fn subscriber_state(&self) -> Option<SubscriberState> {
        match &self.state {
            AuditorState::Created => None,
            AuditorState::Started { subscriber, .. } => Some(subscriber.state()),
        }
    }

    /// Waits for all workers to drain.
    pub async fn wait(self) -> AuditResult<()> {
        let AuditorState::Started {
            subscriber,
            validation,
        } = self.state
        else {
            info!("auditor was not started, skipping wait");
            return Ok(());
        };

        info!("waiting for validation pipeline to complete");
        let validation_result = validation.wait().await;
        if let Err(err) = &validation_result {
            error!(error = %err, "validation pipeline failed");
        }

        info!("waiting for stream subscriber to complete");
        if let Err(err) = subscriber.wait().await {
            error!(error = %err, "stream subscriber failed");
        }

        validation_result
    }

    /// Signals shutdown and then waits for all workers to drain.
    pub async fn shutdown_and_wait(self) -> AuditResult<()> {
        self.shutdown();
        self.wait().await
    }
}
