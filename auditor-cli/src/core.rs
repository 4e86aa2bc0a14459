//! Wires the parsed arguments and clients into a running auditor.

use auditor::audit::Auditor;
use auditor::config::{AuditConfig, VerifySide};
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use crate::cli::Args;
use crate::clients::AuditorClients;
use crate::error::CliResult;

/// Runs stream-based verification until interrupted.
///
/// The `--verify-on` side drives both stream discovery and point lookups, the
/// original pairing of the tool; the engine itself would accept any
/// combination. The same table name is used on both sides, since source and
/// target share schema and name.
pub async fn run_stream_audit(args: Args, clients: AuditorClients) -> CliResult<()> {
    let (stream_table_api, lookup_api) = match VerifySide::from(args.verify_on) {
        VerifySide::Source => (clients.source.clone(), clients.source),
        VerifySide::Target => (clients.target.clone(), clients.target),
    };

    let config = AuditConfig {
        table_name: args.target_table.clone().unwrap_or_default(),
        partition_key: args.partition_key.clone().unwrap_or_default(),
        sort_key: args.sort_key.clone(),
        sample_rate: args.sample_rate,
        position: args.iterator_type.into(),
        batch_limit: Some(AuditConfig::DEFAULT_BATCH_LIMIT),
        verbose: args.verbose,
    };

    if let Some(stream_arn) = &args.stream_arn {
        info!(stream_arn = %stream_arn, verify_on = ?args.verify_on, "starting stream verification");
    }

    let mut auditor = Auditor::new(config, clients.stream, stream_table_api, lookup_api);
    auditor.start().await?;

    // Listen for SIGINT and SIGTERM and trigger shutdown once.
    let shutdown_tx = auditor.shutdown_tx();
    let signal_handle = tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down auditor");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down auditor");
            }
        }

        shutdown_tx.shutdown();
    });

    // Wait for the engine to drain (either normally or via shutdown).
    let result = auditor.wait().await;

    // If the engine finished before any signal arrived, stop the signal task.
    signal_handle.abort();
    let _ = signal_handle.await;

    result?;

    info!("audit completed");

    Ok(())
}
