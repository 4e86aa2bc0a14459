//! Migration auditor binary.
//!
//! Parses arguments, loads credentials for the three account contexts,
//! initializes tracing and runs stream-based verification with graceful
//! shutdown on SIGINT/SIGTERM.

use clap::Parser;
use tracing::info;

use crate::cli::Args;
use crate::error::CliResult;

mod cli;
mod clients;
mod core;
mod error;

/// Entry point for the auditor.
///
/// Exits non-zero on argument or credential faults; exits zero after a clean
/// shutdown.
fn main() -> CliResult<()> {
    let args = Args::parse();
    args.validate()?;

    let _log_flusher = auditor_telemetry::tracing::init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args))?;

    Ok(())
}

async fn async_main(args: Args) -> CliResult<()> {
    // Without a stream there is nothing to audit.
    if args.stream_arn.is_none() {
        info!("no stream arn provided, nothing to audit");
        return Ok(());
    }

    let clients = clients::build_clients(&args).await?;

    crate::core::run_stream_audit(args, clients).await
}
