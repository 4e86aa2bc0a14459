//! AWS client construction for the three account contexts.
//!
//! Each context resolves its credentials from a named profile first; when the
//! profile cannot produce credentials, the ambient provider chain (environment
//! variables, instance role) is tried before giving up. Credentials are
//! verified at startup so misconfiguration fails the process instead of the
//! first data-plane call.

use std::error::Error;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;
use tracing::{info, warn};

use auditor::provider::aws::{DynamoStreamClient, DynamoTableClient};

use crate::cli::Args;
use crate::error::{CliError, CliResult};

/// The three clients of one audit run.
pub struct AuditorClients {
    /// Table client on the source account.
    pub source: DynamoTableClient,
    /// Table client on the target account.
    pub target: DynamoTableClient,
    /// Change-stream client.
    pub stream: DynamoStreamClient,
}

/// Builds all required clients from the parsed arguments.
pub async fn build_clients(args: &Args) -> CliResult<AuditorClients> {
    let stream_profile = match &args.stream_profile {
        Some(profile) => profile.clone(),
        None => {
            info!(
                profile = %args.source_profile,
                "no stream profile specified, using source profile"
            );
            args.source_profile.clone()
        }
    };

    let source_config = load_sdk_config(&args.source_profile, &args.region, "source").await?;
    let target_config = load_sdk_config(&args.target_profile, &args.region, "target").await?;
    let stream_config = load_sdk_config(&stream_profile, &args.region, "stream").await?;

    Ok(AuditorClients {
        source: DynamoTableClient::new(aws_sdk_dynamodb::Client::new(&source_config)),
        target: DynamoTableClient::new(aws_sdk_dynamodb::Client::new(&target_config)),
        stream: DynamoStreamClient::new(aws_sdk_dynamodbstreams::Client::new(&stream_config)),
    })
}

/// Loads an SDK config for one context, verifying that credentials resolve.
async fn load_sdk_config(
    profile: &str,
    region: &str,
    context: &'static str,
) -> CliResult<SdkConfig> {
    if !profile.is_empty() {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(profile)
            .region(Region::new(region.to_owned()))
            .load()
            .await;

        match verify_credentials(&config).await {
            Ok(()) => {
                info!(context, profile, "loaded credentials from profile");
                return Ok(config);
            }
            Err(err) => {
                warn!(
                    context,
                    profile,
                    error = %err,
                    "failed to use profile, attempting instance role"
                );
            }
        }
    }

    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .load()
        .await;

    verify_credentials(&config)
        .await
        .map_err(|source| CliError::Credentials { context, source })?;

    info!(context, "loaded credentials from ambient provider chain");

    Ok(config)
}

async fn verify_credentials(config: &SdkConfig) -> Result<(), Box<dyn Error + Send + Sync>> {
    let provider = config
        .credentials_provider()
        .ok_or("no credentials provider configured")?;

    provider.provide_credentials().await?;

    Ok(())
}
