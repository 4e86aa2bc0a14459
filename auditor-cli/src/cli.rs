//! Command-line interface of the auditor.

use auditor::config::VerifySide;
use auditor::types::StreamPosition;
use clap::{Parser, ValueEnum};

use crate::error::CliError;

/// Real-time migration auditor for a DynamoDB table copy.
///
/// Consumes the change stream of one side of the migration and verifies, by
/// point lookup, that sampled mutations are reflected on the verification
/// side.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source AWS profile name.
    #[arg(long)]
    pub source_profile: String,

    /// Target AWS profile name.
    #[arg(long)]
    pub target_profile: String,

    /// AWS profile for the stream client (defaults to the source profile).
    #[arg(long)]
    pub stream_profile: Option<String>,

    /// Change stream ARN; enables stream-based verification.
    #[arg(long)]
    pub stream_arn: Option<String>,

    /// Audited table name (required with --stream-arn).
    #[arg(long)]
    pub target_table: Option<String>,

    /// Partition-key attribute name (required with --stream-arn).
    #[arg(long)]
    pub partition_key: Option<String>,

    /// Sort-key attribute name.
    #[arg(long)]
    pub sort_key: Option<String>,

    /// AWS region.
    #[arg(long, default_value = "ap-northeast-1")]
    pub region: String,

    /// Validate 1 out of every N records.
    #[arg(long, default_value_t = 100)]
    pub sample_rate: u64,

    /// Position at which shard iterators are acquired.
    #[arg(long, value_enum, default_value_t = IteratorType::Latest)]
    pub iterator_type: IteratorType,

    /// Which side of the migration to verify against.
    #[arg(long, value_enum, default_value_t = VerifyOn::Source)]
    pub verify_on: VerifyOn,

    /// Log successful validations as well as misses.
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    /// Validates cross-flag requirements clap cannot express.
    pub fn validate(&self) -> Result<(), CliError> {
        if self.stream_arn.is_some() {
            if self.target_table.as_deref().unwrap_or_default().is_empty() {
                return Err(CliError::Arguments(
                    "--target-table is required when using --stream-arn".to_owned(),
                ));
            }
            if self.partition_key.as_deref().unwrap_or_default().is_empty() {
                return Err(CliError::Arguments(
                    "--partition-key is required when using --stream-arn".to_owned(),
                ));
            }
        }

        if self.sample_rate == 0 {
            return Err(CliError::Arguments(
                "--sample-rate must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Shard iterator position, as exposed on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorType {
    /// Skip history and observe only new events.
    Latest,
    /// Replay everything the stream retains.
    TrimHorizon,
}

impl From<IteratorType> for StreamPosition {
    fn from(value: IteratorType) -> Self {
        match value {
            IteratorType::Latest => StreamPosition::Latest,
            IteratorType::TrimHorizon => StreamPosition::TrimHorizon,
        }
    }
}

/// Verification side, as exposed on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOn {
    Source,
    Target,
}

impl From<VerifyOn> for VerifySide {
    fn from(value: VerifyOn) -> Self {
        match value {
            VerifyOn::Source => VerifySide::Source,
            VerifyOn::Target => VerifySide::Target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::parse_from([
            "auditor-cli",
            "--source-profile",
            "src",
            "--target-profile",
            "tgt",
        ])
    }

    #[test]
    fn defaults_match_documented_values() {
        let args = base_args();
        assert_eq!(args.region, "ap-northeast-1");
        assert_eq!(args.sample_rate, 100);
        assert_eq!(args.iterator_type, IteratorType::Latest);
        assert_eq!(args.verify_on, VerifyOn::Source);
        assert!(!args.verbose);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn stream_arn_requires_table_and_partition_key() {
        let mut args = base_args();
        args.stream_arn = Some("arn:aws:dynamodb:::stream".to_owned());
        assert!(args.validate().is_err());

        args.target_table = Some("orders".to_owned());
        assert!(args.validate().is_err());

        args.partition_key = Some("pk".to_owned());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let mut args = base_args();
        args.sample_rate = 0;
        assert!(args.validate().is_err());
    }
}
