//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::StreamPosition;

/// Which side of the migration drives stream consumption and point lookups.
///
/// The engine itself takes its stream-side and lookup-side clients as
/// independent parameters; this setting records how a front end pairs them.
/// The default pairing reads the source side's stream and looks items up on
/// the source as well.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySide {
    #[default]
    Source,
    Target,
}

/// Validation errors for audit configuration settings.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field contains an invalid value.
    #[error("invalid value for field '{field}': {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: &'static str,
    },
}

/// Configuration for one audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Name of the audited table. The same name exists on both sides of the
    /// migration, so it serves stream resolution and point lookups alike.
    pub table_name: String,
    /// Name of the partition-key attribute.
    pub partition_key: String,
    /// Name of the sort-key attribute, when the table has one.
    #[serde(default)]
    pub sort_key: Option<String>,
    /// Validate 1 out of every `sample_rate` processed events.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u64,
    /// Position at which shard iterators are acquired. Fixed per run; shards
    /// discovered mid-run start at the same position.
    #[serde(default)]
    pub position: StreamPosition,
    /// Maximum records per shard read.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: Option<u32>,
    /// Log successful validations as well as misses.
    #[serde(default)]
    pub verbose: bool,
}

impl AuditConfig {
    /// Default sampling rate: validate 1 out of every 100 records.
    pub const DEFAULT_SAMPLE_RATE: u64 = 100;

    /// Default maximum records per shard read.
    pub const DEFAULT_BATCH_LIMIT: u32 = 100;

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table_name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "table_name",
                constraint: "must not be empty",
            });
        }

        if self.partition_key.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "partition_key",
                constraint: "must not be empty",
            });
        }

        if self.sample_rate == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "sample_rate",
                constraint: "must be greater than 0",
            });
        }

        Ok(())
    }
}

fn default_sample_rate() -> u64 {
    AuditConfig::DEFAULT_SAMPLE_RATE
}

fn default_batch_limit() -> Option<u32> {
    Some(AuditConfig::DEFAULT_BATCH_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuditConfig {
        AuditConfig {
            table_name: "orders".to_owned(),
            partition_key: "pk".to_owned(),
            sort_key: None,
            sample_rate: AuditConfig::DEFAULT_SAMPLE_RATE,
            position: StreamPosition::Latest,
            batch_limit: Some(AuditConfig::DEFAULT_BATCH_LIMIT),
            verbose: false,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sample_rate() {
        let mut config = valid_config();
        config.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_names() {
        let mut config = valid_config();
        config.table_name = String::new();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.partition_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: AuditConfig =
            serde_json::from_str(r#"{"table_name": "orders", "partition_key": "pk"}"#).unwrap();
        assert_eq!(config.sample_rate, AuditConfig::DEFAULT_SAMPLE_RATE);
        assert_eq!(config.position, StreamPosition::Latest);
        assert_eq!(config.batch_limit, Some(AuditConfig::DEFAULT_BATCH_LIMIT));
        assert!(!config.verbose);
    }
}
