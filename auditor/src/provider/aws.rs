//! DynamoDB-backed implementations of the provider traits.
//!
//! Thin adapters between the SDK types and the engine's domain types. The
//! only error condition given special treatment is
//! `TrimmedDataAccessException`, which is mapped to
//! [`ErrorKind::TrimmedData`] so shard readers can treat it as a clean close.

use std::collections::HashMap;

use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodbstreams::types::{
    AttributeValue as StreamAttributeValue, OperationType, Record, ShardIteratorType,
};
use tracing::debug;

use crate::error::{AuditError, AuditResult, ErrorKind};
use crate::provider::base::{StreamApi, TableApi};
use crate::types::{
    ItemKey, IteratorRequest, KeyAttribute, Mutation, RecordBatch, Shard, ShardId, ShardIterator,
    StreamArn, StreamPosition, StreamRecord,
};

/// [`TableApi`] implementation over a DynamoDB client.
///
/// One instance exists per credential context; the stream-side and
/// lookup-side clients are separate instances of this type.
#[derive(Debug, Clone)]
pub struct DynamoTableClient {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoTableClient {
    pub fn new(client: aws_sdk_dynamodb::Client) -> Self {
        DynamoTableClient { client }
    }
}

impl TableApi for DynamoTableClient {
    async fn latest_stream_arn(&self, table_name: &str) -> AuditResult<StreamArn> {
        let output = self
            .client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
            .map_err(|err| {
                AuditError::with_source(ErrorKind::TableApi, "describe table failed", err)
            })?;

        output
            .table
            .and_then(|table| table.latest_stream_arn)
            .map(StreamArn::new)
            .ok_or_else(|| {
                crate::auditor_error!(
                    ErrorKind::NoActiveStream,
                    "table reports no active stream",
                    table_name
                )
            })
    }

    async fn item_exists(&self, table_name: &str, key: &ItemKey) -> AuditResult<bool> {
        let output = self
            .client
            .get_item()
            .table_name(table_name)
            .set_key(Some(to_attribute_values(key)))
            .send()
            .await
            .map_err(|err| {
                AuditError::with_source(ErrorKind::TableApi, "get item failed", err)
            })?;

        Ok(output.item.is_some_and(|item| !item.is_empty()))
    }
}

/// [`StreamApi`] implementation over a DynamoDB Streams client.
#[derive(Debug, Clone)]
pub struct DynamoStreamClient {
    client: aws_sdk_dynamodbstreams::Client,
}

impl DynamoStreamClient {
    pub fn new(client: aws_sdk_dynamodbstreams::Client) -> Self {
        DynamoStreamClient { client }
    }
}

impl StreamApi for DynamoStreamClient {
    async fn list_shards(&self, stream_arn: &StreamArn) -> AuditResult<Vec<Shard>> {
        let output = self
            .client
            .describe_stream()
            .stream_arn(stream_arn.as_str())
            .send()
            .await
            .map_err(|err| {
                AuditError::with_source(ErrorKind::StreamApi, "describe stream failed", err)
            })?;

        let Some(description) = output.stream_description else {
            return Ok(Vec::new());
        };

        let shards = description
            .shards
            .unwrap_or_default()
            .into_iter()
            .filter_map(|shard| {
                let id = shard.shard_id.map(ShardId::new)?;
                Some(Shard {
                    id,
                    parent_id: shard.parent_shard_id.map(ShardId::new),
                })
            })
            .collect();

        Ok(shards)
    }

    async fn shard_iterator(
        &self,
        request: &IteratorRequest,
    ) -> AuditResult<Option<ShardIterator>> {
        let iterator_type = match request.position {
            StreamPosition::Latest => ShardIteratorType::Latest,
            StreamPosition::TrimHorizon => ShardIteratorType::TrimHorizon,
        };

        let output = self
            .client
            .get_shard_iterator()
            .stream_arn(request.stream_arn.as_str())
            .shard_id(request.shard_id.as_str())
            .shard_iterator_type(iterator_type)
            .send()
            .await
            .map_err(|err| {
                AuditError::with_source(ErrorKind::StreamApi, "get shard iterator failed", err)
            })?;

        Ok(output.shard_iterator.map(ShardIterator::new))
    }

    async fn read_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<u32>,
    ) -> AuditResult<RecordBatch> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator.as_str())
            .set_limit(limit.map(|limit| limit as i32))
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .is_some_and(|service| service.is_trimmed_data_access_exception())
                {
                    AuditError::with_source(
                        ErrorKind::TrimmedData,
                        "read behind the retention window",
                        err,
                    )
                } else {
                    AuditError::with_source(ErrorKind::StreamApi, "get records failed", err)
                }
            })?;

        let records = output
            .records
            .unwrap_or_default()
            .into_iter()
            .filter_map(from_stream_record)
            .collect();

        Ok(RecordBatch {
            records,
            next: output.next_shard_iterator.map(ShardIterator::new),
        })
    }
}

/// Converts a composed lookup key into the SDK attribute map.
fn to_attribute_values(key: &ItemKey) -> HashMap<String, AttributeValue> {
    key.attributes()
        .iter()
        .map(|(name, attribute)| {
            let value = match attribute {
                KeyAttribute::String(value) => AttributeValue::S(value.clone()),
                KeyAttribute::Number(value) => AttributeValue::N(value.clone()),
                KeyAttribute::Binary(value) => AttributeValue::B(Blob::new(value.clone())),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Converts one SDK stream record into the domain type.
///
/// Records without a recognizable mutation kind are dropped here so the
/// engine's counters only ever see insert, modify or remove events.
fn from_stream_record(record: Record) -> Option<StreamRecord> {
    let mutation = match record.event_name {
        Some(OperationType::Insert) => Mutation::Insert,
        Some(OperationType::Modify) => Mutation::Modify,
        Some(OperationType::Remove) => Mutation::Remove,
        other => {
            debug!(event_name = ?other, "skipping record with unrecognized mutation kind");
            return None;
        }
    };

    let keys = record
        .dynamodb
        .and_then(|change| change.keys)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| {
            let attribute = match value {
                StreamAttributeValue::S(value) => KeyAttribute::String(value),
                StreamAttributeValue::N(value) => KeyAttribute::Number(value),
                StreamAttributeValue::B(value) => KeyAttribute::Binary(value.into_inner()),
                _ => return None,
            };
            Some((name, attribute))
        })
        .collect();

    Some(StreamRecord {
        event_id: record.event_id.unwrap_or_default(),
        mutation,
        keys,
    })
}
