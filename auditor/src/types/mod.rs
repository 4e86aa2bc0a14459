//! Domain types shared across the audit engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The identifier of a table's currently active change stream.
///
/// Opaque to the engine; a table has at most one active stream and the value
/// may rotate when the stream is disabled and re-enabled, so consumers always
/// use the most recently resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamArn(String);

impl StreamArn {
    pub fn new(arn: impl Into<String>) -> Self {
        StreamArn(arn.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of one shard of a change stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        ShardId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One shard advertised by the stream, with its parent linkage.
///
/// Shards split and merge as write traffic changes; a closed shard has zero
/// or more children whose `parent_id` points back at it. The engine re-derives
/// the parent/child topology from each listing instead of holding a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: ShardId,
    pub parent_id: Option<ShardId>,
}

/// Opaque cursor for reading the next page of records from one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIterator(String);

impl ShardIterator {
    pub fn new(token: impl Into<String>) -> Self {
        ShardIterator(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Position at which a shard iterator is acquired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPosition {
    /// Start at the current tail of the shard, observing only new events.
    #[default]
    Latest,
    /// Start at the earliest retained position and replay history.
    TrimHorizon,
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamPosition::Latest => f.write_str("latest"),
            StreamPosition::TrimHorizon => f.write_str("trim_horizon"),
        }
    }
}

/// Request to acquire an iterator for one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorRequest {
    pub stream_arn: StreamArn,
    pub shard_id: ShardId,
    pub position: StreamPosition,
}

/// The kind of mutation a stream record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Insert,
    Modify,
    Remove,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Insert => f.write_str("insert"),
            Mutation::Modify => f.write_str("modify"),
            Mutation::Remove => f.write_str("remove"),
        }
    }
}

/// A primary-key attribute value.
///
/// Only the three types the store admits in a primary key are modeled. Key
/// extraction handles the string form only; the other forms extract empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAttribute {
    String(String),
    Number(String),
    Binary(Vec<u8>),
}

impl KeyAttribute {
    /// Returns the string form of this attribute, if it has one.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            KeyAttribute::String(value) => Some(value),
            _ => None,
        }
    }
}

/// One immutable mutation event read from a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Unique event identifier, used for deduplicated counting.
    pub event_id: String,
    pub mutation: Mutation,
    /// Primary-key attributes of the mutated item, keyed by attribute name.
    pub keys: HashMap<String, KeyAttribute>,
}

/// One page of records returned from a shard read.
///
/// `next` of `None` means the shard is closed and fully drained.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
    pub next: Option<ShardIterator>,
}

/// A composed primary key for a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    attributes: HashMap<String, KeyAttribute>,
}

impl ItemKey {
    /// Creates a key holding only the partition-key attribute.
    pub fn new(partition_key: &str, partition_value: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert(
            partition_key.to_owned(),
            KeyAttribute::String(partition_value.into()),
        );
        ItemKey { attributes }
    }

    /// Adds the sort-key attribute to the key.
    pub fn with_sort(mut self, sort_key: &str, sort_value: impl Into<String>) -> Self {
        self.attributes
            .insert(sort_key.to_owned(), KeyAttribute::String(sort_value.into()));
        self
    }

    pub fn attributes(&self) -> &HashMap<String, KeyAttribute> {
        &self.attributes
    }
}

/// A sampled record queued for validation.
///
/// Created on sample hit, drained on buffer flush and destroyed after the
/// final verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRecord {
    pub partition_value: String,
    pub sort_value: String,
}

impl ValidationRecord {
    /// Composes the point-lookup key for this record.
    ///
    /// Always includes the partition key; includes the sort key only when one
    /// is configured and the extracted value is non-empty.
    pub fn item_key(&self, partition_key: &str, sort_key: Option<&str>) -> ItemKey {
        let key = ItemKey::new(partition_key, self.partition_value.clone());
        match sort_key {
            Some(name) if !self.sort_value.is_empty() => key.with_sort(name, self.sort_value.clone()),
            _ => key,
        }
    }
}

/// Aggregated verdicts of one validated batch, fed back to the stats owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub validated: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_key_includes_sort_only_when_configured_and_non_empty() {
        let record = ValidationRecord {
            partition_value: "user-1".to_owned(),
            sort_value: "2024-01-01".to_owned(),
        };

        let key = record.item_key("pk", Some("sk"));
        assert_eq!(key.attributes().len(), 2);
        assert_eq!(
            key.attributes().get("sk"),
            Some(&KeyAttribute::String("2024-01-01".to_owned()))
        );

        let key = record.item_key("pk", None);
        assert_eq!(key.attributes().len(), 1);

        let record = ValidationRecord {
            partition_value: "user-1".to_owned(),
            sort_value: String::new(),
        };
        let key = record.item_key("pk", Some("sk"));
        assert_eq!(key.attributes().len(), 1);
    }

    #[test]
    fn stream_position_serializes_snake_case() {
        let json = serde_json::to_string(&StreamPosition::TrimHorizon).unwrap();
        assert_eq!(json, "\"trim_horizon\"");
    }
}
