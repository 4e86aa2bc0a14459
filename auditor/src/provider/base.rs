use std::future::Future;

use crate::error::AuditResult;
use crate::types::{ItemKey, IteratorRequest, RecordBatch, Shard, ShardIterator, StreamArn};

/// Trait for the change-stream control and data plane.
///
/// Implementations expose the shard topology of one stream and page-wise
/// record consumption through opaque iterator tokens. Implementations must
/// surface reads behind the retention window as
/// [`crate::error::ErrorKind::TrimmedData`] so callers can treat them as a
/// clean close of the affected shard.
pub trait StreamApi {
    /// Lists all shards the provider currently advertises for the stream,
    /// both open and recently closed, with their parent linkage.
    ///
    /// No ordering is guaranteed; callers key by shard id.
    fn list_shards(
        &self,
        stream_arn: &StreamArn,
    ) -> impl Future<Output = AuditResult<Vec<Shard>>> + Send;

    /// Acquires an iterator for one shard at the requested position.
    ///
    /// Returns `None` when the shard has no readable range left (already
    /// trimmed or empty), which callers treat as a clean termination.
    fn shard_iterator(
        &self,
        request: &IteratorRequest,
    ) -> impl Future<Output = AuditResult<Option<ShardIterator>>> + Send;

    /// Reads the next page of records behind an iterator.
    ///
    /// A `next` of `None` in the returned batch means the shard is closed.
    fn read_records(
        &self,
        iterator: &ShardIterator,
        limit: Option<u32>,
    ) -> impl Future<Output = AuditResult<RecordBatch>> + Send;
}

/// Trait for the table control plane and point lookups.
pub trait TableApi {
    /// Resolves the table's currently active change stream.
    ///
    /// Fails with [`crate::error::ErrorKind::NoActiveStream`] when the table
    /// metadata reports none. The value may change across calls when the
    /// stream rotates; callers use the newest value.
    fn latest_stream_arn(
        &self,
        table_name: &str,
    ) -> impl Future<Output = AuditResult<StreamArn>> + Send;

    /// Returns whether an item with the given key exists in the table.
    fn item_exists(
        &self,
        table_name: &str,
        key: &ItemKey,
    ) -> impl Future<Output = AuditResult<bool>> + Send;
}
