//! A scripted in-memory provider implementing both provider traits.
//!
//! Tests build a shard topology page by page, script lookup responses and
//! inject read failures, then observe which iterators were requested and
//! when each lookup happened.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::auditor_error;
use crate::error::{AuditResult, ErrorKind};
use crate::provider::{StreamApi, TableApi};
use crate::types::{
    ItemKey, IteratorRequest, KeyAttribute, RecordBatch, Shard, ShardId, ShardIterator, StreamArn,
    StreamPosition, StreamRecord,
};

/// One observed point lookup.
#[derive(Debug, Clone)]
pub struct LookupCall {
    pub key: String,
    pub at: Instant,
}

struct ShardEntry {
    shard: Shard,
    pages: Vec<Vec<StreamRecord>>,
    closed: bool,
}

#[derive(Default)]
struct Inner {
    stream_arn: Option<StreamArn>,
    shards: Vec<ShardEntry>,
    items: HashSet<String>,
    scripted_lookups: HashMap<String, VecDeque<bool>>,
    lookup_calls: Vec<LookupCall>,
    iterator_requests: Vec<ShardId>,
    read_calls: u64,
    read_failures: HashMap<ShardId, ErrorKind>,
    withheld_iterators: HashSet<ShardId>,
}

/// Scripted in-memory stream and table.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    pub fn new(stream_arn: &str) -> Self {
        let provider = MemoryProvider::default();
        provider.set_stream(stream_arn);
        provider
    }

    /// Sets (or rotates) the active stream identifier.
    pub fn set_stream(&self, stream_arn: &str) {
        self.lock().stream_arn = Some(StreamArn::new(stream_arn));
    }

    /// Makes the table report no active stream.
    pub fn clear_stream(&self) {
        self.lock().stream_arn = None;
    }

    /// Adds an open shard to the advertised topology.
    pub fn add_shard(&self, id: &str, parent: Option<&str>) {
        self.lock().shards.push(ShardEntry {
            shard: Shard {
                id: ShardId::new(id),
                parent_id: parent.map(ShardId::new),
            },
            pages: Vec::new(),
            closed: false,
        });
    }

    /// Appends one page of records to a shard.
    pub fn push_records(&self, shard_id: &str, records: Vec<StreamRecord>) {
        let mut inner = self.lock();
        let entry = inner
            .shards
            .iter_mut()
            .find(|entry| entry.shard.id.as_str() == shard_id)
            .expect("unknown shard in push_records");
        entry.pages.push(records);
    }

    /// Marks a shard closed; readers terminate after draining its pages.
    pub fn close_shard(&self, shard_id: &str) {
        let mut inner = self.lock();
        let entry = inner
            .shards
            .iter_mut()
            .find(|entry| entry.shard.id.as_str() == shard_id)
            .expect("unknown shard in close_shard");
        entry.closed = true;
    }

    /// Stores an item so lookups for `key` succeed.
    pub fn insert_item(&self, key: &ItemKey) {
        let fingerprint = key_fingerprint(key);
        self.lock().items.insert(fingerprint);
    }

    /// Scripts the next lookup responses for `key`, ahead of the stored items.
    pub fn script_lookups(&self, key: &ItemKey, responses: &[bool]) {
        let fingerprint = key_fingerprint(key);
        self.lock()
            .scripted_lookups
            .entry(fingerprint)
            .or_default()
            .extend(responses.iter().copied());
    }

    /// Makes the next read of `shard_id` fail with the given kind.
    pub fn fail_next_read(&self, shard_id: &str, kind: ErrorKind) {
        self.lock()
            .read_failures
            .insert(ShardId::new(shard_id), kind);
    }

    /// Makes iterator acquisition for `shard_id` return no iterator.
    pub fn withhold_iterator(&self, shard_id: &str) {
        self.lock().withheld_iterators.insert(ShardId::new(shard_id));
    }

    /// Returns every lookup observed so far, in order.
    pub fn lookup_calls(&self) -> Vec<LookupCall> {
        self.lock().lookup_calls.clone()
    }

    /// Returns every shard an iterator was requested for, in order.
    pub fn iterator_requests(&self) -> Vec<ShardId> {
        self.lock().iterator_requests.clone()
    }

    /// Returns how many record reads were issued so far.
    pub fn read_calls(&self) -> u64 {
        self.lock().read_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory provider lock poisoned")
    }
}

impl StreamApi for MemoryProvider {
    async fn list_shards(&self, _stream_arn: &StreamArn) -> AuditResult<Vec<Shard>> {
        Ok(self
            .lock()
            .shards
            .iter()
            .map(|entry| entry.shard.clone())
            .collect())
    }

    async fn shard_iterator(
        &self,
        request: &IteratorRequest,
    ) -> AuditResult<Option<ShardIterator>> {
        let mut inner = self.lock();
        inner.iterator_requests.push(request.shard_id.clone());

        if inner.withheld_iterators.contains(&request.shard_id) {
            return Ok(None);
        }

        let Some(entry) = inner
            .shards
            .iter()
            .find(|entry| entry.shard.id == request.shard_id)
        else {
            return Ok(None);
        };

        let page = match request.position {
            StreamPosition::TrimHorizon => 0,
            StreamPosition::Latest => entry.pages.len(),
        };

        Ok(Some(iterator_token(&request.shard_id, page)))
    }

    async fn read_records(
        &self,
        iterator: &ShardIterator,
        _limit: Option<u32>,
    ) -> AuditResult<RecordBatch> {
        let (shard_id, page) = parse_token(iterator);

        let mut inner = self.lock();
        inner.read_calls += 1;

        if let Some(kind) = inner.read_failures.remove(&shard_id) {
            return Err(auditor_error!(kind, "scripted read failure"));
        }

        let Some(entry) = inner.shards.iter().find(|entry| entry.shard.id == shard_id) else {
            return Err(auditor_error!(ErrorKind::StreamApi, "unknown shard"));
        };

        if page < entry.pages.len() {
            let records = entry.pages[page].clone();
            let drained = page + 1 >= entry.pages.len();
            let next = if drained && entry.closed {
                None
            } else {
                Some(iterator_token(&shard_id, page + 1))
            };
            return Ok(RecordBatch { records, next });
        }

        if entry.closed {
            return Ok(RecordBatch {
                records: Vec::new(),
                next: None,
            });
        }

        // Open shard with nothing new yet: an empty poll at the same position.
        Ok(RecordBatch {
            records: Vec::new(),
            next: Some(iterator_token(&shard_id, page)),
        })
    }
}

impl TableApi for MemoryProvider {
    async fn latest_stream_arn(&self, table_name: &str) -> AuditResult<StreamArn> {
        self.lock().stream_arn.clone().ok_or_else(|| {
            auditor_error!(
                ErrorKind::NoActiveStream,
                "table reports no active stream",
                table_name
            )
        })
    }

    async fn item_exists(&self, _table_name: &str, key: &ItemKey) -> AuditResult<bool> {
        let fingerprint = key_fingerprint(key);
        let mut inner = self.lock();

        inner.lookup_calls.push(LookupCall {
            key: fingerprint.clone(),
            at: Instant::now(),
        });

        if let Some(responses) = inner.scripted_lookups.get_mut(&fingerprint)
            && let Some(response) = responses.pop_front()
        {
            return Ok(response);
        }

        Ok(inner.items.contains(&fingerprint))
    }
}

/// Canonical string form of a lookup key, for scripting and assertions.
pub fn key_fingerprint(key: &ItemKey) -> String {
    let mut parts: Vec<String> = key
        .attributes()
        .iter()
        .map(|(name, attribute)| {
            let value = match attribute {
                KeyAttribute::String(value) | KeyAttribute::Number(value) => value.clone(),
                KeyAttribute::Binary(bytes) => format!("{bytes:?}"),
            };
            format!("{name}={value}")
        })
        .collect();
    parts.sort();
    parts.join("&")
}

fn iterator_token(shard_id: &ShardId, page: usize) -> ShardIterator {
    ShardIterator::new(format!("{shard_id}#{page}"))
}

fn parse_token(iterator: &ShardIterator) -> (ShardId, usize) {
    let token = iterator.as_str();
    let (shard_id, page) = token
        .rsplit_once('#')
        .expect("malformed memory provider iterator token");
    (
        ShardId::new(shard_id),
        page.parse().expect("malformed iterator page index"),
    )
}
