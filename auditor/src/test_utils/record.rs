//! Builders for synthetic stream records.

use std::collections::HashMap;

use crate::types::{KeyAttribute, Mutation, StreamRecord};

/// Builds a record with string-typed key attributes.
pub fn stream_record(event_id: &str, mutation: Mutation, keys: &[(&str, &str)]) -> StreamRecord {
    StreamRecord {
        event_id: event_id.to_owned(),
        mutation,
        keys: keys
            .iter()
            .map(|(name, value)| ((*name).to_owned(), KeyAttribute::String((*value).to_owned())))
            .collect(),
    }
}

/// Builds an insert record with a single partition-key attribute.
pub fn insert_record(event_id: &str, partition_key: &str, partition_value: &str) -> StreamRecord {
    stream_record(event_id, Mutation::Insert, &[(partition_key, partition_value)])
}

/// Builds a modify record with a single partition-key attribute.
pub fn modify_record(event_id: &str, partition_key: &str, partition_value: &str) -> StreamRecord {
    stream_record(event_id, Mutation::Modify, &[(partition_key, partition_value)])
}

/// Builds a remove record with a single partition-key attribute.
pub fn remove_record(event_id: &str, partition_key: &str, partition_value: &str) -> StreamRecord {
    stream_record(event_id, Mutation::Remove, &[(partition_key, partition_value)])
}

/// Builds a record without any key attributes.
pub fn keyless_record(event_id: &str, mutation: Mutation) -> StreamRecord {
    StreamRecord {
        event_id: event_id.to_owned(),
        mutation,
        keys: HashMap::new(),
    }
}
