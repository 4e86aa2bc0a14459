//! Primary-key extraction from stream records.

use crate::types::StreamRecord;

/// Extracted primary-key values of one record.
///
/// Missing entries and non-string attributes extract as empty strings; a
/// record whose partition value extracts empty is ineligible for sampling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    pub partition: String,
    pub sort: String,
}

/// Reads the configured key attributes out of a record's key map.
pub fn extract_key_values(
    record: &StreamRecord,
    partition_key: &str,
    sort_key: Option<&str>,
) -> KeyValues {
    let partition = record
        .keys
        .get(partition_key)
        .and_then(|attribute| attribute.as_string())
        .unwrap_or_default()
        .to_owned();

    let sort = sort_key
        .and_then(|name| record.keys.get(name))
        .and_then(|attribute| attribute.as_string())
        .unwrap_or_default()
        .to_owned();

    KeyValues { partition, sort }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyAttribute, Mutation};
    use std::collections::HashMap;

    fn record_with_keys(keys: Vec<(&str, KeyAttribute)>) -> StreamRecord {
        StreamRecord {
            event_id: "evt-1".to_owned(),
            mutation: Mutation::Insert,
            keys: keys
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        }
    }

    #[test]
    fn extracts_both_keys() {
        let record = record_with_keys(vec![
            ("pk", KeyAttribute::String("user-1".to_owned())),
            ("sk", KeyAttribute::String("2024-01-01".to_owned())),
        ]);

        let keys = extract_key_values(&record, "pk", Some("sk"));
        assert_eq!(keys.partition, "user-1");
        assert_eq!(keys.sort, "2024-01-01");
    }

    #[test]
    fn missing_attributes_extract_empty() {
        let record = record_with_keys(vec![]);
        let keys = extract_key_values(&record, "pk", Some("sk"));
        assert_eq!(keys, KeyValues::default());
    }

    #[test]
    fn non_string_attributes_extract_empty() {
        let record = record_with_keys(vec![
            ("pk", KeyAttribute::Number("42".to_owned())),
            ("sk", KeyAttribute::Binary(vec![1, 2, 3])),
        ]);

        let keys = extract_key_values(&record, "pk", Some("sk"));
        assert_eq!(keys, KeyValues::default());
    }

    #[test]
    fn sort_is_empty_when_not_configured() {
        let record = record_with_keys(vec![
            ("pk", KeyAttribute::String("user-1".to_owned())),
            ("sk", KeyAttribute::String("2024-01-01".to_owned())),
        ]);

        let keys = extract_key_values(&record, "pk", None);
        assert_eq!(keys.partition, "user-1");
        assert!(keys.sort.is_empty());
    }
}
