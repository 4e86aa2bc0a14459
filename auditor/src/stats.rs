//! Rolling statistics for stream consumption and validation.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::info;

use crate::types::{BatchOutcome, Mutation, StreamRecord};

/// Running counters for one audit run.
///
/// Owned and mutated exclusively by the validation consumer task; workers
/// feed verdicts back through [`BatchOutcome`] messages so there is a single
/// writer. The unique-event set grows for the lifetime of the run, which is
/// accepted for the stream's bounded retention horizon.
#[derive(Debug)]
pub struct Stats {
    started_at: Instant,
    total: u64,
    insert: u64,
    modify: u64,
    unique_event_ids: HashSet<String>,
    validation_count: u64,
    validation_success: u64,
    validation_failed: u64,
}

/// Point-in-time copy of the counters, published for observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub unique: u64,
    pub insert: u64,
    pub modify: u64,
    pub validation_count: u64,
    pub validation_success: u64,
    pub validation_failed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            started_at: Instant::now(),
            total: 0,
            insert: 0,
            modify: 0,
            unique_event_ids: HashSet::new(),
            validation_count: 0,
            validation_success: 0,
            validation_failed: 0,
        }
    }

    /// Counts one insert or modify event.
    ///
    /// Remove events never reach this method; the consumer drops them before
    /// counting.
    pub fn record_event(&mut self, record: &StreamRecord) {
        self.total += 1;
        match record.mutation {
            Mutation::Insert => self.insert += 1,
            Mutation::Modify => self.modify += 1,
            Mutation::Remove => {}
        }
        self.unique_event_ids.insert(record.event_id.clone());
    }

    /// Returns the running total of counted events.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Folds the verdicts of one validated batch into the counters.
    pub fn apply_outcome(&mut self, outcome: BatchOutcome) {
        self.validation_count += outcome.validated;
        self.validation_success += outcome.succeeded;
        self.validation_failed += outcome.failed;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total,
            unique: self.unique_event_ids.len() as u64,
            insert: self.insert,
            modify: self.modify,
            validation_count: self.validation_count,
            validation_success: self.validation_success,
            validation_failed: self.validation_failed,
        }
    }

    /// Emits the rolling statistics lines.
    pub fn log_summary(&self) {
        let elapsed = self.started_at.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();
        let events_per_sec = if elapsed_secs > 0.0 {
            self.total as f64 / elapsed_secs
        } else {
            0.0
        };

        info!(
            elapsed_secs = elapsed.as_secs(),
            total = self.total,
            unique = self.unique_event_ids.len(),
            insert = self.insert,
            modify = self.modify,
            events_per_sec = format!("{events_per_sec:.2}"),
            "stream event statistics"
        );

        if self.validation_count > 0 {
            let success_rate =
                self.validation_success as f64 / self.validation_count as f64 * 100.0;
            info!(
                sampled = self.validation_count,
                success = self.validation_success,
                success_rate = format!("{success_rate:.1}%"),
                failed = self.validation_failed,
                "validation statistics"
            );
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(event_id: &str, mutation: Mutation) -> StreamRecord {
        StreamRecord {
            event_id: event_id.to_owned(),
            mutation,
            keys: HashMap::new(),
        }
    }

    #[test]
    fn counts_events_by_mutation() {
        let mut stats = Stats::new();
        stats.record_event(&record("a", Mutation::Insert));
        stats.record_event(&record("b", Mutation::Insert));
        stats.record_event(&record("c", Mutation::Modify));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.insert, 2);
        assert_eq!(snapshot.modify, 1);
        assert_eq!(snapshot.unique, 3);
    }

    #[test]
    fn duplicate_event_ids_count_once_in_unique() {
        let mut stats = Stats::new();
        stats.record_event(&record("a", Mutation::Insert));
        stats.record_event(&record("a", Mutation::Insert));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.unique, 1);
    }

    #[test]
    fn validation_counters_stay_consistent() {
        let mut stats = Stats::new();
        stats.apply_outcome(BatchOutcome {
            validated: 3,
            succeeded: 2,
            failed: 1,
        });
        stats.apply_outcome(BatchOutcome {
            validated: 1,
            succeeded: 1,
            failed: 0,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.validation_count, 4);
        assert_eq!(
            snapshot.validation_success + snapshot.validation_failed,
            snapshot.validation_count
        );
    }
}
