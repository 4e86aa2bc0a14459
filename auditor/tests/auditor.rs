//! End-to-end tests of the audit engine against the scripted in-memory
//! provider.
//!
//! All tests run on a paused clock: virtual time auto-advances whenever every
//! task is parked on a timer, so the engine's real sleep schedule (the 10 s
//! dispatch head start, 60 s discovery ticks, 30 s flush ticks and the
//! replication/retry waits) elapses deterministically in milliseconds of wall
//! time.

use std::collections::HashSet;
use std::time::Duration;

use auditor::audit::Auditor;
use auditor::config::AuditConfig;
use auditor::error::ErrorKind;
use auditor::stats::StatsSnapshot;
use auditor::test_utils::provider::{MemoryProvider, key_fingerprint};
use auditor::test_utils::record::{insert_record, modify_record, remove_record, stream_record};
use auditor::types::{ItemKey, Mutation, ShardId, StreamPosition};
use auditor_telemetry::tracing::init_test_tracing;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const STREAM_ARN: &str = "arn:aws:dynamodb:ap-northeast-1:000000000000:table/orders/stream/1";

/// Upper bound in virtual time for any condition a test waits on.
const WAIT_LIMIT: Duration = Duration::from_secs(600);

fn test_config(sample_rate: u64) -> AuditConfig {
    AuditConfig {
        table_name: "orders".to_owned(),
        partition_key: "pk".to_owned(),
        sort_key: None,
        sample_rate,
        position: StreamPosition::TrimHorizon,
        batch_limit: Some(AuditConfig::DEFAULT_BATCH_LIMIT),
        verbose: false,
    }
}

async fn start_auditor(
    config: AuditConfig,
    provider: &MemoryProvider,
) -> Auditor<MemoryProvider, MemoryProvider> {
    let mut auditor = Auditor::new(
        config,
        provider.clone(),
        provider.clone(),
        provider.clone(),
    );
    auditor.start().await.expect("auditor failed to start");
    auditor
}

async fn wait_for_stats(
    stats_rx: &mut watch::Receiver<StatsSnapshot>,
    predicate: impl FnMut(&StatsSnapshot) -> bool,
) -> StatsSnapshot {
    let snapshot = timeout(WAIT_LIMIT, stats_rx.wait_for(predicate))
        .await
        .expect("stats condition not reached in time")
        .expect("stats channel closed");
    *snapshot
}

async fn wait_until(mut condition: impl AsyncFnMut() -> bool) {
    timeout(WAIT_LIMIT, async {
        loop {
            if condition().await {
                return;
            }
            sleep(Duration::from_millis(250)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test(start_paused = true)]
async fn samples_every_nth_record() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-001", None);
    let records = (1..=10)
        .map(|i| insert_record(&format!("evt-{i}"), "pk", &format!("p{i}")))
        .collect();
    provider.push_records("shardId-001", records);

    let auditor = start_auditor(test_config(3), &provider).await;
    let mut stats_rx = auditor.stats().expect("auditor not started");

    let snapshot = wait_for_stats(&mut stats_rx, |stats| stats.validation_count == 3).await;
    assert_eq!(snapshot.total, 10);
    assert_eq!(snapshot.insert, 10);
    assert_eq!(snapshot.modify, 0);
    assert_eq!(snapshot.unique, 10);
    assert_eq!(
        snapshot.validation_success + snapshot.validation_failed,
        snapshot.validation_count
    );

    // Records #3, #6 and #9 were the sampled ones.
    let sampled: Vec<String> = provider
        .lookup_calls()
        .iter()
        .map(|call| call.key.clone())
        .collect();
    for expected in ["pk=p3", "pk=p6", "pk=p9"] {
        assert!(sampled.iter().any(|key| key == expected), "missing {expected}");
    }

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn missed_lookup_is_retried_once_after_wait() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-001", None);
    provider.push_records(
        "shardId-001",
        vec![stream_record("evt-1", Mutation::Insert, &[("pk", "K"), ("sk", "S")])],
    );

    // First lookup misses, the retry two seconds later hits.
    let key = ItemKey::new("pk", "K").with_sort("sk", "S");
    provider.script_lookups(&key, &[false, true]);

    let mut config = test_config(1);
    config.sort_key = Some("sk".to_owned());
    let auditor = start_auditor(config, &provider).await;
    let mut stats_rx = auditor.stats().expect("auditor not started");

    let snapshot = wait_for_stats(&mut stats_rx, |stats| stats.validation_count == 1).await;
    assert_eq!(snapshot.validation_success, 1);
    assert_eq!(snapshot.validation_failed, 0);

    let calls = provider.lookup_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].key, key_fingerprint(&key));
    assert_eq!(calls[1].key, key_fingerprint(&key));
    assert!(
        calls[1].at - calls[0].at >= Duration::from_secs(2),
        "retry happened too early"
    );

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn remove_events_are_ignored() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-001", None);
    provider.push_records(
        "shardId-001",
        vec![
            insert_record("evt-1", "pk", "a"),
            remove_record("evt-2", "pk", "b"),
            modify_record("evt-3", "pk", "c"),
        ],
    );

    let auditor = start_auditor(test_config(1), &provider).await;
    let mut stats_rx = auditor.stats().expect("auditor not started");

    let snapshot = wait_for_stats(&mut stats_rx, |stats| stats.validation_count == 2).await;
    assert_eq!(snapshot.total, 2);
    assert_eq!(snapshot.insert, 1);
    assert_eq!(snapshot.modify, 1);
    assert_eq!(snapshot.unique, 2);

    // The removed key was never looked up.
    assert!(
        provider
            .lookup_calls()
            .iter()
            .all(|call| call.key != "pk=b")
    );

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn split_shards_are_adopted_without_rereading_the_parent() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-A", None);
    provider.push_records("shardId-A", vec![insert_record("evt-1", "pk", "a")]);

    let auditor = start_auditor(test_config(1), &provider).await;
    let state = auditor.subscriber_state().expect("auditor not started");

    wait_until(async || {
        state
            .known_shards()
            .await
            .contains(&ShardId::new("shardId-A"))
    })
    .await;

    // The shard splits: A closes, B and C take over its range.
    provider.close_shard("shardId-A");
    provider.add_shard("shardId-B", Some("shardId-A"));
    provider.add_shard("shardId-C", Some("shardId-A"));
    provider.push_records("shardId-B", vec![insert_record("evt-2", "pk", "b")]);
    provider.push_records("shardId-C", vec![insert_record("evt-3", "pk", "c")]);

    // The next discovery refresh adopts both children.
    wait_until(async || {
        let expected: HashSet<ShardId> = ["shardId-A", "shardId-B", "shardId-C"]
            .into_iter()
            .map(ShardId::new)
            .collect();
        state.known_shards().await == expected
    })
    .await;

    wait_until(async || provider.iterator_requests().len() == 3).await;

    // One iterator per shard: repeated refreshes over an unchanged topology
    // never enqueue a second reader.
    sleep(Duration::from_secs(130)).await;
    let requests = provider.iterator_requests();
    assert_eq!(requests.len(), 3);
    let distinct: HashSet<ShardId> = requests.into_iter().collect();
    assert_eq!(distinct.len(), 3);

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn trimmed_shard_closes_cleanly_and_stays_known() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-A", None);
    provider.push_records("shardId-A", vec![insert_record("evt-1", "pk", "a")]);
    provider.fail_next_read("shardId-A", ErrorKind::TrimmedData);

    let auditor = start_auditor(test_config(1), &provider).await;
    let state = auditor.subscriber_state().expect("auditor not started");
    let mut stats_rx = auditor.stats().expect("auditor not started");

    wait_until(async || provider.read_calls() >= 1).await;

    // Two refresh cycles later the shard is still known and was never
    // re-dispatched.
    sleep(Duration::from_secs(130)).await;
    assert!(
        state
            .known_shards()
            .await
            .contains(&ShardId::new("shardId-A"))
    );
    assert_eq!(provider.iterator_requests().len(), 1);

    // The trimmed read never produced records.
    assert_eq!(stats_rx.borrow_and_update().total, 0);

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_once_and_stops_reading() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-001", None);
    provider.push_records(
        "shardId-001",
        vec![
            insert_record("evt-1", "pk", "a"),
            insert_record("evt-2", "pk", "b"),
        ],
    );

    let auditor = start_auditor(test_config(1), &provider).await;
    let mut stats_rx = auditor.stats().expect("auditor not started");

    // Interrupt while records are flowing, before the first buffer flush.
    wait_for_stats(&mut stats_rx, |stats| stats.total == 2).await;
    let reads_before = provider.read_calls();

    auditor.shutdown_and_wait().await.unwrap();

    let snapshot = *stats_rx.borrow_and_update();
    assert_eq!(snapshot.total, 2);
    assert_eq!(
        snapshot.validation_success + snapshot.validation_failed,
        snapshot.validation_count
    );

    // Nothing reads the stream after the drain completed.
    let reads_after = provider.read_calls();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(provider.read_calls(), reads_after);
    assert!(reads_after >= reads_before);
}

#[tokio::test(start_paused = true)]
async fn nil_iterator_terminates_reader_without_reads() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-A", None);
    provider.withhold_iterator("shardId-A");

    let auditor = start_auditor(test_config(1), &provider).await;
    let state = auditor.subscriber_state().expect("auditor not started");

    wait_until(async || !provider.iterator_requests().is_empty()).await;
    sleep(Duration::from_secs(30)).await;

    assert_eq!(provider.read_calls(), 0);
    assert!(
        state
            .known_shards()
            .await
            .contains(&ShardId::new("shardId-A"))
    );

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_buffer_flush_is_a_no_op() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-001", None);

    let auditor = start_auditor(test_config(1), &provider).await;
    let mut stats_rx = auditor.stats().expect("auditor not started");

    // Several flush intervals pass without any records.
    sleep(Duration::from_secs(100)).await;

    assert!(provider.lookup_calls().is_empty());
    let snapshot = *stats_rx.borrow_and_update();
    assert_eq!(snapshot, StatsSnapshot::default());

    auditor.shutdown_and_wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn startup_fails_without_an_active_stream() {
    init_test_tracing();

    let provider = MemoryProvider::default();

    let mut auditor = Auditor::new(
        test_config(1),
        provider.clone(),
        provider.clone(),
        provider.clone(),
    );

    let err = auditor.start().await.expect_err("start should fail");
    assert_eq!(err.kind(), ErrorKind::NoActiveStream);
}

#[tokio::test(start_paused = true)]
async fn stream_loss_during_refresh_is_not_fatal() {
    init_test_tracing();

    let provider = MemoryProvider::new(STREAM_ARN);
    provider.add_shard("shardId-A", None);

    let auditor = start_auditor(test_config(1), &provider).await;
    let state = auditor.subscriber_state().expect("auditor not started");

    wait_until(async || {
        state
            .known_shards()
            .await
            .contains(&ShardId::new("shardId-A"))
    })
    .await;

    // The stream disappears for one refresh cycle, then rotates back with a
    // new shard. Discovery keeps running and adopts it.
    provider.clear_stream();
    sleep(Duration::from_secs(70)).await;
    provider.set_stream(STREAM_ARN);
    provider.add_shard("shardId-B", None);
    provider.push_records("shardId-B", vec![insert_record("evt-1", "pk", "b")]);

    let mut stats_rx = auditor.stats().expect("auditor not started");
    wait_for_stats(&mut stats_rx, |stats| stats.total == 1).await;

    auditor.shutdown_and_wait().await.unwrap();
}
