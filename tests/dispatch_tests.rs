use async_trait::async_trait;
use gridcast::client::{MemoryGrid, PolicyHint, RequestClient, SendError};
use gridcast::config::{DispatchConfig, FailurePolicy, LimiterConfig};
use gridcast::dispatch::{DispatchError, DispatchPhase, Dispatcher, StopReason};
use gridcast::model::{Color, Coord, Operation, ResourceId};
use gridcast::storage::{CheckpointStore, MemoryStorage, Storage, StorageError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const DAY: Duration = Duration::from_secs(24 * 3600);

fn ops(n: i64) -> Vec<Operation> {
    (0..n)
        .map(|i| Operation::new(Coord::new(i, 0), Color((i % 16) as u32)))
        .collect()
}

/// No pacing at all, so tests only see the delays they configure.
fn unpaced() -> LimiterConfig {
    LimiterConfig {
        min_spacing: Duration::ZERO,
        burst_quota: 10_000,
        burst_window: Duration::from_secs(10),
        burst_safety_margin: Duration::ZERO,
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
    }
}

fn store() -> (Arc<MemoryStorage>, Arc<CheckpointStore>) {
    let storage = Arc::new(MemoryStorage::new());
    let store = Arc::new(CheckpointStore::new(storage.clone(), "test-client", DAY));
    (storage, store)
}

fn resource() -> ResourceId {
    ResourceId::new("canvas")
}

/// Records the virtual time of every send it forwards.
struct RecordingClient {
    inner: Arc<MemoryGrid>,
    sent_at: Mutex<Vec<Instant>>,
}

#[async_trait]
impl RequestClient for RecordingClient {
    async fn send(&self, op: &Operation) -> Result<(), SendError> {
        self.sent_at.lock().unwrap().push(Instant::now());
        self.inner.send(op).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_thousand_operations_respect_burst_window() {
    let grid = Arc::new(MemoryGrid::new());
    let client = Arc::new(RecordingClient {
        inner: grid.clone(),
        sent_at: Mutex::new(Vec::new()),
    });
    let (_, store) = store();

    let limiter = LimiterConfig {
        burst_quota: 15,
        burst_window: Duration::from_secs(10),
        ..LimiterConfig::default()
    };
    let dispatcher = Dispatcher::builder(client.clone(), store.clone())
        .limiter(limiter)
        .build();

    let report = dispatcher.dispatch(ops(1000), resource()).await.unwrap();

    assert_eq!(report.outcome, StopReason::Completed);
    assert_eq!(report.completed, 1000);
    assert_eq!(report.errors, 0);
    assert_eq!(report.remaining, 0);
    assert!(
        report.elapsed.as_secs_f64() >= (1000.0 / 15.0 - 1.0) * 10.0,
        "finished too fast: {:?}",
        report.elapsed
    );

    // no 10s window ever holds more than 15 sends
    let sent_at = client.sent_at.lock().unwrap().clone();
    assert_eq!(sent_at.len(), 1000);
    for pair in sent_at.windows(16) {
        assert!(pair[15].duration_since(pair[0]) >= Duration::from_secs(10));
    }

    assert!(store.peek().await.is_none());
    assert!(store.load_archived().await.is_some());
    assert_eq!(dispatcher.phase(), DispatchPhase::Stopped(StopReason::Completed));
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_resource_stops_and_keeps_checkpoint() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_on(51, SendError::InsufficientResource);
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store.clone())
        .limiter(unpaced())
        .build();

    let report = dispatcher.dispatch(ops(100), resource()).await.unwrap();

    assert_eq!(report.outcome, StopReason::InsufficientResource);
    assert_eq!(report.completed, 50);
    assert_eq!(report.errors, 1);
    assert_eq!(report.remaining, 49);
    assert_eq!(grid.send_count(), 51);

    let summary = store.peek().await.expect("checkpoint retained");
    assert_eq!(summary.remaining, 49);
    assert_eq!(summary.completed, 50);
    assert_eq!(summary.session_id, report.session_id);

    let session = dispatcher.session().await.unwrap();
    assert!(!session.active);
    assert!(session.is_conserved());
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_resource_under_requeue_keeps_head() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_on(3, SendError::InsufficientResource);
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store.clone())
        .limiter(unpaced())
        .config(DispatchConfig {
            failure_policy: FailurePolicy::Requeue { max_retries: 3 },
            ..DispatchConfig::default()
        })
        .build();

    let batch = ops(5);
    let report = dispatcher.dispatch(batch.clone(), resource()).await.unwrap();
    assert_eq!(report.outcome, StopReason::InsufficientResource);
    assert_eq!(report.remaining, 3);

    let session = store.load().await.unwrap();
    assert_eq!(session.pending_queue.front().map(|p| p.op), Some(batch[2]));
}

#[tokio::test(start_paused = true)]
async fn test_queue_is_conserved_while_running() {
    let grid = Arc::new(MemoryGrid::with_latency(Duration::from_millis(40)));
    grid.fail_on(7, SendError::Other("bad gateway".into()));
    grid.fail_on(19, SendError::RateLimited);
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid, store)
        .limiter(unpaced())
        .config(DispatchConfig {
            rate_limit_cooldown: Duration::from_secs(2),
            ..DispatchConfig::default()
        })
        .build();
    dispatcher.start_session(ops(40), resource()).await.unwrap();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });

    let mut observations = 0;
    while !run.is_finished() {
        let status = dispatcher.status().await;
        assert_eq!(
            status.completed + status.dropped + status.queue_depth as u64,
            status.original_count as u64,
            "counts drifted: {:?}",
            status
        );
        observations += 1;
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    assert!(observations > 10);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.completed, 38);
    assert_eq!(report.errors, 2);
    assert_eq!(report.dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_run_fails_fast() {
    let grid = Arc::new(MemoryGrid::with_latency(Duration::from_secs(1)));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid, store).limiter(unpaced()).build();
    dispatcher.start_session(ops(5), resource()).await.unwrap();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(dispatcher.is_running());
    assert!(matches!(dispatcher.run().await, Err(DispatchError::AlreadyRunning)));
    assert!(matches!(
        dispatcher.start_session(ops(2), resource()).await,
        Err(DispatchError::AlreadyRunning)
    ));

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.completed, 5);
    assert!(!dispatcher.is_running());
}

#[tokio::test]
async fn test_run_without_session() {
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(Arc::new(MemoryGrid::new()), store).build();
    assert!(matches!(dispatcher.run().await, Err(DispatchError::NoSession)));
    assert!(!dispatcher.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_in_flight_send_settle() {
    let grid = Arc::new(MemoryGrid::with_latency(Duration::from_secs(1)));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store.clone())
        .limiter(unpaced())
        .build();
    dispatcher.start_session(ops(10), resource()).await.unwrap();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(2500)).await;
    dispatcher.stop().await;

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, StopReason::Cancelled);
    // the send in flight when stop was called still counts
    assert_eq!(report.completed, 3);
    assert_eq!(report.completed, grid.send_count());
    assert_eq!(report.remaining, 7);

    let summary = store.peek().await.expect("checkpoint retained");
    assert_eq!(summary.remaining, 7);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cuts_cooldown_short() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_on(1, SendError::BurstLimited);
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid, store)
        .limiter(unpaced())
        .config(DispatchConfig {
            burst_cooldown: Duration::from_secs(600),
            ..DispatchConfig::default()
        })
        .build();
    dispatcher.start_session(ops(3), resource()).await.unwrap();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_secs(1)).await;
    dispatcher.stop().await;

    let started = Instant::now();
    let report = run.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(report.outcome, StopReason::Cancelled);
    assert_eq!(report.remaining, 2);
}

#[tokio::test(start_paused = true)]
async fn test_burst_limit_cools_down_and_resets_window() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_on(3, SendError::BurstLimited);
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store)
        .limiter(unpaced())
        .config(DispatchConfig {
            burst_cooldown: Duration::from_secs(15),
            ..DispatchConfig::default()
        })
        .build();

    let report = dispatcher.dispatch(ops(5), resource()).await.unwrap();

    assert!(report.elapsed >= Duration::from_secs(15));
    assert_eq!(report.outcome, StopReason::Completed);
    assert_eq!(report.completed, 4);
    assert_eq!(report.errors, 1);
    assert_eq!(report.dropped, 1);
    // only the two sends after the cooldown are still in the window
    assert_eq!(dispatcher.limiter().burst_usage(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let grid = Arc::new(MemoryGrid::with_latency(Duration::from_secs(30)));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid, store)
        .limiter(unpaced())
        .config(DispatchConfig {
            send_timeout: Duration::from_secs(8),
            ..DispatchConfig::default()
        })
        .build();

    let report = dispatcher.dispatch(ops(2), resource()).await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(report.errors, 2);
    assert_eq!(report.dropped, 2);
    assert_eq!(report.outcome, StopReason::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_retries_at_back_of_queue() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_on(1, SendError::Other("flaky".into()));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store)
        .limiter(unpaced())
        .config(DispatchConfig {
            failure_policy: FailurePolicy::Requeue { max_retries: 2 },
            ..DispatchConfig::default()
        })
        .build();

    let batch = ops(3);
    let report = dispatcher.dispatch(batch.clone(), resource()).await.unwrap();

    assert_eq!(report.completed, 3);
    assert_eq!(report.errors, 1);
    assert_eq!(report.dropped, 0);
    assert_eq!(grid.send_count(), 4);
    for op in &batch {
        assert_eq!(grid.cell(op.key), Some(op.payload));
    }
}

#[tokio::test(start_paused = true)]
async fn test_requeue_gives_up_after_max_retries() {
    let grid = Arc::new(MemoryGrid::new());
    grid.fail_from(1, SendError::Other("down".into()));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store)
        .limiter(unpaced())
        .config(DispatchConfig {
            failure_policy: FailurePolicy::Requeue { max_retries: 2 },
            ..DispatchConfig::default()
        })
        .build();

    let report = dispatcher.dispatch(ops(1), resource()).await.unwrap();
    assert_eq!(grid.send_count(), 3);
    assert_eq!(report.errors, 3);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.remaining, 0);
}

#[tokio::test(start_paused = true)]
async fn test_policy_hint_only_tightens() {
    let grid = Arc::new(MemoryGrid::new());
    grid.set_policy_hint(Some(PolicyHint {
        tier: Some("basic".into()),
        burst_quota: Some(8),
        burst_window: None,
    }));
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store)
        .limiter(LimiterConfig {
            burst_quota: 15,
            ..unpaced()
        })
        .config(DispatchConfig {
            policy_poll_every: 1,
            ..DispatchConfig::default()
        })
        .server_status(grid.clone())
        .build();

    dispatcher.dispatch(ops(3), resource()).await.unwrap();
    assert_eq!(dispatcher.limiter().burst_quota(), 4);

    grid.set_policy_hint(Some(PolicyHint {
        burst_quota: Some(100),
        ..PolicyHint::default()
    }));
    dispatcher.dispatch(ops(3), resource()).await.unwrap();
    assert_eq!(dispatcher.limiter().burst_quota(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_broken_storage_does_not_stop_dispatch() {
    let grid = Arc::new(MemoryGrid::new());
    let (storage, store) = store();
    storage.set_failing(true);
    let dispatcher = Dispatcher::builder(grid, store)
        .limiter(unpaced())
        .config(DispatchConfig {
            checkpoint_every: 1,
            ..DispatchConfig::default()
        })
        .build();

    let report = dispatcher.dispatch(ops(20), resource()).await.unwrap();
    assert_eq!(report.completed, 20);
    assert!(report.is_complete());
}

#[tokio::test(start_paused = true)]
async fn test_progress_and_status_reporting() {
    let grid = Arc::new(MemoryGrid::new());
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid, store)
        .limiter(unpaced())
        .config(DispatchConfig {
            progress_every: 5,
            ..DispatchConfig::default()
        })
        .build();
    let progress = dispatcher.subscribe();

    let session_id = dispatcher.start_session(ops(12), resource()).await.unwrap();
    let idle = dispatcher.status().await;
    assert_eq!(idle.phase, DispatchPhase::Idle);
    assert!(!idle.running);
    assert_eq!(idle.queue_depth, 12);
    assert!(idle.has_resumable_checkpoint);
    assert_eq!(idle.session_id, Some(session_id));

    dispatcher.run().await.unwrap();

    let last = progress.borrow().clone().expect("progress published");
    assert_eq!(last.session_id, session_id);
    assert_eq!(last.completed, 12);
    assert_eq!(last.remaining, 0);

    let done = dispatcher.status().await;
    assert_eq!(done.completed, 12);
    assert_eq!(done.queue_depth, 0);
    assert_eq!(done.sends_last_minute, 12);
    assert!(!done.has_resumable_checkpoint);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_admission_wait_sends_nothing_more() {
    let grid = Arc::new(MemoryGrid::new());
    let (_, store) = store();
    let dispatcher = Dispatcher::builder(grid.clone(), store.clone())
        .limiter(LimiterConfig {
            burst_quota: 1,
            ..unpaced()
        })
        .build();
    dispatcher.start_session(ops(3), resource()).await.unwrap();

    let runner = dispatcher.clone();
    let run = tokio::spawn(async move { runner.run().await });

    // the second send is held back by the burst window
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(grid.send_count(), 1);
    dispatcher.stop().await;

    let stopped_at = Instant::now();
    let report = run.await.unwrap().unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(grid.send_count(), 1);
    assert_eq!(report.outcome, StopReason::Cancelled);
    assert_eq!(report.completed, 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(store.peek().await.unwrap().remaining, 2);
}

/// Storage whose writes take a long time.
struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
}

#[async_trait]
impl Storage for SlowStorage {
    async fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        self.inner.read(slot).await
    }

    async fn write(&self, slot: &str, data: &str) -> Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.write(slot, data).await
    }

    async fn remove(&self, slot: &str) -> Result<(), StorageError> {
        self.inner.remove(slot).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_status_not_blocked_by_slow_checkpoint_save() {
    let storage = Arc::new(SlowStorage {
        inner: MemoryStorage::new(),
        delay: Duration::from_secs(5),
    });
    let store = Arc::new(CheckpointStore::new(storage, "test-client", DAY));
    let dispatcher = Dispatcher::builder(Arc::new(MemoryGrid::new()), store).build();

    let starter = dispatcher.clone();
    let start = tokio::spawn(async move { starter.start_session(ops(4), resource()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = tokio::time::timeout(Duration::from_millis(100), dispatcher.status())
        .await
        .expect("status waited on the checkpoint write");
    assert_eq!(status.queue_depth, 4);

    tokio::time::timeout(Duration::from_millis(100), dispatcher.stop())
        .await
        .expect("stop waited on the checkpoint write");

    let session_id = start.await.unwrap().unwrap();
    assert_eq!(status.session_id, Some(session_id));
}
