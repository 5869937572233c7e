//! End-to-end worker scenarios over the in-memory broker.
//!
//! Intervals are millisecond-scale so a full consume/retry/recover cycle
//! fits in a fraction of a second of wall clock.

use conveyor_broker::{Broker, MemoryBroker, Message, QueueName};
use conveyor_core::config::WorkerConfig;
use conveyor_core::error::Error;
use conveyor_worker::{Producer, TaskRegistry, Worker};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

fn fast_config(name: &str) -> WorkerConfig {
    WorkerConfig {
        name: name.to_string(),
        prefetch: 1,
        heartbeat_interval_ms: 25,
        schedule_poll_interval_ms: 20,
        reaper_interval_ms: 25,
        visibility_timeout_ms: 100,
        reserve_timeout_ms: 40,
        sleep_on_empty_ms: 10,
    }
}

struct Running {
    worker: Arc<Worker>,
    handle: JoinHandle<()>,
}

fn start_worker(
    config: WorkerConfig,
    broker: Arc<MemoryBroker>,
    registry: TaskRegistry,
) -> Running {
    let worker = Arc::new(Worker::new(config, broker, registry));
    let runner = worker.clone();
    let handle = tokio::spawn(async move {
        runner.run().await.expect("worker run");
    });
    Running { worker, handle }
}

async fn stop_worker(running: Running) {
    running.worker.shutdown_controller().shutdown();
    running.handle.await.expect("worker join");
}

/// Poll until `check` holds or the deadline passes.
async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check().await
}

/// Registry with one counting handler that always succeeds.
fn counting_registry(task: &str, calls: &Arc<AtomicU32>) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    let sink = calls.clone();
    registry.register_fn(
        task,
        3,
        Duration::from_millis(50),
        move |_args: Vec<Value>, _kwargs: Map<String, Value>| {
            let sink = sink.clone();
            async move {
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );
    registry
}

#[tokio::test]
async fn immediate_dispatch_is_consumed_and_settled() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());
    let calls = Arc::new(AtomicU32::new(0));

    let mut registry = TaskRegistry::new();
    let sink = calls.clone();
    registry.register_fn(
        "add",
        3,
        Duration::from_millis(50),
        move |args: Vec<Value>, _kwargs: Map<String, Value>| {
            let sink = sink.clone();
            async move {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                assert_eq!(sum, 30);
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );

    let running = start_worker(fast_config("w-immediate"), broker.clone(), registry);
    producer
        .dispatch("add", vec![json!(10), json!(20)], Map::new())
        .await
        .unwrap();

    let sink = calls.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let sink = sink.clone();
            async move { sink.load(Ordering::SeqCst) == 1 }
        })
        .await
    );
    stop_worker(running).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broker.depth(QueueName::Ready).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Dead).await.unwrap(), 0);
}

#[tokio::test]
async fn countdown_dispatch_waits_in_scheduled_then_runs() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());
    let calls = Arc::new(AtomicU32::new(0));
    let registry = counting_registry("add", &calls);

    let running = start_worker(fast_config("w-countdown"), broker.clone(), registry);
    producer
        .dispatch_in(
            "add",
            vec![json!(1), json!(2)],
            Map::new(),
            Duration::from_millis(150),
        )
        .await
        .unwrap();

    // Still parked in the scheduled set well before the eta.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(broker.depth(QueueName::Scheduled).await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let sink = calls.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let sink = sink.clone();
            async move { sink.load(Ordering::SeqCst) == 1 }
        })
        .await
    );
    assert_eq!(broker.depth(QueueName::Scheduled).await.unwrap(), 0);
    stop_worker(running).await;
}

#[tokio::test]
async fn abandoned_reservation_is_recovered_and_completed() {
    let broker = Arc::new(MemoryBroker::new());
    let calls = Arc::new(AtomicU32::new(0));

    // A "crashed" consumer: reserve, then never settle.
    broker
        .send(&Message::new("add", vec![json!(1)], Map::new()))
        .await
        .unwrap();
    let _abandoned = broker
        .reserve(Duration::from_millis(50))
        .await
        .unwrap()
        .expect("reserved");
    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 1);

    // A fresh worker's reaper returns the message to ready after the
    // visibility timeout, and the main loop completes it.
    let registry = counting_registry("add", &calls);
    let running = start_worker(fast_config("w-recover"), broker.clone(), registry);

    let sink = calls.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let sink = sink.clone();
            async move { sink.load(Ordering::SeqCst) == 1 }
        })
        .await
    );
    stop_worker(running).await;

    assert_eq!(broker.depth(QueueName::Ready).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 0);
}

#[tokio::test]
async fn failing_handler_is_retried_then_dead_lettered() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());
    let attempts = Arc::new(AtomicU32::new(0));

    let mut registry = TaskRegistry::new();
    let sink = attempts.clone();
    registry.register_fn(
        "always-fails",
        2,
        Duration::from_millis(30),
        move |_args: Vec<Value>, _kwargs: Map<String, Value>| {
            let sink = sink.clone();
            async move {
                sink.fetch_add(1, Ordering::SeqCst);
                Err(Error::internal("nope"))
            }
        },
    );

    let running = start_worker(fast_config("w-retry"), broker.clone(), registry);
    producer
        .dispatch("always-fails", vec![], Map::new())
        .await
        .unwrap();

    let watched = broker.clone();
    assert!(
        wait_until(Duration::from_secs(3), move || {
            let broker = watched.clone();
            async move { broker.depth(QueueName::Dead).await.unwrap() == 1 }
        })
        .await
    );
    stop_worker(running).await;

    // max_retries = 2 means exactly three attempts reach the handler.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(broker.depth(QueueName::Ready).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Scheduled).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Dead).await.unwrap(), 1);
}

#[tokio::test]
async fn unknown_task_goes_straight_to_dead() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());

    let running = start_worker(fast_config("w-unknown"), broker.clone(), TaskRegistry::new());
    producer
        .dispatch("not-registered", vec![], Map::new())
        .await
        .unwrap();

    let watched = broker.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let broker = watched.clone();
            async move { broker.depth(QueueName::Dead).await.unwrap() == 1 }
        })
        .await
    );
    stop_worker(running).await;

    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Ready).await.unwrap(), 0);
}

#[tokio::test]
async fn heartbeats_track_worker_liveness() {
    let broker = Arc::new(MemoryBroker::new());

    let a = start_worker(fast_config("worker-a"), broker.clone(), TaskRegistry::new());
    let b = start_worker(fast_config("worker-b"), broker.clone(), TaskRegistry::new());

    // Both beat at least twice.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let alive = broker
        .list_alive_workers(Duration::from_millis(300))
        .await
        .unwrap();
    assert!(alive.contains(&"worker-a".to_string()));
    assert!(alive.contains(&"worker-b".to_string()));

    stop_worker(a).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let alive = broker
        .list_alive_workers(Duration::from_millis(120))
        .await
        .unwrap();
    assert!(!alive.contains(&"worker-a".to_string()));
    assert!(alive.contains(&"worker-b".to_string()));

    stop_worker(b).await;
}

#[tokio::test]
async fn shutdown_restores_unstarted_prefetched_deliveries() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());
    let started = Arc::new(AtomicU32::new(0));

    let mut config = fast_config("w-drain");
    config.prefetch = 3;

    let mut registry = TaskRegistry::new();
    let sink = started.clone();
    registry.register_fn(
        "slow",
        0,
        Duration::from_millis(30),
        move |_args: Vec<Value>, _kwargs: Map<String, Value>| {
            let sink = sink.clone();
            async move {
                sink.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok(())
            }
        },
    );

    for _ in 0..3 {
        producer.dispatch("slow", vec![], Map::new()).await.unwrap();
    }

    let running = start_worker(config, broker.clone(), registry);

    // Let the worker buffer all three and start the first.
    let sink = started.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let sink = sink.clone();
            async move { sink.load(Ordering::SeqCst) == 1 }
        })
        .await
    );
    stop_worker(running).await;

    // The in-flight delivery finished and was acked; the two unstarted
    // ones went back to ready, not lost and not dead.
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(broker.depth(QueueName::Ready).await.unwrap(), 2);
    assert_eq!(broker.depth(QueueName::Reserved).await.unwrap(), 0);
    assert_eq!(broker.depth(QueueName::Dead).await.unwrap(), 0);
}

#[tokio::test]
async fn retry_carries_bumped_counter_and_delayed_eta() {
    let broker = Arc::new(MemoryBroker::new());
    let producer = Producer::new(broker.clone());

    let mut registry = TaskRegistry::new();
    registry.register_fn(
        "fails-once",
        5,
        Duration::from_millis(500),
        |_args: Vec<Value>, _kwargs: Map<String, Value>| async {
            Err(Error::internal("transient"))
        },
    );

    let running = start_worker(fast_config("w-delay"), broker.clone(), registry);
    let sent = producer
        .dispatch("fails-once", vec![], Map::new())
        .await
        .unwrap();

    let watched = broker.clone();
    assert!(
        wait_until(Duration::from_secs(2), move || {
            let broker = watched.clone();
            async move { broker.depth(QueueName::Scheduled).await.unwrap() >= 1 }
        })
        .await
    );
    stop_worker(running).await;

    // The retry eta is ~500 ms out, so an immediate poll promotes nothing.
    assert_eq!(broker.poll_schedule().await.unwrap(), 0);

    // Once due, the rescheduled copy keeps its identity with a bumped
    // retry counter and an eta past the original creation time.
    tokio::time::sleep(Duration::from_millis(550)).await;
    assert_eq!(broker.poll_schedule().await.unwrap(), 1);
    let delivery = broker
        .reserve(Duration::from_millis(50))
        .await
        .unwrap()
        .expect("retry available");
    assert_eq!(delivery.message.id, sent.id);
    assert_eq!(delivery.message.retries, 1);
    assert!(delivery.message.eta.unwrap() >= sent.ts + 0.4);
}
