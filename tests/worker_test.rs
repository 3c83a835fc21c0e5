//! Integration tests for the worker loop.

use qued::{
    Disposition, Envelope, Handler, JsonCodec, ListStore, MemoryStore, MessageId, Queue,
    QueueConfig, Worker, WorkerConfig, WorkerStats,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type TestWorker<H> = Worker<Value, H, MemoryStore, JsonCodec>;

fn test_queue(max_tries: u32) -> Arc<Queue<MemoryStore>> {
    Arc::new(
        Queue::with_store(
            QueueConfig::new("work").max_tries(max_tries),
            MemoryStore::new(),
            JsonCodec,
        )
        .expect("failed to build in-memory queue"),
    )
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        poll_timeout: Duration::from_millis(25),
        error_backoff: Duration::from_millis(10),
    }
}

fn start<H: Handler<Value> + 'static>(
    queue: &Arc<Queue<MemoryStore>>,
    handler: H,
) -> (TestWorker<H>, tokio::task::JoinHandle<qued::Result<WorkerStats>>) {
    let worker = TestWorker::new(Arc::clone(queue), Arc::new(handler), fast_config());
    let running = worker.clone();
    let handle = tokio::spawn(async move { running.run().await });
    (worker, handle)
}

async fn wait_for<H: Handler<Value>>(worker: &TestWorker<H>, done: impl Fn(WorkerStats) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(worker.stats()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("worker did not reach the expected state in time");
}

/// Accepts everything and remembers what it saw.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<MessageId>>,
}

#[async_trait::async_trait]
impl Handler<Value> for Recorder {
    async fn handle(&self, envelope: &Envelope<Value>) -> Disposition {
        self.seen.lock().unwrap().push(envelope.id);
        Disposition::Done
    }
}

/// Fails every time.
struct AlwaysFails;

#[async_trait::async_trait]
impl Handler<Value> for AlwaysFails {
    async fn handle(&self, _envelope: &Envelope<Value>) -> Disposition {
        Disposition::retry("downstream unavailable")
    }
}

/// Rejects every message outright.
struct Rejects;

#[async_trait::async_trait]
impl Handler<Value> for Rejects {
    async fn handle(&self, _envelope: &Envelope<Value>) -> Disposition {
        Disposition::dead_letter("unsupported message")
    }
}

#[tokio::test]
async fn completes_messages_in_order() {
    let queue = test_queue(3);
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(queue.enqueue(Some("job"), json!({"n": n})).await.unwrap());
    }

    let recorder = Arc::new(Recorder::default());
    let worker = TestWorker::new(Arc::clone(&queue), Arc::clone(&recorder), fast_config());
    let running = worker.clone();
    let handle = tokio::spawn(async move { running.run().await });

    wait_for(&worker, |s| s.completed == 3).await;
    worker.shutdown();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.completed, 3);
    assert_eq!(stats.retried, 0);
    assert_eq!(*recorder.seen.lock().unwrap(), ids);
    assert_eq!(queue.stats().await.unwrap().pending, 0);
}

#[tokio::test]
async fn failing_handler_exhausts_retries_then_dead_letters() {
    let queue = test_queue(3);
    let id = queue.enqueue(None, json!({"job": 1})).await.unwrap();

    let (worker, handle) = start(&queue, AlwaysFails);
    wait_for(&worker, |s| s.dead_lettered == 1).await;
    worker.shutdown();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);
    let parked = queue
        .drain_dead_letter::<Value>(Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.id, id);
    assert_eq!(parked.attempts, 3);
}

#[tokio::test]
async fn dead_letter_disposition_skips_remaining_tries() {
    let queue = test_queue(5);
    queue.enqueue(None, json!("bad")).await.unwrap();

    let (worker, handle) = start(&queue, Rejects);
    wait_for(&worker, |s| s.dead_lettered == 1).await;
    worker.shutdown();
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.retried, 0);
    let parked = queue
        .drain_dead_letter::<Value>(Duration::from_millis(20))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.attempts, 1);
}

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let queue = test_queue(3);
    queue.store().push("work", b"\x00\x01".to_vec()).await.unwrap();
    queue.enqueue(None, json!({"ok": true})).await.unwrap();

    let (worker, handle) = start(&queue, Recorder::default());
    wait_for(&worker, |s| s.completed == 1 && s.malformed == 1).await;
    worker.shutdown();
    handle.await.unwrap().unwrap();

    assert_eq!(queue.stats().await.unwrap().dead, 1);
}

#[tokio::test]
async fn stops_when_queue_is_closed() {
    let queue = test_queue(3);
    let (_worker, handle) = start(&queue, Recorder::default());
    tokio::time::sleep(Duration::from_millis(30)).await;

    queue.close().await.unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker did not stop after close")
        .unwrap()
        .unwrap();
    assert_eq!(stats, WorkerStats::default());
}

#[tokio::test]
async fn shutdown_before_run_returns_immediately() {
    let queue = test_queue(3);
    let worker = TestWorker::new(Arc::clone(&queue), Arc::new(Recorder::default()), fast_config());
    worker.shutdown();

    let stats = tokio::time::timeout(Duration::from_secs(5), worker.run())
        .await
        .expect("worker ignored shutdown")
        .unwrap();
    assert_eq!(stats, WorkerStats::default());
}

#[tokio::test]
async fn shutdown_stops_every_clone() {
    let queue = test_queue(3);
    let worker = TestWorker::new(Arc::clone(&queue), Arc::new(Recorder::default()), fast_config());
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let running = worker.clone();
            tokio::spawn(async move { running.run().await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(30)).await;

    worker.shutdown();

    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("a cloned loop ignored shutdown")
            .unwrap()
            .unwrap();
    }
}
