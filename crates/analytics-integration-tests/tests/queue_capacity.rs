//! Durable queue capacity atomicity under concurrent admission: the sum of accepted pushes across concurrently racing
//! handlers must never exceed `maxQueueSize`, and no successful push may
//! leave the queue over capacity.

use analytics_core::validate_batch;
use analytics_queue::providers::memory::InMemoryStore;
use analytics_queue::DurableQueue;
use serde_json::json;
use std::sync::Arc;

fn one_event() -> analytics_core::Event {
    let batch = json!({ "events": [{
        "version": "1.0.0",
        "tool": "get_forecast",
        "status": "success",
        "timestamp_hour": "2025-11-11T14:00:00Z",
        "analytics_level": "minimal",
    }]});
    validate_batch(&batch).unwrap().remove(0)
}

#[tokio::test]
async fn concurrent_pushes_never_overshoot_capacity() {
    const CAPACITY: u64 = 50;
    const HANDLERS: usize = 20;
    const BATCH_SIZE: usize = 6; // 20 * 6 = 120 > capacity, so some must be rejected.

    let store = Arc::new(InMemoryStore::new(CAPACITY));

    let mut handles = Vec::with_capacity(HANDLERS);
    for _ in 0..HANDLERS {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let batch: Vec<_> = (0..BATCH_SIZE).map(|_| one_event()).collect();
            store.push_batch(batch).await
        }));
    }

    let mut accepted_events = 0u64;
    let mut rejections = 0u64;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => accepted_events += BATCH_SIZE as u64,
            Err(_) => rejections += 1,
        }
    }

    let final_depth = store.depth().await.unwrap();
    assert_eq!(final_depth, accepted_events, "depth must equal exactly what was accepted");
    assert!(final_depth <= CAPACITY, "queue must never exceed its capacity");
    assert!(rejections > 0, "the test is only meaningful if some batches were rejected");
}

#[tokio::test]
async fn a_single_push_that_would_overshoot_is_rejected_whole() {
    let store = InMemoryStore::new(5);
    store.push_batch(vec![one_event(), one_event(), one_event()]).await.unwrap();
    assert_eq!(store.depth().await.unwrap(), 3);

    // This batch of 3 would bring depth to 6, over the capacity of 5.
    let err = store
        .push_batch(vec![one_event(), one_event(), one_event()])
        .await
        .unwrap_err();
    assert!(matches!(err, analytics_queue::QueueError::Full { .. }));
    // Rejected atomically: none of the 3 events were admitted.
    assert_eq!(store.depth().await.unwrap(), 3);
}

#[tokio::test]
async fn pop_batch_drains_fifo_and_never_blocks_on_empty() {
    let store = InMemoryStore::new(10);
    store.push_batch(vec![one_event(), one_event()]).await.unwrap();

    let first = store.pop_batch(50).await.unwrap();
    assert_eq!(first.len(), 2);

    let second = store.pop_batch(50).await.unwrap();
    assert!(second.is_empty(), "popping an empty queue returns immediately with nothing");
}
