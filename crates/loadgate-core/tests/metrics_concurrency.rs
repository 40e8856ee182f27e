//! Metric totals under concurrent writers

use loadgate_core::MetricSink;
use std::sync::Arc;
use std::time::Duration;

const ADDS_PER_WRITER: u64 = 200;

async fn hammer(writers: u64) -> (u64, u64) {
    let sink = Arc::new(MetricSink::new());
    let mut handles = Vec::with_capacity(writers as usize);

    for id in 0..writers {
        let sink = Arc::clone(&sink);
        handles.push(tokio::spawn(async move {
            // Resolve handles per writer so the registry path is exercised too
            let counter = sink.counter("http_reqs");
            let trend = sink.trend("http_req_duration");
            for i in 0..ADDS_PER_WRITER {
                counter.add(1);
                trend.add(Duration::from_micros(1 + (id * ADDS_PER_WRITER + i) % 5_000));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let snapshot = sink.snapshot();
    (
        snapshot.count("http_reqs"),
        snapshot.trend("http_req_duration").unwrap().count(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_single_writer_total() {
    let (count, samples) = hammer(1).await;
    assert_eq!(count, ADDS_PER_WRITER);
    assert_eq!(samples, ADDS_PER_WRITER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_five_thousand_writers_total() {
    let (count, samples) = hammer(5_000).await;
    assert_eq!(count, 5_000 * ADDS_PER_WRITER);
    assert_eq!(samples, 5_000 * ADDS_PER_WRITER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_snapshot_while_writing() {
    let sink = Arc::new(MetricSink::new());
    let writer = {
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let counter = sink.counter("iterations");
            for _ in 0..10_000 {
                counter.increment();
                tokio::task::yield_now().await;
            }
        })
    };

    // Snapshots taken mid-flight never go backwards
    let mut last = 0;
    while !writer.is_finished() {
        let now = sink.snapshot().count("iterations");
        assert!(now >= last);
        last = now;
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    assert_eq!(sink.snapshot().count("iterations"), 10_000);
}
