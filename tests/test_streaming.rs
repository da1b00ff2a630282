//! Streaming channel behavior against the real SQLite backend: immediate
//! push, watermark advance, heartbeats, and cancellation on transport close.


use std::sync::Arc;
use std::time::Duration;

use test_helpers::{record, sqlite_store};
use trainwatch::api;
use trainwatch::store::MetricStore;
use trainwatch::stream::{StreamEvent, StreamRequest};

fn request(job: &str, last_step: i64) -> StreamRequest {
    StreamRequest {
        job_id: job.to_string(),
        metric_type: "loss".to_string(),
        last_step,
    }
}

#[tokio::test]
async fn test_open_pushes_existing_data_immediately() {
    let store = sqlite_store().await;
    store
        .append_batch(&[
            record("job_a", 1, "loss", 0.5, 100),
            record("job_a", 2, "loss", 0.4, 200),
        ])
        .await
        .expect("seed");

    let store: Arc<dyn MetricStore> = Arc::new(store);
    let mut events = api::handle_stream(store, request("job_a", 0)).expect("open");

    match events.recv().await.expect("first event") {
        StreamEvent::MetricsUpdate { data, .. } => {
            let steps: Vec<i64> = data.iter().map(|p| p.step).collect();
            assert_eq!(steps, vec![1, 2]);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_idle_channel_heartbeats_instead_of_stalling() {
    let store: Arc<dyn MetricStore> = Arc::new(sqlite_store().await);
    let mut events = api::handle_stream(store, request("job_a", 0)).expect("open");

    // No data at open, and none arriving: every tick is a heartbeat
    for _ in 0..3 {
        match events.recv().await.expect("event") {
            StreamEvent::Heartbeat { .. } => {}
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_new_rows_delivered_once_then_heartbeat() {
    let sqlite = sqlite_store().await;
    sqlite
        .append(&record("job_a", 1, "loss", 0.5, 100))
        .await
        .expect("seed");

    let store = Arc::new(sqlite);
    let mut events =
        api::handle_stream(store.clone() as Arc<dyn MetricStore>, request("job_a", 0))
            .expect("open");

    assert!(matches!(
        events.recv().await.expect("event"),
        StreamEvent::MetricsUpdate { .. }
    ));

    // Watermark advanced: same rows are not redelivered
    assert!(matches!(
        events.recv().await.expect("event"),
        StreamEvent::Heartbeat { .. }
    ));

    // Training process appends between polls; only the new step flows
    store
        .append(&record("job_a", 2, "loss", 0.4, 200))
        .await
        .expect("append");
    match events.recv().await.expect("event") {
        StreamEvent::MetricsUpdate { data, .. } => {
            assert_eq!(data.len(), 1);
            assert_eq!(data[0].step, 2);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cursor_resumes_mid_series() {
    let store = sqlite_store().await;
    for step in 1..=10 {
        store
            .append(&record("job_a", step, "loss", 0.5, step * 10))
            .await
            .expect("seed");
    }

    let store: Arc<dyn MetricStore> = Arc::new(store);
    let mut events = api::handle_stream(store, request("job_a", 7)).expect("open");

    match events.recv().await.expect("event") {
        StreamEvent::MetricsUpdate { data, .. } => {
            let steps: Vec<i64> = data.iter().map(|p| p.step).collect();
            assert_eq!(steps, vec![8, 9, 10]);
        }
        other => panic!("expected update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dropping_receiver_stops_the_poll_task() {
    let sqlite = Arc::new(sqlite_store().await);
    let dyn_store: Arc<dyn MetricStore> = sqlite.clone();

    let events = api::handle_stream(dyn_store, request("job_a", 0)).expect("open");
    drop(events);

    // Once the task notices the closed transport it drops its store handle
    for _ in 0..50 {
        if Arc::strong_count(&sqlite) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(Arc::strong_count(&sqlite), 1);
}

#[tokio::test]
async fn test_two_channels_do_not_share_watermarks() {
    let sqlite = sqlite_store().await;
    sqlite
        .append(&record("job_a", 1, "loss", 0.5, 100))
        .await
        .expect("seed");
    let store = Arc::new(sqlite);

    let mut first =
        api::handle_stream(store.clone() as Arc<dyn MetricStore>, request("job_a", 0))
            .expect("open");
    assert!(matches!(
        first.recv().await.expect("event"),
        StreamEvent::MetricsUpdate { .. }
    ));

    // A second client starting from zero still gets the full history even
    // though the first channel's watermark has moved on
    let mut second =
        api::handle_stream(store.clone() as Arc<dyn MetricStore>, request("job_a", 0))
            .expect("open");
    match second.recv().await.expect("event") {
        StreamEvent::MetricsUpdate { data, .. } => assert_eq!(data[0].step, 1),
        other => panic!("expected update, got {:?}", other),
    }
}
