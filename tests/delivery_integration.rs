//! Delivery coordinator integration tests
//!
//! Drive the coordinator with a real registry, real timers (paused clock) and
//! an in-memory fallback publisher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use link_relay::connection_manager::ConnectionRegistry;
use link_relay::delivery::{
    AckOutcome, DeliveryCommand, DeliveryCoordinator, DeliveryOutcome, DeliveryService,
    RetryPolicy, TimerFired,
};
use link_relay::fallback::{FallbackError, FallbackMessage, FallbackPublisher};
use link_relay::websocket::ServerMessage;

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(Instant, FallbackMessage)>>,
    fail: bool,
}

impl RecordingPublisher {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn messages(&self) -> Vec<FallbackMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.published.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }
}

#[async_trait]
impl FallbackPublisher for RecordingPublisher {
    fn backend(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, message: &FallbackMessage) -> Result<(), FallbackError> {
        if self.fail {
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(FallbackError::Encode(err));
        }
        self.published
            .lock()
            .unwrap()
            .push((Instant::now(), message.clone()));
        Ok(())
    }
}

/// Broker that accepts the call and never answers
#[derive(Default)]
struct StalledPublisher {
    calls: AtomicUsize,
}

#[async_trait]
impl FallbackPublisher for StalledPublisher {
    fn backend(&self) -> &'static str {
        "stalled"
    }

    async fn publish(&self, _message: &FallbackMessage) -> Result<(), FallbackError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

struct Harness {
    coordinator: DeliveryCoordinator,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    registry: Arc<ConnectionRegistry>,
    publisher: Arc<RecordingPublisher>,
}

fn harness_with(publisher: RecordingPublisher) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let publisher = Arc::new(publisher);
    let (coordinator, timers) =
        DeliveryCoordinator::new(RetryPolicy::default(), registry.clone(), publisher.clone());
    Harness {
        coordinator,
        timers,
        registry,
        publisher,
    }
}

fn harness() -> Harness {
    harness_with(RecordingPublisher::default())
}

fn connect(h: &Harness, client_id: &str, buffer: usize) -> mpsc::Receiver<ServerMessage> {
    let (tx, rx) = mpsc::channel(buffer);
    h.registry.register(client_id, tx);
    rx
}

fn deliver(client_id: &str, message_id: &str, payload: &str) -> DeliveryCommand {
    DeliveryCommand::Deliver {
        client_id: client_id.to_string(),
        message_id: message_id.to_string(),
        payload: payload.to_string(),
    }
}

fn expect_frame(rx: &mut mpsc::Receiver<ServerMessage>) -> (String, u32, String) {
    match rx.try_recv() {
        Ok(ServerMessage::Delivery(frame)) => (frame.payload, frame.attempt, frame.message_id),
        other => panic!("expected delivery frame, got {:?}", other),
    }
}

fn assert_elapsed_at(start: Instant, at: Instant, expected_ms: u64) {
    let elapsed = at.duration_since(start);
    assert!(
        elapsed >= Duration::from_millis(expected_ms)
            && elapsed < Duration::from_millis(expected_ms + 10),
        "expected ~{}ms, got {:?}",
        expected_ms,
        elapsed
    );
}

fn assert_elapsed(start: Instant, expected_ms: u64) {
    assert_elapsed_at(start, Instant::now(), expected_ms);
}

/// Wait for a detached broker publish and return whether it succeeded
async fn expect_fallback(outcome: DeliveryOutcome) -> bool {
    match outcome {
        DeliveryOutcome::FellBack { publish } => publish.await.expect("publish task panicked"),
        other => panic!("expected fallback, got {:?}", other),
    }
}

/// Let detached publish tasks run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Fire the next armed timer through the coordinator
async fn fire_next(h: &mut Harness) {
    let fired = h.timers.recv().await.expect("timer channel closed");
    h.coordinator.on_timer_fired(fired).await;
}

#[tokio::test(start_paused = true)]
async fn test_ack_after_first_send_stops_retries() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    assert_eq!(expect_frame(&mut rx), ("u1".to_string(), 0, "m1".to_string()));
    assert!(h.coordinator.table().contains("m1"));

    tokio::time::advance(Duration::from_millis(500)).await;
    let outcome = h.coordinator.acknowledge("c1", "m1");
    assert_eq!(outcome, AckOutcome::Acknowledged { attempts: 0 });
    assert!(h.coordinator.table().is_empty());

    tokio::time::advance(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    assert!(h.timers.try_recv().is_err());
    assert!(rx.try_recv().is_err());
    assert!(h.publisher.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_delivery_retries_then_falls_back() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);
    let start = Instant::now();

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    assert_eq!(expect_frame(&mut rx).1, 0);

    fire_next(&mut h).await;
    assert_elapsed(start, 1000);
    assert_eq!(expect_frame(&mut rx), ("u1".to_string(), 1, "m1".to_string()));

    fire_next(&mut h).await;
    assert_elapsed(start, 3000);
    assert_eq!(expect_frame(&mut rx).1, 2);

    fire_next(&mut h).await;
    assert_elapsed(start, 7000);

    // No fourth send, exactly one fallback
    settle().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(h.publisher.messages(), vec![FallbackMessage::new("c1", "u1")]);
    assert!(h.coordinator.table().is_empty());

    tokio::time::advance(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert!(h.timers.try_recv().is_err());
    assert_eq!(h.publisher.messages().len(), 1);

    let stats = h.coordinator.stats().snapshot(0);
    assert_eq!(stats.total_sent, 3);
    assert_eq!(stats.total_retries, 2);
    assert_eq!(stats.total_exhausted, 1);
    assert_eq!(stats.total_fallbacks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_ack_after_second_send() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    fire_next(&mut h).await;
    assert_eq!(expect_frame(&mut rx).1, 0);
    assert_eq!(expect_frame(&mut rx).1, 1);

    assert_eq!(
        h.coordinator.acknowledge("c1", "m1"),
        AckOutcome::Acknowledged { attempts: 1 }
    );

    tokio::time::advance(Duration::from_secs(30)).await;
    tokio::task::yield_now().await;
    assert!(h.timers.try_recv().is_err());
    assert!(h.publisher.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_client_falls_back_immediately() {
    let h = harness();

    let outcome = h.coordinator.attempt_delivery("ghost", "m1", "u1", 0).await;
    assert!(expect_fallback(outcome).await);
    assert_eq!(h.publisher.messages(), vec![FallbackMessage::new("ghost", "u1")]);
    assert!(h.coordinator.table().is_empty());
    assert_eq!(h.coordinator.table().armed_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_retry_falls_back_on_next_timer() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);
    let start = Instant::now();

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    expect_frame(&mut rx);
    assert!(h.registry.unregister("c1"));

    fire_next(&mut h).await;
    settle().await;
    let times = h.publisher.times();
    assert_eq!(times.len(), 1);
    assert_elapsed_at(start, times[0], 1000);
    assert_eq!(h.publisher.messages(), vec![FallbackMessage::new("c1", "u1")]);
    assert!(h.coordinator.table().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ack_from_wrong_client_is_ignored() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    expect_frame(&mut rx);

    assert_eq!(h.coordinator.acknowledge("c2", "m1"), AckOutcome::ClientMismatch);
    assert_eq!(h.coordinator.acknowledge("c1", "nope"), AckOutcome::Unknown);
    assert!(h.coordinator.table().contains("m1"));

    fire_next(&mut h).await;
    assert_eq!(expect_frame(&mut rx).1, 1);
    assert_eq!(h.coordinator.stats().snapshot(0).total_ignored_acks, 2);
}

#[tokio::test(start_paused = true)]
async fn test_full_channel_counts_as_unreachable() {
    let h = harness();
    let (tx, _rx) = mpsc::channel(1);
    let channel = h.registry.register("c1", tx);
    channel.try_send(ServerMessage::pong()).unwrap();

    let outcome = h.coordinator.attempt_delivery("c1", "m1", "u1", 0).await;
    assert!(expect_fallback(outcome).await);
    assert!(h.coordinator.table().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_redelivery_of_same_message_replaces_timer() {
    let mut h = harness();
    let mut rx = connect(&h, "c1", 8);

    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    tokio::time::advance(Duration::from_millis(600)).await;
    h.coordinator.handle_command(deliver("c1", "m1", "u1")).await;
    expect_frame(&mut rx);
    expect_frame(&mut rx);

    assert_eq!(h.coordinator.table().len(), 1);
    assert_eq!(h.coordinator.table().armed_timers(), 1);

    // Only the second timer drives the retry
    fire_next(&mut h).await;
    assert_eq!(expect_frame(&mut rx).1, 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_failed_fallback_is_counted_not_retried() {
    let h = harness_with(RecordingPublisher::failing());

    let outcome = h.coordinator.attempt_delivery("ghost", "m1", "u1", 0).await;
    assert!(!expect_fallback(outcome).await);

    let stats = h.coordinator.stats().snapshot(0);
    assert_eq!(stats.total_fallbacks, 1);
    assert_eq!(stats.total_fallback_failures, 1);
    assert!(h.coordinator.table().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_service_round_trip_over_event_loop() {
    let h = harness();
    let publisher = h.publisher.clone();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (service, handle) =
        DeliveryService::spawn(h.coordinator, h.timers, 16, shutdown_tx.subscribe());

    let (tx, mut rx) = mpsc::channel(8);
    service.on_connect("c1", tx);

    service.initiate_delivery("c1", "m1", "u1").await.unwrap();
    let frame = match rx.recv().await {
        Some(ServerMessage::Delivery(frame)) => frame,
        other => panic!("expected delivery frame, got {:?}", other),
    };
    assert_eq!(frame.message_id, "m1");

    let reply = service
        .on_inbound_message("c1", r#"{"type":"ack","messageId":"m1"}"#)
        .await;
    assert!(reply.is_none());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let stats = service.stats();
    assert_eq!(stats.total_acknowledged, 1);
    assert_eq!(stats.pending, 0);
    assert!(publisher.messages().is_empty());

    let pong = service.on_inbound_message("c1", r#"{"type":"ping"}"#).await;
    assert_eq!(pong, Some(ServerMessage::pong()));
    assert!(service.on_inbound_message("c1", "not json").await.is_none());

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(
        service.initiate_delivery("c1", "m2", "u2").await,
        Err(link_relay::delivery::DeliveryError::Stopped)
    );
}

#[tokio::test(start_paused = true)]
async fn test_service_rejects_empty_fields() {
    let h = harness();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (service, _handle) =
        DeliveryService::spawn(h.coordinator, h.timers, 16, shutdown_tx.subscribe());

    assert!(service.initiate_delivery("", "m1", "u1").await.is_err());
    assert!(service.initiate_delivery("c1", "", "u1").await.is_err());
    assert!(service.initiate_delivery("c1", "m1", "").await.is_err());
    drop(shutdown_tx);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_broker_does_not_block_event_loop() {
    let registry = Arc::new(ConnectionRegistry::new());
    let publisher = Arc::new(StalledPublisher::default());
    let (coordinator, timers) =
        DeliveryCoordinator::new(RetryPolicy::default(), registry, publisher.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (service, handle) =
        DeliveryService::spawn(coordinator, timers, 16, shutdown_tx.subscribe());

    // More fallbacks than the command queue holds, all stuck in the broker
    for i in 0..100 {
        service
            .initiate_delivery("offline", &format!("m{}", i), "u")
            .await
            .unwrap();
    }

    let (tx, mut rx) = mpsc::channel(8);
    service.on_connect("c1", tx);
    service.initiate_delivery("c1", "live", "u1").await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("delivery stalled behind broker");
    assert!(matches!(first, Some(ServerMessage::Delivery(ref f)) if f.attempt == 0));

    // Timer still fires and the retry goes out
    let retry = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("retry timer stalled behind broker");
    assert!(matches!(retry, Some(ServerMessage::Delivery(ref f)) if f.attempt == 1));

    service
        .on_inbound_message("c1", r#"{"type":"ack","messageId":"live"}"#)
        .await;
    settle().await;

    let stats = service.stats();
    assert_eq!(stats.total_acknowledged, 1);
    assert_eq!(stats.total_fallbacks, 100);
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 100);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("coordinator did not stop")
        .unwrap();
}
