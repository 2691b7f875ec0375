//! Session event channel tests

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tutor_common::events::SessionEvent;
use tutor_ps::channel::EventChannel;

fn notice(message: &str) -> SessionEvent {
    SessionEvent::ErrorMessage {
        message: message.to_string(),
    }
}

fn message_of(event: SessionEvent) -> String {
    match event {
        SessionEvent::ErrorMessage { message } => message,
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn events_arrive_in_publish_order() {
    let channel = EventChannel::new(8);
    let mut rx = channel.subscribe("s1");

    channel.publish("s1", notice("one"));
    channel.publish("s1", notice("two"));
    channel.publish("s1", notice("three"));

    assert_eq!(message_of(rx.recv().await.expect("recv")), "one");
    assert_eq!(message_of(rx.recv().await.expect("recv")), "two");
    assert_eq!(message_of(rx.recv().await.expect("recv")), "three");
}

#[tokio::test]
async fn publish_without_subscriber_is_dropped() {
    let channel = EventChannel::new(8);
    channel.publish("s1", notice("lost"));

    let mut rx = channel.subscribe("s1");
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let channel = EventChannel::new(8);
    let mut rx1 = channel.subscribe("s1");
    let mut rx2 = channel.subscribe("s2");

    channel.publish("s1", notice("for s1"));
    assert_eq!(message_of(rx1.recv().await.expect("recv")), "for s1");
    assert!(matches!(rx2.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn overflow_drops_oldest_events_first() {
    let channel = EventChannel::new(2);
    let mut rx = channel.subscribe("s1");

    channel.publish("s1", notice("one"));
    channel.publish("s1", notice("two"));
    channel.publish("s1", notice("three"));

    // The slow consumer lost the oldest event, not the newest
    assert!(matches!(rx.recv().await, Err(RecvError::Lagged(1))));
    assert_eq!(message_of(rx.recv().await.expect("recv")), "two");
    assert_eq!(message_of(rx.recv().await.expect("recv")), "three");
}

#[tokio::test]
async fn new_subscription_preempts_previous_one() {
    let channel = EventChannel::new(8);
    let mut old_rx = channel.subscribe("s1");
    let mut new_rx = channel.subscribe("s1");

    channel.publish("s1", notice("fresh"));
    assert_eq!(message_of(new_rx.recv().await.expect("recv")), "fresh");
    assert!(matches!(old_rx.recv().await, Err(RecvError::Closed)));
}
