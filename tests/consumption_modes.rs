//! Pull-mode buffering versus push-mode callbacks.

mod common;

use common::*;
use parking_lot::Mutex;
use persistent_serial::{BeginOptions, Packet, PACKET_BUFFER_CAPACITY};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn numbered_lines(count: usize) -> String {
    (1..=count).map(|i| format!("packet {i}\n")).collect()
}

fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Packet) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |packet: &Packet| sink.lock().push(packet.to_string()))
}

#[tokio::test(start_paused = true)]
async fn test_pull_buffer_keeps_latest_hundred() {
    let (_transport, manager, link) = connected_manager().await;

    link.feed(numbered_lines(150).as_bytes());
    settle().await;

    assert!(manager.available());
    assert_eq!(manager.buffered(), PACKET_BUFFER_CAPACITY);
    assert_eq!(manager.peek(0).unwrap().as_str(), "packet 51");
    assert_eq!(manager.peek(99).unwrap().as_str(), "packet 150");
    assert!(manager.peek(100).is_none());
    assert_eq!(manager.info().packets_received, 150);
}

#[tokio::test(start_paused = true)]
async fn test_read_drains_in_arrival_order() {
    let (_transport, manager, link) = connected_manager().await;
    link.feed(b"alpha\r\nbeta\r\ngam");
    settle().await;
    link.feed(b"ma\n");
    settle().await;

    let drained: Vec<String> = std::iter::from_fn(|| manager.read())
        .map(Packet::into_string)
        .collect();
    assert_eq!(drained, vec!["alpha", "beta", "gamma"]);
    assert!(!manager.available());
    assert_eq!(manager.last().unwrap().as_str(), "gamma");
}

#[tokio::test(start_paused = true)]
async fn test_on_read_discards_backlog_and_stops_buffering() {
    let (_transport, manager, link) = connected_manager().await;
    link.feed(numbered_lines(5).as_bytes());
    settle().await;

    let (seen, callback) = collector();
    assert!(manager.on_read(callback));

    link.feed_line("pushed");
    settle().await;

    assert_eq!(*seen.lock(), vec!["pushed".to_string()]);
    assert_eq!(manager.last().unwrap().as_str(), "pushed");
    // The first pull accessor switches back; nothing was buffered meanwhile.
    assert_eq!(manager.buffered(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pull_accessor_resumes_buffering_and_callback_still_fires() {
    let (_transport, manager, link) = connected_manager().await;
    let (seen, callback) = collector();
    manager.on_read(callback);

    link.feed_line("push only");
    settle().await;
    assert!(!manager.available());

    link.feed_line("both");
    settle().await;

    assert_eq!(manager.read().unwrap().as_str(), "both");
    assert_eq!(
        *seen.lock(),
        vec!["push only".to_string(), "both".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_begin_with_on_read_starts_in_push_mode() {
    let (transport, manager) = mock_manager();
    let (seen, callback) = collector();

    manager.begin(begin_options().on_read(callback)).unwrap();
    settle().await;
    past_glitch_window().await;
    let link = transport.last_link().unwrap();
    link.feed(b"{\"temp\":21.5}\n4,5,6\n");
    settle().await;

    assert_eq!(
        *seen.lock(),
        vec!["{\"temp\":21.5}".to_string(), "4,5,6".to_string()]
    );
    assert_eq!(manager.info().packets_received, 2);
    assert_eq!(manager.buffered(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_callback_sees_every_packet_in_order() {
    let (transport, manager) = mock_manager();
    let (seen, callback) = collector();
    manager
        .begin(BeginOptions::new().port(PORT).on_read(callback))
        .unwrap();
    settle().await;
    past_glitch_window().await;

    let link = transport.last_link().unwrap();
    for chunk in numbered_lines(300).as_bytes().chunks(7) {
        link.feed(chunk);
    }
    settle().await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 300);
    assert_eq!(seen.first().unwrap(), "packet 1");
    assert_eq!(seen.last().unwrap(), "packet 300");
}

#[tokio::test(start_paused = true)]
async fn test_packets_survive_until_end() {
    let (_transport, manager, link) = connected_manager().await;
    link.feed_line("kept");
    link.hang_up();
    settle().await;

    // A dropped link does not clear the backlog; only `end` does.
    assert!(manager.is_reconnecting());
    assert_eq!(manager.peek(0).unwrap().as_str(), "kept");

    manager.end();
    assert!(manager.peek(0).is_none());
    assert_eq!(manager.last().unwrap().as_str(), "kept");
}
