mod support;

use std::time::Duration;

use lib_common::client::{ClientError, SingletonBuilder};
use lib_common::configs::config_coordinator::CoordinatorConfig;
use lib_common::core::{Notice, ServerMessage};
use serde_json::{Value, json};
use support::{RawPeer, TestServer, WAIT};
use tokio::sync::mpsc;

#[derive(Debug, PartialEq)]
enum Event {
    Started,
    Data(Value),
}

/// A client whose callbacks report into a channel. When `publish` is set the
/// client publishes it as soon as it becomes leader.
async fn attach(
    server: &TestServer,
    publish: Option<Value>,
) -> anyhow::Result<(lib_common::client::SingletonClient, mpsc::UnboundedReceiver<Event>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let start_tx = tx.clone();
    let client = SingletonBuilder::new(server.ws_url())
        .heartbeat_interval(Duration::from_millis(50))
        .on_start(move |handle| {
            let _ = start_tx.send(Event::Started);
            if let Some(payload) = &publish {
                let _ = handle.set_data(payload);
            }
        })
        .on_data(move |_handle, data| {
            let _ = tx.send(Event::Data(data));
        })
        .init()
        .await?;
    Ok((client, rx))
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Option<Event> {
    tokio::time::timeout(WAIT, rx.recv()).await.ok().flatten()
}

#[tokio::test]
async fn test_init_requires_both_callbacks() {
    let missing_start = SingletonBuilder::new("ws://127.0.0.1:1/ws")
        .on_data(|_, _| {})
        .init()
        .await;
    assert!(matches!(missing_start, Err(ClientError::MissingStartCallback)));

    let missing_data = SingletonBuilder::new("ws://127.0.0.1:1/ws")
        .on_start(|_| {})
        .init()
        .await;
    assert!(matches!(missing_data, Err(ClientError::MissingDataCallback)));
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let result = SingletonBuilder::new("not a url")
        .on_start(|_| {})
        .on_data(|_, _| {})
        .init()
        .await;
    assert!(matches!(result, Err(ClientError::Url(_))));
}

#[tokio::test]
async fn test_leader_publishes_and_follower_receives() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::from_millis(100, 400, 50)).await?;

    let (leader, mut leader_events) = attach(&server, Some(json!({"n": 1}))).await?;
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Started));
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Data(json!({"n": 1}))));

    let (follower, mut follower_events) = attach(&server, None).await?;
    follower.request_data()?;
    assert_eq!(next_event(&mut follower_events).await, Some(Event::Data(json!({"n": 1}))));

    // Refused quietly: nothing reaches either data callback.
    follower.set_data(&json!({"n": 2}))?;
    leader.set_data(&json!({"n": 3}))?;
    assert_eq!(next_event(&mut follower_events).await, Some(Event::Data(json!({"n": 3}))));
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Data(json!({"n": 3}))));

    // Heartbeats keep both attached well past the expiry threshold.
    tokio::time::sleep(Duration::from_millis(800)).await;
    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.live_connections, 2);
    assert!(leader.is_attached());

    leader.close().await?;
    assert_eq!(next_event(&mut follower_events).await, Some(Event::Started));

    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.leader_seat, Some(2));

    follower.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_follower_reads_back_a_published_null() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::default()).await?;

    let (leader, mut leader_events) = attach(&server, Some(Value::Null)).await?;
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Started));
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Data(Value::Null)));

    let (follower, mut follower_events) = attach(&server, None).await?;
    follower.request_data()?;
    assert_eq!(next_event(&mut follower_events).await, Some(Event::Data(Value::Null)));

    follower.close().await?;
    leader.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_dropped_leader_is_expired_and_succeeded() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::from_millis(100, 200, 50)).await?;

    let (leader, mut leader_events) = attach(&server, None).await?;
    assert_eq!(next_event(&mut leader_events).await, Some(Event::Started));

    let mut observer = RawPeer::connect(&server).await?;
    observer.until_notice(Notice::SeatAssigned { seat: 2 }).await?;

    // The leader stops heartbeating; the observer keeps beating while it waits.
    drop(leader);

    let mut seen = Vec::new();
    loop {
        observer.send_text("heartbeat").await?;
        match tokio::time::timeout(Duration::from_millis(50), observer.next()).await {
            Ok(Ok(Some(ServerMessage::Ready))) => break,
            Ok(Ok(Some(message))) => seen.push(message),
            Ok(Ok(None)) => anyhow::bail!("observer was disconnected; saw {:?}", seen),
            Ok(Err(e)) => return Err(e),
            Err(_) => continue,
        }
    }

    assert_eq!(
        seen,
        vec![
            ServerMessage::notice(Notice::Expired { seat: 1 }),
            ServerMessage::notice(Notice::LeadershipInherited),
        ]
    );
    Ok(())
}
