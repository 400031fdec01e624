mod support;

use lib_common::configs::config_coordinator::CoordinatorConfig;
use lib_common::core::{Notice, ServerMessage};
use serde_json::json;
use support::{RawPeer, TestServer};

fn notice(notice: Notice) -> ServerMessage {
    ServerMessage::notice(notice)
}

#[tokio::test]
async fn test_first_connection_is_seated_and_appointed() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::default()).await?;
    let mut a = RawPeer::connect(&server).await?;

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(a.next().await?.expect("server closed early"));
    }
    assert_eq!(
        received,
        vec![
            notice(Notice::MonitorStarted),
            notice(Notice::Joined { seat: 1 }),
            notice(Notice::SeatAssigned { seat: 1 }),
            notice(Notice::LeadershipGranted),
            ServerMessage::Ready,
        ]
    );

    a.send_text("get").await?;
    assert_eq!(a.next().await?, Some(ServerMessage::Reply { data: None }));

    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.live_connections, 1);
    assert_eq!(snapshot.leader_seat, Some(1));
    assert!(snapshot.monitor_running);
    Ok(())
}

#[tokio::test]
async fn test_leadership_passes_to_lowest_surviving_seat() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::default()).await?;

    let mut a = RawPeer::connect(&server).await?;
    a.until(&ServerMessage::Ready).await?;

    let mut b = RawPeer::connect(&server).await?;
    let seen = b.until_notice(Notice::SeatAssigned { seat: 2 }).await?;
    assert!(seen.contains(&notice(Notice::Joined { seat: 2 })));
    a.until_notice(Notice::Joined { seat: 2 }).await?;

    let mut c = RawPeer::connect(&server).await?;
    c.until_notice(Notice::SeatAssigned { seat: 3 }).await?;
    a.until_notice(Notice::Joined { seat: 3 }).await?;
    b.until_notice(Notice::Joined { seat: 3 }).await?;

    // The leader's publish reaches everyone, itself included.
    a.send_text(r#"{"v":1}"#).await?;
    let first = ServerMessage::Data { data: json!({"v": 1}) };
    a.until(&first).await?;
    b.until(&first).await?;
    c.until(&first).await?;

    a.close().await?;
    let before_ready = b.until(&ServerMessage::Ready).await?;
    assert_eq!(
        before_ready,
        vec![notice(Notice::Departed { seat: 1 }), notice(Notice::LeadershipInherited)]
    );
    c.until_notice(Notice::Departed { seat: 1 }).await?;

    b.send_text(r#"{"v":2}"#).await?;
    let second = ServerMessage::Data { data: json!({"v": 2}) };
    b.until(&second).await?;
    c.until(&second).await?;

    // A non-leader is refused and the payload is untouched.
    c.send_text(r#"{"v":3}"#).await?;
    assert_eq!(c.next().await?, Some(notice(Notice::PublishRejected)));
    c.send_text("get").await?;
    assert_eq!(c.next().await?, Some(ServerMessage::Reply { data: Some(json!({"v": 2})) }));

    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.live_connections, 2);
    assert_eq!(snapshot.seats_issued, 3);
    assert_eq!(snapshot.leader_seat, Some(2));
    assert!(snapshot.has_payload);
    Ok(())
}

#[tokio::test]
async fn test_plain_text_publish_is_relayed_as_string() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::default()).await?;
    let mut a = RawPeer::connect(&server).await?;
    a.until(&ServerMessage::Ready).await?;

    a.send_text("not json at all").await?;
    a.until(&ServerMessage::Data { data: json!("not json at all") }).await?;
    Ok(())
}

#[tokio::test]
async fn test_published_null_is_returned_by_get() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::default()).await?;
    let mut a = RawPeer::connect(&server).await?;
    a.until(&ServerMessage::Ready).await?;

    a.send_text("null").await?;
    a.until(&ServerMessage::Data { data: json!(null) }).await?;

    a.send_text("get").await?;
    assert_eq!(a.next().await?, Some(ServerMessage::Reply { data: Some(json!(null)) }));
    Ok(())
}

#[tokio::test]
async fn test_silent_connection_expires_and_is_disconnected() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::from_millis(100, 200, 50)).await?;

    let mut silent = RawPeer::connect(&server).await?;
    silent.until(&ServerMessage::Ready).await?;

    // No heartbeat is ever sent, so the coordinator closes the socket.
    let mut rest = Vec::new();
    while let Some(message) = silent.next().await? {
        rest.push(message);
    }
    assert!(rest.is_empty(), "unexpected messages before expiry: {:?}", rest);

    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.live_connections, 0);
    assert_eq!(snapshot.leader_seat, None);
    assert!(!snapshot.monitor_running);
    Ok(())
}

#[tokio::test]
async fn test_heartbeats_keep_a_connection_alive() -> anyhow::Result<()> {
    let server = TestServer::start(CoordinatorConfig::from_millis(100, 200, 50)).await?;
    let mut a = RawPeer::connect(&server).await?;
    a.until(&ServerMessage::Ready).await?;

    for _ in 0..12 {
        a.send_text("heartbeat").await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    let snapshot = server.coordinator.snapshot().await?;
    assert_eq!(snapshot.live_connections, 1);
    assert_eq!(snapshot.leader_seat, Some(1));
    Ok(())
}
