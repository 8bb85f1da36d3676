//! Misbehaving peers: one bad connection must not affect any other.

use crate::*;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Garbage on one connection drops that connection only; a healthy
/// camera keeps streaming through the same hub.
#[tokio::test]
async fn test_malformed_peer_does_not_disturb_healthy_sender() {
    let hub = start_hub("127.0.0.1:0").await;
    let sender = start_sender(hub.addr.to_string());

    sender.submit("porch", b"one");
    assert!(hub.receiver.recv_frame(Duration::from_secs(3)).await.is_some());

    let mut rogue = TcpStream::connect(hub.addr).await.unwrap();
    let mut garbage = Vec::new();
    garbage.extend_from_slice(&9u32.to_le_bytes());
    garbage.extend_from_slice(b"not json!");
    rogue.write_all(&garbage).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), rogue.read(&mut buf))
        .await
        .expect("hub should close the rogue socket")
        .unwrap_or(0);
    assert_eq!(n, 0);

    sender.submit("porch", b"two");
    let frame = hub
        .receiver
        .recv_frame(Duration::from_secs(3))
        .await
        .expect("healthy camera still flowing");
    assert_eq!(&frame.image[..], b"two");
    assert_eq!(sender.handle.stats().connects(), 1);

    sender.stop().await;
    let _ = hub.shutdown.send(());
}

/// A declared payload larger than the hub accepts is a protocol error.
#[tokio::test]
async fn test_oversized_payload_is_rejected() {
    let hub = start_hub("127.0.0.1:0").await;
    let mut rogue = TcpStream::connect(hub.addr).await.unwrap();

    let metadata = serde_json::json!({
        "data": { "camera_name": "rogue" },
        "image": wire::MAX_PAYLOAD_LEN + 1,
    })
    .to_string();
    let mut message = Vec::new();
    message.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
    message.extend_from_slice(metadata.as_bytes());
    rogue.write_all(&message).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(2), rogue.read(&mut buf))
        .await
        .expect("hub should close the rogue socket")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(eventually(Duration::from_secs(1), || hub.connections.is_empty()).await);
    assert!(hub.receiver.recv_frame(Duration::from_millis(100)).await.is_none());

    let _ = hub.shutdown.send(());
}

/// A peer that disconnects halfway through a frame is dropped without a
/// frame being published.
#[tokio::test]
async fn test_truncated_frame_is_discarded() {
    let hub = start_hub("127.0.0.1:0").await;
    let mut rogue = TcpStream::connect(hub.addr).await.unwrap();

    let full = wire::encode_frame_message(&FrameInfo::new("rogue", 1.0), &[7u8; 1000]).unwrap();
    rogue.write_all(&full[..full.len() - 500]).await.unwrap();
    drop(rogue);

    assert!(eventually(Duration::from_secs(2), || hub.connections.is_empty()).await);
    assert!(hub.receiver.recv_frame(Duration::from_millis(200)).await.is_none());

    let _ = hub.shutdown.send(());
}

/// Stopping the hub's accept loop leaves connected cameras running.
#[tokio::test]
async fn test_hub_shutdown_keeps_existing_connections() {
    let hub = start_hub("127.0.0.1:0").await;
    let sender = start_sender(hub.addr.to_string());
    assert!(eventually(Duration::from_secs(2), || hub.connections.len() == 1).await);

    let _ = hub.shutdown.send(());
    let _ = tokio::time::timeout(Duration::from_secs(1), hub.task).await;

    sender.submit("porch", b"late");
    let frame = hub.receiver.recv_frame(Duration::from_secs(2)).await;
    assert_eq!(&frame.expect("existing connection still served").image[..], b"late");

    sender.stop().await;
}
