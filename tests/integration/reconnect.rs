//! Sender resilience: hub absent, hub killed mid-stream, hub flapping.

use crate::*;

/// The hub goes away mid-stream and comes back on the same port; the
/// sender picks up again without being restarted.
#[tokio::test]
async fn test_sender_resumes_after_hub_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let sender = start_sender(addr.clone());

    // First hub: take one frame, ack it, then die.
    sender.submit("porch", b"before");
    let (mut first, _) = listener.accept().await.unwrap();
    assert_eq!(&read_frame(&mut first, Duration::from_secs(2)).await.unwrap().image[..], b"before");
    wire::write_ack(&mut first).await.unwrap();
    drop(first);
    drop(listener);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Second hub on the same address.
    let hub = start_hub(&addr).await;
    assert!(
        eventually(Duration::from_secs(4), || !hub.connections.is_empty()).await,
        "sender did not reconnect"
    );

    sender.submit("porch", b"after");
    let frame = hub
        .receiver
        .recv_frame(Duration::from_secs(3))
        .await
        .expect("frame after restart");
    assert_eq!(&frame.image[..], b"after");
    assert!(sender.handle.stats().connects() >= 2);

    sender.stop().await;
    let _ = hub.shutdown.send(());
}

/// A hub that accepts and immediately hangs up sees at most one fresh
/// connection per retry interval.
#[tokio::test]
async fn test_reconnects_are_spaced_by_retry_interval() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sender = start_sender(listener.local_addr().unwrap().to_string());

    let window = Duration::from_millis(3500);
    let mut accepted = 0u32;
    let counted = tokio::time::timeout(window, async {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepted += 1;
            drop(stream);
        }
    })
    .await;
    assert!(counted.is_err());

    // Attempts at ~0 s, 1 s, 2 s, 3 s.
    assert!(accepted >= 2, "only {accepted} connections");
    assert!(accepted <= 4, "{accepted} connections in {window:?}");

    sender.stop().await;
}

/// No hub at all: the sender keeps retrying quietly and still shuts down
/// promptly.
#[tokio::test]
async fn test_sender_without_hub_shuts_down_cleanly() {
    let sender = start_sender(free_addr().await);
    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(sender.handle.stats().connects(), 0);
    assert!(!matches!(sender.handle.state(), vigil_services::SenderState::Connected { .. }));
    sender.submit("porch", b"queued");

    let _ = sender.shutdown.send(());
    let joined = tokio::time::timeout(Duration::from_secs(1), sender.task)
        .await
        .expect("sender should stop within a second");
    assert!(joined.unwrap().is_ok());
}

/// A frame submitted while the hub was down is the one delivered once the
/// hub appears.
#[tokio::test]
async fn test_frame_queued_while_disconnected_is_delivered() {
    let addr = free_addr().await;
    let sender = start_sender(addr.clone());

    sender.submit("porch", b"stale");
    sender.submit("porch", b"fresh");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let hub = start_hub(&addr).await;
    let frame = hub
        .receiver
        .recv_frame(Duration::from_secs(3))
        .await
        .expect("queued frame");
    assert_eq!(&frame.image[..], b"fresh");

    sender.stop().await;
    let _ = hub.shutdown.send(());
}
