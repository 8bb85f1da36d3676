//! Ack-gated flow control, seen from a hub that controls its acks by hand.

use crate::*;

/// A hub that never acks gets the first frame and nothing else, however
/// many frames the camera produces in the meantime.
#[tokio::test]
async fn test_unacking_hub_receives_exactly_one_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sender = start_sender(listener.local_addr().unwrap().to_string());

    sender.submit("porch", b"frame-0");
    let (mut hub, _) = listener.accept().await.unwrap();
    let first = read_frame(&mut hub, Duration::from_secs(2)).await.expect("first frame");
    assert_eq!(&first.image[..], b"frame-0");
    assert_eq!(first.info.camera_name, "porch");

    // Five more submission cycles at the sender's poll rate.
    for n in 1..=5 {
        sender.submit("porch", format!("frame-{n}").as_bytes());
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(read_frame(&mut hub, Duration::from_millis(800)).await.is_none());
    assert_eq!(sender.handle.stats().frames_sent(), 1);

    sender.stop().await;
}

/// F1 in flight, F2 and F3 submitted before the ack: only F3 follows.
#[tokio::test]
async fn test_only_latest_frame_survives_backpressure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sender = start_sender(listener.local_addr().unwrap().to_string());

    sender.submit("porch", b"F1");
    let (mut hub, _) = listener.accept().await.unwrap();
    assert_eq!(&read_frame(&mut hub, Duration::from_secs(2)).await.unwrap().image[..], b"F1");

    assert!(!sender.submit("porch", b"F2"));
    assert!(sender.submit("porch", b"F3"), "F2 should be replaced by F3");
    wire::write_ack(&mut hub).await.unwrap();

    let next = read_frame(&mut hub, Duration::from_secs(2)).await.unwrap();
    assert_eq!(&next.image[..], b"F3");
    wire::write_ack(&mut hub).await.unwrap();
    assert!(read_frame(&mut hub, Duration::from_millis(400)).await.is_none());
    assert_eq!(sender.handle.stats().frames_sent(), 2);

    sender.stop().await;
}

/// Frame metadata the camera attaches survives the trip through the hub.
#[tokio::test]
async fn test_metadata_passes_through_hub() {
    let hub = start_hub("127.0.0.1:0").await;
    let sender = start_sender(hub.addr.to_string());

    let mut info = FrameInfo::new("porch", 12.5);
    info.extra.insert("resolution".into(), serde_json::json!([640, 480]));
    sender.handle.submit(info, Bytes::from_static(b"\xff\xd8jpeg"));

    let frame = hub
        .receiver
        .recv_frame(Duration::from_secs(3))
        .await
        .expect("frame through hub");
    assert_eq!(frame.info.camera_name, "porch");
    assert_eq!(frame.info.fps, 12.5);
    assert_eq!(frame.info.extra["resolution"], serde_json::json!([640, 480]));
    assert_eq!(&frame.image[..], b"\xff\xd8jpeg");

    sender.stop().await;
    let _ = hub.shutdown.send(());
}

/// With a real hub acking every frame, a steady stream keeps flowing.
#[tokio::test]
async fn test_real_hub_keeps_stream_flowing() {
    let hub = start_hub("127.0.0.1:0").await;
    let sender = start_sender(hub.addr.to_string());

    let mut received = 0;
    for n in 0..20u8 {
        sender.submit("porch", &[n; 32]);
        if hub.receiver.recv_frame(Duration::from_millis(500)).await.is_some() {
            received += 1;
        }
    }
    assert!(received >= 10, "only {received} frames made it through");

    sender.stop().await;
    let _ = hub.shutdown.send(());
}

/// Two cameras streaming at the same rate through one hub: neither one's
/// frames crowd out the other's.
#[tokio::test]
async fn test_simultaneous_cameras_both_delivered() {
    let hub = start_hub("127.0.0.1:0").await;
    let porch = start_sender(hub.addr.to_string());
    let yard = start_sender(hub.addr.to_string());
    assert!(eventually(Duration::from_secs(2), || hub.connections.len() == 2).await);

    let mut porch_frames = 0;
    let mut yard_frames = 0;
    for n in 0..10u8 {
        porch.submit("porch", &[n; 8]);
        yard.submit("yard", &[n; 8]);
        for _ in 0..2 {
            match hub.receiver.recv_frame(Duration::from_millis(500)).await {
                Some(frame) if frame.info.camera_name == "porch" => porch_frames += 1,
                Some(_) => yard_frames += 1,
                None => {}
            }
        }
    }
    assert!(porch_frames >= 5, "porch delivered {porch_frames} frames");
    assert!(yard_frames >= 5, "yard delivered {yard_frames} frames");

    porch.stop().await;
    yard.stop().await;
    let _ = hub.shutdown.send(());
}
