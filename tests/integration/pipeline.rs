//! Camera → hub → dispatcher → sink, end to end.

use crate::*;

/// Submit frames from `sender` every 100 ms until `cond` holds.
async fn feed_until<F: FnMut() -> bool>(sender: &TestSender, camera: &str, timeout: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut n = 0u32;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        sender.submit(camera, format!("{camera}-{n}").as_bytes());
        n += 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    cond()
}

#[tokio::test]
async fn test_frames_reach_sink_with_timestamp() {
    let p = start_pipeline(10).await;
    let sender = start_sender(p.hub.addr.to_string());

    let collected = p.collected.clone();
    assert!(
        feed_until(&sender, "porch", Duration::from_secs(5), || collected.len() >= 3).await,
        "sink never saw frames"
    );

    for frame in p.collected.frames() {
        assert_eq!(frame.camera_name, "porch");
        assert!(!frame.movement);
        assert!(frame.overlay.is_some(), "forwarded frame without timestamp");
        assert!(!frame.image.is_empty());
    }
    // The registering frame is never forwarded.
    assert!(p.collected.frames().iter().all(|f| &f.image[..] != b"porch-0"));
    assert!(p.cameras.contains_key("porch"));
    assert!(p.sink.info().handled >= 3);

    sender.stop().await;
    let _ = p.hub.shutdown.send(());
}

#[tokio::test]
async fn test_cameras_are_tracked_independently() {
    let p = start_pipeline(10).await;
    let porch = start_sender(p.hub.addr.to_string());
    let yard = start_sender(p.hub.addr.to_string());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut n = 0u32;
    while tokio::time::Instant::now() < deadline
        && !(p.cameras.contains_key("porch") && p.cameras.contains_key("yard"))
    {
        porch.submit("porch", format!("p{n}").as_bytes());
        yard.submit("yard", format!("y{n}").as_bytes());
        n += 1;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(p.cameras.contains_key("porch"));
    assert!(p.cameras.contains_key("yard"));
    assert!(eventually(Duration::from_secs(2), || p.hub.connections.len() == 2).await);

    porch.stop().await;
    yard.stop().await;
    let _ = p.hub.shutdown.send(());
}

/// A camera that stops talking is unregistered and leaves exactly one
/// offline placeholder behind.
#[tokio::test]
async fn test_silent_camera_is_evicted_with_placeholder() {
    let p = start_pipeline(1).await;
    let sender = start_sender(p.hub.addr.to_string());

    assert!(
        feed_until(&sender, "porch", Duration::from_secs(5), || p.cameras.contains_key("porch")).await,
        "camera never registered"
    );
    sender.stop().await;
    assert!(eventually(Duration::from_secs(2), || p.hub.connections.is_empty()).await);

    // Sweep cadence is bounded by the 2 s receive timeout plus the 1 s
    // activity threshold.
    assert!(
        eventually(Duration::from_secs(8), || !p.cameras.contains_key("porch")).await,
        "camera was not evicted"
    );
    assert!(eventually(Duration::from_secs(1), || {
        p.collected.frames().iter().any(|f| f.fps == 0.0)
    })
    .await);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    let placeholders: Vec<Frame> = p
        .collected
        .frames()
        .into_iter()
        .filter(|f| &f.image[..] == b"offline")
        .collect();
    assert_eq!(placeholders.len(), 1);
    assert_eq!(placeholders[0].camera_name, "porch");
    assert!(!placeholders[0].movement);

    let _ = p.hub.shutdown.send(());
}

/// Shutting the dispatcher down stops its sinks.
#[tokio::test]
async fn test_dispatcher_shutdown_stops_sinks() {
    let p = start_pipeline(10).await;
    let _ = p.hub.shutdown.send(());
    assert!(eventually(Duration::from_secs(1), || p.sink.is_stopped()).await);
}
