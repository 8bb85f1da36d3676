//! vigil integration test harness.
//!
//! Everything runs in-process over real TCP sockets on 127.0.0.1, each
//! test on its own ephemeral ports, so tests can run in parallel.
//!
//!   cargo test --test integration
//!
//! Each test owns the tasks it spawns and shuts them down through the
//! broadcast channel it created.

mod failures;
mod flow;
mod pipeline;
mod reconnect;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use vigil_core::config::MotionConfig;
use vigil_core::wire::{self, FrameMessage};
use vigil_core::{Frame, FrameInfo};
use vigil_services::{
    new_camera_table, new_connection_table, spawn_sink, CameraTable, ConnectionTable, Dispatcher,
    FrameSink, Hub, HubReceiver, NoMotion, Sender, SenderHandle, SinkHandle,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestHub {
    pub addr: SocketAddr,
    pub receiver: HubReceiver,
    pub connections: ConnectionTable,
    pub shutdown: broadcast::Sender<()>,
    pub task: JoinHandle<Result<()>>,
}

/// Bind a hub on `addr` (use port 0 for a fresh one) and start accepting.
pub async fn start_hub(addr: &str) -> TestHub {
    let (shutdown, _) = broadcast::channel(1);
    let connections = new_connection_table();
    let hub = Hub::bind(addr, connections.clone(), shutdown.subscribe())
        .await
        .expect("hub should bind");
    let addr = hub.local_addr().unwrap();
    let receiver = hub.receiver();
    let task = tokio::spawn(hub.run());
    TestHub {
        addr,
        receiver,
        connections,
        shutdown,
        task,
    }
}

pub struct TestSender {
    pub handle: SenderHandle,
    pub shutdown: broadcast::Sender<()>,
    pub task: JoinHandle<Result<()>>,
}

pub fn start_sender(addr: impl Into<String>) -> TestSender {
    let (shutdown, _) = broadcast::channel(1);
    let (sender, handle) = Sender::new(addr, shutdown.subscribe());
    let task = tokio::spawn(sender.run());
    TestSender {
        handle,
        shutdown,
        task,
    }
}

impl TestSender {
    pub fn submit(&self, camera: &str, image: &[u8]) -> bool {
        self.handle
            .submit(FrameInfo::new(camera, 10.0), Bytes::copy_from_slice(image))
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

/// Port that was free a moment ago.
pub async fn free_addr() -> String {
    let scratch = TcpListener::bind("127.0.0.1:0").await.unwrap();
    scratch.local_addr().unwrap().to_string()
}

/// Poll `cond` every 20 ms until it holds or `timeout` passes.
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Read one frame message from a raw hub-side socket, or `None` on
/// timeout / close.
pub async fn read_frame(stream: &mut TcpStream, timeout: Duration) -> Option<FrameMessage> {
    tokio::time::timeout(timeout, wire::read_frame_message(stream))
        .await
        .ok()?
        .ok()?
}

// ── Collecting sink ───────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<Frame>>>);

impl Collected {
    pub fn frames(&self) -> Vec<Frame> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

struct CollectSink(Collected);

impl FrameSink for CollectSink {
    fn handle(&mut self, frame: Frame) -> Result<()> {
        self.0 .0.lock().unwrap().push(frame);
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "collect"
    }
}

pub fn collecting_sink(name: &str, movement_only: bool) -> (SinkHandle, Collected) {
    let collected = Collected::default();
    let (handle, _task) = spawn_sink(name, movement_only, Box::new(CollectSink(collected.clone())));
    (handle, collected)
}

// ── Full hub pipeline ─────────────────────────────────────────────────────────

pub struct Pipeline {
    pub hub: TestHub,
    pub cameras: CameraTable,
    pub collected: Collected,
    pub sink: SinkHandle,
}

/// Hub → dispatcher (no-motion detector) → one collecting sink.
pub async fn start_pipeline(active_check_seconds: u64) -> Pipeline {
    let hub = start_hub("127.0.0.1:0").await;
    let cameras = new_camera_table();
    let (sink, collected) = collecting_sink("collect", false);
    let motion = MotionConfig {
        active_check_seconds,
        ..MotionConfig::default()
    };
    let dispatcher = Dispatcher::new(
        hub.receiver.clone(),
        Arc::new(NoMotion),
        vec![sink.clone()],
        motion,
        cameras.clone(),
        hub.shutdown.subscribe(),
    )
    .with_placeholder(Bytes::from_static(b"offline"));
    tokio::spawn(dispatcher.run());
    Pipeline {
        hub,
        cameras,
        collected,
        sink,
    }
}
