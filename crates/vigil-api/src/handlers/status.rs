//! /status, /cameras, /sinks, /shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use vigil_services::{CameraStatus, SinkInfo};

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub connections: Vec<ConnectionInfo>,
    pub cameras: usize,
    pub sinks: usize,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    pub id: u64,
    pub peer: String,
    pub camera: Option<String>,
    pub frames: u64,
    pub pending_ack: bool,
    pub idle_secs: u64,
    pub connected_secs: u64,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let mut connections: Vec<ConnectionInfo> = state
        .connections
        .iter()
        .map(|e| {
            let conn = e.value();
            ConnectionInfo {
                id: *e.key(),
                peer: conn.peer_addr.to_string(),
                camera: conn.camera_name.clone(),
                frames: conn.frames_received,
                pending_ack: conn.pending_ack,
                idle_secs: conn.idle_secs(),
                connected_secs: conn.connected_at.elapsed().as_secs(),
            }
        })
        .collect();
    connections.sort_by_key(|c| c.id);

    Json(StatusResponse {
        connections,
        cameras: state.cameras.len(),
        sinks: state.sinks.len(),
    })
}

// ── /cameras ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CamerasResponse {
    pub cameras: Vec<CameraStatus>,
}

pub async fn handle_cameras(State(state): State<ApiState>) -> Json<CamerasResponse> {
    let mut cameras: Vec<CameraStatus> = state.cameras.iter().map(|e| e.value().clone()).collect();
    cameras.sort_by(|a, b| a.name.cmp(&b.name));
    Json(CamerasResponse { cameras })
}

// ── /sinks ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SinksResponse {
    pub sinks: Vec<SinkInfo>,
}

pub async fn handle_sinks(State(state): State<ApiState>) -> Json<SinksResponse> {
    Json(SinksResponse {
        sinks: state.sinks.iter().map(|s| s.info()).collect(),
    })
}

// ── /shutdown ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());
    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
