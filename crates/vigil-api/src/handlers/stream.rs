//! /stream/{camera} and /snapshot/{camera}.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::watch;

use super::ApiState;
use crate::mjpeg::{encode_part, LiveFrame};

const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub async fn handle_stream(State(state): State<ApiState>, Path(camera): Path<String>) -> Response {
    let Some(rx) = state.feeds.subscribe(&camera) else {
        return (StatusCode::NOT_FOUND, format!("unknown camera {camera}")).into_response();
    };
    tracing::debug!(%camera, "viewer attached");

    let parts = futures::stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        loop {
            if let Some(part) = current_part(&mut rx) {
                return Some((Ok::<_, Infallible>(part), (rx, false)));
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, MULTIPART_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}

/// Encoded part for the frame the receiver currently holds, skipping
/// placeholders with no image.
fn current_part(rx: &mut watch::Receiver<Option<LiveFrame>>) -> Option<bytes::Bytes> {
    rx.borrow_and_update()
        .as_ref()
        .filter(|frame| !frame.image.is_empty())
        .map(encode_part)
}

pub async fn handle_snapshot(State(state): State<ApiState>, Path(camera): Path<String>) -> Response {
    match state.feeds.latest(&camera) {
        None => (StatusCode::NOT_FOUND, format!("unknown camera {camera}")).into_response(),
        Some(Some(frame)) if !frame.image.is_empty() => {
            ([(header::CONTENT_TYPE, "image/jpeg")], frame.image).into_response()
        }
        Some(_) => StatusCode::NO_CONTENT.into_response(),
    }
}
