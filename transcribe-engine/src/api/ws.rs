//! `WS /jobs/{job_id}/stream`: forwards a job's progress events to the
//! client as JSON text frames, with a periodic heartbeat so a
//! reverse-proxy idle timeout doesn't close the connection during a
//! long stage. A `tokio::select!` alternates between the heartbeat
//! timer and the job's broadcast channel so neither starves the other.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::time::Duration;
use transcribe_common::model::JobId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/jobs/:job_id/stream", get(stream_handler))
}

async fn stream_handler(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    state
        .job_store
        .get(job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, job_id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, job_id: JobId) {
    let mut rx = state.job_store.subscribe(job_id);

    // Resync-on-connect: a client that just connected has missed
    // everything published before its subscribe, so hand it the
    // current record snapshot first. If the job already finished, this
    // is the only information it will ever get on this socket.
    if let Some(record) = state.job_store.get(job_id).await {
        if let Ok(json) = serde_json::to_string(&record) {
            if socket.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        if matches!(
            record.status,
            transcribe_common::model::JobStatus::Completed | transcribe_common::model::JobStatus::Failed
        ) {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let done = matches!(
                            event,
                            transcribe_common::TranscribeEvent::Completed
                                | transcribe_common::TranscribeEvent::Error { .. }
                        );
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        if done {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        }
    }
}
