use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::models::{Batch, Job};

/// Event types for WebSocket messages
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    BatchStarted,
    JobUpdated,
    BatchCompleted,
    DeviceStatusChanged,
}

/// WebSocket event message
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

/// Payload for job state changes
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdatedPayload {
    pub batch_id: String,
    pub job_id: String,
    pub device_id: i64,
    pub device_name: String,
    pub state: String,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

/// Payload for reachability transitions
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusPayload {
    pub device_id: i64,
    pub hostname: String,
    pub status: String,
}

/// WebSocket hub manages connections and broadcasts events
pub struct Hub {
    tx: broadcast::Sender<String>,
    client_count: Arc<RwLock<usize>>,
}

impl Hub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            client_count: Arc::new(RwLock::new(0)),
        }
    }

    /// Broadcast an event to all connected clients
    pub async fn broadcast_event(&self, event: Event) {
        let data = match serde_json::to_string(&event) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Error serializing WebSocket event: {}", e);
                return;
            }
        };

        let count = *self.client_count.read().await;
        if count > 0 {
            if let Err(e) = self.tx.send(data) {
                tracing::warn!("Error broadcasting WebSocket event: {}", e);
            } else {
                tracing::debug!("Broadcasting {:?} to {} clients", event.event_type, count);
            }
        }
    }

    pub async fn broadcast_batch_started(&self, batch: &Batch) {
        self.broadcast_event(Event {
            event_type: EventType::BatchStarted,
            payload: serde_json::to_value(batch).unwrap_or_default(),
        })
        .await;
    }

    pub async fn broadcast_job_updated(&self, job: &Job) {
        self.broadcast_event(Event {
            event_type: EventType::JobUpdated,
            payload: serde_json::to_value(JobUpdatedPayload {
                batch_id: job.batch_id.clone(),
                job_id: job.id.clone(),
                device_id: job.device_id,
                device_name: job.device_name.clone(),
                state: job.state.to_string(),
                attempt_count: job.attempt_count,
                error_kind: job.error_kind.clone(),
            })
            .unwrap_or_default(),
        })
        .await;
    }

    /// `summary` is the reporter's view of the finished batch
    pub async fn broadcast_batch_completed(&self, summary: serde_json::Value) {
        self.broadcast_event(Event {
            event_type: EventType::BatchCompleted,
            payload: summary,
        })
        .await;
    }

    pub async fn broadcast_device_status(&self, device_id: i64, hostname: &str, status: &str) {
        self.broadcast_event(Event {
            event_type: EventType::DeviceStatusChanged,
            payload: serde_json::to_value(DeviceStatusPayload {
                device_id,
                hostname: hostname.to_string(),
                status: status.to_string(),
            })
            .unwrap_or_default(),
        })
        .await;
    }

    /// Get the number of connected clients
    pub async fn client_count(&self) -> usize {
        *self.client_count.read().await
    }

    /// Subscribe to events
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    async fn increment_clients(&self) {
        let mut count = self.client_count.write().await;
        *count += 1;
        tracing::info!("WebSocket client connected. Total clients: {}", *count);
    }

    async fn decrement_clients(&self) {
        let mut count = self.client_count.write().await;
        *count = count.saturating_sub(1);
        tracing::info!("WebSocket client disconnected. Total clients: {}", *count);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket handler for axum
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sender, mut receiver) = socket.split();

    hub.increment_clients().await;

    let mut rx = hub.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if sender.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagged, dropped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound frames are only drained to notice disconnects
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            if msg.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    hub.decrement_clients().await;
}
