//! Dashboard broadcast (C9): fans state mutations out to connected
//! websocket viewers on a best-effort basis. A slow viewer that falls
//! behind the broadcast channel's buffer is dropped rather than allowed
//! to backpressure the rest of the system.

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct DashboardBroadcast {
    sender: broadcast::Sender<String>,
}

impl DashboardBroadcast {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Pushes a JSON frame to every connected viewer. Returns the number of
    /// viewers it was delivered to (0 if none are connected).
    pub fn broadcast(&self, frame: serde_json::Value) -> usize {
        match serde_json::to_string(&frame) {
            Ok(text) => self.sender.send(text).unwrap_or(0),
            Err(e) => {
                warn!("failed to serialize dashboard frame: {e}");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Drives one viewer's websocket connection until it disconnects or
    /// falls far enough behind that its receiver lags.
    pub async fn serve(&self, mut socket: WebSocket) {
        let mut rx = self.subscribe();
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Ok(text) => {
                            if socket.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "dashboard viewer lagged, dropping skipped frames");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(_)) => continue,
                        _ => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_with_no_viewers_reports_zero_delivered() {
        let dashboard = DashboardBroadcast::new(16);
        let delivered = dashboard.broadcast(serde_json::json!({"hello": "world"}));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn subscribed_viewer_receives_frame() {
        let dashboard = DashboardBroadcast::new(16);
        let mut rx = dashboard.subscribe();
        let delivered = dashboard.broadcast(serde_json::json!({"hello": "world"}));
        assert_eq!(delivered, 1);
        assert!(rx.try_recv().is_ok());
    }
}
