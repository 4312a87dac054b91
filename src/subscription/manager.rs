use crate::pipeline::SyncHandle;
use crate::state::{EntityKind, StoreChange};
use crate::subscription::protocol::{ChangeMessage, ClientMessage, ErrorMessage, StatusMessage};
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Manages a single WebSocket connection with per-kind subscriptions
pub struct ConnectionManager {
    /// Kinds this connection is subscribed to; empty means all
    subscriptions: HashSet<EntityKind>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: HashSet::new(),
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(
        mut self,
        mut socket: WebSocket,
        mut change_rx: broadcast::Receiver<StoreChange>,
        handle: SyncHandle,
        status_interval: Duration,
    ) {
        info!("WebSocket connection established");

        let mut status_tick =
            tokio::time::interval(status_interval.max(Duration::from_millis(100)));

        loop {
            tokio::select! {
                Some(msg) = socket.recv() => {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Err(e) = self.handle_client_message(&text) {
                                warn!(error = %e, "Invalid client message");
                                let reply = ErrorMessage::new(e.to_string());
                                if let Err(e) = send_json(&mut socket, &reply).await {
                                    error!(error = %e, "Failed to send error message");
                                    break;
                                }
                            }
                        }
                        Ok(Message::Close(_)) => {
                            info!("WebSocket client disconnected");
                            break;
                        }
                        Ok(Message::Ping(data)) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Ok(_) => {
                            // Ignore binary, pong messages
                        }
                        Err(e) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                result = change_rx.recv() => {
                    match result {
                        Ok(change) => {
                            if self.should_forward(&change) {
                                let message = ChangeMessage::from(change);
                                if let Err(e) = send_json(&mut socket, &message).await {
                                    error!(error = %e, "Failed to send change");
                                    break;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "WebSocket lagged, skipped changes");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Change feed closed");
                            break;
                        }
                    }
                }

                _ = status_tick.tick() => {
                    let status = StatusMessage::new(
                        handle.connection_status(),
                        handle.store.len(),
                        handle.dispatcher.active_incidents(),
                        handle.store.metrics.snapshot(),
                    );
                    if let Err(e) = send_json(&mut socket, &status).await {
                        error!(error = %e, "Failed to send status update");
                        break;
                    }
                }

                else => {
                    break;
                }
            }
        }

        info!("WebSocket connection closed");
    }

    /// Handle client message (subscribe/unsubscribe)
    fn handle_client_message(&mut self, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = serde_json::from_str(text)?;

        match msg {
            ClientMessage::Subscribe { kind } => {
                debug!(kind = %kind, "Client subscribed to kind");
                self.subscriptions.insert(kind);
            }
            ClientMessage::Unsubscribe { kind } => {
                debug!(kind = %kind, "Client unsubscribed from kind");
                self.subscriptions.remove(&kind);
            }
        }

        Ok(())
    }

    fn should_forward(&self, change: &StoreChange) -> bool {
        self.subscriptions.is_empty() || self.subscriptions.contains(&change.key.kind)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(msg)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ArrivalIndex, Position, UnitClass};
    use crate::state::{ChangeKind, Entity, EntityKey, MovingUnit};
    use chrono::Utc;

    fn unit_change() -> StoreChange {
        StoreChange {
            key: EntityKey::new(EntityKind::MovingUnit, "7"),
            change: ChangeKind::Updated,
            entity: Entity::MovingUnit(MovingUnit {
                id: "7".to_string(),
                position: Position::new(0.0, 0.0),
                speed: 3.0,
                class: UnitClass::Standard,
            }),
            arrival: ArrivalIndex(1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_forwards_everything_without_subscriptions() {
        let manager = ConnectionManager::new();
        assert!(manager.should_forward(&unit_change()));
    }

    #[test]
    fn test_subscription_filters_kinds() {
        let mut manager = ConnectionManager::new();
        manager
            .handle_client_message(r#"{"type":"subscribe","kind":"incident_route"}"#)
            .unwrap();
        assert!(!manager.should_forward(&unit_change()));

        manager
            .handle_client_message(r#"{"type":"subscribe","kind":"moving_unit"}"#)
            .unwrap();
        assert!(manager.should_forward(&unit_change()));

        manager
            .handle_client_message(r#"{"type":"unsubscribe","kind":"moving_unit"}"#)
            .unwrap();
        assert!(!manager.should_forward(&unit_change()));
    }

    #[test]
    fn test_rejects_malformed_message() {
        let mut manager = ConnectionManager::new();
        assert!(manager.handle_client_message("not json").is_err());
    }
}
