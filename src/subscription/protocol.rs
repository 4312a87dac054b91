use crate::state::{ChangeKind, Entity, EntityKind, MetricsSnapshot, StoreChange};
use crate::transport::ConnectionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    Subscribe { kind: EntityKind },
    #[serde(rename = "unsubscribe")]
    Unsubscribe { kind: EntityKind },
}

/// Server → Client: entity change notification
#[derive(Debug, Clone, Serialize)]
pub struct ChangeMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub kind: EntityKind,
    pub id: String,
    pub change: ChangeKind,
    pub entity: Entity,
    pub arrival: u64,
    pub timestamp: DateTime<Utc>,
}

impl From<StoreChange> for ChangeMessage {
    fn from(change: StoreChange) -> Self {
        Self {
            msg_type: "entity_changed".to_string(),
            kind: change.key.kind,
            id: change.key.id,
            change: change.change,
            entity: change.entity,
            arrival: change.arrival.0,
            timestamp: change.timestamp,
        }
    }
}

/// Server → Client: periodic connection and store status
#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub timestamp: DateTime<Utc>,
    pub connection: ConnectionStatus,
    pub entities: usize,
    pub active_incidents: Vec<String>,
    pub metrics: MetricsSnapshot,
}

impl StatusMessage {
    pub fn new(
        connection: ConnectionStatus,
        entities: usize,
        active_incidents: Vec<String>,
        metrics: MetricsSnapshot,
    ) -> Self {
        Self {
            msg_type: "status_update".to_string(),
            timestamp: Utc::now(),
            connection,
            entities,
            active_incidents,
            metrics,
        }
    }
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ArrivalIndex, Position};
    use crate::state::{EntityKey, IncidentRoute};

    #[test]
    fn test_parse_subscribe() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","kind":"incident_route"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                kind: EntityKind::IncidentRoute
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe","kind":"bus"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_change_message_shape() {
        let change = StoreChange {
            key: EntityKey::new(EntityKind::IncidentRoute, "inc-1"),
            change: ChangeKind::Created,
            entity: Entity::IncidentRoute(IncidentRoute {
                id: "inc-1".to_string(),
                waypoints: vec![Position::new(1.0, 2.0)],
                active: true,
            }),
            arrival: ArrivalIndex(4),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(ChangeMessage::from(change)).unwrap();
        assert_eq!(json["type"], "entity_changed");
        assert_eq!(json["kind"], "incident_route");
        assert_eq!(json["id"], "inc-1");
        assert_eq!(json["change"], "created");
        assert_eq!(json["arrival"], 4);
        assert_eq!(json["entity"]["waypoints"][0]["y"], 2.0);
    }
}
