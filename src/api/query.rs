use crate::api::ApiState;
use crate::state::{EntityKind, EntityRecord, MetricsSnapshot};
use crate::transport::ConnectionStatus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Query parameters for snapshot listing
#[derive(Deserialize)]
pub struct SnapshotQueryParams {
    /// Restrict to one entity kind (e.g. ?kind=moving_unit)
    pub kind: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub connection: ConnectionStatus,
    pub connected: bool,
    pub version: u64,
    pub entities: BTreeMap<EntityKind, usize>,
    pub total_entities: usize,
    pub active_incidents: Vec<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    pub version: u64,
    pub count: usize,
    pub entities: Vec<EntityRecord>,
}

#[derive(Serialize)]
pub struct IncidentResponse {
    pub id: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create query API router
pub fn create_query_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/entities/:kind/:id", get(get_entity))
        .route("/api/incidents/:id", get(get_incident))
        .with_state(state)
}

/// GET /api/status - Connection status, entity counts, metrics
async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let handle = &state.handle;
    let snapshot = handle.store.snapshot();
    let connection = handle.connection_status();

    let entities = EntityKind::ALL
        .into_iter()
        .map(|kind| (kind, snapshot.count(kind)))
        .collect();

    Json(StatusResponse {
        connection,
        connected: connection.is_connected(),
        version: snapshot.version(),
        entities,
        total_entities: snapshot.len(),
        active_incidents: handle.dispatcher.active_incidents(),
        metrics: handle.store.metrics.snapshot(),
    })
}

/// GET /api/snapshot - All entity records, sorted by key
///
/// Query parameters:
/// - `kind`: only records of this kind (moving_unit, signal_controller, incident_route)
async fn get_snapshot(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SnapshotQueryParams>,
) -> Result<Json<SnapshotResponse>, QueryError> {
    let kind = params.kind.as_deref().map(parse_kind).transpose()?;
    let snapshot = state.handle.store.snapshot();

    let mut entities: Vec<EntityRecord> = match kind {
        Some(kind) => snapshot.records_of(kind).cloned().collect(),
        None => snapshot.records().cloned().collect(),
    };
    entities.sort_by(|a, b| a.entity.key().cmp(&b.entity.key()));

    Ok(Json(SnapshotResponse {
        version: snapshot.version(),
        count: entities.len(),
        entities,
    }))
}

/// GET /api/entities/:kind/:id - One entity record
async fn get_entity(
    State(state): State<Arc<ApiState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<EntityRecord>, QueryError> {
    let kind = parse_kind(&kind)?;

    state
        .handle
        .store
        .get(kind, &id)
        .map(Json)
        .ok_or(QueryError::NotFound)
}

/// GET /api/incidents/:id - Alert flag for one incident
async fn get_incident(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Json<IncidentResponse> {
    let dispatcher = &state.handle.dispatcher;

    Json(IncidentResponse {
        active: dispatcher.is_active(&id),
        since: dispatcher.active_since(&id),
        id,
    })
}

fn parse_kind(raw: &str) -> Result<EntityKind, QueryError> {
    raw.parse().map_err(QueryError::BadKind)
}

/// Query error types
#[derive(Debug)]
enum QueryError {
    NotFound,
    BadKind(String),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            QueryError::NotFound => (StatusCode::NOT_FOUND, "Entity not found".to_string()),
            QueryError::BadKind(reason) => (StatusCode::BAD_REQUEST, reason),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{LogAlertSink, SideEffectDispatcher};
    use crate::event::{ArrivalIndex, Position, SignalPhase, UnitClass, UpdateEvent, UpdateKind};
    use crate::pipeline::SyncHandle;
    use crate::state::WorldStore;
    use crate::subscription::Subscription;
    use std::time::Duration;
    use tokio::sync::watch;

    struct TestApi {
        state: Arc<ApiState>,
        status_tx: watch::Sender<ConnectionStatus>,
        _dispatch: Subscription,
    }

    fn create_test_state() -> TestApi {
        let store = Arc::new(WorldStore::default());
        let dispatcher = Arc::new(SideEffectDispatcher::new(Arc::new(LogAlertSink)));
        let subscription = dispatcher.attach(&store);

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
        let handle = SyncHandle::new(store, dispatcher, status_rx);
        TestApi {
            state: Arc::new(ApiState::new(handle, Duration::from_secs(2))),
            status_tx,
            _dispatch: subscription,
        }
    }

    fn seed(state: &ApiState) {
        let store = &state.handle.store;
        store.apply(UpdateEvent::new(
            ArrivalIndex(1),
            UpdateKind::UpsertUnit {
                id: "7".to_string(),
                position: Position::new(1.0, 1.0),
                speed: 12.0,
                class: UnitClass::Priority,
            },
        ));
        store.apply(UpdateEvent::new(
            ArrivalIndex(2),
            UpdateKind::SetSignalPhase {
                id: "s1".to_string(),
                phase: SignalPhase::Go,
                position: None,
            },
        ));
        store.apply(UpdateEvent::new(
            ArrivalIndex(3),
            UpdateKind::StartIncident {
                id: "inc-1".to_string(),
                waypoints: vec![],
            },
        ));
    }

    #[tokio::test]
    async fn test_status_counts() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);
        seed(&state);

        let response = get_status(State(state)).await;

        assert!(response.0.connected);
        assert_eq!(response.0.total_entities, 3);
        assert_eq!(response.0.entities[&EntityKind::MovingUnit], 1);
        assert_eq!(response.0.version, 3);
        assert_eq!(response.0.active_incidents, vec!["inc-1".to_string()]);
        assert_eq!(response.0.metrics.events_applied, 3);
    }

    #[tokio::test]
    async fn test_status_follows_connection() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);
        api.status_tx
            .send(ConnectionStatus::Reconnecting { attempt: 2 })
            .unwrap();

        let response = get_status(State(state)).await;

        assert!(!response.0.connected);
        assert_eq!(response.0.connection, ConnectionStatus::Reconnecting { attempt: 2 });
    }

    #[tokio::test]
    async fn test_snapshot_kind_filter() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);
        seed(&state);

        let all = get_snapshot(State(state.clone()), Query(SnapshotQueryParams { kind: None }))
            .await
            .unwrap();
        assert_eq!(all.0.count, 3);

        let signals = get_snapshot(
            State(state),
            Query(SnapshotQueryParams {
                kind: Some("signal_controller".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(signals.0.count, 1);
        assert_eq!(signals.0.entities[0].entity.id(), "s1");
    }

    #[tokio::test]
    async fn test_snapshot_rejects_unknown_kind() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);

        let result = get_snapshot(
            State(state),
            Query(SnapshotQueryParams {
                kind: Some("tram".to_string()),
            }),
        )
        .await;

        assert!(matches!(result, Err(QueryError::BadKind(_))));
    }

    #[tokio::test]
    async fn test_get_entity() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);
        seed(&state);

        let record = get_entity(
            State(state.clone()),
            Path(("moving_unit".to_string(), "7".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(record.0.arrival, ArrivalIndex(1));

        let missing = get_entity(
            State(state),
            Path(("moving_unit".to_string(), "8".to_string())),
        )
        .await;
        assert!(matches!(missing, Err(QueryError::NotFound)));
    }

    #[tokio::test]
    async fn test_incident_flag() {
        let api = create_test_state();
        let state = Arc::clone(&api.state);
        seed(&state);

        let active = get_incident(State(state.clone()), Path("inc-1".to_string())).await;
        assert!(active.0.active);
        assert!(active.0.since.is_some());

        let unknown = get_incident(State(state), Path("inc-2".to_string())).await;
        assert!(!unknown.0.active);
        assert!(unknown.0.since.is_none());
    }
}
