use crate::event::{ArrivalIndex, Position, SignalPhase, UnitClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Entity variant; each kind has its own identifier namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    MovingUnit,
    SignalController,
    IncidentRoute,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::MovingUnit,
        EntityKind::SignalController,
        EntityKind::IncidentRoute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::MovingUnit => "moving_unit",
            EntityKind::SignalController => "signal_controller",
            EntityKind::IncidentRoute => "incident_route",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

/// Store key: (variant, identifier)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Vehicle driven by the server simulation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovingUnit {
    pub id: String,
    pub position: Position,
    pub speed: f64,
    pub class: UnitClass,
}

/// Traffic signal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalController {
    pub id: String,
    /// Last known position; phase updates may omit it
    pub position: Option<Position>,
    pub phase: SignalPhase,
}

/// Active emergency route
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncidentRoute {
    pub id: String,
    pub waypoints: Vec<Position>,
    pub active: bool,
}

/// Tracked world object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    MovingUnit(MovingUnit),
    SignalController(SignalController),
    IncidentRoute(IncidentRoute),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::MovingUnit(_) => EntityKind::MovingUnit,
            Entity::SignalController(_) => EntityKind::SignalController,
            Entity::IncidentRoute(_) => EntityKind::IncidentRoute,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::MovingUnit(u) => &u.id,
            Entity::SignalController(s) => &s.id,
            Entity::IncidentRoute(r) => &r.id,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }
}

/// Stored entity plus merge bookkeeping
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity: Entity,

    /// Arrival index of the last event applied to this entity
    pub arrival: ArrivalIndex,

    /// Wall-clock time of the last applied event
    pub last_updated: DateTime<Utc>,
}

/// Immutable point-in-time view of the world.
#[derive(Clone, Debug, Default)]
pub struct WorldSnapshot {
    pub(crate) entities: HashMap<EntityKey, EntityRecord>,
    pub(crate) version: u64,
}

impl WorldSnapshot {
    /// Number of changes applied to the store when this snapshot was taken
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, kind: EntityKind, id: &str) -> Option<&EntityRecord> {
        self.entities.get(&EntityKey::new(kind, id))
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values()
    }

    pub fn records_of(&self, kind: EntityKind) -> impl Iterator<Item = &EntityRecord> {
        self.entities.values().filter(move |r| r.entity.kind() == kind)
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.records_of(kind).count()
    }

    pub fn unit(&self, id: &str) -> Option<&MovingUnit> {
        match self.get(EntityKind::MovingUnit, id).map(|r| &r.entity) {
            Some(Entity::MovingUnit(unit)) => Some(unit),
            _ => None,
        }
    }

    pub fn signal(&self, id: &str) -> Option<&SignalController> {
        match self.get(EntityKind::SignalController, id).map(|r| &r.entity) {
            Some(Entity::SignalController(signal)) => Some(signal),
            _ => None,
        }
    }

    pub fn incident(&self, id: &str) -> Option<&IncidentRoute> {
        match self.get(EntityKind::IncidentRoute, id).map(|r| &r.entity) {
            Some(Entity::IncidentRoute(route)) => Some(route),
            _ => None,
        }
    }
}

/// What happened to an entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// Change notification delivered to listeners and broadcast receivers
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoreChange {
    pub key: EntityKey,
    pub change: ChangeKind,

    /// New state for created/updated, last known state for removed
    pub entity: Entity,

    pub arrival: ArrivalIndex,
    pub timestamp: DateTime<Utc>,
}
