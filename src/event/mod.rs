use crate::state::{EntityKey, EntityKind};
use serde::{Deserialize, Serialize};
use std::fmt;

mod normalizer;
mod protocol;

pub use normalizer::{DecodeError, EventNormalizer};
pub use protocol::{FieldNames, ProtocolConfig, TypeTags};

/// Locally assigned ordering key for merge decisions.
///
/// Strictly increasing per normalizer instance. The upstream transport makes
/// no ordering promise, so nothing inside the payload is trusted for ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArrivalIndex(pub u64);

impl fmt::Display for ArrivalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 2D world coordinate
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Moving unit class tag
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitClass {
    #[default]
    Standard,
    Priority,
}

/// Signal controller phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPhase {
    Stop,
    Caution,
    Go,
}

/// A normalized update, ready for the world store.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateEvent {
    /// Ordering key assigned by the normalizer
    pub arrival: ArrivalIndex,

    /// What the update does
    pub kind: UpdateKind,
}

/// Typed update variants understood by the store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    /// Create or replace a moving unit's position/speed/class
    UpsertUnit {
        id: String,
        position: Position,
        speed: f64,
        class: UnitClass,
    },
    /// Set a signal controller's phase (position may be omitted)
    SetSignalPhase {
        id: String,
        phase: SignalPhase,
        position: Option<Position>,
    },
    /// Incident route became active
    StartIncident { id: String, waypoints: Vec<Position> },
    /// Incident route is over
    EndIncident { id: String },
}

impl UpdateEvent {
    pub fn new(arrival: ArrivalIndex, kind: UpdateKind) -> Self {
        Self { arrival, kind }
    }

    /// Store key this event targets
    pub fn key(&self) -> EntityKey {
        self.kind.key()
    }
}

impl UpdateKind {
    pub fn key(&self) -> EntityKey {
        match self {
            UpdateKind::UpsertUnit { id, .. } => EntityKey::new(EntityKind::MovingUnit, id),
            UpdateKind::SetSignalPhase { id, .. } => {
                EntityKey::new(EntityKind::SignalController, id)
            }
            UpdateKind::StartIncident { id, .. } | UpdateKind::EndIncident { id } => {
                EntityKey::new(EntityKind::IncidentRoute, id)
            }
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            UpdateKind::UpsertUnit { .. } => "upsert_unit",
            UpdateKind::SetSignalPhase { .. } => "set_signal_phase",
            UpdateKind::StartIncident { .. } => "start_incident",
            UpdateKind::EndIncident { .. } => "end_incident",
        }
    }
}
