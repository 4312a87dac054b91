// World state store and entity model

pub mod config;
mod entity;
mod metrics;
mod store;

pub use config::StoreConfig;
pub use entity::{
    ChangeKind, Entity, EntityKey, EntityKind, EntityRecord, IncidentRoute, MovingUnit,
    SignalController, StoreChange, WorldSnapshot,
};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use store::{ApplyOutcome, WorldStore};
