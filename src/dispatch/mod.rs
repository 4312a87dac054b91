// Incident alert side effects

use crate::state::{ChangeKind, Entity, EntityKind, IncidentRoute, StoreChange, WorldStore};
use crate::subscription::Subscription;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};


/// Receives alert transitions. Calls arrive on the store's writer path and
/// must not block or call back into the store's write side.
pub trait AlertSink: Send + Sync {
    fn alert_begin(&self, incident: &IncidentRoute);
    fn alert_end(&self, incident_id: &str);
}

/// Sink that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert_begin(&self, incident: &IncidentRoute) {
        warn!(
            incident = %incident.id,
            waypoints = incident.waypoints.len(),
            "Incident alert started"
        );
    }

    fn alert_end(&self, incident_id: &str) {
        info!(incident = %incident_id, "Incident alert ended");
    }
}

/// Turns incident lifecycle changes into exactly one begin and one end per
/// incident, however often the store reports the incident in between.
pub struct SideEffectDispatcher {
    sink: Arc<dyn AlertSink>,
    /// Active incidents and when their alert began
    active: DashMap<String, DateTime<Utc>>,
}

impl SideEffectDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            active: DashMap::new(),
        }
    }

    /// Register on the store for incident changes
    pub fn attach(self: &Arc<Self>, store: &WorldStore) -> Subscription {
        let dispatcher = Arc::clone(self);
        store.subscribe(EntityKind::IncidentRoute, move |change| {
            dispatcher.on_change(change)
        })
    }

    pub fn on_change(&self, change: &StoreChange) {
        let Entity::IncidentRoute(incident) = &change.entity else {
            return;
        };

        match change.change {
            ChangeKind::Created | ChangeKind::Updated => {
                let mut newly_active = false;
                self.active.entry(incident.id.clone()).or_insert_with(|| {
                    newly_active = true;
                    change.timestamp
                });

                if newly_active {
                    self.sink.alert_begin(incident);
                }
            }
            ChangeKind::Removed => {
                if self.active.remove(&incident.id).is_some() {
                    self.sink.alert_end(&incident.id);
                }
            }
        }
    }

    /// Whether the alert loop for `incident_id` should be running
    pub fn is_active(&self, incident_id: &str) -> bool {
        self.active.contains_key(incident_id)
    }

    /// Active incident ids, sorted
    pub fn active_incidents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn active_since(&self, incident_id: &str) -> Option<DateTime<Utc>> {
        self.active.get(incident_id).map(|started| *started)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
