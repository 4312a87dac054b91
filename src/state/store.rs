use crate::event::{ArrivalIndex, UpdateEvent, UpdateKind};
use crate::state::config::StoreConfig;
use crate::state::entity::{
    ChangeKind, Entity, EntityKey, EntityKind, EntityRecord, IncidentRoute, MovingUnit,
    SignalController, StoreChange, WorldSnapshot,
};
use crate::state::metrics::SyncMetrics;
use crate::subscription::{KindFilter, ListenerRegistry, Subscription};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Result of applying one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Removed,
    /// Arrival index not newer than what the store already holds
    Stale,
    /// Nothing to change (end for an unknown incident, store closed)
    NoOp,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Created | ApplyOutcome::Updated | ApplyOutcome::Removed
        )
    }
}

/// Ended incidents, remembered so a late start cannot resurrect them.
///
/// Bounded: the oldest tombstone is evicted once `capacity` is exceeded.
struct Tombstones {
    capacity: usize,
    order: VecDeque<String>,
    watermarks: HashMap<String, ArrivalIndex>,
}

impl Tombstones {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            watermarks: HashMap::new(),
        }
    }

    fn record(&mut self, id: &str, arrival: ArrivalIndex) {
        if self.capacity == 0 {
            return;
        }

        if let Some(watermark) = self.watermarks.get_mut(id) {
            *watermark = (*watermark).max(arrival);
            return;
        }

        self.watermarks.insert(id.to_string(), arrival);
        self.order.push_back(id.to_string());

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.watermarks.remove(&evicted);
            }
        }
    }

    fn dominates(&self, id: &str, arrival: ArrivalIndex) -> bool {
        self.watermarks
            .get(id)
            .map_or(false, |watermark| arrival <= *watermark)
    }

    fn forget(&mut self, id: &str) {
        if self.watermarks.remove(id).is_some() {
            self.order.retain(|entry| entry != id);
        }
    }

    fn len(&self) -> usize {
        self.watermarks.len()
    }
}

/// State held by the single writer
struct WriterState {
    tombstones: Tombstones,
}

/// Authoritative in-memory world state.
///
/// All mutation goes through [`WorldStore::apply`] (plus the resync/expiry
/// hooks). Writers are serialized by a mutex that also covers listener
/// notification, so listeners observe changes in apply order. Readers take
/// an `Arc` snapshot; the map is copied on write only while a reader still
/// holds an older snapshot.
///
/// Listeners run on the writer's thread and must not call `apply` themselves.
pub struct WorldStore {
    current: RwLock<Arc<WorldSnapshot>>,

    writer: Mutex<WriterState>,

    listeners: Arc<ListenerRegistry>,

    /// Broadcast channel for async consumers
    change_tx: broadcast::Sender<StoreChange>,

    closed: AtomicBool,

    config: StoreConfig,

    /// Metrics tracker for diagnostics
    pub metrics: SyncMetrics,
}

impl WorldStore {
    pub fn new(config: StoreConfig) -> Self {
        let (change_tx, _) = broadcast::channel(config.change_channel_capacity.max(1));

        Self {
            current: RwLock::new(Arc::new(WorldSnapshot::default())),
            writer: Mutex::new(WriterState {
                tombstones: Tombstones::new(config.tombstone_capacity),
            }),
            listeners: Arc::new(ListenerRegistry::new()),
            change_tx,
            closed: AtomicBool::new(false),
            config,
            metrics: SyncMetrics::new(),
        }
    }

    /// Apply one normalized event (core state mutation)
    pub fn apply(&self, event: UpdateEvent) -> ApplyOutcome {
        let mut writer = self.lock_writer();

        if self.closed.load(Ordering::SeqCst) {
            return ApplyOutcome::NoOp;
        }

        let key = event.key();
        let arrival = event.arrival;
        let label = event.kind.label();

        let (outcome, change) = match event.kind {
            UpdateKind::EndIncident { id } => self.end_incident(&mut writer, key, &id, arrival),
            UpdateKind::UpsertUnit {
                id,
                position,
                speed,
                class,
            } => self.upsert(key, arrival, move |_| {
                Entity::MovingUnit(MovingUnit {
                    id,
                    position,
                    speed,
                    class,
                })
            }),
            UpdateKind::SetSignalPhase {
                id,
                phase,
                position,
            } => self.upsert(key, arrival, move |previous| {
                let known = match previous {
                    Some(Entity::SignalController(signal)) => signal.position,
                    _ => None,
                };
                Entity::SignalController(SignalController {
                    id,
                    position: position.or(known),
                    phase,
                })
            }),
            UpdateKind::StartIncident { id, waypoints } => {
                if writer.tombstones.dominates(&id, arrival) {
                    (ApplyOutcome::Stale, None)
                } else {
                    writer.tombstones.forget(&id);
                    self.upsert(key, arrival, move |_| {
                        Entity::IncidentRoute(IncidentRoute {
                            id,
                            waypoints,
                            active: true,
                        })
                    })
                }
            }
        };

        match outcome {
            ApplyOutcome::Stale => {
                self.metrics.record_stale();
                debug!(event = label, arrival = %arrival, "Stale event ignored");
            }
            ApplyOutcome::NoOp => {
                debug!(event = label, arrival = %arrival, "Event changed nothing");
            }
            _ => self.metrics.record_applied(),
        }

        if let Some(change) = change {
            self.publish(change);
        }

        outcome
    }

    /// Insert or replace an entity if `arrival` is newer than the stored one
    fn upsert<F>(
        &self,
        key: EntityKey,
        arrival: ArrivalIndex,
        build: F,
    ) -> (ApplyOutcome, Option<StoreChange>)
    where
        F: FnOnce(Option<&Entity>) -> Entity,
    {
        let mut current = self.write_current();

        let previous = current.entities.get(&key);
        if let Some(record) = previous {
            if arrival <= record.arrival {
                return (ApplyOutcome::Stale, None);
            }
        }
        let created = previous.is_none();
        let entity = build(previous.map(|r| &r.entity));

        let now = Utc::now();
        let snapshot = Arc::make_mut(&mut *current);
        snapshot.entities.insert(
            key.clone(),
            EntityRecord {
                entity: entity.clone(),
                arrival,
                last_updated: now,
            },
        );
        snapshot.version += 1;

        let (outcome, change) = if created {
            (ApplyOutcome::Created, ChangeKind::Created)
        } else {
            (ApplyOutcome::Updated, ChangeKind::Updated)
        };

        (
            outcome,
            Some(StoreChange {
                key,
                change,
                entity,
                arrival,
                timestamp: now,
            }),
        )
    }

    /// Remove an incident regardless of arrival order; ends are authoritative
    fn end_incident(
        &self,
        writer: &mut WriterState,
        key: EntityKey,
        id: &str,
        arrival: ArrivalIndex,
    ) -> (ApplyOutcome, Option<StoreChange>) {
        let mut current = self.write_current();

        let stored_arrival = current.entities.get(&key).map(|r| r.arrival);
        writer
            .tombstones
            .record(id, stored_arrival.map_or(arrival, |stored| stored.max(arrival)));

        if stored_arrival.is_none() {
            return (ApplyOutcome::NoOp, None);
        }

        let snapshot = Arc::make_mut(&mut *current);
        match snapshot.entities.remove(&key) {
            Some(record) => {
                snapshot.version += 1;
                (
                    ApplyOutcome::Removed,
                    Some(StoreChange {
                        key,
                        change: ChangeKind::Removed,
                        entity: record.entity,
                        arrival,
                        timestamp: Utc::now(),
                    }),
                )
            }
            None => (ApplyOutcome::NoOp, None),
        }
    }

    /// Notify listeners, then broadcast (no receivers is fine)
    fn publish(&self, change: StoreChange) {
        self.listeners.notify(&change);
        let _ = self.change_tx.send(change);
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Get one entity record by kind and id
    pub fn get(&self, kind: EntityKind, id: &str) -> Option<EntityRecord> {
        self.snapshot().get(kind, id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Register a synchronous listener for changes matching `filter`
    pub fn subscribe<F>(&self, filter: impl Into<KindFilter>, listener: F) -> Subscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.listeners.register(filter.into(), Arc::new(listener))
    }

    /// Subscribe to the change broadcast
    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Hook called after the transport reconnects following a gap.
    ///
    /// Returns the number of entities dropped.
    pub fn on_resync(&self) -> usize {
        self.metrics.record_resync();

        if self.config.clear_on_resync {
            let dropped = self.clear();
            info!(dropped = dropped, "Resync: cleared world state");
            dropped
        } else {
            info!(
                entities = self.len(),
                "Resync: retaining world state until refreshed"
            );
            0
        }
    }

    /// Remove every entity, notifying listeners for each
    pub fn clear(&self) -> usize {
        let _writer = self.lock_writer();

        let mut removed: Vec<EntityRecord> = {
            let mut current = self.write_current();
            if current.entities.is_empty() {
                return 0;
            }
            let snapshot = Arc::make_mut(&mut *current);
            snapshot.version += 1;
            snapshot.entities.drain().map(|(_, record)| record).collect()
        };

        removed.sort_by(|a, b| a.entity.key().cmp(&b.entity.key()));
        let count = removed.len();
        self.publish_removals(removed);
        count
    }

    /// Expire units and signals not refreshed within `max_age`
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        match chrono::Duration::from_std(max_age) {
            Ok(age) => self.expire_older_than(Utc::now() - age),
            Err(_) => 0,
        }
    }

    /// Remove units and signals last updated before `cutoff`.
    ///
    /// Incidents are never expired; they only end explicitly.
    pub fn expire_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let _writer = self.lock_writer();

        let mut expired: Vec<EntityRecord> = {
            let mut current = self.write_current();
            let keys: Vec<EntityKey> = current
                .entities
                .iter()
                .filter(|(key, record)| {
                    key.kind != EntityKind::IncidentRoute && record.last_updated < cutoff
                })
                .map(|(key, _)| key.clone())
                .collect();

            if keys.is_empty() {
                return 0;
            }

            let snapshot = Arc::make_mut(&mut *current);
            snapshot.version += 1;
            keys.iter()
                .filter_map(|key| snapshot.entities.remove(key))
                .collect()
        };

        expired.sort_by(|a, b| a.entity.key().cmp(&b.entity.key()));
        let count = expired.len();
        self.metrics.record_expired(count);
        info!(expired = count, "Expired entities not refreshed in time");
        self.publish_removals(expired);
        count
    }

    fn publish_removals(&self, records: Vec<EntityRecord>) {
        let now = Utc::now();
        for record in records {
            self.publish(StoreChange {
                key: record.entity.key(),
                change: ChangeKind::Removed,
                entity: record.entity,
                arrival: record.arrival,
                timestamp: now,
            });
        }
    }

    /// Detach all listeners and reject further events
    pub fn close(&self) {
        let _writer = self.lock_writer();
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.clear();
        info!("World store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn tombstone_count(&self) -> usize {
        self.lock_writer().tombstones.len()
    }

    fn lock_writer(&self) -> MutexGuard<'_, WriterState> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_current(&self) -> RwLockWriteGuard<'_, Arc<WorldSnapshot>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorldStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
