// Wires connector, normalizer, store and dispatcher into one owned pipeline

use crate::config::SyncConfig;
use crate::dispatch::{AlertSink, SideEffectDispatcher};
use crate::event::{DecodeError, EventNormalizer};
use crate::state::{SyncMetrics, WorldStore};
use crate::subscription::Subscription;
use crate::transport::{ConnectionStatus, Dialer, TransportConnector, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Cheap, cloneable read access to a running pipeline
#[derive(Clone)]
pub struct SyncHandle {
    pub store: Arc<WorldStore>,
    pub dispatcher: Arc<SideEffectDispatcher>,
    status: watch::Receiver<ConnectionStatus>,
}

impl SyncHandle {
    pub fn new(
        store: Arc<WorldStore>,
        dispatcher: Arc<SideEffectDispatcher>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            status,
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.store.metrics
    }
}

/// Owns every running component. One writer task normalizes and applies
/// events in delivery order.
pub struct SyncPipeline {
    store: Arc<WorldStore>,
    dispatcher: Arc<SideEffectDispatcher>,
    connector: TransportConnector,
    writer: Option<JoinHandle<()>>,
    dispatch_subscription: Option<Subscription>,
}

impl SyncPipeline {
    /// Build all components and start connecting. Must run inside a tokio runtime.
    pub fn start(config: &SyncConfig, dialer: Arc<dyn Dialer>, sink: Arc<dyn AlertSink>) -> Self {
        let store = Arc::new(WorldStore::new(config.store.clone()));
        let dispatcher = Arc::new(SideEffectDispatcher::new(sink));
        let dispatch_subscription = dispatcher.attach(&store);
        let normalizer = EventNormalizer::new(config.protocol.clone());

        info!(
            target = %dialer.describe(),
            max_retries = config.reconnect.max_retries,
            "Starting sync pipeline"
        );

        let (connector, events) = TransportConnector::spawn(
            dialer,
            config.reconnect.clone(),
            config.transport.channel_capacity,
        );

        let sweep = config.store.stale_after_secs.map(|secs| StaleSweep {
            max_age: Duration::from_secs(secs),
            interval: Duration::from_secs(config.store.sweep_interval_secs.max(1)),
        });

        let writer = tokio::spawn(run_writer(events, normalizer, Arc::clone(&store), sweep));

        Self {
            store,
            dispatcher,
            connector,
            writer: Some(writer),
            dispatch_subscription: Some(dispatch_subscription),
        }
    }

    pub fn handle(&self) -> SyncHandle {
        SyncHandle {
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            status: self.connector.status_watch(),
        }
    }

    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<SideEffectDispatcher> {
        &self.dispatcher
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connector.status()
    }

    /// Stop the connector, drain and join the writer, then close the store.
    /// No listener is called after this returns.
    pub async fn shutdown(mut self) {
        info!("Shutting down sync pipeline");

        self.connector.shutdown().await;

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                warn!(error = %e, "Writer task ended abnormally");
            }
        }

        if let Some(subscription) = self.dispatch_subscription.take() {
            subscription.unsubscribe();
        }
        self.store.close();

        info!(
            entities = self.store.len(),
            active_incidents = self.dispatcher.active_count(),
            "Sync pipeline stopped"
        );
    }
}

impl Drop for SyncPipeline {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

struct StaleSweep {
    max_age: Duration,
    interval: Duration,
}

async fn run_writer(
    mut events: mpsc::Receiver<TransportEvent>,
    normalizer: EventNormalizer,
    store: Arc<WorldStore>,
    sweep: Option<StaleSweep>,
) {
    let max_age = sweep.as_ref().map(|s| s.max_age);
    let mut sweep_timer = sweep.map(|s| {
        let mut interval = tokio::time::interval(s.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&normalizer, &store, event),
                None => break,
            },
            _ = next_tick(&mut sweep_timer) => {
                if let Some(max_age) = max_age {
                    store.expire_stale(max_age);
                }
            }
        }
    }

    debug!("Writer task finished");
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn handle_event(normalizer: &EventNormalizer, store: &WorldStore, event: TransportEvent) {
    match event {
        TransportEvent::Frame(frame) => {
            store.metrics.record_frame();

            match normalizer.normalize(&frame) {
                Ok(update) => {
                    store.apply(update);
                }
                Err(e) => {
                    store.metrics.record_decode_error(&e);
                    match &e {
                        DecodeError::UnknownType(tag) => {
                            debug!(tag = %tag, "Ignoring unknown message type");
                        }
                        DecodeError::Malformed(_) => {
                            warn!(error = %e, bytes = frame.len(), "Dropping malformed message");
                        }
                    }
                }
            }
        }
        TransportEvent::Status(status) => {
            info!(status = %status, "Connection status changed");
            if let ConnectionStatus::Reconnecting { .. } = status {
                store.metrics.record_reconnect();
            }
        }
        TransportEvent::Resync { session_id } => {
            info!(session = %session_id, "Upstream session restarted");
            store.on_resync();
        }
    }
}
