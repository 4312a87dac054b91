use super::{ConnectionStatus, Dialer, Frame, ReconnectConfig, TransportEvent};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns the background task that dials, pumps frames and reconnects.
///
/// Events (status transitions, resync markers and frames) go out on one
/// bounded channel so consumers see them in the order they happened.
pub struct TransportConnector {
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl TransportConnector {
    /// Start connecting in the background
    pub fn spawn(
        dialer: Arc<dyn Dialer>,
        policy: ReconnectConfig,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            dialer,
            policy,
            events_tx,
            status_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(worker.run());

        let connector = Self {
            status_rx,
            shutdown_tx,
            task: Some(task),
        };

        (connector, events_rx)
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch handle for status changes
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Stop the dial/pump loop and wait for the task to exit
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Transport task panicked");
                }
            }
        }
    }
}

impl Drop for TransportConnector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Worker {
    dialer: Arc<dyn Dialer>,
    policy: ReconnectConfig,
    events_tx: mpsc::Sender<TransportEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Why a session loop stopped
enum SessionEnd {
    Dropped,
    Shutdown,
}

impl Worker {
    async fn run(mut self) {
        let target = self.dialer.describe();
        let mut attempt: u32 = 0;
        let mut has_connected = false;

        info!(target = %target, "Connecting to event stream");
        if !self.set_status(ConnectionStatus::Connecting).await {
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
            return;
        }

        'run: loop {
            let dialed = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break 'run,
                result = self.dialer.dial() => result,
            };

            match dialed {
                Ok(mut stream) => {
                    attempt = 0;
                    let session_id = Uuid::now_v7();
                    info!(target = %target, session = %session_id, "Connected");

                    if !self.set_status(ConnectionStatus::Connected).await {
                        break 'run;
                    }

                    if has_connected {
                        debug!(session = %session_id, "Emitting resync marker");
                        if !self.send(TransportEvent::Resync { session_id }).await {
                            break 'run;
                        }
                    }
                    has_connected = true;

                    let end = loop {
                        let next = tokio::select! {
                            biased;
                            _ = self.shutdown_rx.changed() => break SessionEnd::Shutdown,
                            item = stream.next() => item,
                        };

                        match next {
                            Some(Ok(frame)) => {
                                if !self.forward(frame).await {
                                    break 'run;
                                }
                            }
                            Some(Err(e)) => {
                                warn!(session = %session_id, error = %e, "Session failed");
                                break SessionEnd::Dropped;
                            }
                            None => {
                                info!(session = %session_id, "Session ended by peer");
                                break SessionEnd::Dropped;
                            }
                        }
                    };

                    if let SessionEnd::Shutdown = end {
                        break 'run;
                    }
                }
                Err(e) => {
                    warn!(target = %target, attempt = attempt, error = %e, "Connect failed");
                }
            }

            attempt = attempt.saturating_add(1);
            if self.policy.exhausted(attempt) {
                warn!(
                    target = %target,
                    max_retries = self.policy.max_retries,
                    "Retry cap exceeded, giving up"
                );
                break 'run;
            }

            if !self.set_status(ConnectionStatus::Reconnecting { attempt }).await {
                break 'run;
            }

            let delay = self.policy.delay_for(attempt);
            debug!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Waiting before redial");

            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => break 'run,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_status(ConnectionStatus::Disconnected).await;
        info!(target = %target, "Transport stopped");
    }

    async fn forward(&mut self, frame: Frame) -> bool {
        self.send(TransportEvent::Frame(frame)).await
    }

    /// Publish a status transition both to the watch and in-band
    async fn set_status(&mut self, status: ConnectionStatus) -> bool {
        self.status_tx.send_replace(status);
        self.send(TransportEvent::Status(status)).await
    }

    /// Returns false when the consumer is gone or shutdown was requested
    async fn send(&mut self, event: TransportEvent) -> bool {
        if *self.shutdown_rx.borrow() {
            return false;
        }

        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => false,
            sent = self.events_tx.send(event) => sent.is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionError, FrameStream};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back one scripted outcome per dial; fails once the script runs out
    struct ScriptedDialer {
        script: Mutex<VecDeque<Result<Vec<Frame>, ConnectionError>>>,
        dials: AtomicUsize,
    }

    impl ScriptedDialer {
        fn new(script: Vec<Result<Vec<Frame>, ConnectionError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                dials: AtomicUsize::new(0),
            })
        }

        fn dials(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn dial(&self) -> Result<FrameStream, ConnectionError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(frames)) => {
                    Ok(futures::stream::iter(frames.into_iter().map(Ok)).boxed())
                }
                Some(Err(e)) => Err(e),
                None => Err(ConnectionError::Refused("script exhausted".to_string())),
            }
        }
    }

    fn fast_policy(max_retries: u32) -> ReconnectConfig {
        ReconnectConfig {
            interval_ms: 1,
            max_retries,
            ..ReconnectConfig::default()
        }
    }

    async fn collect(mut rx: mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("connector stalled")
        {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_retry_cap_sequence() {
        let dialer = ScriptedDialer::new(vec![Ok(vec![Frame::from("hello")])]);
        let (connector, rx) = TransportConnector::spawn(dialer.clone(), fast_policy(3), 16);

        let events = collect(rx).await;

        assert_eq!(
            events,
            vec![
                TransportEvent::Status(ConnectionStatus::Connecting),
                TransportEvent::Status(ConnectionStatus::Connected),
                TransportEvent::Frame(Frame::from("hello")),
                TransportEvent::Status(ConnectionStatus::Reconnecting { attempt: 1 }),
                TransportEvent::Status(ConnectionStatus::Reconnecting { attempt: 2 }),
                TransportEvent::Status(ConnectionStatus::Reconnecting { attempt: 3 }),
                TransportEvent::Status(ConnectionStatus::Disconnected),
            ]
        );
        assert_eq!(dialer.dials(), 4);
        assert_eq!(connector.status(), ConnectionStatus::Disconnected);

        // No further dial after giving up
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dialer.dials(), 4);
    }

    #[tokio::test]
    async fn test_resync_only_on_reconnect() {
        let dialer = ScriptedDialer::new(vec![
            Ok(vec![Frame::from("a")]),
            Ok(vec![Frame::from("b")]),
        ]);
        let (_connector, rx) = TransportConnector::spawn(dialer, fast_policy(1), 16);

        let events = collect(rx).await;

        let resyncs: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, TransportEvent::Resync { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(resyncs.len(), 1);

        // Resync sits between the second Connected and the first frame of that session
        let idx = resyncs[0];
        assert_eq!(events[idx - 1], TransportEvent::Status(ConnectionStatus::Connected));
        assert_eq!(events[idx + 1], TransportEvent::Frame(Frame::from("b")));
    }

    #[tokio::test]
    async fn test_counter_resets_after_connect() {
        let refused = || Err(ConnectionError::Connect("refused".to_string()));
        let dialer = ScriptedDialer::new(vec![
            refused(),
            refused(),
            Ok(vec![Frame::from("x")]),
            refused(),
            refused(),
        ]);
        let (_connector, rx) = TransportConnector::spawn(dialer.clone(), fast_policy(2), 16);

        let events = collect(rx).await;

        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Status(ConnectionStatus::Reconnecting { attempt }) => {
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2, 1, 2]);
        assert_eq!(dialer.dials(), 5);
        assert_eq!(
            events.last(),
            Some(&TransportEvent::Status(ConnectionStatus::Disconnected))
        );
    }

    #[tokio::test]
    async fn test_stream_error_ends_session() {
        struct FailingDialer;

        #[async_trait]
        impl Dialer for FailingDialer {
            fn describe(&self) -> String {
                "failing".to_string()
            }

            async fn dial(&self) -> Result<FrameStream, ConnectionError> {
                let items = vec![
                    Ok(Frame::from("one")),
                    Err(ConnectionError::Stream("reset".to_string())),
                    Ok(Frame::from("never")),
                ];
                Ok(futures::stream::iter(items).boxed())
            }
        }

        let (_connector, rx) =
            TransportConnector::spawn(Arc::new(FailingDialer), fast_policy(0), 16);
        let events = collect(rx).await;

        assert!(events.contains(&TransportEvent::Frame(Frame::from("one"))));
        assert!(!events.contains(&TransportEvent::Frame(Frame::from("never"))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_delivery() {
        struct PendingDialer;

        #[async_trait]
        impl Dialer for PendingDialer {
            fn describe(&self) -> String {
                "pending".to_string()
            }

            async fn dial(&self) -> Result<FrameStream, ConnectionError> {
                Ok(futures::stream::pending().boxed())
            }
        }

        let (mut connector, mut rx) =
            TransportConnector::spawn(Arc::new(PendingDialer), fast_policy(5), 16);

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Status(ConnectionStatus::Connecting))
        );
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Status(ConnectionStatus::Connected))
        );

        connector.shutdown().await;

        assert_eq!(rx.recv().await, None);
        assert_eq!(connector.status(), ConnectionStatus::Disconnected);
    }
}
