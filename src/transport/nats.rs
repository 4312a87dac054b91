use super::{ConnectionError, Dialer, Frame, FrameStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Subscribes to a NATS subject; each message payload is one frame.
///
/// The NATS client reconnects on its own once a session is up, so the
/// connector only sees failures of the initial connect or subscription.
pub struct NatsDialer {
    url: String,
    subject: String,
    resync_subject: Option<String>,
    resync_request: Option<String>,
    connect_timeout: Duration,
    connected_once: AtomicBool,
}

impl NatsDialer {
    pub fn new(
        url: String,
        subject: String,
        resync_subject: Option<String>,
        resync_request: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            url,
            subject,
            resync_subject,
            resync_request,
            connect_timeout,
            connected_once: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Dialer for NatsDialer {
    fn describe(&self) -> String {
        format!("{} ({})", self.url, self.subject)
    }

    async fn dial(&self) -> Result<FrameStream, ConnectionError> {
        info!("Connecting to NATS at {}", self.url);

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(self.connect_timeout)
            .connect(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let subscriber = client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        // Resync request only on redials
        let redial = self.connected_once.swap(true, Ordering::SeqCst);
        let resync = self.resync_subject.as_ref().zip(self.resync_request.as_ref());
        if let (true, Some((subject, request))) = (redial, resync) {
            debug!(subject = %subject, "Publishing resync request");
            client
                .publish(subject.clone(), request.clone().into())
                .await
                .map_err(|e| ConnectionError::Stream(e.to_string()))?;
        }

        // Client must outlive the subscription
        let frames = subscriber.map(move |message| {
            let _client = &client;
            Ok(Frame::Binary(message.payload.to_vec()))
        });

        Ok(frames.boxed())
    }
}
