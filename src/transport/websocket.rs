use super::{ConnectionError, Dialer, Frame, FrameStream};
use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// Reads text and binary frames from a WebSocket endpoint
pub struct WebSocketDialer {
    url: String,
    resync_request: Option<String>,
    connect_timeout: Duration,
    /// Set after the first successful handshake; later dials are redials
    connected_once: AtomicBool,
}

impl WebSocketDialer {
    pub fn new(url: String, resync_request: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            url,
            resync_request,
            connect_timeout,
            connected_once: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Dialer for WebSocketDialer {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn dial(&self) -> Result<FrameStream, ConnectionError> {
        let (mut ws, response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    ConnectionError::Connect(format!("timed out after {:?}", self.connect_timeout))
                })?
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        // Resync request only on redials
        let redial = self.connected_once.swap(true, Ordering::SeqCst);
        if let (true, Some(request)) = (redial, &self.resync_request) {
            debug!(url = %self.url, "Sending resync request");
            ws.send(Message::Text(request.clone()))
                .await
                .map_err(|e| ConnectionError::Stream(e.to_string()))?;
        }

        // Pings are answered by tungstenite on the next read
        let frames = ws.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes))),
                Ok(Message::Close(_)) => Some(Err(ConnectionError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::Stream(e.to_string()))),
            })
        });

        Ok(frames.boxed())
    }
}
