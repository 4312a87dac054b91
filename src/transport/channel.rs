use super::{ConnectionError, Dialer, Frame, FrameStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// In-process dialer: each `open_session` queues one connection whose frames
/// are fed through the returned sender. Dropping the sender ends the session.
///
/// Dialing with no queued session fails with `Refused`.
pub struct ChannelDialer {
    pending: Mutex<VecDeque<mpsc::Receiver<Frame>>>,
    capacity: usize,
}

impl ChannelDialer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queue a session for the next dial
    pub fn open_session(&self) -> mpsc::Sender<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(rx);
        tx
    }

    pub fn pending_sessions(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for ChannelDialer {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Dialer for ChannelDialer {
    fn describe(&self) -> String {
        "in-process channel".to_string()
    }

    async fn dial(&self) -> Result<FrameStream, ConnectionError> {
        let next = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match next {
            Some(rx) => Ok(ReceiverStream::new(rx).map(Ok).boxed()),
            None => Err(ConnectionError::Refused("no session queued".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_dial_in_order() {
        let dialer = ChannelDialer::new(8);
        let first = dialer.open_session();
        let second = dialer.open_session();
        assert_eq!(dialer.pending_sessions(), 2);

        first.send(Frame::from("one")).await.unwrap();
        second.send(Frame::from("two")).await.unwrap();
        drop(first);

        let mut stream = dialer.dial().await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(Frame::from("one"))));
        assert_eq!(stream.next().await, None);

        let mut stream = dialer.dial().await.unwrap();
        assert_eq!(stream.next().await, Some(Ok(Frame::from("two"))));
    }

    #[tokio::test]
    async fn test_dial_without_session_is_refused() {
        let dialer = ChannelDialer::new(8);
        assert!(matches!(dialer.dial().await, Err(ConnectionError::Refused(_))));
    }
}
