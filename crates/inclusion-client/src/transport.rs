//! Transport port and an in-process scripted transport
//!
//! The anonymous-network transport lives outside this crate. It receives the
//! encoded payload plus an `EventSink`, and may push any number of raw frames
//! into that sink, in any order, at any time after the send.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use inclusion_core::constants::DEFAULT_FOLLOWER_TIMEOUT_MS;
use inclusion_core::Recipient;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Sends one payload to a recipient
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Schedule the send. Resolves once the transport has accepted it;
    /// responses arrive later through `sink`.
    async fn send(
        &self,
        recipient: &Recipient,
        payload: Vec<u8>,
        sink: EventSink,
    ) -> Result<(), TransportError>;
}

/// Input queued for the request driver
#[derive(Debug)]
pub(crate) enum Inbound {
    Frame { generation: u64, frame: Vec<u8> },
    TimedOut { generation: u64 },
}

/// Callback handle bound to a single request.
///
/// Never blocks. Frames pushed after the request has finished, or after a
/// newer request started, are dropped by the driver.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the request this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Push a raw response frame. Returns false once the driver has stopped.
    pub fn deliver(&self, frame: &[u8]) -> bool {
        self.tx
            .send(Inbound::Frame {
                generation: self.generation,
                frame: frame.to_vec(),
            })
            .is_ok()
    }

    /// Signal that the transport gave up waiting for a response
    pub fn timed_out(&self) -> bool {
        self.tx
            .send(Inbound::TimedOut {
                generation: self.generation,
            })
            .is_ok()
    }
}

/// Transport that replays a fixed list of frames after every send.
///
/// Used by the CLI `replay` command and by tests.
pub struct ScriptedTransport {
    frames: Vec<Vec<u8>>,
    failure: Option<TransportError>,
    delay: Duration,
    timeout_after_frames: bool,
    startup: Duration,
    follower_timeout: Duration,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedTransport {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames,
            failure: None,
            delay: Duration::ZERO,
            timeout_after_frames: false,
            startup: Duration::ZERO,
            follower_timeout: Duration::from_millis(DEFAULT_FOLLOWER_TIMEOUT_MS),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Fail every send with the given error
    pub fn failing(error: TransportError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(Vec::new())
        }
    }

    /// Wait before each frame
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report a timeout once all frames are delivered
    pub fn then_timeout(mut self) -> Self {
        self.timeout_after_frames = true;
        self
    }

    /// Simulate a network that becomes healthy only after `startup`
    pub fn with_startup(mut self, startup: Duration) -> Self {
        self.startup = startup;
        self
    }

    /// How long a send waits for the network to become healthy
    pub fn with_follower_timeout(mut self, timeout: Duration) -> Self {
        self.follower_timeout = timeout;
        self
    }

    /// Payloads passed to `send`, in order
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        recipient: &Recipient,
        payload: Vec<u8>,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        tracing::debug!(
            generation = sink.generation(),
            recipient_len = recipient.address.len(),
            payload_len = payload.len(),
            "Scripted send"
        );

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(payload);

        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        if self.startup > self.follower_timeout {
            tokio::time::sleep(self.follower_timeout).await;
            return Err(TransportError::NotReady(format!(
                "network not healthy after {}ms",
                self.follower_timeout.as_millis()
            )));
        }
        if !self.startup.is_zero() {
            tokio::time::sleep(self.startup).await;
        }

        let frames = self.frames.clone();
        let delay = self.delay;
        let timeout = self.timeout_after_frames;

        tokio::spawn(async move {
            for frame in frames {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if !sink.deliver(&frame) {
                    return;
                }
            }
            if timeout {
                sink.timed_out();
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient {
            address: vec![1; 33],
            public_key: vec![2; 32],
        }
    }

    #[tokio::test]
    async fn test_sink_tags_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(5, tx);

        assert!(sink.deliver(b"frame"));
        assert!(sink.timed_out());

        match rx.recv().await.unwrap() {
            Inbound::Frame { generation, frame } => {
                assert_eq!(generation, 5);
                assert_eq!(frame, b"frame");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            Inbound::TimedOut { generation: 5 }
        ));
    }

    #[tokio::test]
    async fn test_sink_after_driver_stopped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(1, tx);
        drop(rx);

        assert!(!sink.deliver(b"late"));
        assert!(!sink.timed_out());
    }

    #[tokio::test]
    async fn test_scripted_network_not_ready() {
        let transport = ScriptedTransport::new(vec![b"one".to_vec()])
            .with_startup(Duration::from_millis(50))
            .with_follower_timeout(Duration::from_millis(5));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = transport
            .send(&recipient(), b"payload".to_vec(), EventSink::new(1, tx))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotReady(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_scripted_network_ready_in_time() {
        let transport = ScriptedTransport::new(vec![b"one".to_vec()])
            .with_startup(Duration::from_millis(5))
            .with_follower_timeout(Duration::from_millis(50));
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport
            .send(&recipient(), b"payload".to_vec(), EventSink::new(1, tx))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(Inbound::Frame { .. })));
    }

    #[tokio::test]
    async fn test_scripted_replay() {
        let transport =
            ScriptedTransport::new(vec![b"one".to_vec(), b"two".to_vec()]).then_timeout();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport
            .send(&recipient(), b"payload".to_vec(), EventSink::new(1, tx))
            .await
            .unwrap();

        let mut frames = Vec::new();
        for _ in 0..2 {
            if let Some(Inbound::Frame { frame, .. }) = rx.recv().await {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(matches!(rx.recv().await, Some(Inbound::TimedOut { .. })));
        assert_eq!(transport.sent_payloads(), vec![b"payload".to_vec()]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let transport = ScriptedTransport::failing(TransportError::NotReady("offline".into()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = transport
            .send(&recipient(), b"payload".to_vec(), EventSink::new(1, tx))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("offline"));
        assert_eq!(transport.sent_payloads().len(), 1);
    }
}
