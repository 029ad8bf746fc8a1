//! Request driver and client handle
//!
//! A single driver task owns the `RequestMachine`. Submissions from handles
//! and frames from transport sinks are queued on channels and applied one at
//! a time, in delivery order, so every published snapshot is a complete
//! transition.

use std::sync::Arc;

use inclusion_core::ClientConfig;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ClientError, RequestError, Result};
use crate::machine::{Applied, RequestMachine, RequestSnapshot};
use crate::store::StateStore;
use crate::transport::{EventSink, Inbound, Transport};

enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<std::result::Result<u64, RequestError>>,
    },
    Timeout,
}

/// Cloneable handle to a running request driver.
///
/// The driver stops once every handle is dropped.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    store: StateStore,
}

impl ClientHandle {
    /// Spawn a driver on the current tokio runtime
    pub fn spawn<T: Transport>(config: &ClientConfig, transport: T) -> Result<Self> {
        let machine = RequestMachine::new(config)?;
        let store = StateStore::new(machine.snapshot().clone());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            machine,
            transport: Arc::new(transport),
            store: store.clone(),
            commands: commands_rx,
            inbound: inbound_rx,
            inbound_tx,
        };
        tokio::spawn(driver.run());

        Ok(Self {
            commands: commands_tx,
            store,
        })
    }

    /// Submit raw user text.
    ///
    /// Resolves once the transport has accepted or refused the send and
    /// returns the request generation.
    pub async fn submit(&self, text: impl Into<String>) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                text: text.into(),
                reply,
            })
            .map_err(|_| ClientError::DriverClosed)?;

        let generation = rx.await.map_err(|_| ClientError::DriverClosed)??;
        Ok(generation)
    }

    /// Resolve the in-flight request as timed out
    pub fn inject_timeout(&self) -> Result<()> {
        self.commands
            .send(Command::Timeout)
            .map_err(|_| ClientError::DriverClosed)
    }

    pub fn snapshot(&self) -> Arc<RequestSnapshot> {
        self.store.load()
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Wait for the first snapshot, current or future, matching `predicate`
    pub async fn wait_until<F>(&self, predicate: F) -> Result<Arc<RequestSnapshot>>
    where
        F: Fn(&RequestSnapshot) -> bool,
    {
        let mut rx = self.store.subscribe();

        let current = self.store.load();
        if predicate(&*current) {
            return Ok(current);
        }

        loop {
            match rx.recv().await {
                Ok(snapshot) if predicate(&*snapshot) => return Ok(snapshot),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Snapshot subscriber lagged");
                    let current = self.store.load();
                    if predicate(&*current) {
                        return Ok(current);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(ClientError::DriverClosed)
                }
            }
        }
    }

    /// Wait until request `generation` has finished
    pub async fn wait_finished(&self, generation: u64) -> Result<Arc<RequestSnapshot>> {
        self.wait_until(|snapshot| snapshot.generation == generation && snapshot.state.is_idle())
            .await
    }
}

struct Driver<T> {
    machine: RequestMachine,
    transport: Arc<T>,
    store: StateStore,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl<T: Transport> Driver<T> {
    async fn run(mut self) {
        tracing::debug!("Request driver started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit { text, reply }) => {
                        let outcome = self.submit(&text).await;
                        let _ = reply.send(outcome);
                    }
                    Some(Command::Timeout) => {
                        if let Some(generation) = self.machine.current_generation() {
                            self.on_inbound(Inbound::TimedOut { generation });
                        }
                    }
                    None => break,
                },
                Some(inbound) = self.inbound.recv() => self.on_inbound(inbound),
            }
        }

        tracing::debug!("Request driver stopped");
    }

    async fn submit(&mut self, text: &str) -> std::result::Result<u64, RequestError> {
        let dispatch = match self.machine.submit(text) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                tracing::warn!(error = %err, state = %self.machine.state(), "Submission rejected");
                metrics::counter!("inclusion_requests_total", "outcome" => err.code()).increment(1);
                self.publish();
                return Err(err);
            }
        };

        let generation = dispatch.generation;
        tracing::debug!(
            generation,
            commitment = %dispatch.request.commitment,
            payload_len = dispatch.payload.len(),
            "Dispatching request"
        );
        self.publish();

        let sink = EventSink::new(generation, self.inbound_tx.clone());
        match self
            .transport
            .send(&dispatch.request.recipient, dispatch.payload, sink)
            .await
        {
            Ok(()) => {
                self.machine.dispatch_succeeded(generation);
                tracing::debug!(generation, state = %self.machine.state(), "Transport accepted request");
                self.publish();
                Ok(generation)
            }
            Err(err) => {
                let reason = err.to_string();
                self.machine.dispatch_failed(generation, &reason);
                tracing::warn!(generation, error = %reason, "Transport dispatch failed");
                metrics::counter!("inclusion_requests_total", "outcome" => "TRANSPORT_DISPATCH")
                    .increment(1);
                self.publish();
                Err(RequestError::TransportDispatch { reason })
            }
        }
    }

    fn on_inbound(&mut self, inbound: Inbound) {
        let (generation, applied) = match inbound {
            Inbound::Frame { generation, frame } => {
                let applied = self.machine.apply_frame(generation, &frame);
                if applied == Applied::Ignored {
                    tracing::debug!(
                        generation,
                        current = ?self.machine.current_generation(),
                        len = frame.len(),
                        "Ignoring stale frame"
                    );
                }
                (generation, applied)
            }
            Inbound::TimedOut { generation } => (generation, self.machine.timed_out(generation)),
        };

        let snapshot = self.machine.snapshot();
        match applied {
            Applied::Ignored => {
                metrics::counter!("inclusion_events_total", "kind" => "ignored").increment(1);
                return;
            }
            Applied::Surfaced => {
                tracing::warn!(generation, error = ?snapshot.error, state = %snapshot.state, "Unexpected inbound frame");
                metrics::counter!("inclusion_events_total", "kind" => "unexpected").increment(1);
            }
            Applied::Updated => {
                tracing::debug!(
                    generation,
                    state = %snapshot.state,
                    status = ?snapshot.status,
                    "Request updated"
                );
            }
            Applied::Resolved => {
                tracing::info!(
                    generation,
                    round = ?snapshot.round.as_ref().map(|r| r.round_id.as_str()),
                    "Inclusion proof received"
                );
                metrics::counter!("inclusion_requests_total", "outcome" => "RESOLVED").increment(1);
            }
            Applied::Failed => {
                let code = snapshot.error.as_ref().map(|e| e.code()).unwrap_or("UNKNOWN");
                tracing::warn!(generation, error = ?snapshot.error, "Request failed");
                metrics::counter!("inclusion_requests_total", "outcome" => code).increment(1);
            }
        }

        metrics::counter!("inclusion_events_total", "kind" => "applied").increment(1);
        self.publish();
    }

    fn publish(&self) {
        self.store.publish(self.machine.snapshot().clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::machine::RequestState;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use inclusion_core::Recipient;
    use std::time::Duration;
    use tokio::sync::Mutex;

    const VALID: &str = "0x301797a6e7cd8f4a2b1e4cb1a8f3d6f0c0b7e5d4a3c2b1f0e9d8c7b6a5f5c3de";

    fn query_response(json: &str) -> Vec<u8> {
        format!(
            r#"{{"type":"QueryResponse","response":{{"message":"{}"}}}}"#,
            BASE64.encode(json)
        )
        .into_bytes()
    }

    /// Keeps every sink so tests can deliver frames by hand
    #[derive(Clone, Default)]
    struct ManualTransport {
        sinks: Arc<Mutex<Vec<EventSink>>>,
    }

    #[async_trait]
    impl Transport for ManualTransport {
        async fn send(
            &self,
            _recipient: &Recipient,
            _payload: Vec<u8>,
            sink: EventSink,
        ) -> std::result::Result<(), TransportError> {
            self.sinks.lock().await.push(sink);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_submit_and_resolve() {
        let transport = ScriptedTransport::new(vec![
            br#"{"type":"SentMessage"}"#.to_vec(),
            query_response(r#"{"ok":1}"#),
        ]);
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport).unwrap();

        let generation = handle.submit(VALID).await.unwrap();
        let snapshot = handle.wait_finished(generation).await.unwrap();

        assert_eq!(snapshot.state, RequestState::Idle);
        assert_eq!(
            snapshot.result.as_ref().unwrap().proof,
            serde_json::json!({"ok": 1})
        );
    }

    #[tokio::test]
    async fn test_junk_frame_before_proof() {
        let transport = ScriptedTransport::new(vec![
            br#"{"type":"SentMessage"}"#.to_vec(),
            b"garbage-frame".to_vec(),
            query_response(r#"{"included":true}"#),
        ]);
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport).unwrap();

        let generation = handle.submit(VALID).await.unwrap();
        let snapshot = handle.wait_finished(generation).await.unwrap();

        assert!(matches!(
            snapshot.error,
            Some(RequestError::UnexpectedMessage { .. })
        ));
        assert!(snapshot.result.is_some());
        assert!(snapshot.failure().is_none());
    }

    #[tokio::test]
    async fn test_validation_error_not_dispatched() {
        let transport = ManualTransport::default();
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport.clone()).unwrap();

        let err = handle.submit("not-hex").await.unwrap_err();
        assert!(matches!(err, ClientError::Request(RequestError::Validation)));
        assert!(transport.sinks.lock().await.is_empty());
        assert_eq!(handle.snapshot().state, RequestState::Idle);
        assert_eq!(handle.snapshot().error, Some(RequestError::Validation));
    }

    #[tokio::test]
    async fn test_transport_failure_resets() {
        let transport = ScriptedTransport::failing(TransportError::Send("no route".into()));
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport).unwrap();

        let err = handle.submit(VALID).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Request(RequestError::TransportDispatch { .. })
        ));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, RequestState::Idle);
        assert_eq!(snapshot.generation, 1);
    }

    #[tokio::test]
    async fn test_busy_while_in_flight() {
        let transport = ManualTransport::default();
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport.clone()).unwrap();

        handle.submit(VALID).await.unwrap();
        let err = handle.submit(VALID).await.unwrap_err();
        assert!(matches!(err, ClientError::Request(RequestError::Busy)));
        assert_eq!(handle.snapshot().state, RequestState::AwaitingResponse);
        assert_eq!(transport.sinks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_sink_cannot_touch_new_request() {
        let transport = ManualTransport::default();
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport.clone()).unwrap();

        let first = handle.submit(VALID).await.unwrap();
        let old_sink = transport.sinks.lock().await[0].clone();
        old_sink.deliver(&query_response("{}"));
        handle.wait_finished(first).await.unwrap();

        let second = handle.submit(VALID).await.unwrap();
        old_sink.deliver(&query_response(r#"{"stale":true}"#));
        old_sink.timed_out();

        // Push a marker through the new sink so the stale inputs have been processed
        let new_sink = transport.sinks.lock().await[1].clone();
        new_sink.deliver(br#"{"type":"SentMessage"}"#);
        let snapshot = handle
            .wait_until(|s| s.status.as_deref() == Some("Message sent, waiting for round results"))
            .await
            .unwrap();

        assert_eq!(snapshot.generation, second);
        assert_eq!(snapshot.state, RequestState::AwaitingResponse);
        assert!(snapshot.result.is_none());
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_injected_timeout() {
        let transport = ManualTransport::default();
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport).unwrap();

        let generation = handle.submit(VALID).await.unwrap();
        handle.inject_timeout().unwrap();

        let snapshot = handle.wait_finished(generation).await.unwrap();
        assert_eq!(snapshot.error, Some(RequestError::Timeout));
    }

    #[tokio::test]
    async fn test_transport_timeout_after_frames() {
        let transport = ScriptedTransport::new(vec![br#"{"type":"SentMessage"}"#.to_vec()])
            .with_delay(Duration::from_millis(5))
            .then_timeout();
        let handle = ClientHandle::spawn(&ClientConfig::default(), transport).unwrap();

        let generation = handle.submit(VALID).await.unwrap();
        let snapshot = handle.wait_finished(generation).await.unwrap();
        assert_eq!(snapshot.error, Some(RequestError::Timeout));
        assert!(snapshot.result.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = ClientConfig {
            recipient_id: "***".into(),
            ..Default::default()
        };
        let result = ClientHandle::spawn(&config, ManualTransport::default());
        assert!(matches!(result, Err(ClientError::Core(_))));
    }
}
