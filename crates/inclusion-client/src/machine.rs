//! Request state machine
//!
//! Owns the lifecycle of the single in-flight query. Every mutation goes
//! through one of the transition methods below; callers only ever see
//! fully-applied `RequestSnapshot`s.
//!
//! ```text
//! Idle --submit--> Sending --dispatched--> AwaitingResponse --RoundResults--> Processing
//!  ^                  |                          |                                |
//!  +---send failed----+                          +--------QueryResponse-----------+--> Idle
//! ```
//!
//! Events are matched against the generation of the request they were
//! dispatched for, so a sink handed out for an earlier request can never
//! update a later one.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use inclusion_core::{
    classify, decode_response, encode, validate, ClientConfig, IdentityCommitment, InboundEvent,
    Recipient, Request, RoundResults,
};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestState {
    Idle,
    Sending,
    AwaitingResponse,
    Processing,
}

impl RequestState {
    pub fn is_idle(&self) -> bool {
        matches!(self, RequestState::Idle)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Idle => "idle",
            RequestState::Sending => "sending",
            RequestState::AwaitingResponse => "awaiting-response",
            RequestState::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// Tracking reference for the first round that carried the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReference {
    pub round_id: String,
    pub status: i64,
    pub url: String,
}

/// Terminal result of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofResult {
    pub commitment: IdentityCommitment,
    /// Decoded inclusion proof document
    pub proof: Value,
    pub round: Option<RoundReference>,
    pub submitted_at_ms: u64,
    pub resolved_at_ms: u64,
}

/// Read-only projection of the machine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSnapshot {
    /// Generation of the most recent request, 0 before the first submission
    pub generation: u64,
    pub state: RequestState,
    pub status: Option<String>,
    pub round: Option<RoundReference>,
    pub result: Option<ProofResult>,
    #[serde(serialize_with = "error_message")]
    pub error: Option<RequestError>,
}

impl Default for RequestSnapshot {
    fn default() -> Self {
        Self {
            generation: 0,
            state: RequestState::Idle,
            status: None,
            round: None,
            result: None,
            error: None,
        }
    }
}

impl RequestSnapshot {
    /// Error that ended the request without a proof.
    ///
    /// An unexpected message seen before the proof arrived stays in `error`
    /// but does not count as a failure once `result` is set.
    pub fn failure(&self) -> Option<&RequestError> {
        if self.result.is_some() {
            return None;
        }
        self.error.as_ref()
    }
}

fn error_message<S: Serializer>(
    error: &Option<RequestError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Everything the caller needs to hand a request to the transport
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub generation: u64,
    pub request: Request,
    pub payload: Vec<u8>,
}

/// What a transition did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Nothing changed; the input was stale or arrived while idle
    Ignored,
    /// State or projections changed, request still in flight
    Updated,
    /// An error was surfaced without changing state
    Surfaced,
    /// Request finished with a result
    Resolved,
    /// Request finished with an error
    Failed,
}

/// Single-request correlation state machine
pub struct RequestMachine {
    recipient: Recipient,
    command_tag: String,
    round_dashboard_url: String,
    snapshot: RequestSnapshot,
    in_flight: Option<Request>,
}

impl RequestMachine {
    /// Create an idle machine, rejecting configs that cannot address a responder
    pub fn new(config: &ClientConfig) -> inclusion_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            recipient: config.recipient()?,
            command_tag: config.command_tag.clone(),
            round_dashboard_url: config.round_dashboard_url.clone(),
            snapshot: RequestSnapshot::default(),
            in_flight: None,
        })
    }

    pub fn snapshot(&self) -> &RequestSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> RequestState {
        self.snapshot.state
    }

    /// Generation of the request currently in flight
    pub fn current_generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|_| self.snapshot.generation)
    }

    /// Start a new request from raw user text.
    ///
    /// Rejected with `Busy` while another request is in flight. On success the
    /// machine is `Sending` and the returned dispatch must be handed to the
    /// transport, followed by `dispatch_succeeded` or `dispatch_failed`.
    pub fn submit(&mut self, text: &str) -> Result<Dispatch, RequestError> {
        if !self.snapshot.state.is_idle() {
            self.snapshot.error = Some(RequestError::Busy);
            return Err(RequestError::Busy);
        }

        self.snapshot.error = None;
        self.snapshot.status = None;
        self.snapshot.round = None;
        self.snapshot.result = None;

        let commitment = match validate(text) {
            Ok(commitment) => commitment,
            Err(_) => {
                self.snapshot.error = Some(RequestError::Validation);
                return Err(RequestError::Validation);
            }
        };

        let payload = encode(&commitment, &self.command_tag);
        let request = Request::new(commitment, self.recipient.clone());

        self.snapshot.generation += 1;
        self.snapshot.state = RequestState::Sending;
        self.snapshot.status = Some("Sending request".to_string());
        self.in_flight = Some(request.clone());

        Ok(Dispatch {
            generation: self.snapshot.generation,
            request,
            payload,
        })
    }

    /// The transport accepted the send
    pub fn dispatch_succeeded(&mut self, generation: u64) -> Applied {
        if !self.is_current(generation) || self.snapshot.state != RequestState::Sending {
            return Applied::Ignored;
        }

        self.snapshot.state = RequestState::AwaitingResponse;
        self.snapshot.status = Some("Request dispatched, waiting for the network".to_string());
        Applied::Updated
    }

    /// The transport could not schedule the send
    pub fn dispatch_failed(&mut self, generation: u64, reason: &str) -> Applied {
        if !self.is_current(generation) || self.snapshot.state != RequestState::Sending {
            return Applied::Ignored;
        }

        self.fail(RequestError::TransportDispatch {
            reason: reason.to_string(),
        })
    }

    /// Classify and apply one raw inbound frame
    pub fn apply_frame(&mut self, generation: u64, frame: &[u8]) -> Applied {
        if !self.is_current(generation) {
            return Applied::Ignored;
        }

        match classify(frame) {
            Ok(event) => self.apply_event(generation, event),
            Err(err) => {
                let raw = err.raw_frame().unwrap_or_default().to_string();
                self.snapshot.error = Some(RequestError::UnexpectedMessage {
                    reason: err.to_string(),
                    raw,
                });
                Applied::Surfaced
            }
        }
    }

    /// Apply one classified event
    pub fn apply_event(&mut self, generation: u64, event: InboundEvent) -> Applied {
        if !self.is_current(generation) {
            return Applied::Ignored;
        }

        match event {
            InboundEvent::SentMessage => {
                self.snapshot.status = Some("Message sent, waiting for round results".to_string());
                Applied::Updated
            }
            InboundEvent::RoundResults(rounds) => {
                self.on_round_results(&rounds);
                Applied::Updated
            }
            InboundEvent::QueryResponse { message } => self.on_query_response(&message),
        }
    }

    /// Timeout reported by the transport
    pub fn timed_out(&mut self, generation: u64) -> Applied {
        if !self.is_current(generation) {
            return Applied::Ignored;
        }

        match self.snapshot.state {
            RequestState::AwaitingResponse | RequestState::Processing => {
                self.fail(RequestError::Timeout)
            }
            _ => Applied::Ignored,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == Some(generation)
    }

    fn on_round_results(&mut self, rounds: &RoundResults) {
        self.snapshot.state = RequestState::Processing;

        let status = match rounds.first() {
            Some((round_id, result)) => {
                self.snapshot.round = Some(RoundReference {
                    round_id: round_id.to_string(),
                    status: result.status,
                    url: format!(
                        "{}/{}",
                        self.round_dashboard_url.trim_end_matches('/'),
                        round_id
                    ),
                });

                if rounds.timed_out {
                    format!("Round {} timed out, waiting for the proof", round_id)
                } else if !rounds.success {
                    format!("Round {} failed, waiting for the proof", round_id)
                } else {
                    format!("Round {} completed, waiting for the proof", round_id)
                }
            }
            None if rounds.timed_out => "Round results timed out, waiting for the proof".into(),
            None => "Round results received, waiting for the proof".into(),
        };
        self.snapshot.status = Some(status);
    }

    fn on_query_response(&mut self, message: &str) -> Applied {
        let proof = match decode_response(message) {
            Ok(proof) => proof,
            Err(err) => {
                return self.fail(RequestError::Decode {
                    reason: err.to_string(),
                })
            }
        };

        let Some(request) = self.in_flight.take() else {
            return Applied::Ignored;
        };

        self.snapshot.result = Some(ProofResult {
            commitment: request.commitment,
            proof,
            round: self.snapshot.round.clone(),
            submitted_at_ms: unix_millis(request.submitted_at),
            resolved_at_ms: unix_millis(SystemTime::now()),
        });
        self.snapshot.state = RequestState::Idle;
        self.snapshot.status = Some("Inclusion proof received".to_string());
        Applied::Resolved
    }

    fn fail(&mut self, error: RequestError) -> Applied {
        self.in_flight = None;
        self.snapshot.state = RequestState::Idle;
        self.snapshot.status = None;
        self.snapshot.error = Some(error);
        Applied::Failed
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
