//! inclusion-client: Correlates one inclusion-proof query with its responses
//!
//! The transport delivers responses asynchronously, zero or more times and in
//! any order. A single driver task reduces them to one of a small set of
//! request states, which UI code reads through immutable snapshots.

pub mod client;
pub mod error;
pub mod machine;
pub mod store;
pub mod transport;

pub use client::ClientHandle;
pub use error::{ClientError, RequestError, TransportError};
pub use machine::{
    Applied, Dispatch, ProofResult, RequestMachine, RequestSnapshot, RequestState, RoundReference,
};
pub use store::StateStore;
pub use transport::{EventSink, ScriptedTransport, Transport};
