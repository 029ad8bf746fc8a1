//! inclusion-core: Wire types for inclusion-proof queries over an anonymous transport
//!
//! This crate defines the pieces of the query protocol that do not depend on
//! any runtime:
//! - Payload codec: validates an identity commitment and renders the exact
//!   bytes the responder dispatches on
//! - Event classifier: turns raw inbound frames into a closed set of events
//! - Client configuration: recipient addressing and protocol constants
//!
//! # Correlation Model
//!
//! The wire protocol carries no request identifier. Inbound frames are
//! attributed to whichever request is currently in flight, so at most one
//! request may be outstanding at a time.
//!
//! | Frame `type` | Meaning |
//! |--------------|---------|
//! | `SentMessage` | transport confirms the request left the client |
//! | `RoundResults` | network rounds the request was carried in |
//! | `QueryResponse` | responder's answer, base64 of a JSON document |

mod codec;
mod commitment;
mod config;
mod error;
mod event;

pub use codec::{decode_request, decode_response, encode, validate};
pub use commitment::{IdentityCommitment, Request, COMMITMENT_BYTES};
pub use config::{ClientConfig, Recipient};
pub use error::Error;
pub use event::{classify, InboundEvent, RoundDescriptor, RoundResult, RoundResults};

pub type Result<T> = std::result::Result<T, Error>;

/// Protocol constants agreed with the responder
pub mod constants {
    /// Literal prefix the responder dispatches on
    pub const COMMAND_TAG: &str = "inclusionProof,";

    /// Key of the single field in the request wrapper object
    pub const WRAPPER_FIELD: &str = "identityCommitment";

    /// Default recipient address (base64)
    pub const DEFAULT_RECIPIENT_ID: &str = "uIllxXDkCOHgqONA7BjDPRPQ6nRG2X6nafenDHJUracD";

    /// Default recipient public key (base64)
    pub const DEFAULT_RECIPIENT_PUBLIC_KEY: &str = "fUkOFf4ys1TI42OcA4pn8cqlWagRIfMGcXmJIRR69/E=";

    /// Base URL for round-tracking links
    pub const DEFAULT_ROUND_DASHBOARD_URL: &str = "https://dashboard.xx.network/rounds";

    /// Timeout handed to the transport's network follower
    pub const DEFAULT_FOLLOWER_TIMEOUT_MS: u64 = 10_000;

    /// How long the transport may wait for the network to become healthy
    pub const DEFAULT_NETWORK_WAIT_MS: u64 = 30_000;
}
