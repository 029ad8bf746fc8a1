//! inclusion-rpc: Inclusion-proof queries over an anonymous transport
//!
//! Re-exports the wire types from `inclusion-core` and the request driver
//! from `inclusion-client`.

pub use inclusion_client;
pub use inclusion_core;

pub use inclusion_client::{ClientHandle, RequestSnapshot, RequestState, Transport};
pub use inclusion_core::{classify, validate, ClientConfig, IdentityCommitment, InboundEvent};
