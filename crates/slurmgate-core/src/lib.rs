//! slurmgate-core: shared library for the slurmgate session gateway.
//!
//! Provides the error type, HMAC bearer tokens, the allocation request and
//! its argument builder, JSON message bodies, and the framed transport traits
//! used by the duplex bridge.

pub mod alloc;
pub mod error;
pub mod messages;
pub mod token;
pub mod transport;

// Re-export commonly used items at crate root.
pub use alloc::AllocRequest;
pub use error::{GateError, GateResult};
pub use messages::{CreateSessionResponse, ErrorBody, ExitState, SessionKind, SessionSummary};
pub use token::{create_token, generate_secret, verify_token};
pub use transport::{FrameFuture, FrameSink, FrameSource};
