//! The handshake/relay/liveness state machine and its supporting pieces (§4).
pub mod admitter;
pub mod agent;
pub mod relay;

pub use agent::{Agent, HandshakeState};
