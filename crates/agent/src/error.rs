//! Error types and the agent's channel-close reason codes.
use std::fmt;

/// Reasons the agent closes its channel, wire-visible and must match across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SendingOfVersionMessageFailed,
    VersionTimeout,
    VerackTimeout,
    IncompatibleVersion,
    DifferentGenesisBlock,
    InvalidPeerAddressInVersionMessage,
    UnexpectedPeerAddressInVersionMessage,
    InvalidPublicKeyInVerackMessage,
    InvalidSignatureInVerackMessage,
    AddrMessageTooLarge,
    RateLimitExceeded,
    InvalidAddr,
    AddrNotGloballyReachable,
    SendingPingMessageFailed,
    PingTimeout,
    /// The local side asked the agent to stop (e.g. the supervisor is shutting down).
    Command,
}

impl CloseReason {
    /// The wire code, as it would appear in a `close` frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SendingOfVersionMessageFailed => "SENDING_OF_VERSION_MESSAGE_FAILED",
            Self::VersionTimeout => "VERSION_TIMEOUT",
            Self::VerackTimeout => "VERACK_TIMEOUT",
            Self::IncompatibleVersion => "INCOMPATIBLE_VERSION",
            Self::DifferentGenesisBlock => "DIFFERENT_GENESIS_BLOCK",
            Self::InvalidPeerAddressInVersionMessage => "INVALID_PEER_ADDRESS_IN_VERSION_MESSAGE",
            Self::UnexpectedPeerAddressInVersionMessage => {
                "UNEXPECTED_PEER_ADDRESS_IN_VERSION_MESSAGE"
            }
            Self::InvalidPublicKeyInVerackMessage => "INVALID_PUBLIC_KEY_IN_VERACK_MESSAGE",
            Self::InvalidSignatureInVerackMessage => "INVALID_SIGNATURE_IN_VERACK_MESSAGE",
            Self::AddrMessageTooLarge => "ADDR_MESSAGE_TOO_LARGE",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidAddr => "INVALID_ADDR",
            Self::AddrNotGloballyReachable => "ADDR_NOT_GLOBALLY_REACHABLE",
            Self::SendingPingMessageFailed => "SENDING_PING_MESSAGE_FAILED",
            Self::PingTimeout => "PING_TIMEOUT",
            Self::Command => "COMMAND",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by the ambient stack around the agent: codec, crypto, and config
/// boundaries that aren't protocol violations by the remote peer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to encode wire message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode wire message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("signature error: {0}")]
    Signature(#[from] bitcoin::secp256k1::Error),

    #[error("channel closed while sending {0}")]
    ChannelClosed(&'static str),
}
