//! Inbound frame events and the agent's observable event stream.
use crate::address::PeerAddress;
use crate::crypto::{ChallengeNonce, PeerId, Signature};
use crate::traits::ProtocolMask;
use bitcoin::secp256k1::PublicKey;

/// One frame arriving on the channel, as delivered by the transport to the agent's mailbox.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Version {
        peer_address: PeerAddress,
        protocol_version: u32,
        genesis_hash: [u8; 32],
        head_hash: [u8; 32],
        challenge_nonce: ChallengeNonce,
    },
    Verack {
        public_key: PublicKey,
        signature: Signature,
    },
    Addr(Vec<PeerAddress>),
    GetAddr {
        protocols: ProtocolMask,
        services: crate::address::Services,
    },
    Ping(u32),
    Pong(u32),
    Close,
}

impl InboundFrame {
    /// The message kind, used by the admitter (§4.2) and in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Version { .. } => "version",
            Self::Verack { .. } => "verack",
            Self::Addr(_) => "addr",
            Self::GetAddr { .. } => "get-addr",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close => "close",
        }
    }
}

/// The negotiated remote peer, constructed once a valid version message has been accepted.
#[derive(Debug, Clone)]
pub struct Peer {
    pub peer_id: PeerId,
    pub protocol_version: u32,
    pub head_hash: [u8; 32],
    /// Remote timestamp minus local timestamp at receipt.
    pub time_offset: i64,
}

/// Events the agent emits to its supervisor. Emission is synchronous within the handler
/// that triggers it, matching the ordering guarantees in §5: `version` before `handshake`,
/// `handshake` before any `addr`/`ping-pong`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// After accepting a remote version message.
    Version(Peer),
    /// Once both verack directions have completed. Fires at most once.
    Handshake(Peer),
    /// After accepting a remote addr batch.
    Addr(Vec<PeerAddress>),
    /// On each valid pong, carrying the round-trip time in milliseconds.
    PingPong(u64),
}
