//! External collaborator interfaces (§6): everything the agent consumes but does not own.
use async_trait::async_trait;

use crate::address::{PeerAddress, Services};
use crate::crypto::{ChallengeNonce, Crypto, PeerId, Signature};
use crate::error::CloseReason;
use crate::time::LocalTime;

/// Bitmask selecting which `Protocol` variants a query or relay is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolMask(pub u8);

impl ProtocolMask {
    pub const WEB_SOCKET: ProtocolMask = ProtocolMask(0b001);
    pub const WEB_RTC: ProtocolMask = ProtocolMask(0b010);
    pub const DUMB: ProtocolMask = ProtocolMask(0b100);
    pub const ALL: ProtocolMask = ProtocolMask(0b111);

    pub fn contains(&self, protocol: crate::address::Protocol) -> bool {
        let bit = match protocol {
            crate::address::Protocol::WebSocket => Self::WEB_SOCKET.0,
            crate::address::Protocol::WebRtc => Self::WEB_RTC.0,
            crate::address::Protocol::Dumb => Self::DUMB.0,
        };
        self.0 & bit != 0
    }
}

/// Supplies the current chain head hash. Out of scope per the spec; the agent only reads it.
pub trait BlockchainProvider: Send + Sync {
    /// Fixed-size hash of the locally-known chain head.
    fn head_hash(&self) -> [u8; 32];
}

/// Stores, queries, and ages peer-address records. Accessed concurrently by many agents;
/// implementations must provide their own internal consistency (the agent treats it as a
/// read-mostly oracle plus an `add` sink).
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Look up a single address by peer id.
    async fn get(&self, peer_id: &PeerId) -> Option<PeerAddress>;

    /// Query addresses matching a protocol/service mask, capped at `max`.
    async fn query(&self, protocols: ProtocolMask, services: Services, max: usize) -> Vec<PeerAddress>;

    /// Record freshly learned addresses, attributing them to `source`.
    async fn add(&self, source: PeerId, addresses: Vec<PeerAddress>);
}

/// Local identity and policy: keypair, self address, and the protocol/service masks this
/// node advertises and accepts.
pub trait NetworkConfig: Send + Sync {
    /// This node's own, self-signed peer address.
    fn peer_address(&self) -> PeerAddress;

    /// Local keypair / signing and verification primitives.
    fn crypto(&self) -> &dyn Crypto;

    /// Protocol mask advertised in `getAddr` requests.
    fn protocol_mask(&self) -> ProtocolMask;

    /// Services this node accepts from peers it relays/queries for.
    fn accepted_services(&self) -> Services;
}

/// One logical connection to a remote peer. The agent treats it as an async message port:
/// emit methods attempt to write a frame and report whether the write succeeded; the event
/// stream (delivered externally, see [`crate::fsm::agent::Agent::run`]) carries inbound frames.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait Channel: Send + Sync {
    /// The peer address this channel expects to be talking to, if known in advance
    /// (populated for outbound connections; `None` for inbound until the handshake learns
    /// it).
    fn peer_address(&self) -> Option<PeerAddress>;

    /// Record a (possibly enriched) peer address once it's learned or confirmed.
    fn set_peer_address(&self, address: PeerAddress);

    /// Whether the underlying transport has been torn down.
    fn is_closed(&self) -> bool;

    /// Local time the last inbound frame was received on this channel.
    fn last_message_received_at(&self) -> LocalTime;

    async fn send_version(&self, self_address: &PeerAddress, head_hash: [u8; 32], nonce: ChallengeNonce) -> bool;
    async fn send_verack(&self, public_key: bitcoin::secp256k1::PublicKey, signature: Signature) -> bool;
    async fn send_addr(&self, addresses: Vec<PeerAddress>) -> bool;
    async fn send_get_addr(&self, protocols: ProtocolMask, services: Services) -> bool;
    async fn send_ping(&self, nonce: u32) -> bool;
    async fn send_pong(&self, nonce: u32) -> bool;
    async fn send_reject(&self, message_type: &str, code: &str, reason: &str);

    /// Best-effort teardown notice, then close the transport. Idempotent.
    async fn close(&self, code: CloseReason, reason: &str);
}
