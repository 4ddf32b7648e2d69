//! Peer-address records: the signed, gossiped identity of a remote node.
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::crypto::{Crypto, PeerId, Signature};
use crate::time::LocalTime;

/// Hop count bound for WebRTC address propagation.
pub const MAX_DISTANCE: u32 = 3;

/// Transport a peer address is reachable over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    WebSocket,
    WebRtc,
    /// A transport with no return path; such addresses are never relayed.
    Dumb,
}

/// Services a node offers, as a bitmask. Kept as a thin wrapper (rather than the
/// `bitcoin::ServiceFlags` used elsewhere in the workspace) since this overlay's service
/// bits are network-specific, not Bitcoin's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Services(pub u64);

impl Services {
    pub const NONE: Services = Services(0);

    pub fn contains(&self, other: Services) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Network locator for a peer address. WebRTC addresses have no routable socket, only an
/// opaque signalling id, so they're kept distinct from the WebSocket/Dumb case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locator {
    Socket(SocketAddr),
    WebRtcId(String),
}

/// A signed record identifying a remote node: see the "Peer address" glossary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub protocol: Protocol,
    pub locator: Locator,
    pub services: Services,
    /// Hop count in the WebRTC propagation topology; meaningless for other protocols.
    pub distance: u32,
    pub timestamp: u64,
    /// SEC1-encoded public key of the node this address identifies. `peer_id` must be its
    /// hash; carried alongside the signature so a holder of the address alone (without a
    /// live connection to recover the key from) can still verify it.
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub peer_id: [u8; 20],
    /// Bootstrap addresses are never relayed to other peers.
    pub seed: bool,
}

impl PeerAddress {
    /// The bytes that `signature` is computed over.
    fn signed_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match &self.locator {
            Locator::Socket(addr) => buf.extend_from_slice(addr.to_string().as_bytes()),
            Locator::WebRtcId(id) => buf.extend_from_slice(id.as_bytes()),
        }
        buf.extend_from_slice(&self.services.0.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Verify this address's self-signature: the embedded public key must hash to the
    /// declared `peer_id`, and the signature must check out under that key.
    pub fn verify_signature(&self, crypto: &dyn Crypto) -> bool {
        let Ok(public_key) = bitcoin::secp256k1::PublicKey::from_slice(&self.public_key) else {
            return false;
        };
        if crypto.derive_peer_id(&public_key).0 != self.peer_id {
            return false;
        }

        let Ok(sig) = bitcoin::secp256k1::ecdsa::Signature::from_der(&self.signature)
            .or_else(|_| bitcoin::secp256k1::ecdsa::Signature::from_compact(&self.signature))
        else {
            return false;
        };

        crypto.verify(&public_key, &self.signed_payload(), &Signature(sig))
    }

    /// Build and self-sign a peer address with `crypto`'s keypair.
    pub fn new_signed(
        crypto: &dyn Crypto,
        protocol: Protocol,
        locator: Locator,
        services: Services,
        distance: u32,
        timestamp: u64,
        seed: bool,
    ) -> Self {
        let public_key = crypto.public_key();
        let peer_id = crypto.derive_peer_id(&public_key).0;

        let mut address = Self {
            protocol,
            locator,
            services,
            distance,
            timestamp,
            public_key: public_key.serialize().to_vec(),
            signature: Vec::new(),
            peer_id,
            seed,
        };
        address.signature = crypto.sign(&address.signed_payload()).0.serialize_der().to_vec();
        address
    }

    /// Whether this address's network locator is publicly routable.
    pub fn is_globally_reachable(&self) -> bool {
        match &self.locator {
            Locator::Socket(addr) => is_globally_reachable(addr.ip()),
            Locator::WebRtcId(_) => true,
        }
    }

    pub fn is_seed(&self) -> bool {
        self.seed
    }

    /// Peer id, typed.
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.peer_id)
    }
}

fn is_globally_reachable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.is_unspecified())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified() || is_unique_local(&v6)),
    }
}

/// `std::net::Ipv6Addr::is_unique_local` is nightly-only; reimplement the `fc00::/7` check.
fn is_unique_local(addr: &std::net::Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

/// An entry in an agent's `knownAddresses` set: the address plus the local time it was
/// last (re-)inserted, used to throttle relay and to age out stale "known" state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownAddress {
    pub address: PeerAddress,
    pub inserted_at: LocalTime,
}

impl KnownAddress {
    pub fn new(address: PeerAddress, inserted_at: LocalTime) -> Self {
        Self {
            address,
            inserted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn private_and_loopback_addresses_are_not_globally_reachable() {
        assert!(!is_globally_reachable(IpAddr::V4(Ipv4Addr::new(
            192, 168, 1, 1
        ))));
        assert!(!is_globally_reachable(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!is_globally_reachable(IpAddr::V4(Ipv4Addr::new(
            10, 0, 0, 1
        ))));
    }

    #[test]
    fn a_self_signed_address_verifies() {
        use crate::crypto::LocalKeyPair;

        let keys = LocalKeyPair::generate();
        let address = PeerAddress::new_signed(
            &keys,
            Protocol::WebSocket,
            Locator::Socket("203.0.113.1:9000".parse().unwrap()),
            Services::NONE,
            0,
            0,
            false,
        );

        assert!(address.verify_signature(&keys));
    }

    #[test]
    fn tampering_with_the_payload_breaks_verification() {
        use crate::crypto::LocalKeyPair;

        let keys = LocalKeyPair::generate();
        let mut address = PeerAddress::new_signed(
            &keys,
            Protocol::WebSocket,
            Locator::Socket("203.0.113.1:9000".parse().unwrap()),
            Services::NONE,
            0,
            0,
            false,
        );
        address.timestamp = 1;

        assert!(!address.verify_signature(&keys));
    }

    #[test]
    fn public_addresses_are_globally_reachable() {
        assert!(is_globally_reachable(IpAddr::V4(Ipv4Addr::new(
            8, 8, 8, 8
        ))));
    }
}
