//! A per-peer handshake, address-relay, and liveness agent for a P2P overlay network.
//!
//! One [`fsm::Agent`] is spawned per connection; it owns that connection's handshake state,
//! its outbound address relay queue, and its ping/pong liveness timers, and is driven by
//! [`fsm::Agent::run`] until the channel closes. Everything the agent needs from the outside
//! world — the transport, the address book, the chain head, local identity — is reached
//! through the traits in [`traits`], so the FSM itself has no knowledge of sockets or storage.
pub mod address;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod events;
pub mod fsm;
pub mod memory;
pub mod time;
pub mod traits;
pub mod wire;

pub use address::{KnownAddress, Locator, PeerAddress, Protocol, Services};
pub use crypto::{Crypto, LocalKeyPair, PeerId, Signature};
pub use error::{CloseReason, Error};
pub use events::{AgentEvent, InboundFrame, Peer};
pub use fsm::{Agent, HandshakeState};
pub use memory::InMemoryAddressBook;
pub use traits::{AddressBook, BlockchainProvider, Channel, NetworkConfig, ProtocolMask};
pub use wire::TcpChannel;
