//! End-to-end handshake scenarios, driving an `Agent` through a fake `Channel` rather than a
//! real socket: the mailbox the agent consumes and the frames it would have written are both
//! directly observable.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use peer_agent::{
    Agent, AgentEvent, BlockchainProvider, Channel, CloseReason, Crypto, InMemoryAddressBook,
    InboundFrame, Locator, LocalKeyPair, NetworkConfig, PeerAddress, Protocol, ProtocolMask,
    Services, Signature,
};
use tokio::sync::mpsc;
use tokio::time::Duration;

struct RecordingChannel {
    sent: Mutex<Vec<&'static str>>,
    peer_address: Mutex<Option<PeerAddress>>,
    closed: AtomicBool,
    fail_version: AtomicBool,
}

impl RecordingChannel {
    fn new(peer_address: Option<PeerAddress>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            peer_address: Mutex::new(peer_address),
            closed: AtomicBool::new(false),
            fail_version: AtomicBool::new(false),
        }
    }

    fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn peer_address(&self) -> Option<PeerAddress> {
        self.peer_address.lock().unwrap().clone()
    }

    fn set_peer_address(&self, address: PeerAddress) {
        *self.peer_address.lock().unwrap() = Some(address);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn last_message_received_at(&self) -> peer_agent::time::LocalTime {
        peer_agent::time::LocalTime::now()
    }

    async fn send_version(&self, _: &PeerAddress, _: [u8; 32], _: [u8; 32]) -> bool {
        if self.fail_version.load(Ordering::Acquire) {
            return false;
        }
        self.sent.lock().unwrap().push("version");
        true
    }

    async fn send_verack(&self, _: bitcoin::secp256k1::PublicKey, _: Signature) -> bool {
        self.sent.lock().unwrap().push("verack");
        true
    }

    async fn send_addr(&self, _: Vec<PeerAddress>) -> bool {
        self.sent.lock().unwrap().push("addr");
        true
    }

    async fn send_get_addr(&self, _: ProtocolMask, _: Services) -> bool {
        self.sent.lock().unwrap().push("get-addr");
        true
    }

    async fn send_ping(&self, _: u32) -> bool {
        self.sent.lock().unwrap().push("ping");
        true
    }

    async fn send_pong(&self, _: u32) -> bool {
        self.sent.lock().unwrap().push("pong");
        true
    }

    async fn send_reject(&self, _: &str, _: &str, _: &str) {
        self.sent.lock().unwrap().push("reject");
    }

    async fn close(&self, _: CloseReason, _: &str) {
        self.closed.store(true, Ordering::Release);
        self.sent.lock().unwrap().push("close");
    }
}

struct FixedChain;

impl BlockchainProvider for FixedChain {
    fn head_hash(&self) -> [u8; 32] {
        [7; 32]
    }
}

struct Identity(LocalKeyPair, PeerAddress);

impl Identity {
    fn new() -> Self {
        let keys = LocalKeyPair::generate();
        let address = PeerAddress::new_signed(
            &keys,
            Protocol::WebSocket,
            Locator::Socket("127.0.0.1:9001".parse().unwrap()),
            Services::NONE,
            0,
            0,
            false,
        );
        Self(keys, address)
    }
}

impl NetworkConfig for Identity {
    fn peer_address(&self) -> PeerAddress {
        self.1.clone()
    }

    fn crypto(&self) -> &dyn Crypto {
        &self.0
    }

    fn protocol_mask(&self) -> ProtocolMask {
        ProtocolMask::ALL
    }

    fn accepted_services(&self) -> Services {
        Services::NONE
    }
}

const GENESIS: [u8; 32] = [1; 32];

fn remote_identity() -> (LocalKeyPair, PeerAddress) {
    let keys = LocalKeyPair::generate();
    let address = PeerAddress::new_signed(
        &keys,
        Protocol::WebSocket,
        Locator::Socket("127.0.0.1:9002".parse().unwrap()),
        Services::NONE,
        0,
        0,
        false,
    );
    (keys, address)
}

#[tokio::test]
async fn outbound_handshake_completes_and_emits_events() {
    let channel = std::sync::Arc::new(RecordingChannel::new(None));
    let blockchain = std::sync::Arc::new(FixedChain);
    let address_book = std::sync::Arc::new(InMemoryAddressBook::new());
    let network = std::sync::Arc::new(Identity::new());

    let (agent, mut events) = Agent::new(channel.clone(), blockchain, address_book, network.clone(), GENESIS);
    let (inbox_tx, inbox_rx) = mpsc::channel(8);

    let handle = tokio::spawn(agent.run(inbox_rx));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(channel.sent_kinds(), vec!["version"]);

    let (remote_keys, remote_address) = remote_identity();
    inbox_tx
        .send(InboundFrame::Version {
            peer_address: remote_address.clone(),
            protocol_version: 1,
            genesis_hash: GENESIS,
            head_hash: [9; 32],
            challenge_nonce: remote_keys.challenge_nonce(),
        })
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("version event")
        .unwrap();
    assert!(matches!(event, AgentEvent::Version(_)));

    drop(inbox_tx);
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(channel.sent_kinds().contains(&"version"));
}

#[tokio::test]
async fn incompatible_version_is_rejected_then_closed() {
    let channel = std::sync::Arc::new(RecordingChannel::new(None));
    let blockchain = std::sync::Arc::new(FixedChain);
    let address_book = std::sync::Arc::new(InMemoryAddressBook::new());
    let network = std::sync::Arc::new(Identity::new());

    let (agent, _events) = Agent::new(channel.clone(), blockchain, address_book, network, GENESIS);
    let (inbox_tx, inbox_rx) = mpsc::channel(8);

    let handle = tokio::spawn(agent.run(inbox_rx));

    let (remote_keys, remote_address) = remote_identity();
    inbox_tx
        .send(InboundFrame::Version {
            peer_address: remote_address,
            protocol_version: 0,
            genesis_hash: GENESIS,
            head_hash: [0; 32],
            challenge_nonce: remote_keys.challenge_nonce(),
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("agent exits after close")
        .unwrap();

    let sent = channel.sent_kinds();
    assert!(sent.contains(&"reject"));
    assert!(sent.contains(&"close"));
    assert!(channel.is_closed());
}

#[tokio::test]
async fn different_genesis_closes_without_reject() {
    let channel = std::sync::Arc::new(RecordingChannel::new(None));
    let blockchain = std::sync::Arc::new(FixedChain);
    let address_book = std::sync::Arc::new(InMemoryAddressBook::new());
    let network = std::sync::Arc::new(Identity::new());

    let (agent, _events) = Agent::new(channel.clone(), blockchain, address_book, network, GENESIS);
    let (inbox_tx, inbox_rx) = mpsc::channel(8);
    let handle = tokio::spawn(agent.run(inbox_rx));

    let (remote_keys, remote_address) = remote_identity();
    inbox_tx
        .send(InboundFrame::Version {
            peer_address: remote_address,
            protocol_version: 1,
            genesis_hash: [2; 32],
            head_hash: [0; 32],
            challenge_nonce: remote_keys.challenge_nonce(),
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("agent exits after close")
        .unwrap();

    assert!(channel.is_closed());
    assert!(!channel.sent_kinds().contains(&"reject"));
}

#[tokio::test]
async fn inbound_close_command_shuts_the_agent_down() {
    let channel = std::sync::Arc::new(RecordingChannel::new(None));
    let blockchain = std::sync::Arc::new(FixedChain);
    let address_book = std::sync::Arc::new(InMemoryAddressBook::new());
    let network = std::sync::Arc::new(Identity::new());

    let (agent, _events) = Agent::new(channel.clone(), blockchain, address_book, network, GENESIS);
    let (inbox_tx, inbox_rx) = mpsc::channel(8);
    let handle = tokio::spawn(agent.run(inbox_rx));

    inbox_tx.send(InboundFrame::Close).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("agent exits after close")
        .unwrap();

    assert!(channel.is_closed());
}
