//! A real TCP loopback handshake between two agents talking the `TcpChannel` wire codec.
//! The client dials with the server's address known in advance (outbound); the server
//! accepts blind (inbound) and verifies the client's identity only once its verack arrives,
//! per the "inbound handshake, deferred verification" scenario.
use peer_agent::{
    Agent, AgentEvent, BlockchainProvider, Crypto, InMemoryAddressBook, LocalKeyPair, Locator,
    NetworkConfig, PeerAddress, Protocol, ProtocolMask, Services, TcpChannel,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;

struct FixedChain([u8; 32]);

impl BlockchainProvider for FixedChain {
    fn head_hash(&self) -> [u8; 32] {
        self.0
    }
}

struct Identity(LocalKeyPair, PeerAddress);

impl Identity {
    fn new(keys: LocalKeyPair, address: PeerAddress) -> Self {
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

const GENESIS: [u8; 32] = [3; 32];

async fn await_handshake(mut events: tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if matches!(event, AgentEvent::Handshake(_)) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false)
}

#[tokio::test]
async fn two_agents_complete_a_handshake_over_a_real_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listen_addr = listener.local_addr().unwrap();

    let server_keys = LocalKeyPair::generate();
    let server_address = PeerAddress::new_signed(
        &server_keys,
        Protocol::WebSocket,
        Locator::Socket(listen_addr),
        Services::NONE,
        0,
        0,
        false,
    );
    let server_address_for_client = server_address.clone();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        // Inbound: the server doesn't know who's dialing in until the handshake tells it.
        let (channel, inbox) = TcpChannel::split(stream, None, GENESIS);
        let identity = std::sync::Arc::new(Identity::new(server_keys, server_address));
        let (agent, events) = Agent::new(
            channel,
            std::sync::Arc::new(FixedChain([1; 32])),
            std::sync::Arc::new(InMemoryAddressBook::new()),
            identity,
            GENESIS,
        );

        let run = tokio::spawn(agent.run(inbox));
        let handshook = await_handshake(events).await;
        run.abort();
        handshook
    });

    let stream = TcpStream::connect(listen_addr).await.unwrap();
    // Outbound: the client dialed this address on purpose and expects to find the server here.
    let (channel, inbox) = TcpChannel::split(stream, Some(server_address_for_client), GENESIS);
    let client_keys = LocalKeyPair::generate();
    let client_address = PeerAddress::new_signed(
        &client_keys,
        Protocol::WebSocket,
        Locator::Socket("127.0.0.1:0".parse().unwrap()),
        Services::NONE,
        0,
        0,
        false,
    );
    let identity = std::sync::Arc::new(Identity::new(client_keys, client_address));
    let (agent, events) = Agent::new(
        channel,
        std::sync::Arc::new(FixedChain([2; 32])),
        std::sync::Arc::new(InMemoryAddressBook::new()),
        identity,
        GENESIS,
    );

    let run = tokio::spawn(agent.run(inbox));
    let client_handshook = await_handshake(events).await;
    run.abort();
    let server_handshook = server.await.unwrap();

    assert!(client_handshook, "client side never reached handshake");
    assert!(server_handshook, "server side never reached handshake");
}
