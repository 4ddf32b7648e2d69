use std::sync::Arc;
use std::time::Duration;

use eyre::Context;
use peer_agent::{
    Agent, BlockchainProvider, Crypto, InMemoryAddressBook, LocalKeyPair, Locator, NetworkConfig,
    PeerAddress, Protocol, ProtocolMask, Services, TcpChannel,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::NodeConfig;

/// The limit of time to wait for the node to shut down.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// This node's local identity: its keypair and the self-address it advertises in the
/// handshake. Implements [`NetworkConfig`] so it can be handed straight to an [`Agent`].
struct Identity {
    keys: LocalKeyPair,
    self_address: PeerAddress,
}

impl Identity {
    fn new(keys: LocalKeyPair, listen_address: std::net::SocketAddr) -> Self {
        let self_address = PeerAddress::new_signed(
            &keys,
            Protocol::WebSocket,
            Locator::Socket(listen_address),
            Services::NONE,
            0,
            0,
            false,
        );

        Self { keys, self_address }
    }
}

impl NetworkConfig for Identity {
    fn peer_address(&self) -> PeerAddress {
        self.self_address.clone()
    }

    fn crypto(&self) -> &dyn Crypto {
        &self.keys
    }

    fn protocol_mask(&self) -> ProtocolMask {
        ProtocolMask::ALL
    }

    fn accepted_services(&self) -> Services {
        Services::NONE
    }
}

/// Stands in for the real chain tip until the node is wired to an indexer. Peers never see
/// this node reject a version over genesis: the head hash carried in `version` is advisory,
/// not itself validated.
struct EmptyChain;

impl BlockchainProvider for EmptyChain {
    fn head_hash(&self) -> [u8; 32] {
        [0; 32]
    }
}

/// Encapsulates node service startup: binds the listener, dials bootnodes, and spawns one
/// [`Agent`] per connection.
pub struct Node {
    config: NodeConfig,
    identity: Arc<Identity>,
    blockchain: Arc<EmptyChain>,
    address_book: Arc<InMemoryAddressBook>,

    cancelation: CancellationToken,
    pub(crate) task_tracker: TaskTracker,
}

impl Node {
    pub async fn new(config: NodeConfig) -> eyre::Result<Self> {
        let listen_address = config.p2p.listen_address()?;

        let keys = match &config.p2p.secret_key {
            Some(hex_key) => {
                let bytes = hex::decode(hex_key).wrap_err("secret_key must be hex-encoded")?;
                let secret_key = bitcoin::secp256k1::SecretKey::from_slice(&bytes)
                    .wrap_err("invalid secp256k1 secret key")?;
                LocalKeyPair::new(secret_key)
            }
            None => {
                warn!("no secret_key configured, generating an ephemeral identity");
                LocalKeyPair::generate()
            }
        };

        Ok(Self {
            identity: Arc::new(Identity::new(keys, listen_address)),
            blockchain: Arc::new(EmptyChain),
            address_book: Arc::new(InMemoryAddressBook::new()),
            config,
            cancelation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// Wait for the signal that the node should shut down.
    pub async fn cancelled(&self) {
        self.cancelation.cancelled().await
    }

    pub async fn run(&self) -> eyre::Result<()> {
        let listen_address = self.config.p2p.listen_address()?;
        let listener = TcpListener::bind(listen_address)
            .await
            .wrap_err_with(|| format!("failed to bind {listen_address}"))?;
        info!(%listen_address, "listening for inbound peer connections");

        self.task_tracker.spawn(self.clone_handles().accept_loop(listener));

        for bootnode in self.config.p2p.bootnode_addresses()? {
            self.task_tracker.spawn(self.clone_handles().dial(bootnode));
        }

        self.task_tracker.close();

        Ok(())
    }

    fn clone_handles(&self) -> NodeHandles {
        NodeHandles {
            genesis_hash: self.config.genesis_hash.0,
            identity: self.identity.clone(),
            blockchain: self.blockchain.clone(),
            address_book: self.address_book.clone(),
            cancelation: self.cancelation.clone(),
        }
    }

    pub async fn shutdown(&self) {
        info!("shutting down node, finishing in-flight connections...");

        self.cancelation.cancel();

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        select! {
            _ = self.task_tracker.wait() => {},
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("shutdown timeout reached, exiting...");
            },
        }
    }
}

/// The handles a spawned connection task needs; cloned out of [`Node`] rather than borrowed
/// so accepted connections can outlive the call that spawned them.
#[derive(Clone)]
struct NodeHandles {
    genesis_hash: [u8; 32],
    identity: Arc<Identity>,
    blockchain: Arc<EmptyChain>,
    address_book: Arc<InMemoryAddressBook>,
    cancelation: CancellationToken,
}

impl NodeHandles {
    async fn accept_loop(self, listener: TcpListener) {
        loop {
            select! {
                _ = self.cancelation.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            info!(%remote, "accepted inbound connection");
                            tokio::spawn(self.clone().serve(stream, None));
                        }
                        Err(err) => {
                            error!(%err, "failed to accept inbound connection");
                        }
                    }
                }
            }
        }
    }

    async fn dial(self, address: std::net::SocketAddr) {
        match TcpStream::connect(address).await {
            Ok(stream) => {
                info!(%address, "connected to bootnode");
                tokio::spawn(self.serve(stream, None));
            }
            Err(err) => {
                warn!(%address, %err, "failed to connect to bootnode");
            }
        }
    }

    async fn serve(self, stream: TcpStream, peer_address: Option<PeerAddress>) {
        let (channel, inbox) = TcpChannel::split(stream, peer_address, self.genesis_hash);
        let (agent, mut events) = Agent::new(
            channel,
            self.blockchain.clone(),
            self.address_book.clone(),
            self.identity.clone(),
            self.genesis_hash,
        );

        tokio::spawn(async move { while events.recv().await.is_some() {} });

        agent.run(inbox).await;
    }
}
