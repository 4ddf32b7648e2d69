use std::net::{SocketAddr, ToSocketAddrs};

use eyre::{Context, OptionExt};
use serde::{Deserialize, Serialize};

/// Default number of peers connected to this node.
pub const DEFAULT_MAX_INBOUND_CONNECTIONS: usize = 125;

/// Default number of peers this node connects out to.
pub const DEFAULT_MAX_OUTBOUND_CONNECTIONS: usize = 8;

#[derive(Serialize, Deserialize, Clone)]
pub struct P2pConfig {
    /// Address to listen on for incoming connections.
    pub address: String,
    #[serde(default = "default_max_inbound_connections")]
    pub max_inbound_connections: usize,
    #[serde(default = "default_max_outbound_connections")]
    pub max_outbound_connections: usize,
    /// Peers to dial on startup.
    #[serde(default)]
    pub bootnodes: Vec<String>,
    /// Hex-encoded secp256k1 secret key identifying this node. A fresh key is generated and
    /// logged if omitted; set this to keep a stable peer id across restarts.
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_max_inbound_connections() -> usize {
    DEFAULT_MAX_INBOUND_CONNECTIONS
}

fn default_max_outbound_connections() -> usize {
    DEFAULT_MAX_OUTBOUND_CONNECTIONS
}

impl P2pConfig {
    pub fn listen_address(&self) -> eyre::Result<SocketAddr> {
        self.address
            .to_socket_addrs()
            .wrap_err("failed to resolve listen address")?
            .next()
            .ok_or_eyre("no address found in listen address")
    }

    pub fn bootnode_addresses(&self) -> eyre::Result<Vec<SocketAddr>> {
        self.bootnodes
            .iter()
            .map(|bootnode| {
                bootnode
                    .to_socket_addrs()
                    .wrap_err("failed to resolve bootnode address")
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|resolved| resolved.into_iter().flatten().collect())
    }
}
