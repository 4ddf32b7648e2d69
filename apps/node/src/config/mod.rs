use config::Config;
use serde::Deserialize;

use std::path::PathBuf;

mod p2p;
pub use p2p::P2pConfig;

mod logger;
pub use logger::LoggerConfig;

/// A fixed-size hash identifying which chain this overlay is relaying for. Peers that
/// disagree close the connection (§4.1's genesis-hash check).
#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct GenesisHash(pub [u8; 32]);

impl TryFrom<String> for GenesisHash {
    type Error = eyre::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = hex::decode(value.trim_start_matches("0x"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| eyre::eyre!("genesis hash must be 32 bytes"))?;
        Ok(GenesisHash(array))
    }
}

impl Default for GenesisHash {
    fn default() -> Self {
        GenesisHash([0; 32])
    }
}

#[derive(Deserialize)]
pub struct NodeConfig {
    pub p2p: P2pConfig,

    #[serde(default)]
    pub genesis_hash: GenesisHash,

    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    #[serde(default)]
    pub logger: LoggerConfig,
}

impl NodeConfig {
    pub fn from_path(path: PathBuf) -> eyre::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
