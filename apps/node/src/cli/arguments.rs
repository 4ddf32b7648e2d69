use std::path::PathBuf;

use clap::Args;

/// Run the peer agent node, listening for and dialing peer connections per the given config.
#[derive(Args)]
pub struct Run {
    /// Path to the node's TOML config file.
    #[clap(short, long)]
    pub config: PathBuf,
}
