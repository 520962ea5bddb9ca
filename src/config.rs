//! TOML configuration file support.
//!
//! Config is loaded from the --config path; CLI flags override file values.
//! Missing file means defaults everywhere.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub miner: MinerSection,
    #[serde(default)]
    pub mempool: MempoolSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub data_dir: String,
    /// Network to join: "main", "test" or "regtest".
    pub network: String,
    pub log_level: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            data_dir: "./data/node".into(),
            network: "main".into(),
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerSection {
    /// Run the producer thread.
    pub enabled: bool,
    /// Largest block to assemble (bytes); clamped to
    /// [1000, MAX_BLOCK_SIZE - 1000] at use.
    pub block_max_size: u64,
    /// Bytes reserved for high-priority transactions regardless of fee.
    pub block_priority_size: u64,
    /// Below this size the block is filled with free transactions too.
    pub block_min_size: u64,
    /// Look-back window for the fuel-rate controller; at least 1.
    pub blocksize_for_burn: u64,
    /// Keep producing even when the tip looks stale.
    pub gen_block_force: bool,
}

impl Default for MinerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            block_max_size: 2_000_000,
            block_priority_size: 27_000,
            block_min_size: 0,
            blocksize_for_burn: 100,
            gen_block_force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSection {
    pub capacity: usize,
    pub max_tx_size: u64,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self { capacity: 100_000, max_tx_size: 100_000 }
    }
}

impl NodeConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        let cfg: NodeConfig = toml::from_str(&s)?;
        Ok(cfg)
    }

    pub fn example_toml() -> &'static str {
        r#"# VELD node configuration
# All values shown are defaults.

[node]
data_dir  = "./data/node1"
network   = "main"        # main | test | regtest
log_level = "info"        # trace | debug | info | warn | error

[miner]
enabled             = true
block_max_size      = 2000000   # assembly ceiling (bytes)
block_priority_size = 27000     # bytes reserved for high-priority txs
block_min_size      = 0         # free txs admitted below this size
blocksize_for_burn  = 100       # fuel controller window (blocks)
gen_block_force     = false     # bypass the stale-tip liveness gate

[mempool]
capacity    = 100000
max_tx_size = 100000
"#
    }

    pub fn write_example(path: &str) -> std::io::Result<()> {
        std::fs::write(path, Self::example_toml())
    }
}
