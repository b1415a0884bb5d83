//! Node configuration.
//!
//! [`NodeConfig`] holds the data directory, network selection, logging and
//! ledger persistence switches. [`NodeConfig::load`] layers an optional TOML
//! file and `XUNI_*` environment variables over the defaults.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use xuni_core::constants::{CRYPTONOTE_BLOCKS_DIRNAME, CRYPTONOTE_BLOCKSCACHE_FILENAME, NetworkType};

/// Configuration for a full node instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data. Each network uses a subdirectory.
    pub data_dir: PathBuf,
    pub network: NetworkType,
    /// Log level filter string (e.g. "info", "debug", "xuni_node_lib=trace").
    pub log_level: String,
    /// Log output format: "text" or "json".
    pub log_format: String,
    /// Extra `height,hash` checkpoints loaded on top of the compiled-in list.
    pub checkpoints_file: Option<PathBuf>,
    /// Seed the indices from the cache file instead of replaying the block log.
    pub load_cache: bool,
    pub save_cache_on_shutdown: bool,
    /// Fsync every block append.
    pub sync_writes: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xuni");

        Self {
            data_dir,
            network: NetworkType::Mainnet,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            checkpoints_file: None,
            load_cache: true,
            save_cache_on_shutdown: true,
            sync_writes: false,
        }
    }
}

impl NodeConfig {
    /// Defaults, overridden by `path` (if given) and then by `XUNI_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(Environment::with_prefix("XUNI").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Directory of the selected network.
    pub fn network_dir(&self) -> PathBuf {
        self.data_dir.join(self.network.data_dir_suffix())
    }

    /// Path to the RocksDB block log.
    pub fn blocks_path(&self) -> PathBuf {
        self.network_dir().join(CRYPTONOTE_BLOCKS_DIRNAME)
    }

    /// Path to the persistent index cache.
    pub fn cache_path(&self) -> PathBuf {
        self.network_dir().join(CRYPTONOTE_BLOCKSCACHE_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_data_dir_ends_with_xuni() {
        let cfg = NodeConfig::default();
        assert!(cfg.data_dir.ends_with("xuni"), "data_dir should end with 'xuni': {:?}", cfg.data_dir);
    }

    #[test]
    fn default_cache_switches() {
        let cfg = NodeConfig::default();
        assert!(cfg.load_cache);
        assert!(cfg.save_cache_on_shutdown);
        assert!(!cfg.sync_writes);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn paths_follow_network() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/xuni-test"),
            network: NetworkType::Testnet,
            ..NodeConfig::default()
        };
        assert_eq!(cfg.blocks_path(), PathBuf::from("/tmp/xuni-test/testnet/blocks.dat"));
        assert_eq!(cfg.cache_path(), PathBuf::from("/tmp/xuni-test/testnet/blockscache.dat"));
    }

    #[test]
    fn load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xuni.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "data_dir = \"/srv/xuni\"").unwrap();
        writeln!(file, "network = \"testnet\"").unwrap();
        writeln!(file, "load_cache = false").unwrap();
        drop(file);

        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/xuni"));
        assert_eq!(cfg.network, NetworkType::Testnet);
        assert!(!cfg.load_cache);
        assert!(cfg.save_cache_on_shutdown);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(NodeConfig::load(Some(Path::new("/nonexistent/xuni.toml"))).is_err());
    }
}
