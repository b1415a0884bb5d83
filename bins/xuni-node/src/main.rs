//! Xuni full node binary.
//!
//! Opens the ledger under the data directory, seeds it with the genesis block
//! when empty, verifies stored blocks against the checkpoints and keeps the
//! ledger open until Ctrl+C. The index cache is written on shutdown.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use xuni_consensus::CheckpointTable;
use xuni_core::constants::NetworkType;
use xuni_core::crypto::RistrettoOracle;
use xuni_core::currency::Currency;
use xuni_core::genesis::genesis_block;
use xuni_node_lib::{Ledger, NodeConfig};
use tracing::{error, info, warn};

/// Xuni full node.
#[derive(Parser, Debug)]
#[command(name = "xuni-node", version, about = "Xuni full node ledger with RocksDB block storage")]
struct Args {
    /// TOML configuration file. Command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the block log and index cache
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Extra checkpoints, one `height,hash` pair per line
    #[arg(long)]
    checkpoints_file: Option<PathBuf>,

    /// Use the public test network instead of mainnet.
    #[arg(long)]
    testnet: bool,

    /// Ignore the index cache and rebuild the indices from the block log.
    #[arg(long)]
    rebuild: bool,

    /// Do not write the index cache on shutdown.
    #[arg(long)]
    no_save_cache: bool,
}

impl Args {
    /// Layer the command line over the file and environment configuration.
    fn into_config(self) -> Result<(NodeConfig, bool), config::ConfigError> {
        let mut config = NodeConfig::load(self.config.as_deref())?;
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if self.checkpoints_file.is_some() {
            config.checkpoints_file = self.checkpoints_file;
        }
        if self.testnet {
            config.network = NetworkType::Testnet;
        }
        if self.rebuild {
            config.load_cache = false;
        }
        if self.no_save_cache {
            config.save_cache_on_shutdown = false;
        }
        Ok((config, self.rebuild))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, rebuild) = match args.into_config() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            process::exit(1);
        }
    };

    init_logging(&config.log_level, &config.log_format);

    info!("Xuni Full Node v{}", env!("CARGO_PKG_VERSION"));
    info!(network = ?config.network, data_dir = %config.data_dir.display(), "starting");

    let mut checkpoints = match CheckpointTable::for_network(config.network) {
        Ok(table) => table,
        Err(e) => {
            error!(error = %e, "invalid compiled checkpoints");
            process::exit(1);
        }
    };
    if let Some(path) = &config.checkpoints_file {
        match checkpoints.load_from_file(path) {
            Ok(added) => info!(path = %path.display(), added, "loaded checkpoints"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to load checkpoints");
                process::exit(1);
            }
        }
    }

    if rebuild {
        warn!("ignoring index cache, indices will be rebuilt from the block log");
    }

    let currency = Currency::new(config.network);
    let genesis = genesis_block(&currency);
    let ledger = match Ledger::open(&config, currency, checkpoints, Arc::new(RistrettoOracle)) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "failed to open ledger");
            process::exit(1);
        }
    };

    if ledger.height() == 0 {
        if let Err(e) = ledger.append_block(&genesis) {
            error!(error = %e, "failed to add genesis block");
            process::exit(1);
        }
    } else if ledger.block(0).as_ref() != Some(&genesis) {
        error!("stored genesis block does not match this network");
        process::exit(1);
    }

    match ledger.verify_checkpoints() {
        Ok(Some(height)) => info!(height, "last verified checkpoint"),
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "checkpoint verification failed");
            process::exit(1);
        }
    }
    if let Some(tip) = ledger.tip() {
        info!(height = tip.height, hash = %tip.hash, cache = ?ledger.cache_status(), "chain tip");
    }
    info!("Xuni node running (Ctrl+C to stop)");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
    }
    info!("shutdown signal received");

    if let Err(e) = ledger.close() {
        error!(error = %e, "failed to close ledger cleanly");
        process::exit(1);
    }
    info!("Xuni node shutdown complete");
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
