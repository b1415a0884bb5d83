//! Protocol constants. All monetary values are in atomic units (1 XUNI = 10^6 units).

use serde::{Deserialize, Serialize};

pub const COIN: u64 = 1_000_000;

/// Hard cap on the total amount that can ever be emitted through coinbases.
pub const MONEY_SUPPLY: u64 = 21_000_000 * COIN;

/// Values of `unlock_time` below this are block heights, values at or above
/// it are Unix timestamps.
pub const CRYPTONOTE_MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Number of blocks a coinbase output stays locked. Also the deepest reorg
/// accepted outside the checkpoint zone.
pub const CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW: u32 = 10;

pub const CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;
pub const DIFFICULTY_TARGET: u64 = 120;
pub const CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 =
    DIFFICULTY_TARGET * CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Number of previous timestamps whose median bounds a new block's timestamp.
pub const BLOCKCHAIN_TIMESTAMP_CHECK_WINDOW_V1: usize = 11;
/// Seconds a newly admitted block's timestamp may run ahead of the local clock.
pub const CRYPTONOTE_BLOCK_FUTURE_TIME_LIMIT_V1: u64 = 360;

// --- Block size policy ---

/// Number of recent blocks whose median size drives the reward penalty.
pub const CRYPTONOTE_REWARD_BLOCKS_WINDOW: usize = 100;
/// Block size (bytes) up to which the full reward is always granted.
pub const CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE: u64 = 100_000;
pub const CRYPTONOTE_COINBASE_BLOB_RESERVED_SIZE: u64 = 600;
pub const MAX_BLOCK_SIZE_INITIAL: u64 = CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE * 10;
pub const MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR: u64 = 100 * 1024;
pub const MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR: u64 = 365 * 24 * 60 * 60 / DIFFICULTY_TARGET;

// --- Emission ---

pub const START_BLOCK_REWARD: u64 = 5 * COIN;
pub const MAX_BLOCK_REWARD: u64 = 10 * COIN;
/// Blocks between two reward increments (roughly one month).
pub const REWARD_INCREASE_INTERVAL: u64 = 21_900;
pub const REWARD_INCREMENT: u64 = 400_000;

// --- Deposits ---

pub const DEPOSIT_MIN_AMOUNT: u64 = COIN;
pub const DEPOSIT_MIN_TERM: u32 = 22_000;
pub const DEPOSIT_MAX_TERM: u32 = 12 * 22_000;
/// Interest, in percent, earned by a deposit locked for `DEPOSIT_MAX_TERM`.
pub const DEPOSIT_MAX_TOTAL_RATE: u64 = 3;

// --- Versions ---

pub const TRANSACTION_VERSION_1: u8 = 1;
pub const TRANSACTION_VERSION_2: u8 = 2;
pub const BLOCK_MAJOR_VERSION_1: u8 = 1;
pub const BLOCK_MAJOR_VERSION_2: u8 = 2;
pub const BLOCK_MAJOR_VERSION_3: u8 = 3;
pub const UPGRADE_HEIGHT_V2: u32 = 1;
pub const UPGRADE_HEIGHT_V3: u32 = 2;

// --- Genesis ---

pub const GENESIS_TIMESTAMP: u64 = 1_587_360_548;
pub const GENESIS_NONCE: u32 = 10_000;

// --- Storage ---

pub const CRYPTONOTE_BLOCKS_DIRNAME: &str = "blocks.dat";
pub const CRYPTONOTE_BLOCKSCACHE_FILENAME: &str = "blockscache.dat";

/// Network type: Mainnet or Testnet.
///
/// Selects the data directory suffix and the compiled-in checkpoint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Production network.
    #[default]
    Mainnet,
    /// Public test network without compiled-in checkpoints.
    Testnet,
}

impl NetworkType {
    /// Subdirectory name appended to the base data directory path.
    ///
    /// # Examples
    ///
    /// ```
    /// use xuni_core::constants::NetworkType;
    /// assert_eq!(NetworkType::Testnet.data_dir_suffix(), "testnet");
    /// ```
    pub fn data_dir_suffix(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }
}
