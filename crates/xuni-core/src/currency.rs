//! Currency policy: emission, block size growth, unlock rules and deposits.
//!
//! The base reward starts at [`START_BLOCK_REWARD`] and grows by
//! [`REWARD_INCREMENT`] every [`REWARD_INCREASE_INTERVAL`] blocks until it
//! reaches [`MAX_BLOCK_REWARD`]. It never exceeds the supply left under
//! [`MONEY_SUPPLY`].
//!
//! Blocks above the median size of the last `CRYPTONOTE_REWARD_BLOCKS_WINDOW`
//! blocks pay a quadratic penalty:
//!
//! ```text
//! reward = base * (2*median - size) * size / median^2
//! ```
//!
//! Blocks larger than twice the median earn nothing and are invalid.

use crate::constants::{
    BLOCK_MAJOR_VERSION_1, BLOCK_MAJOR_VERSION_2, BLOCK_MAJOR_VERSION_3,
    CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE, CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS,
    CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS, CRYPTONOTE_MAX_BLOCK_NUMBER,
    CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW, DEPOSIT_MAX_TERM, DEPOSIT_MAX_TOTAL_RATE,
    DEPOSIT_MIN_AMOUNT, DEPOSIT_MIN_TERM, GENESIS_TIMESTAMP, MAX_BLOCK_REWARD,
    MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR, MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR,
    MAX_BLOCK_SIZE_INITIAL, MONEY_SUPPLY, NetworkType, REWARD_INCREASE_INTERVAL, REWARD_INCREMENT,
    START_BLOCK_REWARD, TRANSACTION_VERSION_1, TRANSACTION_VERSION_2, UPGRADE_HEIGHT_V2,
    UPGRADE_HEIGHT_V3,
};

/// Reward granted to a block and the part of it that is newly minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReward {
    /// Maximum total the coinbase may pay out (penalized base + fees).
    pub reward: u64,
    /// Penalized base reward: the amount added to the generated supply.
    pub emission: u64,
}

/// Network-wide monetary and versioning parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub network: NetworkType,
    pub upgrade_height_v2: u32,
    pub upgrade_height_v3: u32,
    pub genesis_timestamp: u64,
}

impl Default for Currency {
    fn default() -> Self {
        Self::new(NetworkType::Mainnet)
    }
}

impl Currency {
    pub fn new(network: NetworkType) -> Self {
        Self {
            network,
            upgrade_height_v2: UPGRADE_HEIGHT_V2,
            upgrade_height_v3: UPGRADE_HEIGHT_V3,
            genesis_timestamp: GENESIS_TIMESTAMP,
        }
    }

    /// Major block version required at `height`.
    pub fn block_major_version(&self, height: u32) -> u8 {
        if height >= self.upgrade_height_v3 {
            BLOCK_MAJOR_VERSION_3
        } else if height >= self.upgrade_height_v2 {
            BLOCK_MAJOR_VERSION_2
        } else {
            BLOCK_MAJOR_VERSION_1
        }
    }

    pub fn is_transaction_version_supported(&self, version: u8) -> bool {
        matches!(version, TRANSACTION_VERSION_1 | TRANSACTION_VERSION_2)
    }

    /// Unlock time required of the coinbase at `height`.
    pub fn coinbase_unlock_time(&self, height: u32) -> u64 {
        u64::from(height) + u64::from(CRYPTONOTE_MINED_MONEY_UNLOCK_WINDOW)
    }

    /// Scheduled base reward at `height`, capped by the remaining supply.
    pub fn base_reward(&self, height: u32, already_generated_coins: u64) -> u64 {
        let increments = u64::from(height) / REWARD_INCREASE_INTERVAL;
        let scheduled = increments
            .saturating_mul(REWARD_INCREMENT)
            .saturating_add(START_BLOCK_REWARD)
            .min(MAX_BLOCK_REWARD);
        scheduled.min(MONEY_SUPPLY.saturating_sub(already_generated_coins))
    }

    /// Reward for a block of `block_size` bytes carrying `fee` in fees.
    ///
    /// Returns `None` when the block exceeds twice the effective median.
    pub fn block_reward(
        &self,
        height: u32,
        median_size: u64,
        block_size: u64,
        already_generated_coins: u64,
        fee: u64,
    ) -> Option<BlockReward> {
        let median = median_size.max(CRYPTONOTE_BLOCK_GRANTED_FULL_REWARD_ZONE);
        if block_size > median.saturating_mul(2) {
            return None;
        }
        let base = self.base_reward(height, already_generated_coins);
        let emission = penalized_amount(base, median, block_size);
        Some(BlockReward { reward: emission.checked_add(fee)?, emission })
    }

    /// Largest cumulative block size permitted at `height`.
    pub fn max_block_cumulative_size(&self, height: u32) -> u64 {
        let growth = u128::from(height) * u128::from(MAX_BLOCK_SIZE_GROWTH_SPEED_NUMERATOR)
            / u128::from(MAX_BLOCK_SIZE_GROWTH_SPEED_DENOMINATOR);
        MAX_BLOCK_SIZE_INITIAL.saturating_add(u64::try_from(growth).unwrap_or(u64::MAX))
    }

    /// Whether an output with `unlock_time` may be spent by a transaction in
    /// the block at `height`, given the timestamp of the current tip.
    pub fn is_unlocked(&self, unlock_time: u64, height: u32, tip_timestamp: u64) -> bool {
        if unlock_time < CRYPTONOTE_MAX_BLOCK_NUMBER {
            u64::from(height).saturating_sub(1) + CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_BLOCKS
                >= unlock_time
        } else {
            tip_timestamp.saturating_add(CRYPTONOTE_LOCKED_TX_ALLOWED_DELTA_SECONDS) >= unlock_time
        }
    }

    /// Whether `(amount, term)` is an admissible deposit.
    pub fn is_valid_deposit(&self, amount: u64, term: u32) -> bool {
        (DEPOSIT_MIN_TERM..=DEPOSIT_MAX_TERM).contains(&term) && amount >= DEPOSIT_MIN_AMOUNT
    }

    /// Interest owed on a deposit of `amount` locked for `term` blocks.
    pub fn calculate_interest(&self, amount: u64, term: u32) -> u64 {
        let interest = u128::from(amount) * u128::from(term) * u128::from(DEPOSIT_MAX_TOTAL_RATE)
            / (100 * u128::from(DEPOSIT_MAX_TERM));
        u64::try_from(interest).unwrap_or(u64::MAX)
    }
}

/// Apply the quadratic oversize penalty to `amount`.
pub fn penalized_amount(amount: u64, median_size: u64, block_size: u64) -> u64 {
    if block_size <= median_size || median_size == 0 {
        return amount;
    }
    if block_size >= median_size.saturating_mul(2) {
        return 0;
    }
    let multiplicand = u128::from(block_size) * u128::from(2 * median_size - block_size);
    let penalized = u128::from(amount) * multiplicand / (u128::from(median_size) * u128::from(median_size));
    u64::try_from(penalized).unwrap_or(amount)
}

/// Median of a set of values. Zero for an empty set.
pub fn median(mut values: Vec<u64>) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        values[mid - 1] / 2 + values[mid] / 2 + (values[mid - 1] % 2 + values[mid] % 2) / 2
    }
}
