//! Reward schedule and circulating supply.
//!
//! The block subsidy starts at [`SUBSIDY`](crate::constants::SUBSIDY) drips
//! and shrinks every [`HALVING_INTERVAL`](crate::constants::HALVING_INTERVAL)
//! blocks by integer division: the reward for epoch `e` is `SUBSIDY / (1 + e)`.
//! Unlike a shift-based halving this decays harmonically, reaching zero only
//! once the divisor exceeds the subsidy itself.

use crate::constants::{HALVING_INTERVAL, SUBSIDY};

/// The mining reward (in drips) for the block at zero-based `height`.
pub fn block_reward(height: u64) -> u64 {
    SUBSIDY / (1 + height / HALVING_INTERVAL)
}

/// Total drips minted by all blocks below `height`.
///
/// Computed per epoch rather than per block: every height in epoch `e`
/// pays the same reward.
pub fn circulating_supply(height: u64) -> u64 {
    let mut total: u64 = 0;
    let mut epoch: u64 = 0;
    loop {
        let start = epoch * HALVING_INTERVAL;
        if start >= height {
            break;
        }
        let reward = SUBSIDY / (1 + epoch);
        if reward == 0 {
            break;
        }
        let end = ((epoch + 1) * HALVING_INTERVAL).min(height);
        total = total.saturating_add(reward.saturating_mul(end - start));
        epoch += 1;
    }
    total
}
