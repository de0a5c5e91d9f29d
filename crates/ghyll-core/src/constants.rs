//! Protocol constants. All monetary values in drips (1 GHYLL = 10^8 drips).

pub const COIN: u64 = 100_000_000;

/// Base block subsidy: one hundredth of a coin, in drips.
pub const SUBSIDY: u64 = COIN / 100;

/// Blocks per reward-reduction epoch.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Wire protocol version exchanged in VERSION messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default count of leading zero hex characters a block hash must carry.
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// Well-known port the central hub listens on.
pub const DEFAULT_CENTRAL_PORT: u16 = 7600;

/// Default interval between liveness pings, in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: f64 = 10.0;

/// Upper bound on a single wire envelope.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn subsidy_is_a_centicoin() { assert_eq!(SUBSIDY, 1_000_000); }
    #[test]
    fn halving_matches_bitcoin() { assert_eq!(HALVING_INTERVAL, 210_000); }
}
