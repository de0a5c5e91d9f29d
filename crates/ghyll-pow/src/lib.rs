//! # ghyll-pow
//! Proof-of-work search and block validation.
//!
//! The difficulty target is a **hex prefix**: a block hash is valid iff its
//! lowercase hex rendering begins with `difficulty` zero characters. The
//! check is performed nibble-wise; no hex string is built in the search loop.
//!
//! The search is single-threaded and runs to completion — callers that race
//! against incoming blocks compare the chain tip before and after (the node
//! does exactly that), rather than cancelling mid-search.

use tracing::debug;

use ghyll_core::error::BlockError;
use ghyll_core::reward::block_reward;
use ghyll_core::types::{Block, Hash256, Transaction};

/// Does `hash` start with `difficulty` zero hex characters?
pub fn meets_difficulty(hash: &Hash256, difficulty: u32) -> bool {
    let bytes = hash.as_bytes();
    let full_bytes = (difficulty / 2) as usize;
    if full_bytes > bytes.len() {
        return false;
    }
    if bytes[..full_bytes].iter().any(|&b| b != 0) {
        return false;
    }
    if difficulty % 2 == 1 {
        match bytes.get(full_bytes) {
            Some(b) => b >> 4 == 0,
            None => false,
        }
    } else {
        true
    }
}

/// Search the nonce space for a hash satisfying `difficulty`.
///
/// Candidates are SHA-256 over previous_hash ‖ timestamp_le ‖ nonce_le ‖
/// concat(ser(tx)), with `transactions` in caller order (the coinbase is
/// expected to already sit last). Returns the winning `(hash, nonce)` pair,
/// or [`BlockError::NonceExhausted`] if no nonce in `0..=u32::MAX` works.
pub fn work(
    previous_hash: &Hash256,
    timestamp: u32,
    transactions: &[Transaction],
    difficulty: u32,
) -> Result<(Hash256, u32), BlockError> {
    let mut nonce: u32 = 0;
    loop {
        let candidate = Block::compute_hash(previous_hash, timestamp, nonce, transactions);
        if meets_difficulty(&candidate, difficulty) {
            debug!(%candidate, nonce, "proof-of-work found");
            return Ok((candidate, nonce));
        }
        nonce = match nonce.checked_add(1) {
            Some(next) => next,
            None => return Err(BlockError::NonceExhausted),
        };
    }
}

/// Validate a block received from a peer or rebuilt from storage.
///
/// Re-derives the candidate hash from `previous_hash` and the block's own
/// fields, then checks the stored hash, the difficulty prefix, that the
/// block carries exactly one coinbase in last position, and that the
/// coinbase mints exactly the reward for `height` (the block's zero-based
/// index). A peer cannot mint extra currency through an otherwise
/// well-formed block.
pub fn validate(
    block: &Block,
    previous_hash: &Hash256,
    difficulty: u32,
    height: u64,
) -> Result<(), BlockError> {
    let candidate =
        Block::compute_hash(previous_hash, block.timestamp, block.nonce, &block.transactions);
    if candidate != block.hash {
        return Err(BlockError::HashMismatch);
    }
    if !meets_difficulty(&block.hash, difficulty) {
        return Err(BlockError::DifficultyNotMet(difficulty));
    }
    let coinbase_count = block.transactions.iter().filter(|tx| tx.is_coinbase()).count();
    if coinbase_count != 1 {
        return Err(BlockError::MissingCoinbase);
    }
    let Some(coinbase) = block.coinbase() else {
        return Err(BlockError::CoinbaseNotLast);
    };
    let expected = block_reward(height);
    let got = coinbase.total_output_value().unwrap_or(u64::MAX);
    if coinbase.outputs.len() != 1 || got != expected {
        return Err(BlockError::InvalidReward { got, expected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghyll_core::types::{OutPoint, TxInput, TxOutput};
    use proptest::prelude::*;

    fn coinbase_paying(miner: Hash256, outputs: Vec<TxOutput>) -> Transaction {
        Transaction {
            inputs: vec![TxInput::coinbase(miner)],
            outputs,
            lock_time: 1_700_000_000,
        }
    }

    fn coinbase(miner: Hash256) -> Transaction {
        coinbase_paying(miner, vec![TxOutput { value: 1_000_000, address: miner }])
    }

    fn spend() -> Transaction {
        Transaction {
            inputs: vec![TxInput {
                previous_output: OutPoint { hash: Hash256([0x11; 32]), index: 0 },
                public_key: vec![0x04; 65],
                signature: vec![0x01; 64],
            }],
            outputs: vec![TxOutput { value: 7, address: Hash256([0x22; 32]) }],
            lock_time: 0,
        }
    }

    fn mined_block(difficulty: u32) -> Block {
        let txs = vec![spend(), coinbase(Hash256([0xAB; 32]))];
        let prev = Hash256([0x01; 32]);
        let (hash, nonce) = work(&prev, 1_700_000_000, &txs, difficulty).unwrap();
        Block {
            timestamp: 1_700_000_000,
            transactions: txs,
            nonce,
            hash,
            previous_hash: prev,
        }
    }

    #[test]
    fn zero_difficulty_accepts_any_hash() {
        assert!(meets_difficulty(&Hash256([0xFF; 32]), 0));
    }

    #[test]
    fn odd_difficulty_checks_the_high_nibble() {
        let mut bytes = [0u8; 32];
        bytes[1] = 0x0F; // hex 00 0f — three leading zeros
        assert!(meets_difficulty(&Hash256(bytes), 3));
        bytes[1] = 0x10; // hex 00 10 — only two
        assert!(!meets_difficulty(&Hash256(bytes), 3));
    }

    #[test]
    fn even_difficulty_checks_whole_bytes() {
        let mut bytes = [0u8; 32];
        bytes[2] = 0x01;
        assert!(meets_difficulty(&Hash256(bytes), 4));
        bytes[1] = 0x01;
        assert!(!meets_difficulty(&Hash256(bytes), 4));
    }

    #[test]
    fn work_produces_hex_prefix_of_zeros() {
        // Property 6: the winning hash renders with `difficulty` zero chars.
        let block = mined_block(2);
        let hex = format!("{}", block.hash);
        assert!(hex.starts_with("00"), "got {hex}");
    }

    #[test]
    fn work_matches_recomputed_block_hash() {
        let block = mined_block(1);
        assert_eq!(block.recompute_hash(), block.hash);
    }

    #[test]
    fn validate_accepts_a_mined_block() {
        let block = mined_block(2);
        assert!(validate(&block, &Hash256([0x01; 32]), 2, 0).is_ok());
    }

    #[test]
    fn validate_rejects_tampered_nonce() {
        let mut block = mined_block(2);
        block.nonce ^= 1;
        assert_eq!(
            validate(&block, &Hash256([0x01; 32]), 2, 0).unwrap_err(),
            BlockError::HashMismatch
        );
    }

    #[test]
    fn validate_rejects_wrong_previous_hash() {
        let block = mined_block(2);
        assert_eq!(
            validate(&block, &Hash256([0x02; 32]), 2, 0).unwrap_err(),
            BlockError::HashMismatch
        );
    }

    #[test]
    fn validate_rejects_insufficient_difficulty() {
        // A block mined at difficulty 1 almost surely fails a difficulty-6
        // re-check; regenerate with a different timestamp if the hash
        // accidentally satisfies the stronger prefix.
        let mut block = mined_block(1);
        let mut bump = 0u32;
        while meets_difficulty(&block.hash, 6) {
            bump += 1;
            let (hash, nonce) = work(
                &block.previous_hash,
                block.timestamp + bump,
                &block.transactions,
                1,
            )
            .unwrap();
            block.timestamp += bump;
            block.hash = hash;
            block.nonce = nonce;
        }
        assert_eq!(
            validate(&block, &Hash256([0x01; 32]), 6, 0).unwrap_err(),
            BlockError::DifficultyNotMet(6)
        );
    }

    #[test]
    fn validate_requires_exactly_one_coinbase() {
        let prev = Hash256([0x01; 32]);
        let txs = vec![spend()];
        let (hash, nonce) = work(&prev, 1_700_000_000, &txs, 1).unwrap();
        let block = Block {
            timestamp: 1_700_000_000,
            transactions: txs,
            nonce,
            hash,
            previous_hash: prev,
        };
        assert_eq!(validate(&block, &prev, 1, 0).unwrap_err(), BlockError::MissingCoinbase);
    }

    #[test]
    fn validate_requires_coinbase_last() {
        let prev = Hash256([0x01; 32]);
        let txs = vec![coinbase(Hash256([0xAB; 32])), spend()];
        let (hash, nonce) = work(&prev, 1_700_000_000, &txs, 1).unwrap();
        let block = Block {
            timestamp: 1_700_000_000,
            transactions: txs,
            nonce,
            hash,
            previous_hash: prev,
        };
        assert_eq!(validate(&block, &prev, 1, 0).unwrap_err(), BlockError::CoinbaseNotLast);
    }

    #[test]
    fn validate_rejects_inflated_coinbase_reward() {
        let prev = Hash256([0x01; 32]);
        let miner = Hash256([0xAB; 32]);
        let txs = vec![coinbase_paying(
            miner,
            vec![TxOutput { value: 5_000_000, address: miner }],
        )];
        let (hash, nonce) = work(&prev, 1_700_000_000, &txs, 1).unwrap();
        let block = Block {
            timestamp: 1_700_000_000,
            transactions: txs,
            nonce,
            hash,
            previous_hash: prev,
        };
        assert_eq!(
            validate(&block, &prev, 1, 0).unwrap_err(),
            BlockError::InvalidReward { got: 5_000_000, expected: 1_000_000 }
        );
    }

    #[test]
    fn validate_rejects_split_coinbase_reward() {
        // Two outputs summing to the reward still violate the one-output rule.
        let prev = Hash256([0x01; 32]);
        let miner = Hash256([0xAB; 32]);
        let txs = vec![coinbase_paying(
            miner,
            vec![
                TxOutput { value: 600_000, address: miner },
                TxOutput { value: 400_000, address: miner },
            ],
        )];
        let (hash, nonce) = work(&prev, 1_700_000_000, &txs, 1).unwrap();
        let block = Block {
            timestamp: 1_700_000_000,
            transactions: txs,
            nonce,
            hash,
            previous_hash: prev,
        };
        assert_eq!(
            validate(&block, &prev, 1, 0).unwrap_err(),
            BlockError::InvalidReward { got: 1_000_000, expected: 1_000_000 }
        );
    }

    #[test]
    fn validate_checks_reward_against_the_given_height() {
        // The same block is a valid height-0 block but not a height-N block
        // in a later reward epoch.
        let block = mined_block(1);
        assert!(validate(&block, &Hash256([0x01; 32]), 1, 0).is_ok());
        assert_eq!(
            validate(&block, &Hash256([0x01; 32]), 1, 210_000).unwrap_err(),
            BlockError::InvalidReward { got: 1_000_000, expected: 500_000 }
        );
    }

    proptest! {
        // Nibble-wise check agrees with the hex-string definition.
        #[test]
        fn prefix_check_matches_hex_rendering(bytes in any::<[u8; 32]>(), difficulty in 0u32..10) {
            let hash = Hash256(bytes);
            let hex = format!("{hash}");
            let by_string = hex.chars().take(difficulty as usize).all(|c| c == '0');
            prop_assert_eq!(meets_difficulty(&hash, difficulty), by_string);
        }
    }
}
