//! Single-node end-to-end scenarios: mining, spending, balances, and the
//! chain-wide accounting invariants.

use ghyll_core::error::{GhyllError, TransactionError};
use ghyll_core::reward::block_reward;
use ghyll_core::types::{Block, Hash256, OutPoint, Transaction, TxInput, TxOutput};
use ghyll_node_lib::{Node, NodeConfig};
use ghyll_tests::helpers::{offline_node, wallet};
use proptest::prelude::*;

// ----------------------------------------------------------------------
// Scenario: mine the genesis block.
//
// The miner holds exactly the height-0 reward, a bystander holds nothing,
// and the chain is one block tall.
// ----------------------------------------------------------------------

#[test]
fn genesis_mint() {
    let (node, _dir) = offline_node();
    let miner = wallet();
    let bystander = wallet();

    node.mine_block(miner.address()).unwrap();

    assert_eq!(block_reward(0), 1_000_000);
    assert_eq!(node.chain().balance(&miner.address()).unwrap(), 1_000_000);
    assert_eq!(node.chain().balance(&bystander.address()).unwrap(), 0);
    assert_eq!(node.chain().height().unwrap(), 1);
}

// ----------------------------------------------------------------------
// Scenario: spend one coin, then mine it in.
// ----------------------------------------------------------------------

#[test]
fn one_coin_payment_settles() {
    let (node, _dir) = offline_node();
    let alice = wallet();
    let bob = wallet();

    node.mine_block(alice.address()).unwrap();
    node.create_transaction(&alice, bob.address(), 1).unwrap();
    assert_eq!(node.chain().mempool().unwrap().len(), 1);

    node.mine_block(alice.address()).unwrap();

    assert_eq!(
        node.chain().balance(&alice.address()).unwrap(),
        2 * block_reward(0) - 1
    );
    assert_eq!(node.chain().balance(&alice.address()).unwrap(), 1_999_999);
    assert_eq!(node.chain().balance(&bob.address()).unwrap(), 1);
    assert!(node.chain().mempool().unwrap().is_empty());
}

// ----------------------------------------------------------------------
// Scenario: an absurd overdraft is refused.
// ----------------------------------------------------------------------

#[test]
fn overdraft_is_refused() {
    let (node, _dir) = offline_node();
    let alice = wallet();
    let bob = wallet();

    node.mine_block(alice.address()).unwrap();
    node.create_transaction(&alice, bob.address(), 1).unwrap();
    node.mine_block(alice.address()).unwrap();

    assert!(matches!(
        node.create_transaction(&alice, bob.address(), u64::MAX),
        Err(GhyllError::Transaction(TransactionError::InsufficientBalance { .. }))
    ));
}

// ----------------------------------------------------------------------
// Invariant: sum of balances equals the circulating supply after every
// accepted block, even with unmined spends in flight.
// ----------------------------------------------------------------------

#[test]
fn supply_conservation_across_blocks() {
    let (node, _dir) = offline_node();
    let alice = wallet();
    let bob = wallet();
    let carol = wallet();
    let all = [&alice, &bob, &carol];

    let total = |node: &Node| -> u64 {
        all.iter()
            .map(|w| node.chain().balance(&w.address()).unwrap())
            .sum()
    };

    node.mine_block(alice.address()).unwrap();
    assert_eq!(total(&node), node.chain().circulating_supply().unwrap());

    node.create_transaction(&alice, bob.address(), 250_000).unwrap();
    node.mine_block(bob.address()).unwrap();
    assert_eq!(total(&node), node.chain().circulating_supply().unwrap());

    node.create_transaction(&bob, carol.address(), 100).unwrap();
    node.mine_block(carol.address()).unwrap();
    assert_eq!(total(&node), node.chain().circulating_supply().unwrap());
}

// ----------------------------------------------------------------------
// Invariant: only the owner's key unlocks a UTXO.
// ----------------------------------------------------------------------

#[test]
fn only_the_owner_unlocks_utxos() {
    let (node, _dir) = offline_node();
    let owner = wallet();
    let stranger = wallet();

    node.mine_block(owner.address()).unwrap();

    for utxo in node.chain().unspent(&owner.address()).unwrap() {
        assert!(owner.can_unlock(&utxo));
        assert!(!stranger.can_unlock(&utxo));
    }
}

// ----------------------------------------------------------------------
// Invariant: blocks produced at the default difficulty carry the hex
// prefix they claim.
// ----------------------------------------------------------------------

#[test]
fn default_difficulty_blocks_carry_three_zeros() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::offline(NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default() // difficulty 3
    })
    .unwrap();

    let block = node.mine_block(wallet().address()).unwrap();
    assert!(format!("{}", block.hash).starts_with("000"));
}

// ----------------------------------------------------------------------
// Payment history: rewards are attributed, change is hidden.
// ----------------------------------------------------------------------

#[test]
fn payment_history_tracks_both_sides() {
    let (node, _dir) = offline_node();
    let alice = wallet();
    let bob = wallet();

    node.mine_block(alice.address()).unwrap();
    node.create_transaction(&alice, bob.address(), 7).unwrap();

    let alice_rows = node.chain().payments(&alice.public_key_bytes()).unwrap();
    // The mining reward plus the outgoing payment; change is filtered.
    assert_eq!(alice_rows.len(), 2);
    assert!(alice_rows.iter().any(|p| p.to == alice.address() && p.value == block_reward(0)));
    assert!(alice_rows.iter().any(|p| p.to == bob.address() && p.value == 7));

    let bob_rows = node.chain().payments(&bob.public_key_bytes()).unwrap();
    assert_eq!(bob_rows.len(), 1);
    assert_eq!(bob_rows[0].from, alice.address());
    assert_eq!(bob_rows[0].value, 7);
    assert!(!bob_rows[0].mined);
}

// ----------------------------------------------------------------------
// Hashing determinism: equal fields, independently constructed, hash
// identically; any field change moves the digest.
// ----------------------------------------------------------------------

fn build_tx(value: u64, lock_time: u32, seed: u8) -> Transaction {
    Transaction {
        inputs: vec![TxInput {
            previous_output: OutPoint { hash: Hash256([seed; 32]), index: 0 },
            public_key: vec![seed; 65],
            signature: vec![seed ^ 0xFF; 64],
        }],
        outputs: vec![TxOutput { value, address: Hash256([seed.wrapping_add(1); 32]) }],
        lock_time,
    }
}

proptest! {
    #[test]
    fn tx_hashing_is_deterministic(value in 1u64..u64::MAX, lock_time in any::<u32>(), seed in any::<u8>()) {
        let a = build_tx(value, lock_time, seed);
        let b = build_tx(value, lock_time, seed);
        prop_assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn block_hashing_is_deterministic(
        value in 1u64..u64::MAX,
        lock_time in any::<u32>(),
        timestamp in any::<u32>(),
        nonce in any::<u32>(),
        seed in any::<u8>(),
    ) {
        let txs = vec![build_tx(value, lock_time, seed)];
        let prev = Hash256([seed; 32]);
        let a = Block::compute_hash(&prev, timestamp, nonce, &txs);
        let b = Block::compute_hash(&prev, timestamp, nonce, &txs);
        prop_assert_eq!(a, b);

        let moved = Block::compute_hash(&prev, timestamp, nonce.wrapping_add(1), &txs);
        prop_assert_ne!(a, moved);
    }
}
