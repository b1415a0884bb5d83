//! Re-validation of pooled transactions with `check_transaction_inputs_cached`.

use xuni_core::constants::COIN;
use xuni_core::error::TransactionError;
use xuni_core::types::BlockInfo;
use xuni_tests::helpers::{TestChain, key_output};

const FEE: u64 = COIN / 100;

#[test]
fn first_check_remembers_referenced_block() {
    let mut chain = TestChain::new();
    let owned = chain.take_spendable();
    let tx = chain.spend(&[owned.clone()], vec![key_output(owned.amount - FEE).1], 0);

    let mut max_used = BlockInfo::default();
    let mut last_failed = BlockInfo::default();
    chain.ledger.check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed).unwrap();
    assert_eq!(max_used.height, owned.height);
    assert_eq!(Some(max_used.hash), chain.ledger.block_hash(owned.height));
    assert!(last_failed.is_empty());

    // Unrelated blocks keep the cached verification.
    chain.mine_empty(2);
    chain.ledger.check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed).unwrap();
    assert_eq!(max_used.height, owned.height);
}

#[test]
fn spent_key_image_fails_cached_check() {
    let mut chain = TestChain::new();
    let owned = chain.take_spendable();
    let pooled = chain.spend(&[owned.clone()], vec![key_output(owned.amount - FEE).1], 0);
    let mut max_used = BlockInfo::default();
    let mut last_failed = BlockInfo::default();
    chain.ledger.check_transaction_inputs_cached(&pooled, &mut max_used, &mut last_failed).unwrap();

    let competing = chain.spend(&[owned.clone()], vec![key_output(owned.amount - 2 * FEE).1], 0);
    chain.mine(vec![competing]).unwrap();

    let err = chain.ledger.check_transaction_inputs_cached(&pooled, &mut max_used, &mut last_failed).unwrap_err();
    assert_eq!(err.code(), "TX_KEY_IMAGE_USED");
    assert_eq!(last_failed, chain.ledger.tip().unwrap());

    // Rolling the competing spend back makes the pooled transaction valid again.
    chain.ledger.rollback_to(chain.height() - 1).unwrap();
    chain.ledger.check_transaction_inputs_cached(&pooled, &mut max_used, &mut last_failed).unwrap();
    assert!(last_failed.is_empty());
}

#[test]
fn vanished_reference_is_reverified_then_cached_as_failed() {
    let mut chain = TestChain::new();
    let owned = chain.take_spendable();
    let tx = chain.spend(&[owned.clone()], vec![key_output(owned.amount - FEE).1], 0);
    let mut max_used = BlockInfo::default();
    let mut last_failed = BlockInfo::default();
    chain.ledger.check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed).unwrap();

    // Drop the block that created the spent output.
    chain.ledger.rollback_to(owned.height).unwrap();
    let err = chain.ledger.check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed).unwrap_err();
    assert_eq!(err, TransactionError::InvalidReference(0));
    assert!(max_used.is_empty());
    assert_eq!(last_failed, chain.ledger.tip().unwrap());

    // Same tip: rejected without re-running the checks.
    let err = chain.ledger.check_transaction_inputs_cached(&tx, &mut max_used, &mut last_failed).unwrap_err();
    assert_eq!(err, TransactionError::AlreadyRejected(last_failed.height));
}
