//! Property tests over randomly grown chains.
//!
//! Cases are kept low: every case builds its own chain with real ring
//! signatures.

use proptest::prelude::*;
use xuni_core::constants::COIN;
use xuni_core::crypto::KeyPair;
use xuni_core::error::TransactionError;
use xuni_core::types::{Signature, Transaction, TransactionInput, TransactionOutput};
use xuni_node_lib::cache;
use xuni_tests::helpers::{TestChain, key_output};

const FEE: u64 = COIN / 100;

/// Grow `chain` by one block per step: a spend when `true` and an unlocked
/// output exists, otherwise a coinbase-only block.
fn grow(chain: &mut TestChain, steps: &[bool], mixins: usize) {
    for &spend in steps {
        let ready = chain
            .wallet
            .first()
            .is_some_and(|owned| owned.height + 10 <= chain.height());
        if spend && ready {
            let owned = chain.wallet.remove(0);
            let tx = chain.spend(&[owned.clone()], vec![key_output(owned.amount - FEE).1], mixins);
            chain.mine(vec![tx]).unwrap();
        } else {
            chain.mine(vec![]).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Appending a block then rolling back one block restores the exact state.
    #[test]
    fn append_then_rollback_restores_state(
        prefix in prop::collection::vec(any::<bool>(), 0..6),
        spend in any::<bool>(),
        mixins in 0usize..3,
    ) {
        let mut chain = TestChain::new();
        chain.mine_empty(10);
        grow(&mut chain, &prefix, mixins);

        let before = chain.ledger.indices();
        let tip = chain.ledger.tip();
        let generated = chain.ledger.already_generated_coins();
        grow(&mut chain, &[spend], mixins);

        chain.ledger.rollback_to(chain.height() - 1).unwrap();
        prop_assert_eq!(chain.ledger.indices(), before);
        prop_assert_eq!(chain.ledger.tip(), tip);
        prop_assert_eq!(chain.ledger.already_generated_coins(), generated);
    }

    /// Rebuilding from the block log yields the same bytes as appending.
    #[test]
    fn rebuild_is_byte_identical(
        steps in prop::collection::vec(any::<bool>(), 1..10),
        mixins in 0usize..3,
    ) {
        let mut chain = TestChain::new();
        chain.mine_empty(10);
        grow(&mut chain, &steps, mixins);
        let tip = chain.ledger.tip().unwrap().hash;
        let incremental = cache::encode(&chain.ledger.indices(), &tip).unwrap();

        chain.ledger.rebuild_cache().unwrap();
        prop_assert_eq!(cache::encode(&chain.ledger.indices(), &tip).unwrap(), incremental);
    }

    /// A spent key image rejects a transaction however malformed the rest is.
    #[test]
    fn spent_key_image_always_rejected(
        amount in any::<u64>(),
        offsets in prop::collection::vec(any::<u32>(), 0..4),
        signature_count in 0usize..3,
        output_amount in any::<u64>(),
        extra in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let mut chain = TestChain::new();
        let owned = chain.take_spendable();
        let tx = chain.spend(&[owned.clone()], vec![key_output(owned.amount - FEE).1], 0);
        chain.mine(vec![tx]).unwrap();

        let forged = Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key { amount, output_offsets: offsets, key_image: owned.keys.key_image() }],
            outputs: vec![TransactionOutput::key(output_amount, KeyPair::generate().public_key())],
            extra,
            signatures: vec![vec![Signature::default(); signature_count]],
        };
        let err = chain.ledger.validate_transaction_inputs(&forged, chain.height()).unwrap_err();
        prop_assert!(matches!(err, TransactionError::KeyImageUsed(_)));
        prop_assert_eq!(err.code(), "TX_KEY_IMAGE_USED");
    }
}
