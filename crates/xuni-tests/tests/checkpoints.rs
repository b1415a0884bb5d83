//! Checkpoint pinning against a live ledger.

use std::io::Write;
use std::sync::Arc;

use xuni_consensus::CheckpointTable;
use xuni_core::crypto::RistrettoOracle;
use xuni_core::currency::Currency;
use xuni_core::error::BlockError;
use xuni_core::types::Hash256;
use xuni_node_lib::{Ledger, LedgerError, NodeConfig};
use xuni_tests::helpers::{TestChain, test_ledger};

fn open(config: &NodeConfig, checkpoints: CheckpointTable) -> Ledger {
    Ledger::open(config, Currency::default(), checkpoints, Arc::new(RistrettoOracle)).unwrap()
}

#[test]
fn alternative_block_below_checkpoint_refused() {
    let mut table = CheckpointTable::new();
    table.add_checkpoint(1000, Hash256::digest(b"block 1000")).unwrap();

    assert!(!table.is_alternative_block_allowed(1001, 999));
    assert!(!table.is_alternative_block_allowed(1001, 1000));
    assert!(table.is_alternative_block_allowed(1001, 1001));
    assert!(table.is_in_checkpoint_zone(999));
    assert!(!table.is_in_checkpoint_zone(1001));
}

#[test]
fn pinned_height_accepts_only_the_pinned_block() {
    let mut source = TestChain::new();
    let blocks = source.mine_empty(4);
    let mut table = CheckpointTable::new();
    table.add_checkpoint(3, source.ledger.block_hash(3).unwrap()).unwrap();

    let mut chain = TestChain::with_ledger(test_ledger(table));
    for block in &blocks[..2] {
        chain.ledger.append_block(block).unwrap();
    }
    let err = chain.mine(vec![]).unwrap_err();
    assert!(matches!(err, LedgerError::Block(BlockError::CheckpointMismatch { height: 3 })));
    assert_eq!(chain.height(), 3);

    for block in &blocks[2..] {
        chain.ledger.append_block(block).unwrap();
    }
    assert_eq!(chain.height(), 5);
    assert_eq!(chain.ledger.verify_checkpoints().unwrap(), Some(3));
}

#[test]
fn history_at_or_below_checkpoint_is_frozen() {
    let mut source = TestChain::new();
    source.mine_empty(4);
    let mut table = CheckpointTable::new();
    table.add_checkpoint(3, source.ledger.block_hash(3).unwrap()).unwrap();
    let chain = TestChain::with_ledger(test_ledger(table));
    for height in 1..5 {
        chain.ledger.append_block(&source.ledger.block(height).unwrap()).unwrap();
    }

    assert!(matches!(
        chain.ledger.reorganize(3, &[]),
        Err(LedgerError::Block(BlockError::AlternativeNotAllowed { height: 3, chain_height: 5 }))
    ));
    assert!(matches!(
        chain.ledger.rollback_to(3),
        Err(LedgerError::CheckpointedRollback { target: 3, checkpoint: 3 })
    ));
    assert_eq!(chain.height(), 5);
    assert_eq!(chain.ledger.rollback_to(4).unwrap().len(), 1);
}

#[test]
fn checkpoints_loaded_from_file_pin_blocks() {
    let mut source = TestChain::new();
    source.mine_empty(2);
    let hash = source.ledger.block_hash(2).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkpoints.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "# height,hash").unwrap();
    writeln!(file, "2,{hash}").unwrap();
    drop(file);

    let mut table = CheckpointTable::new();
    assert_eq!(table.load_from_file(&path).unwrap(), 1);
    assert_eq!(table.get(2), Some(&hash));
    assert!(table.check_block(2, &hash).unwrap());
}

#[test]
fn stored_block_violating_new_checkpoint_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig { data_dir: dir.path().to_path_buf(), ..NodeConfig::default() };
    {
        let mut chain = TestChain::with_ledger(open(&config, CheckpointTable::new()));
        chain.mine_empty(4);
        chain.ledger.close().unwrap();
    }

    let mut table = CheckpointTable::new();
    table.add_checkpoint(2, Hash256::digest(b"some other block")).unwrap();

    // Indices come from the cache, so the stored chain is intact until audited.
    let ledger = open(&config, table.clone());
    assert_eq!(ledger.height(), 5);
    assert_eq!(ledger.verify_checkpoints().unwrap(), None);
    assert_eq!(ledger.height(), 2);
    ledger.close().unwrap();

    let ledger = open(&NodeConfig { load_cache: false, ..config }, table);
    assert_eq!(ledger.height(), 2);
}

#[test]
fn replay_truncates_at_violated_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig { data_dir: dir.path().to_path_buf(), load_cache: false, ..NodeConfig::default() };
    {
        let mut chain = TestChain::with_ledger(open(&config, CheckpointTable::new()));
        chain.mine_empty(4);
        chain.ledger.close().unwrap();
    }

    let mut table = CheckpointTable::new();
    table.add_checkpoint(3, Hash256::digest(b"some other block")).unwrap();
    let ledger = open(&config, table);
    assert_eq!(ledger.height(), 3);
}
