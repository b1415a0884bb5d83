//! Context-free transaction validation.
//!
//! These checks need no chain state, only the currency policy and a
//! [`CryptoOracle`] for point validity:
//!
//! - [`check_outputs`]: amounts, output keys, multisignature shape, deposits
//! - [`check_inputs_structure`]: amounts, duplicate key images, signature counts
//! - [`check_money`]: `sum(outputs) <= sum(inputs) + deposit interest` without overflow
//! - [`check_coinbase_structure`]: the generation transaction's shape
//!
//! Ring signatures, output references and spent-set membership are checked
//! against the chain by the ledger.

use std::collections::HashSet;

use crate::crypto::CryptoOracle;
use crate::currency::Currency;
use crate::error::TransactionError;
use crate::types::{OutputTarget, Transaction, TransactionInput};

/// Totals of a transaction that passed [`check_money`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedTransaction {
    pub total_input: u64,
    pub total_output: u64,
    /// `total_input - total_output`.
    pub fee: u64,
}

/// Validate every output of `tx`.
///
/// - amounts are non-zero and their sum does not overflow
/// - key outputs carry valid curve points
/// - multisignature outputs require between 1 and `keys.len()` signatures over valid keys
/// - deposits respect the term and minimum amount bounds
pub fn check_outputs(
    tx: &Transaction,
    currency: &Currency,
    oracle: &dyn CryptoOracle,
) -> Result<(), TransactionError> {
    let mut total = 0u64;
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.amount == 0 {
            return Err(TransactionError::InvalidOutputAmount(i));
        }
        total = total
            .checked_add(output.amount)
            .ok_or(TransactionError::AmountOverflow)?;

        match &output.target {
            OutputTarget::Key { key } => {
                if !oracle.verify_public_key(key) {
                    return Err(TransactionError::InvalidOutputKey(i));
                }
            }
            OutputTarget::Multisignature { keys, required_signature_count, term } => {
                let required = usize::from(*required_signature_count);
                if required == 0 || required > keys.len() {
                    return Err(TransactionError::InvalidMultisignatureOutput(i));
                }
                if !keys.iter().all(|key| oracle.verify_public_key(key)) {
                    return Err(TransactionError::InvalidOutputKey(i));
                }
                if *term > 0 && !currency.is_valid_deposit(output.amount, *term) {
                    return Err(TransactionError::InvalidDeposit(i));
                }
            }
        }
    }
    Ok(())
}

/// Validate the shape of the inputs of a non-coinbase transaction.
///
/// - at least one input, none of them a generation input
/// - non-zero amounts whose sum does not overflow
/// - key inputs reference at least one output and carry a valid, unique key image
/// - one signature list per input, each of the required length
pub fn check_inputs_structure(
    tx: &Transaction,
    oracle: &dyn CryptoOracle,
) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        return Err(TransactionError::EmptyInputs);
    }

    let mut total = 0u64;
    let mut key_images = HashSet::with_capacity(tx.inputs.len());
    for (i, input) in tx.inputs.iter().enumerate() {
        match input {
            TransactionInput::Generation { .. } => return Err(TransactionError::UnexpectedGeneration),
            TransactionInput::Key { output_offsets, key_image, .. } => {
                if output_offsets.is_empty() {
                    return Err(TransactionError::InvalidReference(i));
                }
                if !oracle.is_valid_key_image(key_image) {
                    return Err(TransactionError::InvalidKeyImage(key_image.to_string()));
                }
                if !key_images.insert(*key_image) {
                    return Err(TransactionError::DoubleSpend(key_image.to_string()));
                }
            }
            TransactionInput::Multisignature { .. } => {}
        }

        let amount = input.amount();
        if amount == 0 {
            return Err(TransactionError::InvalidInputAmount(i));
        }
        total = total.checked_add(amount).ok_or(TransactionError::AmountOverflow)?;
    }

    if tx.signatures.len() != tx.inputs.len() {
        return Err(TransactionError::MissingSignature {
            index: tx.signatures.len().min(tx.inputs.len()),
            got: tx.signatures.len(),
            expected: tx.inputs.len(),
        });
    }
    for (i, (input, signatures)) in tx.inputs.iter().zip(&tx.signatures).enumerate() {
        let expected = input.required_signatures();
        if signatures.len() != expected {
            return Err(TransactionError::MissingSignature { index: i, got: signatures.len(), expected });
        }
    }
    Ok(())
}

/// Enforce `sum(outputs) <= sum(inputs)`, returning the totals and fee.
///
/// A matured deposit input is worth its amount plus the interest it earned.
pub fn check_money(tx: &Transaction, currency: &Currency) -> Result<ValidatedTransaction, TransactionError> {
    let total_input = tx
        .inputs
        .iter()
        .try_fold(0u64, |acc, input| {
            let interest = match input {
                TransactionInput::Multisignature { amount, term, .. } if *term > 0 => {
                    currency.calculate_interest(*amount, *term)
                }
                _ => 0,
            };
            acc.checked_add(input.amount())?.checked_add(interest)
        })
        .ok_or(TransactionError::AmountOverflow)?;
    let total_output = tx.total_output_amount().ok_or(TransactionError::AmountOverflow)?;
    if total_output > total_input {
        return Err(TransactionError::CreatesMoney { inputs: total_input, outputs: total_output });
    }
    Ok(ValidatedTransaction { total_input, total_output, fee: total_input - total_output })
}

/// Validate the coinbase of the block at `height`.
///
/// Exactly one generation input for `height`, the mandatory unlock time, key
/// outputs only and no signatures. Returns the total paid out.
pub fn check_coinbase_structure(
    tx: &Transaction,
    height: u32,
    currency: &Currency,
) -> Result<u64, String> {
    match tx.inputs.as_slice() {
        [TransactionInput::Generation { height: h }] if *h == height => {}
        [TransactionInput::Generation { height: h }] => {
            return Err(format!("generation height {h}, block height {height}"));
        }
        _ => return Err("coinbase must have exactly one generation input".into()),
    }
    if tx.unlock_time != currency.coinbase_unlock_time(height) {
        return Err(format!(
            "unlock time {}, expected {}",
            tx.unlock_time,
            currency.coinbase_unlock_time(height)
        ));
    }
    if !tx.signatures.is_empty() {
        return Err("coinbase carries signatures".into());
    }
    if tx.outputs.is_empty() {
        return Err("coinbase has no outputs".into());
    }
    if tx.outputs.iter().any(|out| !matches!(out.target, OutputTarget::Key { .. })) {
        return Err("coinbase pays to a non-key output".into());
    }
    tx.total_output_amount().ok_or_else(|| "coinbase output overflow".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, DEPOSIT_MAX_TERM, DEPOSIT_MIN_TERM};
    use crate::crypto::{KeyPair, RistrettoOracle};
    use crate::types::{KeyImage, PublicKey, Signature, TransactionOutput};

    fn key(seed: u8) -> PublicKey {
        KeyPair::from_secret_bytes([seed; 32]).public_key()
    }

    fn image(seed: u8) -> KeyImage {
        KeyPair::from_secret_bytes([seed; 32]).key_image()
    }

    fn key_input(amount: u64, seed: u8) -> TransactionInput {
        TransactionInput::Key { amount, output_offsets: vec![0, 1], key_image: image(seed) }
    }

    fn spend(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Transaction {
        let signatures = inputs
            .iter()
            .map(|i| vec![Signature::default(); i.required_signatures()])
            .collect();
        Transaction { version: 1, unlock_time: 0, inputs, outputs, extra: vec![], signatures }
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    #[test]
    fn outputs_valid() {
        let tx = spend(vec![key_input(COIN, 1)], vec![TransactionOutput::key(COIN, key(2))]);
        assert!(check_outputs(&tx, &Currency::default(), &RistrettoOracle).is_ok());
    }

    #[test]
    fn zero_output_rejected() {
        let tx = spend(vec![key_input(COIN, 1)], vec![TransactionOutput::key(0, key(2))]);
        assert_eq!(
            check_outputs(&tx, &Currency::default(), &RistrettoOracle),
            Err(TransactionError::InvalidOutputAmount(0))
        );
    }

    #[test]
    fn output_overflow_rejected() {
        let tx = spend(
            vec![key_input(COIN, 1)],
            vec![TransactionOutput::key(u64::MAX, key(2)), TransactionOutput::key(1, key(3))],
        );
        assert_eq!(
            check_outputs(&tx, &Currency::default(), &RistrettoOracle),
            Err(TransactionError::AmountOverflow)
        );
    }

    #[test]
    fn invalid_output_key_rejected() {
        let tx = spend(vec![key_input(COIN, 1)], vec![TransactionOutput::key(1, PublicKey([0xFF; 32]))]);
        assert_eq!(
            check_outputs(&tx, &Currency::default(), &RistrettoOracle),
            Err(TransactionError::InvalidOutputKey(0))
        );
    }

    #[test]
    fn multisig_required_count_bounded_by_keys() {
        let output = TransactionOutput {
            amount: COIN,
            target: OutputTarget::Multisignature { keys: vec![key(1)], required_signature_count: 2, term: 0 },
        };
        let tx = spend(vec![key_input(COIN, 1)], vec![output]);
        assert_eq!(
            check_outputs(&tx, &Currency::default(), &RistrettoOracle),
            Err(TransactionError::InvalidMultisignatureOutput(0))
        );
    }

    #[test]
    fn deposit_term_bounds() {
        let deposit = |term| TransactionOutput {
            amount: COIN,
            target: OutputTarget::Multisignature { keys: vec![key(1)], required_signature_count: 1, term },
        };
        let ok = spend(vec![key_input(COIN, 1)], vec![deposit(DEPOSIT_MIN_TERM)]);
        assert!(check_outputs(&ok, &Currency::default(), &RistrettoOracle).is_ok());
        let short = spend(vec![key_input(COIN, 1)], vec![deposit(DEPOSIT_MIN_TERM - 1)]);
        assert_eq!(
            check_outputs(&short, &Currency::default(), &RistrettoOracle),
            Err(TransactionError::InvalidDeposit(0))
        );
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    #[test]
    fn zero_input_rejected() {
        let tx = spend(vec![key_input(0, 1)], vec![]);
        assert_eq!(
            check_inputs_structure(&tx, &RistrettoOracle),
            Err(TransactionError::InvalidInputAmount(0))
        );
    }

    #[test]
    fn input_overflow_rejected() {
        let tx = spend(vec![key_input(u64::MAX, 1), key_input(1, 2)], vec![]);
        assert_eq!(check_inputs_structure(&tx, &RistrettoOracle), Err(TransactionError::AmountOverflow));
    }

    #[test]
    fn duplicate_key_image_in_tx_rejected() {
        let tx = spend(vec![key_input(1, 1), key_input(1, 1)], vec![]);
        assert!(matches!(
            check_inputs_structure(&tx, &RistrettoOracle),
            Err(TransactionError::DoubleSpend(_))
        ));
    }

    #[test]
    fn invalid_key_image_rejected() {
        let input = TransactionInput::Key { amount: 1, output_offsets: vec![0], key_image: KeyImage([0xFF; 32]) };
        let tx = spend(vec![input], vec![]);
        assert!(matches!(
            check_inputs_structure(&tx, &RistrettoOracle),
            Err(TransactionError::InvalidKeyImage(_))
        ));
    }

    #[test]
    fn empty_inputs_and_generation_rejected() {
        assert_eq!(check_inputs_structure(&spend(vec![], vec![]), &RistrettoOracle), Err(TransactionError::EmptyInputs));
        let tx = spend(vec![TransactionInput::Generation { height: 1 }], vec![]);
        assert_eq!(check_inputs_structure(&tx, &RistrettoOracle), Err(TransactionError::UnexpectedGeneration));
    }

    #[test]
    fn signature_count_mismatch_rejected() {
        let mut tx = spend(vec![key_input(1, 1)], vec![]);
        tx.signatures[0].pop();
        assert_eq!(
            check_inputs_structure(&tx, &RistrettoOracle),
            Err(TransactionError::MissingSignature { index: 0, got: 1, expected: 2 })
        );
    }

    // ------------------------------------------------------------------
    // Money
    // ------------------------------------------------------------------

    #[test]
    fn creates_money_rejected() {
        let tx = spend(vec![key_input(1_000_000, 1)], vec![TransactionOutput::key(1_000_500, key(2))]);
        assert_eq!(
            check_money(&tx, &Currency::default()),
            Err(TransactionError::CreatesMoney { inputs: 1_000_000, outputs: 1_000_500 })
        );
    }

    #[test]
    fn fee_computed() {
        let tx = spend(vec![key_input(1_000_000, 1)], vec![TransactionOutput::key(999_000, key(2))]);
        assert_eq!(check_money(&tx, &Currency::default()).unwrap().fee, 1_000);
    }

    #[test]
    fn deposit_input_earns_interest() {
        let currency = Currency::default();
        let input = TransactionInput::Multisignature {
            amount: 100 * COIN,
            signature_count: 1,
            output_index: 0,
            term: DEPOSIT_MAX_TERM,
        };
        let tx = spend(vec![input], vec![TransactionOutput::key(103 * COIN, key(2))]);
        let totals = check_money(&tx, &currency).unwrap();
        assert_eq!(totals.total_input, 103 * COIN);
        assert_eq!(totals.fee, 0);
    }

    // ------------------------------------------------------------------
    // Coinbase
    // ------------------------------------------------------------------

    #[test]
    fn coinbase_checks() {
        let currency = Currency::default();
        let coinbase = Transaction {
            version: 1,
            unlock_time: currency.coinbase_unlock_time(4),
            inputs: vec![TransactionInput::Generation { height: 4 }],
            outputs: vec![TransactionOutput::key(COIN, key(1)), TransactionOutput::key(COIN, key(2))],
            extra: vec![],
            signatures: vec![],
        };
        assert_eq!(check_coinbase_structure(&coinbase, 4, &currency), Ok(2 * COIN));
        assert!(check_coinbase_structure(&coinbase, 5, &currency).is_err());

        let mut early = coinbase.clone();
        early.unlock_time = 0;
        assert!(check_coinbase_structure(&early, 4, &currency).is_err());

        let mut signed = coinbase;
        signed.signatures = vec![vec![]];
        assert!(check_coinbase_structure(&signed, 4, &currency).is_err());
    }
}
