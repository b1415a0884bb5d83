//! # xuni-core
//! Foundation types, currency policy and cryptography for the Xuni ledger.

pub mod constants;
pub mod crypto;
pub mod currency;
pub mod error;
pub mod genesis;
pub mod merkle;
pub mod types;
pub mod validation;
