//! Scenario and property test suite for the Xuni ledger.
//!
//! The tests drive a real [`xuni_node_lib::Ledger`] through chains built with
//! [`helpers::TestChain`]: signed ring spends, multisignature and deposit
//! outputs, rollbacks, reorganizations and cache round trips.

pub mod helpers;
