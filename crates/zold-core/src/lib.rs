//! # zold-core
//! Wallet ledgers, transactions, and the merge algorithm for the Zold network.

pub mod amount;
pub mod atomic_file;
pub mod constants;
pub mod copies;
pub mod crypto;
pub mod error;
pub mod id;
pub mod patch;
pub mod txn;
pub mod wallet;
pub mod wallets;
