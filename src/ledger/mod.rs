//! Authoritative balance and transaction ledger.

pub mod store;

pub use store::{
    Balance, LedgerError, LedgerStore, LedgerTransaction, TransactionKind, TransactionStatus,
};
