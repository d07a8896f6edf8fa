//! IPG Backend Library
//!
//! Cycle accrual engine plus the ledger and HTTP gateway around it.
//! Exposed as a library so the server binary and integration tests share
//! one implementation of the accrual math.

pub mod api;
pub mod engine;
pub mod ledger;
pub mod market;
pub mod models;
