//! Dealer sync domain primitives.
//!
//! Pure types and functions shared by the database, sync and API crates.
//! This crate has no internal dependencies and performs no I/O.

pub mod error;
pub mod hashing;
pub mod sync;
pub mod types;
