//! Shared utilities.
//!
//! Hashing, filesystem helpers and test helpers.

pub mod fs;
pub mod hash;

#[cfg(test)]
pub mod testutil;
