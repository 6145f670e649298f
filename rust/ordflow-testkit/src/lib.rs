//! Test utilities and helpers for the ordflow project.
//!
//! This crate provides:
//! - Synthetic work units with simulated latency and injectable failures
//! - A recording consumer that captures delivery order
//! - A probe measuring how many units execute simultaneously
//! - Randomized duration generation
//!
//! # Usage
//!
//! This crate is intended for use within the ordflow test suite only.

pub mod data_gen;
pub mod probe;
pub mod recorder;
pub mod sleepy;
