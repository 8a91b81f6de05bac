//! Fuzz tests module
//!
//! Property-based tests using proptest.

pub mod address_fuzz;
