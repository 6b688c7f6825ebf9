//! pagerun CLI
//!
//! Argument parsing, config merging and summary output for the `pagerun`
//! binary.

pub mod args;
pub mod output;
