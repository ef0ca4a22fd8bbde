//!
//! Utility module for the kasse.
//!
//! Re-exports formatting helpers and identifier generation used throughout the codebase.
/// Utility functions for formatting, display and identifiers
pub mod index;

pub use index::{format_balance, generate_device_id};
