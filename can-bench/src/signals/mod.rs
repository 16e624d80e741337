//! Signal database, DBC parser and bit layouts
//!
//! This module contains the read-only signal database, the DBC loader that
//! builds it and the bit layout shared by encoding and decoding.

pub mod database;
pub mod dbc;
pub mod layout;

// Re-export key types for convenience
pub use database::{
    ByteOrder, DatabaseStats, LoadOptions, MessageDefinition, MultiplexerInfo, SignalDatabase,
    SignalDefinition, ValueType,
};
pub use layout::{BitLayout, BitSpan};
