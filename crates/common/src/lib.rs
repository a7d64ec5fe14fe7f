//! Common types, the envelope grammar, and errors shared across `secret-codec` crates.

pub mod envelope;
pub mod error;

pub use error::CodecError;
