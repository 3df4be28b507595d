//! Key material and Diffie-Hellman primitives for secure pipes.
//!
//! # Status
//!
//! `spiped-cryptography` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

pub mod dh;
pub mod secret;
pub use secret::SharedSecret;

/// Errors that can occur when handling key material.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to read secret from {0}: {1}")]
    ReadSecret(String, std::io::Error),
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("public value is not smaller than the group modulus")]
    InvalidPublicValue,
}
