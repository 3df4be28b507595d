//! Encrypt and authenticate a byte stream between two endpoints sharing a key.
//!
//! A secure pipe has two halves. The encrypting half accepts plaintext connections and dials
//! the decrypting half; the decrypting half accepts those connections and dials the real
//! service. Both halves hold the same [spiped_cryptography::SharedSecret].
//!
//! # Protocol
//!
//! Every connection starts with a [handshake] in which the encrypting half plays the client
//! and the decrypting half plays the server:
//!
//! 1. Both sides send a random 32-byte nonce and read the peer's.
//! 2. `PBKDF2-SHA256(secret, nonce_C || nonce_S, 1)` yields one MAC key per side.
//! 3. Each side sends its Diffie-Hellman public value followed by an HMAC-SHA256 of the value
//!    under its own MAC key. The server reads and verifies the client's value before sending
//!    its own.
//! 4. `PBKDF2-SHA256(secret, nonce_C || nonce_S || shared, 1)` yields one [packet::KeySet] per
//!    direction.
//!
//! A side may waive forward secrecy by sending the value `1` and using `1` as the shared
//! value. A side that requires forward secrecy rejects the value `1`.
//!
//! After the handshake, each direction carries a sequence of [FRAME_SIZE]-byte frames (see
//! [packet]).
//!
//! # Status
//!
//! `spiped-stream` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use std::time::Duration;
use thiserror::Error;

pub mod conn;
pub mod handshake;
pub mod keys;
pub mod packet;
pub mod pipe;

/// Length of a handshake nonce.
pub const NONCE_LENGTH: usize = 32;

/// Maximum number of plaintext bytes carried by one frame.
pub const MAX_DATA_SIZE: usize = 1024;

/// Length of the HMAC-SHA256 tag.
pub const TAG_LENGTH: usize = 32;

/// Size of every encrypted frame: padded data, length, and tag.
pub const FRAME_SIZE: usize = MAX_DATA_SIZE + 4 + TAG_LENGTH;

/// Errors that can occur when interacting with a stream.
#[derive(Error, Debug)]
pub enum Error {
    // Transport errors
    #[error("send failed: {0}")]
    SendFailed(std::io::Error),
    #[error("recv failed: {0}")]
    RecvFailed(std::io::Error),
    #[error("truncated frame: {0} bytes")]
    TruncatedFrame(usize),

    // Handshake errors
    #[error("invalid DH parameter MAC")]
    InvalidParameterMac,
    #[error("invalid DH parameter: {0}")]
    InvalidParameter(spiped_cryptography::Error),
    #[error("peer waived forward secrecy")]
    ForwardSecrecyRequired,

    // Frame errors
    #[error("frame authentication failed")]
    AuthenticationFailed,
    #[error("invalid frame length: {0}")]
    InvalidLength(u32),
    #[error("packet counter overflow")]
    CounterOverflow,
}

/// Which half of the pipe this process is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accept plaintext, send ciphertext. Client side of the handshake.
    Encrypt,
    /// Accept ciphertext, send plaintext. Server side of the handshake.
    Decrypt,
}

/// Configuration for a connection.
#[derive(Clone, Debug)]
pub struct Config {
    /// Which half of the pipe this process is.
    pub role: Role,

    /// Send the value `1` instead of a Diffie-Hellman public value.
    pub no_pfs: bool,

    /// Reject a peer that sends the value `1`.
    pub require_pfs: bool,

    /// Enable transport keep-alives once relaying starts.
    pub keepalive: bool,

    /// Maximum time allowed for connecting to the target, and separately for the handshake.
    pub timeout: Duration,
}

impl Config {
    /// A configuration for `role` with forward secrecy negotiated normally, keep-alives on,
    /// and a 5 second timeout.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            no_pfs: false,
            require_pfs: false,
            keepalive: true,
            timeout: Duration::from_secs(5),
        }
    }
}
