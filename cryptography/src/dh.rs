//! Finite-field Diffie-Hellman over the 2048-bit MODP group of RFC 3526 (group 14).
//!
//! Public values and shared values are encoded as 256-byte big-endian integers,
//! left-padded with zeros. Private exponents are 256 bits drawn from the caller's RNG.
//!
//! A public value of `1` is the identity of the group. It is what a peer sends when it
//! waives forward secrecy, and any exponentiation of it yields `1` again, so both sides
//! end up with [SharedValue::identity] without further negotiation.
//!
//! # Example
//! ```rust
//! use rand::{rngs::StdRng, SeedableRng};
//! use spiped_cryptography::dh::PrivateKey;
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let alice = PrivateKey::generate(&mut rng);
//! let bob = PrivateKey::generate(&mut rng);
//! let shared = alice.agree(&bob.public_key());
//! assert_eq!(shared, bob.agree(&alice.public_key()));
//! ```

use crate::Error;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use std::{cmp::Ordering, fmt, sync::OnceLock};
use zeroize::Zeroizing;

/// Length of an encoded public value.
pub const PUBLIC_LENGTH: usize = 256;

/// Length of an encoded shared value.
pub const SHARED_LENGTH: usize = 256;

/// Length of a private exponent.
pub const PRIVATE_LENGTH: usize = 32;

const GENERATOR: u32 = 2;

const MODULUS: [u8; PUBLIC_LENGTH] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2, 0x21, 0x68, 0xc2, 0x34,
    0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1, 0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74,
    0x02, 0x0b, 0xbe, 0xa6, 0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d, 0xf2, 0x5f, 0x14, 0x37,
    0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45, 0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6,
    0xf4, 0x4c, 0x42, 0xe9, 0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11, 0x7c, 0x4b, 0x1f, 0xe6,
    0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d, 0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05,
    0x98, 0xda, 0x48, 0x36, 0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56, 0x20, 0x85, 0x52, 0xbb,
    0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d, 0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04,
    0xf1, 0x74, 0x6c, 0x08, 0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2, 0xec, 0x07, 0xa2, 0x8f,
    0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9, 0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18,
    0x39, 0x95, 0x49, 0x7c, 0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xac, 0xaa, 0x68, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

fn modulus() -> &'static BigUint {
    static MODULUS_INT: OnceLock<BigUint> = OnceLock::new();
    MODULUS_INT.get_or_init(|| BigUint::from_bytes_be(&MODULUS))
}

/// Encode a group element as a left-padded big-endian integer.
fn encode(value: &BigUint) -> Zeroizing<[u8; PUBLIC_LENGTH]> {
    let bytes = Zeroizing::new(value.to_bytes_be());
    let mut out = Zeroizing::new([0u8; PUBLIC_LENGTH]);
    out[PUBLIC_LENGTH - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Big-endian encoding of `1`.
const fn identity() -> [u8; PUBLIC_LENGTH] {
    let mut value = [0u8; PUBLIC_LENGTH];
    value[PUBLIC_LENGTH - 1] = 1;
    value
}

/// Secret exponent `x`.
pub struct PrivateKey {
    exponent: Zeroizing<[u8; PRIVATE_LENGTH]>,
}

impl PrivateKey {
    /// Draw a fresh exponent from `rng`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut exponent = Zeroizing::new([0u8; PRIVATE_LENGTH]);
        rng.fill_bytes(&mut exponent[..]);
        Self { exponent }
    }

    fn exponent(&self) -> BigUint {
        BigUint::from_bytes_be(&self.exponent[..])
    }

    /// Compute `2^x mod p`.
    pub fn public_key(&self) -> PublicKey {
        let y = BigUint::from(GENERATOR).modpow(&self.exponent(), modulus());
        PublicKey(*encode(&y))
    }

    /// Compute `y^x mod p` for the peer's public value `y`.
    pub fn agree(&self, remote: &PublicKey) -> SharedValue {
        let y = BigUint::from_bytes_be(&remote.0);
        let shared = y.modpow(&self.exponent(), modulus());
        SharedValue(encode(&shared))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Public value `y`, known to be smaller than the group modulus.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_LENGTH]);

impl PublicKey {
    /// The public value sent by a peer that waives forward secrecy.
    pub const fn identity() -> Self {
        Self(identity())
    }

    /// Decode a public value, rejecting anything that is not reduced modulo `p`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let value: [u8; PUBLIC_LENGTH] = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: PUBLIC_LENGTH,
            actual: bytes.len(),
        })?;

        // Equal-length big-endian byte strings compare like the integers they encode.
        if value.cmp(&MODULUS) != Ordering::Less {
            return Err(Error::InvalidPublicValue);
        }
        Ok(Self(value))
    }

    /// Returns true if this is the value `1`.
    pub fn is_identity(&self) -> bool {
        self.0 == identity()
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            return f.write_str("PublicKey(1)");
        }
        write!(f, "PublicKey(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Result of a key agreement, or the identity when forward secrecy was waived.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedValue(Zeroizing<[u8; SHARED_LENGTH]>);

impl SharedValue {
    /// The value both sides use when either of them waived forward secrecy.
    pub fn identity() -> Self {
        Self(Zeroizing::new(identity()))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedValue([REDACTED])")
    }
}
