//! Pre-shared secret from which every session key is derived.
//!
//! The secret is the SHA-256 digest of the raw contents of a key file, so key files may be of
//! any length or format. The digest is wiped when the last copy is dropped.

use crate::Error;
use sha2::{Digest as _, Sha256};
use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of a [SharedSecret].
pub const SECRET_LENGTH: usize = 32;

/// Key file name that denotes standard input.
pub const STDIN: &str = "-";

/// SHA-256 digest of a pre-shared key file.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SECRET_LENGTH]);

impl SharedSecret {
    /// Hash an in-memory key.
    pub fn from_bytes(key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key);
        Self(hasher.finalize().into())
    }

    /// Hash everything `reader` yields until EOF.
    pub fn from_reader<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = Zeroizing::new([0u8; 4096]);
        loop {
            let n = match reader.read(&mut buf[..]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// Load the secret from the key file at `path` ([STDIN] reads standard input).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let name = path.display().to_string();
        if path == Path::new(STDIN) {
            return Self::from_reader(io::stdin().lock())
                .map_err(|err| Error::ReadSecret(name, err));
        }
        let file = File::open(path).map_err(|err| Error::ReadSecret(name.clone(), err))?;
        Self::from_reader(file).map_err(|err| Error::ReadSecret(name, err))
    }

    /// Access the raw digest.
    pub fn expose(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}
