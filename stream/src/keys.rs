//! Key derivation and authenticated Diffie-Hellman parameters.
//!
//! All derivations use PBKDF2-HMAC-SHA256 with a single iteration: the shared secret is
//! already a uniformly random 256-bit value, so the KDF only needs to bind it to the
//! handshake transcript.

use crate::{
    packet::{KeySet, KEY_MATERIAL_LENGTH},
    Error, Role, NONCE_LENGTH, TAG_LENGTH,
};
use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use spiped_cryptography::{
    dh::{PublicKey, SharedValue, PUBLIC_LENGTH, SHARED_LENGTH},
    SharedSecret,
};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Length of a MAC key protecting a Diffie-Hellman parameter.
pub const PARAMETER_KEY_LENGTH: usize = 32;

/// Length of an authenticated Diffie-Hellman parameter: the public value and its tag.
pub const PARAMETER_LENGTH: usize = PUBLIC_LENGTH + TAG_LENGTH;

/// An encoded public value followed by its HMAC-SHA256 tag.
pub type Parameter = [u8; PARAMETER_LENGTH];

const ITERATIONS: u32 = 1;

/// Order `(local, remote)` as `(client, server)`.
fn ordered<'a, T: ?Sized>(role: Role, local: &'a T, remote: &'a T) -> (&'a T, &'a T) {
    match role {
        Role::Encrypt => (local, remote),
        Role::Decrypt => (remote, local),
    }
}

/// MAC keys used to authenticate each side's Diffie-Hellman parameter.
pub struct ParameterKeys {
    local: Zeroizing<[u8; PARAMETER_KEY_LENGTH]>,
    remote: Zeroizing<[u8; PARAMETER_KEY_LENGTH]>,
}

impl ParameterKeys {
    /// Key used to tag the parameter this side sends.
    pub fn local(&self) -> &[u8; PARAMETER_KEY_LENGTH] {
        &self.local
    }

    /// Key used to verify the parameter the peer sends.
    pub fn remote(&self) -> &[u8; PARAMETER_KEY_LENGTH] {
        &self.remote
    }
}

/// Derive the parameter MAC keys from the exchanged nonces.
///
/// The first half of the output belongs to the client, the second to the server.
pub fn derive_parameter_keys(
    secret: &SharedSecret,
    local_nonce: &[u8; NONCE_LENGTH],
    remote_nonce: &[u8; NONCE_LENGTH],
    role: Role,
) -> ParameterKeys {
    let (client_nonce, server_nonce) = ordered(role, local_nonce, remote_nonce);
    let mut salt = [0u8; 2 * NONCE_LENGTH];
    salt[..NONCE_LENGTH].copy_from_slice(client_nonce);
    salt[NONCE_LENGTH..].copy_from_slice(server_nonce);

    let mut output = Zeroizing::new([0u8; 2 * PARAMETER_KEY_LENGTH]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.expose(), &salt, ITERATIONS, &mut output[..]);

    let mut client = Zeroizing::new([0u8; PARAMETER_KEY_LENGTH]);
    let mut server = Zeroizing::new([0u8; PARAMETER_KEY_LENGTH]);
    client.copy_from_slice(&output[..PARAMETER_KEY_LENGTH]);
    server.copy_from_slice(&output[PARAMETER_KEY_LENGTH..]);
    let (local, remote) = match role {
        Role::Encrypt => (client, server),
        Role::Decrypt => (server, client),
    };
    ParameterKeys { local, remote }
}

/// Keys for both directions of a connection.
#[derive(Debug)]
pub struct SessionKeys {
    /// Protects traffic from the encrypting half to the decrypting half.
    pub client: KeySet,
    /// Protects traffic from the decrypting half to the encrypting half.
    pub server: KeySet,
}

/// Derive the session keys from the nonces and the Diffie-Hellman result.
pub fn derive_session_keys(
    secret: &SharedSecret,
    local_nonce: &[u8; NONCE_LENGTH],
    remote_nonce: &[u8; NONCE_LENGTH],
    shared: &SharedValue,
    role: Role,
) -> SessionKeys {
    let (client_nonce, server_nonce) = ordered(role, local_nonce, remote_nonce);
    let mut salt = Zeroizing::new([0u8; 2 * NONCE_LENGTH + SHARED_LENGTH]);
    salt[..NONCE_LENGTH].copy_from_slice(client_nonce);
    salt[NONCE_LENGTH..2 * NONCE_LENGTH].copy_from_slice(server_nonce);
    salt[2 * NONCE_LENGTH..].copy_from_slice(shared.as_bytes());

    let mut output = Zeroizing::new([0u8; 2 * KEY_MATERIAL_LENGTH]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.expose(), &salt[..], ITERATIONS, &mut output[..]);

    let mut client = Zeroizing::new([0u8; KEY_MATERIAL_LENGTH]);
    let mut server = Zeroizing::new([0u8; KEY_MATERIAL_LENGTH]);
    client.copy_from_slice(&output[..KEY_MATERIAL_LENGTH]);
    server.copy_from_slice(&output[KEY_MATERIAL_LENGTH..]);
    SessionKeys {
        client: KeySet::new(&client),
        server: KeySet::new(&server),
    }
}

fn parameter_mac(key: &[u8; PARAMETER_KEY_LENGTH], value: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(value);
    mac
}

/// Append the tag of `value` under `key`.
pub fn sign_parameter(
    value: &[u8; PUBLIC_LENGTH],
    key: &[u8; PARAMETER_KEY_LENGTH],
) -> Parameter {
    let mut parameter = [0u8; PARAMETER_LENGTH];
    parameter[..PUBLIC_LENGTH].copy_from_slice(value);
    let tag = parameter_mac(key, value).finalize().into_bytes();
    parameter[PUBLIC_LENGTH..].copy_from_slice(&tag);
    parameter
}

/// Check the tag (in constant time) and the value of a peer's parameter.
pub fn verify_parameter(
    parameter: &Parameter,
    key: &[u8; PARAMETER_KEY_LENGTH],
    require_pfs: bool,
) -> Result<PublicKey, Error> {
    let (value, tag) = parameter.split_at(PUBLIC_LENGTH);
    parameter_mac(key, value)
        .verify_slice(tag)
        .map_err(|_| Error::InvalidParameterMac)?;
    let public = PublicKey::from_bytes(value).map_err(Error::InvalidParameter)?;
    if require_pfs && public.is_identity() {
        return Err(Error::ForwardSecrecyRequired);
    }
    Ok(public)
}
