//! Fixed-size encrypted frames.
//!
//! Every frame is exactly [FRAME_SIZE] bytes regardless of how much data it carries:
//!
//! ```text
//! +--------------------------------+-------------+-----------------------------+
//! | data, zero-padded to 1024 bytes | be32 length | HMAC-SHA256(ct || be64 ctr) |
//! +--------------------------------+-------------+-----------------------------+
//! |<------------ AES-256-CTR (IV = be64 ctr || be64 block) ----------->|
//! ```
//!
//! The packet counter is part of both the keystream and the MAC, so frames cannot be dropped,
//! replayed, or reordered without failing authentication.

use crate::{Error, FRAME_SIZE, MAX_DATA_SIZE};
use aes::{
    cipher::{generic_array::GenericArray, KeyIvInit as _, StreamCipher as _},
    Aes256,
};
use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Length of the `AES-256` key.
pub const CIPHER_KEY_LENGTH: usize = 32;

/// Length of the `HMAC-SHA256` key.
pub const MAC_KEY_LENGTH: usize = 32;

/// Length of the key material consumed by [KeySet::new].
pub const KEY_MATERIAL_LENGTH: usize = CIPHER_KEY_LENGTH + MAC_KEY_LENGTH;

/// Bytes covered by the cipher: padded data and length.
const CIPHERTEXT_SIZE: usize = MAX_DATA_SIZE + 4;

/// An encrypted frame.
pub type Frame = [u8; FRAME_SIZE];

/// Keys and packet counter for one direction of a connection.
#[cfg_attr(test, derive(Clone))]
pub struct KeySet {
    cipher_key: Zeroizing<[u8; CIPHER_KEY_LENGTH]>,
    mac_key: Zeroizing<[u8; MAC_KEY_LENGTH]>,
    counter: u64,
}

impl KeySet {
    /// Split derived key material into a cipher key followed by a MAC key. The counter
    /// starts at zero.
    pub fn new(material: &[u8; KEY_MATERIAL_LENGTH]) -> Self {
        let mut cipher_key = Zeroizing::new([0u8; CIPHER_KEY_LENGTH]);
        let mut mac_key = Zeroizing::new([0u8; MAC_KEY_LENGTH]);
        cipher_key.copy_from_slice(&material[..CIPHER_KEY_LENGTH]);
        mac_key.copy_from_slice(&material[CIPHER_KEY_LENGTH..]);
        Self {
            cipher_key,
            mac_key,
            counter: 0,
        }
    }

    /// Number of frames processed so far.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn keystream(&self) -> Aes256Ctr {
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&self.counter.to_be_bytes());
        Aes256Ctr::new(
            GenericArray::from_slice(&self.cipher_key[..]),
            GenericArray::from_slice(&iv),
        )
    }

    fn mac(&self, ciphertext: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key[..])
            .expect("HMAC accepts keys of any length");
        mac.update(ciphertext);
        mac.update(&self.counter.to_be_bytes());
        mac
    }

    /// Encrypt `data` into a frame and advance the counter.
    ///
    /// # Panics
    ///
    /// Panics if `data` is longer than [MAX_DATA_SIZE].
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Frame, Error> {
        assert!(
            data.len() <= MAX_DATA_SIZE,
            "frame data too large: {}",
            data.len()
        );
        self.seal(data, data.len() as u32)
    }

    fn seal(&mut self, data: &[u8], length: u32) -> Result<Frame, Error> {
        let next = self.counter.checked_add(1).ok_or(Error::CounterOverflow)?;

        let mut frame = [0u8; FRAME_SIZE];
        frame[..data.len()].copy_from_slice(data);
        frame[MAX_DATA_SIZE..CIPHERTEXT_SIZE].copy_from_slice(&length.to_be_bytes());
        self.keystream().apply_keystream(&mut frame[..CIPHERTEXT_SIZE]);
        let tag = self.mac(&frame[..CIPHERTEXT_SIZE]).finalize().into_bytes();
        frame[CIPHERTEXT_SIZE..].copy_from_slice(&tag);

        self.counter = next;
        Ok(frame)
    }

    /// Authenticate and decrypt `frame` in place, returning the data it carries.
    ///
    /// A frame that fails authentication leaves the counter untouched. A frame that
    /// authenticates but carries an out-of-range length still consumes a counter value.
    pub fn decrypt<'a>(&mut self, frame: &'a mut Frame) -> Result<&'a [u8], Error> {
        let (body, tag) = frame.split_at_mut(CIPHERTEXT_SIZE);
        self.mac(body)
            .verify_slice(tag)
            .map_err(|_| Error::AuthenticationFailed)?;
        self.keystream().apply_keystream(body);
        self.counter = self.counter.checked_add(1).ok_or(Error::CounterOverflow)?;

        let mut length = [0u8; 4];
        length.copy_from_slice(&body[MAX_DATA_SIZE..]);
        let length = u32::from_be_bytes(length);
        if length == 0 || length as usize > MAX_DATA_SIZE {
            return Err(Error::InvalidLength(length));
        }
        Ok(&body[..length as usize])
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet")
            .field("keys", &"[REDACTED]")
            .field("counter", &self.counter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::{BlockEncrypt as _, KeyInit};
    use sha2::Digest as _;
    use test_case::test_case;

    fn pair() -> (KeySet, KeySet) {
        let mut material = [0u8; KEY_MATERIAL_LENGTH];
        for (i, byte) in material.iter_mut().enumerate() {
            *byte = i as u8;
        }
        (KeySet::new(&material), KeySet::new(&material))
    }

    #[test_case(1; "one byte")]
    #[test_case(10; "short")]
    #[test_case(MAX_DATA_SIZE - 1; "almost full")]
    #[test_case(MAX_DATA_SIZE; "full")]
    fn test_round_trip(len: usize) {
        let (mut sender, mut receiver) = pair();
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

        let mut frame = sender.encrypt(&data).unwrap();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(sender.counter(), 1);
        assert_eq!(receiver.decrypt(&mut frame).unwrap(), &data[..]);
        assert_eq!(receiver.counter(), 1);
    }

    #[test]
    fn test_padding_is_zero() {
        let (mut sender, mut receiver) = pair();
        let mut frame = sender.encrypt(b"abc").unwrap();
        receiver.decrypt(&mut frame).unwrap();
        assert!(frame[3..MAX_DATA_SIZE].iter().all(|byte| *byte == 0));
        assert_eq!(&frame[MAX_DATA_SIZE..CIPHERTEXT_SIZE], &3u32.to_be_bytes());
    }

    #[test]
    fn test_counter_changes_ciphertext() {
        let (mut sender, _) = pair();
        let first = sender.encrypt(b"same").unwrap();
        let second = sender.encrypt(b"same").unwrap();
        assert_ne!(first[..], second[..]);
        assert_eq!(sender.counter(), 2);
    }

    #[test]
    fn test_sequence() {
        let (mut sender, mut receiver) = pair();
        for i in 0..100u64 {
            let data = i.to_be_bytes();
            let mut frame = sender.encrypt(&data).unwrap();
            assert_eq!(receiver.decrypt(&mut frame).unwrap(), &data[..]);
        }
        assert_eq!(sender.counter(), 100);
        assert_eq!(receiver.counter(), 100);
    }

    #[test]
    fn test_any_bit_flip_rejected() {
        let (mut sender, receiver) = pair();
        let frame = sender.encrypt(b"flip me").unwrap();
        for bit in 0..FRAME_SIZE * 8 {
            let mut tampered = frame;
            tampered[bit / 8] ^= 1 << (bit % 8);
            let mut receiver = receiver.clone();
            assert!(matches!(
                receiver.decrypt(&mut tampered),
                Err(Error::AuthenticationFailed)
            ));
            assert_eq!(receiver.counter(), 0);
        }
    }

    #[test]
    fn test_failure_does_not_advance() {
        let (mut sender, mut receiver) = pair();
        let good = sender.encrypt(b"good").unwrap();
        let mut bad = good;
        bad[0] ^= 1;
        assert!(receiver.decrypt(&mut bad).is_err());

        // The untampered frame still decrypts at the same counter.
        let mut good = good;
        assert_eq!(receiver.decrypt(&mut good).unwrap(), b"good");
    }

    #[test]
    fn test_replay_rejected() {
        let (mut sender, mut receiver) = pair();
        let frame = sender.encrypt(b"once").unwrap();
        let mut first = frame;
        receiver.decrypt(&mut first).unwrap();
        let mut replay = frame;
        assert!(matches!(
            receiver.decrypt(&mut replay),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_reorder_rejected() {
        let (mut sender, mut receiver) = pair();
        let _first = sender.encrypt(b"first").unwrap();
        let mut second = sender.encrypt(b"second").unwrap();
        assert!(matches!(
            receiver.decrypt(&mut second),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let (mut sender, _) = pair();
        let mut receiver = KeySet::new(&[0xAA; KEY_MATERIAL_LENGTH]);
        let mut frame = sender.encrypt(b"data").unwrap();
        assert!(matches!(
            receiver.decrypt(&mut frame),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test_case(0; "zero")]
    #[test_case(MAX_DATA_SIZE as u32 + 1; "one too many")]
    #[test_case(u32::MAX; "max")]
    fn test_invalid_length_rejected(length: u32) {
        let (mut sender, mut receiver) = pair();
        let mut frame = sender.seal(b"payload", length).unwrap();
        assert!(matches!(
            receiver.decrypt(&mut frame),
            Err(Error::InvalidLength(invalid)) if invalid == length
        ));

        // The frame authenticated, so its counter value is spent.
        assert_eq!(receiver.counter(), 1);
    }

    #[test]
    #[should_panic(expected = "frame data too large")]
    fn test_oversized_data_panics() {
        let (mut sender, _) = pair();
        let _ = sender.encrypt(&[0u8; MAX_DATA_SIZE + 1]);
    }

    #[test]
    fn test_counter_overflow() {
        let (mut sender, _) = pair();
        sender.counter = u64::MAX;
        assert!(matches!(
            sender.encrypt(b"late"),
            Err(Error::CounterOverflow)
        ));
        assert_eq!(sender.counter(), u64::MAX);
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    #[test]
    fn test_frame_known_answer() {
        let (mut sender, _) = pair();
        let first = sender.encrypt(b"abc").unwrap();
        let second = sender.encrypt(b"abc").unwrap();

        assert_eq!(hex(&first[..16]), "93f263b62a499fd0a9f39a6add2e7780");
        assert_eq!(hex(&first[MAX_DATA_SIZE..CIPHERTEXT_SIZE]), "1ff19342");
        assert_eq!(
            hex(&first[CIPHERTEXT_SIZE..]),
            "612427d5e31f7004ff1629234c676c174c913b64f9da7881e729ca43a690b682"
        );
        assert_eq!(
            hex(&Sha256::digest(&first[..])),
            "9830fd020cbb87b90782516d713df30d2e6abf69ec81be570e35726e73f9ca6d"
        );
        assert_eq!(
            hex(&second[CIPHERTEXT_SIZE..]),
            "81bb4b76e1f7208df1e49507d55ab9ea28bb402ef5931de01242a2ea69281766"
        );
        assert_eq!(
            hex(&Sha256::digest(&second[..])),
            "da73e665524349c71bc3210be62025837fae132a6718eefa88b4834b141b2778"
        );
    }

    /// Rebuild each frame from the raw AES block function and HMAC.
    #[test]
    fn test_frame_layout() {
        let material: [u8; KEY_MATERIAL_LENGTH] = std::array::from_fn(|i| i as u8 * 3);
        let (cipher_key, mac_key) = material.split_at(CIPHER_KEY_LENGTH);
        let block = <Aes256 as KeyInit>::new(GenericArray::from_slice(cipher_key));
        let mut sender = KeySet::new(&material);

        for counter in 0..3u64 {
            let data = [counter as u8 + 1; 100];
            let frame = sender.encrypt(&data).unwrap();

            let mut plaintext = [0u8; CIPHERTEXT_SIZE];
            plaintext[..data.len()].copy_from_slice(&data);
            plaintext[MAX_DATA_SIZE..].copy_from_slice(&(data.len() as u32).to_be_bytes());
            for (index, chunk) in plaintext.chunks(16).enumerate() {
                let mut iv = [0u8; 16];
                iv[..8].copy_from_slice(&counter.to_be_bytes());
                iv[8..].copy_from_slice(&(index as u64).to_be_bytes());
                let mut keystream = GenericArray::clone_from_slice(&iv);
                block.encrypt_block(&mut keystream);
                for (offset, byte) in chunk.iter().enumerate() {
                    assert_eq!(frame[index * 16 + offset], byte ^ keystream[offset]);
                }
            }

            let mut mac = <HmacSha256 as hmac::Mac>::new_from_slice(mac_key).unwrap();
            mac.update(&frame[..CIPHERTEXT_SIZE]);
            mac.update(&counter.to_be_bytes());
            mac.verify_slice(&frame[CIPHERTEXT_SIZE..]).unwrap();
        }
    }

    #[test]
    fn test_debug_redacts() {
        let (sender, _) = pair();
        assert_eq!(
            format!("{sender:?}"),
            "KeySet { keys: \"[REDACTED]\", counter: 0 }"
        );
    }
}
