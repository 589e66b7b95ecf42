//! Channel key engine — PSK expansion, channel-hint hashing, and the
//! AES-CTR transform applied to packet payloads.
//!
//! Keys travel as base64. A decoded key of 0 bytes (or the single byte
//! 0x00) means "no encryption"; a single non-zero byte is shorthand for
//! the well-known 16-byte base key with its last byte swapped; 16 or 32
//! bytes are used verbatim and select AES-128 or AES-256.
//!
//! CTR mode is length-preserving and never fails on its own — a wrong
//! key is only discovered when the output refuses to parse as `Data`.

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use thiserror::Error;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// The shorthand default key, `AQ==` — expands to [`BASE_KEY`] as-is.
pub const DEFAULT_PSK: &str = "AQ==";

/// The well-known 16-byte base key that single-byte shorthands build on.
const BASE_KEY: [u8; 16] = [
    0xd4, 0xf1, 0xbb, 0x3a, 0x20, 0x29, 0x07, 0x59, 0xf0, 0xbc, 0xff, 0xab, 0xcf, 0x4e, 0x69,
    0x01,
];

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key is not valid base64: {0}")]
    BadFormat(#[from] base64::DecodeError),

    #[error("decoded key length {0} is not 0, 1, 16, or 32 bytes")]
    BadLength(usize),

    #[error("operation requires a key but the key expands to zero bytes")]
    NoKey,
}

// ── Expansion ─────────────────────────────────────────────────────────────────

/// Expand a base64 PSK to its real symmetric key bytes.
///
/// An empty result means "no encryption"; callers that need a cipher
/// treat it as [`KeyError::NoKey`].
pub fn expand_psk(psk_base64: &str) -> Result<Vec<u8>, KeyError> {
    let decoded = BASE64.decode(psk_base64)?;
    match decoded.len() {
        0 => Ok(Vec::new()),
        1 if decoded[0] == 0 => Ok(Vec::new()),
        1 => {
            let mut key = BASE_KEY;
            key[15] = decoded[0];
            Ok(key.to_vec())
        }
        16 | 32 => Ok(decoded),
        other => Err(KeyError::BadLength(other)),
    }
}

// ── Channel hint ──────────────────────────────────────────────────────────────

/// The advisory channel-hint hash carried on every packet:
/// `XOR(name bytes) ^ XOR(expanded key bytes)`.
pub fn channel_hash(name: &str, psk_base64: &str) -> Result<u32, KeyError> {
    let key = expand_psk(psk_base64)?;
    Ok(u32::from(xor_bytes(name.as_bytes()) ^ xor_bytes(&key)))
}

fn xor_bytes(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

// ── Cipher ────────────────────────────────────────────────────────────────────

/// Encrypt a payload under a PSK. Fails `NoKey` when the key expands to
/// zero bytes — callers send such payloads in the clear instead.
pub fn encrypt(
    plaintext: &[u8],
    psk_base64: &str,
    packet_id: u32,
    from_node: u32,
) -> Result<Vec<u8>, KeyError> {
    transform(plaintext, psk_base64, packet_id, from_node)
}

/// Decrypt a payload under a PSK. CTR is its own inverse, so this is the
/// same keystream application as [`encrypt`].
pub fn decrypt(
    ciphertext: &[u8],
    psk_base64: &str,
    packet_id: u32,
    from_node: u32,
) -> Result<Vec<u8>, KeyError> {
    transform(ciphertext, psk_base64, packet_id, from_node)
}

fn transform(
    input: &[u8],
    psk_base64: &str,
    packet_id: u32,
    from_node: u32,
) -> Result<Vec<u8>, KeyError> {
    let key = expand_psk(psk_base64)?;
    if key.is_empty() {
        return Err(KeyError::NoKey);
    }
    let iv = nonce(packet_id, from_node);
    let mut buf = input.to_vec();
    match key.len() {
        16 => {
            let mut cipher = Aes128Ctr::new_from_slices(&key, &iv)
                .map_err(|_| KeyError::BadLength(key.len()))?;
            cipher.apply_keystream(&mut buf);
        }
        32 => {
            let mut cipher = Aes256Ctr::new_from_slices(&key, &iv)
                .map_err(|_| KeyError::BadLength(key.len()))?;
            cipher.apply_keystream(&mut buf);
        }
        other => return Err(KeyError::BadLength(other)),
    }
    Ok(buf)
}

/// The deterministic 16-byte nonce: packet id LE at offset 0, four zero
/// bytes, sending node LE at offset 8, four zero bytes.
fn nonce(packet_id: u32, from_node: u32) -> [u8; 16] {
    let mut nonce = [0u8; 16];
    nonce[0..4].copy_from_slice(&packet_id.to_le_bytes());
    nonce[8..12].copy_from_slice(&from_node.to_le_bytes());
    nonce
}

// ── Packet ids ────────────────────────────────────────────────────────────────

/// Fresh uniformly-random packet identifier.
pub fn generate_packet_id() -> u32 {
    rand::thread_rng().next_u32()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
