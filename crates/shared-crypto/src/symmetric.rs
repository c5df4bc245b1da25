//! # Symmetric Encryption
//!
//! AES-256 in CTR mode, used for stream content and for encrypting the next
//! group key under the current one.
//!
//! ## Format
//!
//! ```text
//! [iv: 16][ciphertext: N]
//! ```
//!
//! CTR mode provides confidentiality only. A wrong key does not fail
//! decryption; it yields unrelated bytes. Integrity comes from the publisher
//! signature over the whole message.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use crate::CryptoError;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// IV length in bytes.
pub const IV_LENGTH: usize = 16;

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Returns `iv || ciphertext`.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyLength` if `key` is not 32 bytes.
pub fn encrypt_with_aes(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut cipher = new_cipher(key, &iv)?;

    let mut output = Vec::with_capacity(IV_LENGTH + plaintext.len());
    output.extend_from_slice(&iv);
    output.extend_from_slice(plaintext);
    cipher.apply_keystream(&mut output[IV_LENGTH..]);

    Ok(output)
}

/// Decrypt `iv || ciphertext` produced by [`encrypt_with_aes`].
///
/// # Errors
///
/// Returns `CryptoError::MalformedCiphertext` if the input is shorter than an
/// IV and `CryptoError::InvalidKeyLength` if `key` is not 32 bytes.
pub fn decrypt_with_aes(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < IV_LENGTH {
        return Err(CryptoError::MalformedCiphertext(format!(
            "expected at least {} bytes, got {}",
            IV_LENGTH,
            ciphertext.len()
        )));
    }

    let (iv, body) = ciphertext.split_at(IV_LENGTH);
    let mut cipher = new_cipher(key, iv)?;

    let mut plaintext = body.to_vec();
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

fn new_cipher(key: &[u8], iv: &[u8]) -> Result<Aes256Ctr, CryptoError> {
    if key.len() != KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: key.len(),
        });
    }
    Aes256Ctr::new_from_slices(key, iv)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}
