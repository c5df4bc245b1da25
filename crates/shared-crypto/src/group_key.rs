//! # Group Keys
//!
//! A group key is the symmetric key a publisher encrypts stream content with.
//! Keys rotate over time; subscribers identify the key of each message by its
//! `group_key_id`.

use std::fmt;

use rand::RngCore;
use shared_types::EncryptedGroupKey;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::symmetric::{decrypt_with_aes, encrypt_with_aes, KEY_LENGTH};
use crate::CryptoError;

/// Symmetric 256-bit stream key with its id.
///
/// Immutable once constructed. Key material is zeroized on drop and redacted
/// from `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey {
    id: String,
    data: [u8; KEY_LENGTH],
}

impl GroupKey {
    /// Create a key from its id and raw material.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeyLength` unless `data` is exactly 256 bits.
    pub fn new(id: impl Into<String>, data: &[u8]) -> Result<Self, CryptoError> {
        let data: [u8; KEY_LENGTH] = data.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LENGTH,
            actual: data.len(),
        })?;
        Ok(Self {
            id: id.into(),
            data,
        })
    }

    /// Generate a random key with a fresh UUID id.
    pub fn generate() -> Self {
        Self::generate_with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Generate random key material under a caller-chosen id.
    pub fn generate_with_id(id: impl Into<String>) -> Self {
        let mut data = [0u8; KEY_LENGTH];
        rand::thread_rng().fill_bytes(&mut data);
        Self {
            id: id.into(),
            data,
        }
    }

    /// Key id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw key material.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.data
    }

    /// Encrypt message content under this key.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        encrypt_with_aes(plaintext, &self.data)
    }

    /// Decrypt message content encrypted under this key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        decrypt_with_aes(ciphertext, &self.data)
    }

    /// Encrypt `next` under this key, for piggy-backing a rotation on a data
    /// message or for an AES announce.
    pub fn encrypt_next_key(&self, next: &GroupKey) -> Result<EncryptedGroupKey, CryptoError> {
        let ciphertext = self.encrypt(next.as_bytes())?;
        Ok(EncryptedGroupKey::new(next.id(), hex::encode(ciphertext)))
    }

    /// Recover a key previously encrypted with [`GroupKey::encrypt_next_key`].
    pub fn decrypt_next_key(&self, encrypted: &EncryptedGroupKey) -> Result<GroupKey, CryptoError> {
        let ciphertext = hex::decode(&encrypted.encrypted_group_key_hex)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        let data = self.decrypt(&ciphertext)?;
        GroupKey::new(encrypted.group_key_id.clone(), &data)
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.data == other.data
    }
}

impl Eq for GroupKey {}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupKey")
            .field("id", &self.id)
            .field("data", &"<redacted>")
            .finish()
    }
}
