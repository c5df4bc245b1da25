//! # RSA Key Wrapping
//!
//! Group keys travel to a single subscriber RSA-OAEP encrypted under the
//! public key that subscriber put in its key request. Public keys are
//! exchanged as SPKI PEM strings, ciphertexts as hex.

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use shared_types::EncryptedGroupKey;

use crate::{CryptoError, GroupKey};

/// Local RSA key pair used to receive wrapped group keys.
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl RsaKeyPair {
    /// Generate a new key pair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;

        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// SPKI PEM encoding of the public half.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decrypt a hex ciphertext produced by [`encrypt_with_public_key`].
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = hex::decode(ciphertext_hex)
            .map_err(|e| CryptoError::MalformedCiphertext(e.to_string()))?;
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), &ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Recover a group key wrapped with [`wrap_group_key`].
    pub fn unwrap_group_key(&self, encrypted: &EncryptedGroupKey) -> Result<GroupKey, CryptoError> {
        let data = self.decrypt(&encrypted.encrypted_group_key_hex)?;
        GroupKey::new(encrypted.group_key_id.clone(), &data)
    }
}

/// RSA-OAEP encrypt `plaintext` for the holder of `public_key_pem`.
///
/// Returns the hex-encoded ciphertext.
pub fn encrypt_with_public_key(plaintext: &[u8], public_key_pem: &str) -> Result<String, CryptoError> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let ciphertext = public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    Ok(hex::encode(ciphertext))
}

/// Wrap `key` for the holder of `public_key_pem`.
pub fn wrap_group_key(key: &GroupKey, public_key_pem: &str) -> Result<EncryptedGroupKey, CryptoError> {
    let ciphertext_hex = encrypt_with_public_key(key.as_bytes(), public_key_pem)?;
    Ok(EncryptedGroupKey::new(key.id(), ciphertext_hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small modulus keeps debug-build key generation fast; OAEP-SHA256 still
    // fits a 32-byte key (limit 1024/8 - 66 = 62 bytes).
    const TEST_BITS: usize = 1024;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let pair = RsaKeyPair::generate(TEST_BITS).unwrap();
        let key = GroupKey::generate();

        let wrapped = wrap_group_key(&key, pair.public_key_pem()).unwrap();
        assert_eq!(wrapped.group_key_id, key.id());

        let unwrapped = pair.unwrap_group_key(&wrapped).unwrap();
        assert_eq!(unwrapped, key);
    }

    #[test]
    fn test_other_private_key_cannot_unwrap() {
        let alice = RsaKeyPair::generate(TEST_BITS).unwrap();
        let bob = RsaKeyPair::generate(TEST_BITS).unwrap();
        let key = GroupKey::generate();

        let wrapped = wrap_group_key(&key, alice.public_key_pem()).unwrap();
        assert!(bob.unwrap_group_key(&wrapped).is_err());
    }

    #[test]
    fn test_rejects_garbage_public_key() {
        let result = encrypt_with_public_key(b"data", "not a pem");
        assert!(matches!(result, Err(CryptoError::InvalidPublicKey(_))));
    }

    #[test]
    fn test_rejects_non_hex_ciphertext() {
        let pair = RsaKeyPair::generate(TEST_BITS).unwrap();
        assert!(matches!(
            pair.decrypt("zz"),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }
}
