//! # ECDSA Signatures (secp256k1)
//!
//! Publishers and subscribers are identified by Ethereum-style addresses. A
//! signature is verified by recovering the signer's public key from it and
//! comparing the derived address with the claimed one.
//!
//! ## Signature Format
//!
//! ```text
//! [r: 32][s: 32][v: 1]    v = 27 + recovery id
//! ```
//!
//! The signed digest is `keccak256(payload)`.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use shared_types::Address;

use crate::CryptoError;

/// Length of an encoded recoverable signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// secp256k1 ECDSA keypair bound to an address.
///
/// The secret scalar is zeroized on drop by `SigningKey`.
pub struct Secp256k1KeyPair {
    signing_key: SigningKey,
    address: Address,
}

impl Secp256k1KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_from_pubkey(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `payload` (deterministic RFC 6979) and return `r || s || v`.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let digest = keccak256(payload);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| CryptoError::InvalidSignature)?;

        let mut encoded = Vec::with_capacity(SIGNATURE_LENGTH);
        encoded.extend_from_slice(&signature.to_bytes());
        encoded.push(27 + recovery_id.to_byte());
        Ok(encoded)
    }
}

/// Recover the signer's address from a `r || s || v` signature over `payload`.
pub fn recover_address(payload: &[u8], signature: &[u8]) -> Result<Address, CryptoError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignature);
    }

    let recovery_id = parse_recovery_id(signature[64])?;
    let sig = Signature::from_slice(&signature[..64]).map_err(|_| CryptoError::InvalidSignature)?;

    let digest = keccak256(payload);
    let recovered_key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;

    Ok(address_from_pubkey(&recovered_key))
}

/// Whether `signature` over `payload` was produced by `address`.
pub fn verify_signature(address: &Address, payload: &[u8], signature: &[u8]) -> bool {
    matches!(recover_address(payload, signature), Ok(recovered) if recovered == *address)
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Keccak256 hash function.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive Ethereum address from public key.
pub fn address_from_pubkey(public_key: &VerifyingKey) -> Address {
    let pubkey_bytes = public_key.to_encoded_point(false);
    let pubkey_slice = pubkey_bytes.as_bytes();

    // Keccak256 hash of public key (without 0x04 prefix)
    let hash = keccak256(&pubkey_slice[1..]);

    // Take last 20 bytes as address
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    Address::new(address)
}

/// Parse recovery ID from v value.
///
/// Valid v values: 0, 1, 27, 28
fn parse_recovery_id(v: u8) -> Result<RecoveryId, CryptoError> {
    let id = match v {
        0 | 27 => 0,
        1 | 28 => 1,
        _ => return Err(CryptoError::InvalidRecoveryId(v)),
    };

    RecoveryId::from_byte(id).ok_or(CryptoError::InvalidRecoveryId(v))
}
