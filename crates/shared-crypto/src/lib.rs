//! # Shared Crypto - Stream Encryption Primitives
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `symmetric` | AES-256-CTR | Content and next-key encryption |
//! | `group_key` | 256-bit group keys | Rotating stream keys |
//! | `key_wrap` | RSA-OAEP (SHA-256) | Delivering group keys to one subscriber |
//! | `ecdsa` | secp256k1 + Keccak-256 | Signing protocol messages, address recovery |
//! | `key_store` | concurrent map | Shared `(stream, key id) -> GroupKey` store |
//!
//! ## Security Properties
//!
//! - **AES-CTR**: fresh random 128-bit IV per encryption, prepended to the ciphertext
//! - **RSA-OAEP**: SHA-256 digest and MGF1
//! - **secp256k1**: RFC 6979 deterministic, recoverable signatures (`v` = 27/28)
//! - Group key material is zeroized on drop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ecdsa;
pub mod errors;
pub mod group_key;
pub mod key_store;
pub mod key_wrap;
pub mod symmetric;

// Re-exports
pub use ecdsa::{keccak256, recover_address, verify_signature, Secp256k1KeyPair};
pub use errors::CryptoError;
pub use group_key::GroupKey;
pub use key_store::{GroupKeyStore, InMemoryGroupKeyStore};
pub use key_wrap::{encrypt_with_public_key, wrap_group_key, RsaKeyPair};
pub use symmetric::{decrypt_with_aes, encrypt_with_aes};
