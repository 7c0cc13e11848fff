//! # keyseal
//!
//! Public-key file encryption with RSA key pairs and a layered, OpenPGP-style message format.
//!
//! ## Algorithm Suite
//!
//! - **Key pairs:** RSA (default 1024 bits, exponent 0x13), self-certified with PKCS#1 v1.5 / SHA-256
//! - **Session key wrap:** RSA PKCS#1 v1.5
//! - **Payload encryption:** AES-128/192/256 in CFB mode, HMAC-SHA-256 integrity tag
//! - **Secret keys at rest:** Argon2id + XChaCha20-Poly1305
//! - **Wire format:** CBOR packets, optionally ASCII-armored
//!
//! ## Message layers
//!
//! ```text
//! armor > encrypted data list (session keys + payload) > compressed data > literal data
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use keyseal::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let pair = generate_key_pair("alice@example.com", "passphrase", &KeyGenOptions::default())?;
//!
//! let public = load_public_ring(&pair.public_key)?;
//! let recipient = find_encryption_key(&public)?;
//! let message = encrypt_bytes(b"attack at dawn", "orders.txt", recipient, &EncryptOptions::default())?;
//!
//! let secret = load_secret_ring(&pair.secret_key)?;
//! let literal = decrypt(&message, &secret, "passphrase")?;
//! assert_eq!(literal.data, b"attack at dawn");
//! assert_eq!(literal.file_name, "orders.txt");
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Considerations
//!
//! - Signatures inside decrypted messages are skipped, never verified
//! - A [`KeysealError::Integrity`] result means the decrypted output must be discarded
//! - Unlocked private keys are scoped to one operation and zeroized on drop

pub mod armor;
mod compression;
pub mod crypto;
mod decoder;
mod encoder;
mod errors;
mod files;
mod keygen;
mod keyring;
mod types;

pub use decoder::{
    decrypt, decrypt_message, decrypt_to_path, resolve_output_path, DecryptedMessage, MessageShape,
};
pub use encoder::{encrypt, encrypt_bytes, encrypt_payload, EncryptOptions};
pub use errors::{KeysealError, Result};
pub use files::{
    decrypt_file, encrypt_file, generate_key_pair_files, DEFAULT_PUBLIC_KEY_FILE,
    DEFAULT_SECRET_KEY_FILE,
};
pub use keygen::{
    export_key_pair, generate_key_pair, GeneratedKeyPair, KeyGenOptions, DEFAULT_KEY_SIZE_BITS,
    DEFAULT_PUBLIC_EXPONENT,
};
pub use keyring::{
    find_encryption_key, find_secret_key_by_id, find_signing_key, format_key_id, load_public_ring,
    load_secret_ring, unlock_private_key, Capabilities, Key, KeyKind, KeyRing, KeyRingBundle,
    PrivateKey,
};
pub use crypto::IntegrityStatus;
pub use types::*;
