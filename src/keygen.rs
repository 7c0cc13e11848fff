//! Key pair generation.
//!
//! A generated key pair is one RSA primary key, usable for encryption and signing, bound to a single
//! identity by a self-certification. It is emitted as two streams:
//!
//! - secret: `SecretKey UserId Signature`
//! - public: `PublicKey UserId Signature`

use std::io::Write;

use tracing::info;
use zeroize::Zeroizing;

use crate::armor::{self, ArmorType};
use crate::crypto;
use crate::errors::{KeysealError, Result};
use crate::keyring::{certification_input, format_key_id};
use crate::types::*;

pub const DEFAULT_KEY_SIZE_BITS: usize = 1024;
pub const DEFAULT_PUBLIC_EXPONENT: u64 = 0x13;

const MIN_KEY_SIZE_BITS: usize = 1024;
const MAX_KEY_SIZE_BITS: usize = 4096;

#[derive(Clone, Debug)]
pub struct KeyGenOptions {
    pub key_size_bits: usize,
    pub public_exponent: u64,
    /// Armor both outputs.
    pub armor: bool,
    /// Cost of deriving the key that protects the secret material.
    pub kdf: KdfParams,
}

impl Default for KeyGenOptions {
    fn default() -> Self {
        Self {
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            public_exponent: DEFAULT_PUBLIC_EXPONENT,
            armor: true,
            kdf: KdfParams::default(),
        }
    }
}

/// Encoded secret and public key streams of a freshly generated key pair.
#[derive(Clone, Debug)]
pub struct GeneratedKeyPair {
    pub key_id: u64,
    pub secret_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

fn validate(identity: &str, passphrase: &str, options: &KeyGenOptions) -> Result<()> {
    if identity.trim().is_empty() {
        return Err(KeysealError::validation("identity must not be empty"));
    }
    if passphrase.is_empty() {
        return Err(KeysealError::validation("passphrase must not be empty"));
    }
    if !(MIN_KEY_SIZE_BITS..=MAX_KEY_SIZE_BITS).contains(&options.key_size_bits) {
        return Err(KeysealError::validation(format!(
            "key size must be between {MIN_KEY_SIZE_BITS} and {MAX_KEY_SIZE_BITS} bits, got {}",
            options.key_size_bits
        )));
    }
    if options.public_exponent < 3 || options.public_exponent % 2 == 0 {
        return Err(KeysealError::validation(format!(
            "public exponent must be odd and at least 3, got {:#x}",
            options.public_exponent
        )));
    }
    Ok(())
}

pub fn generate_key_pair(
    identity: &str,
    passphrase: &str,
    options: &KeyGenOptions,
) -> Result<GeneratedKeyPair> {
    validate(identity, passphrase, options)?;

    info!(bits = options.key_size_bits, "generating rsa key pair");
    let private = crypto::generate_rsa_keypair(options.key_size_bits, options.public_exponent)?;
    let created_unix = unix_now();

    let public = PublicKeyBody {
        version: KEY_VERSION,
        created_unix,
        algorithm: PublicKeyAlgorithm::RsaGeneral,
        rsa: crypto::public_params(&private.to_public_key()),
    };
    let key_id = public.key_id()?;

    let user_id = UserId {
        id: identity.to_string(),
    };
    let certification = Signature {
        signature_type: SignatureType::PositiveCertification,
        issuer: key_id,
        created_unix,
        signature: crypto::certify(
            &private,
            &certification_input(&public, &user_id, created_unix)?,
        )?,
    };

    let material = Zeroizing::new(to_cbor(&crypto::secret_params(&private)?)?);
    let (protection, encrypted_material) =
        crypto::protect_secret(&material, passphrase, &to_cbor(&public)?, options.kdf)?;
    let secret = SecretKeyBody {
        public: public.clone(),
        protection,
        encrypted_material,
    };

    let secret_stream = encode_packets(&[
        Packet::SecretKey(secret),
        Packet::UserId(user_id.clone()),
        Packet::Signature(certification.clone()),
    ])?;
    let public_stream = encode_packets(&[
        Packet::PublicKey(public),
        Packet::UserId(user_id),
        Packet::Signature(certification),
    ])?;

    let (secret_key, public_key) = if options.armor {
        let headers = [armor::version_header()];
        (
            armor::armor_encode(ArmorType::PrivateKeyBlock, &headers, &secret_stream).into_bytes(),
            armor::armor_encode(ArmorType::PublicKeyBlock, &headers, &public_stream).into_bytes(),
        )
    } else {
        (secret_stream, public_stream)
    };

    info!(key_id = %format_key_id(key_id), "generated key pair");
    Ok(GeneratedKeyPair {
        key_id,
        secret_key,
        public_key,
    })
}

/// Generate a key pair and write it to two sinks, secret first.
///
/// The two writes are not transactional: if the public sink fails, the secret key has already been
/// written. Returns the new key's ID.
pub fn export_key_pair<S: Write, P: Write>(
    secret_out: &mut S,
    public_out: &mut P,
    identity: &str,
    passphrase: &str,
    options: &KeyGenOptions,
) -> Result<u64> {
    let pair = generate_key_pair(identity, passphrase, options)?;
    secret_out.write_all(&pair.secret_key)?;
    secret_out.flush()?;
    public_out.write_all(&pair.public_key)?;
    public_out.flush()?;
    Ok(pair.key_id)
}
