//! Cryptographic provider: the fixed entry points the encoder, decoder and key generator call.
//!
//! - RSA key generation, PKCS#1 v1.5 session-key wrapping and certification signatures
//! - AES in CFB mode for message payloads, with an optional HMAC-SHA-256 integrity tag
//! - Argon2id + XChaCha20-Poly1305 protection of secret key material at rest

use aes::cipher::{AsyncStreamCipher, InvalidLength, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::errors::{KeysealError, Result};
use crate::types::*;

type HmacSha256 = Hmac<Sha256>;

const INTEGRITY_INFO: &[u8] = b"keyseal payload integrity v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Flag bit in the wrapped session-key block: the payload must carry an integrity tag.
const FLAG_INTEGRITY: u8 = 0x01;

/// Symmetric session key together with the cipher it is meant for.
///
/// Whether the payload carries an integrity tag travels with the key, inside the wrapped block, so
/// removing the tag from the payload cannot go unnoticed.
pub struct SessionKey {
    algorithm: SymmetricAlgorithm,
    integrity_protected: bool,
    key: Zeroizing<Vec<u8>>,
}

impl SessionKey {
    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    pub fn integrity_protected(&self) -> bool {
        self.integrity_protected
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("algorithm", &self.algorithm)
            .field("integrity_protected", &self.integrity_protected)
            .finish_non_exhaustive()
    }
}

/// Outcome of checking a payload's integrity tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// The payload carried no tag.
    NotProtected,
    Verified,
    Failed,
}

/// Plaintext recovered from an [`EncryptedPayload`].
#[derive(Debug)]
pub struct DecryptedPayload {
    pub plaintext: Vec<u8>,
    pub integrity: IntegrityStatus,
}

/* ---------------- RSA ---------------- */

pub fn generate_rsa_keypair(bits: usize, public_exponent: u64) -> Result<RsaPrivateKey> {
    let exponent = BigUint::from(public_exponent);
    RsaPrivateKey::new_with_exp(&mut OsRng, bits, &exponent)
        .map_err(|e| KeysealError::crypto_with("rsa key generation", e))
}

pub fn public_params(key: &RsaPublicKey) -> RsaPublicParams {
    RsaPublicParams {
        n: key.n().to_bytes_be(),
        e: key.e().to_bytes_be(),
    }
}

pub fn rsa_public_key(params: &RsaPublicParams) -> Result<RsaPublicKey> {
    RsaPublicKey::new(
        BigUint::from_bytes_be(&params.n),
        BigUint::from_bytes_be(&params.e),
    )
    .map_err(|e| KeysealError::format(format!("rsa public key: {e}")))
}

pub(crate) fn secret_params(key: &RsaPrivateKey) -> Result<RsaSecretParams> {
    let [p, q] = key.primes() else {
        return Err(KeysealError::crypto("rsa key must have exactly two primes"));
    };
    Ok(RsaSecretParams {
        d: key.d().to_bytes_be(),
        p: p.to_bytes_be(),
        q: q.to_bytes_be(),
    })
}

pub(crate) fn rsa_private_key(
    public: &RsaPublicParams,
    secret: &RsaSecretParams,
) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_components(
        BigUint::from_bytes_be(&public.n),
        BigUint::from_bytes_be(&public.e),
        BigUint::from_bytes_be(&secret.d),
        vec![
            BigUint::from_bytes_be(&secret.p),
            BigUint::from_bytes_be(&secret.q),
        ],
    )
    .map_err(|e| KeysealError::crypto_with("rsa private key components", e))
}

/* ---------------- Session keys ---------------- */

pub fn generate_session_key(algorithm: SymmetricAlgorithm, integrity_protected: bool) -> SessionKey {
    let mut key = Zeroizing::new(vec![0u8; algorithm.key_size()]);
    OsRng.fill_bytes(&mut key);
    SessionKey {
        algorithm,
        integrity_protected,
        key,
    }
}

fn checksum(key: &[u8]) -> u16 {
    key.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// Encrypt `algorithm id || flags || key || checksum` to the recipient.
pub fn wrap_session_key(recipient: &RsaPublicKey, session_key: &SessionKey) -> Result<Vec<u8>> {
    let flags = if session_key.integrity_protected {
        FLAG_INTEGRITY
    } else {
        0
    };
    let mut block = Zeroizing::new(Vec::with_capacity(session_key.key.len() + 4));
    block.push(session_key.algorithm.id());
    block.push(flags);
    block.extend_from_slice(&session_key.key);
    block.extend_from_slice(&checksum(&session_key.key).to_be_bytes());

    recipient
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &block)
        .map_err(|e| KeysealError::crypto_with("session key wrap", e))
}

pub fn unwrap_session_key(private: &RsaPrivateKey, wrapped: &[u8]) -> Result<SessionKey> {
    let block = Zeroizing::new(
        private
            .decrypt(Pkcs1v15Encrypt, wrapped)
            .map_err(|e| KeysealError::crypto_with("session key unwrap", e))?,
    );

    let (&id, rest) = block
        .split_first()
        .ok_or_else(|| KeysealError::crypto("empty session key block"))?;
    let algorithm = SymmetricAlgorithm::from_id(id)
        .ok_or_else(|| KeysealError::crypto(format!("unknown symmetric algorithm id {id}")))?;
    let (&flags, rest) = rest
        .split_first()
        .ok_or_else(|| KeysealError::crypto("session key length"))?;
    if flags & !FLAG_INTEGRITY != 0 {
        return Err(KeysealError::crypto(format!("unknown session key flags {flags:#04x}")));
    }
    if rest.len() != algorithm.key_size() + 2 {
        return Err(KeysealError::crypto("session key length"));
    }

    let (key, sum) = rest.split_at(algorithm.key_size());
    if !bool::from(checksum(key).to_be_bytes()[..].ct_eq(sum)) {
        return Err(KeysealError::crypto("session key checksum"));
    }

    Ok(SessionKey {
        algorithm,
        integrity_protected: flags & FLAG_INTEGRITY != 0,
        key: Zeroizing::new(key.to_vec()),
    })
}

/* ---------------- Symmetric payload ---------------- */

fn cipher_length(_: InvalidLength) -> KeysealError {
    KeysealError::crypto("cipher key or iv length")
}

fn cfb_encrypt(alg: SymmetricAlgorithm, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match alg {
        SymmetricAlgorithm::Aes128 => cfb_mode::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .encrypt(buf),
        SymmetricAlgorithm::Aes192 => cfb_mode::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .encrypt(buf),
        SymmetricAlgorithm::Aes256 => cfb_mode::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .encrypt(buf),
    }
    Ok(())
}

fn cfb_decrypt(alg: SymmetricAlgorithm, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match alg {
        SymmetricAlgorithm::Aes128 => cfb_mode::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .decrypt(buf),
        SymmetricAlgorithm::Aes192 => cfb_mode::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .decrypt(buf),
        SymmetricAlgorithm::Aes256 => cfb_mode::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(cipher_length)?
            .decrypt(buf),
    }
    Ok(())
}

fn integrity_mac(session_key: &SessionKey, iv: &[u8], plaintext: &[u8]) -> Result<HmacSha256> {
    // The IV salts the derivation so each payload gets its own MAC key.
    let hk = Hkdf::<Sha256>::new(Some(iv), &session_key.key);
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(INTEGRITY_INFO, &mut okm[..])
        .map_err(|_| KeysealError::crypto("hkdf expand"))?;
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&okm[..])
        .map_err(|_| KeysealError::crypto("hmac key length"))?;
    mac.update(plaintext);
    Ok(mac)
}

/// Encrypt a payload. It carries an integrity tag exactly when the session key is integrity protected.
pub fn symmetric_encrypt(session_key: &SessionKey, plaintext: &[u8]) -> Result<EncryptedPayload> {
    let mut iv = vec![0u8; session_key.algorithm.block_size()];
    OsRng.fill_bytes(&mut iv);

    let integrity = if session_key.integrity_protected {
        let mac = integrity_mac(session_key, &iv, plaintext)?;
        Some(IntegrityTag {
            mac: mac.finalize().into_bytes().to_vec(),
        })
    } else {
        None
    };

    let mut ciphertext = plaintext.to_vec();
    cfb_encrypt(session_key.algorithm, &session_key.key, &iv, &mut ciphertext)?;

    Ok(EncryptedPayload {
        iv,
        ciphertext,
        integrity,
    })
}

/// Decrypt a payload and report, without acting on it, whether its integrity tag matches.
///
/// A payload missing the tag its session key calls for is reported as [`IntegrityStatus::Failed`].
pub fn symmetric_decrypt(
    session_key: &SessionKey,
    payload: &EncryptedPayload,
) -> Result<DecryptedPayload> {
    if payload.iv.len() != session_key.algorithm.block_size() {
        return Err(KeysealError::crypto("payload iv length"));
    }

    let mut plaintext = payload.ciphertext.clone();
    cfb_decrypt(session_key.algorithm, &session_key.key, &payload.iv, &mut plaintext)?;

    let integrity = match &payload.integrity {
        None if session_key.integrity_protected => IntegrityStatus::Failed,
        None => IntegrityStatus::NotProtected,
        Some(tag) => {
            let mac = integrity_mac(session_key, &payload.iv, &plaintext)?;
            if mac.verify_slice(&tag.mac).is_ok() {
                IntegrityStatus::Verified
            } else {
                IntegrityStatus::Failed
            }
        }
    };

    Ok(DecryptedPayload {
        plaintext,
        integrity,
    })
}

/* ---------------- Secret key protection ---------------- */

fn derive_key(passphrase: &str, salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.m_cost_kib, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| KeysealError::crypto(format!("argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeysealError::crypto(format!("argon2 key derivation: {e}")))?;
    Ok(key)
}

fn aead_enc(key: &[u8; 32], nonce24: &[u8; 24], aad: &[u8], pt: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(XNonce::from_slice(nonce24), Payload { msg: pt, aad })
        .map_err(|_| KeysealError::crypto("aead encryption"))
}

fn aead_dec(key: &[u8; 32], nonce24: &[u8; 24], aad: &[u8], ct: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce24), Payload { msg: ct, aad })
        .map_err(|_| KeysealError::Auth)
}

/// Encrypt secret key material under a passphrase. `aad` binds it to its public key body.
pub fn protect_secret(
    material: &[u8],
    passphrase: &str,
    aad: &[u8],
    kdf: KdfParams,
) -> Result<(SecretKeyProtection, Vec<u8>)> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt, &kdf)?;
    let encrypted = aead_enc(&key, &nonce, aad, material)?;

    let protection = SecretKeyProtection {
        algorithm: ProtectionAlgorithm::Argon2idXChaCha20Poly1305,
        kdf,
        salt: salt.to_vec(),
        nonce: nonce.to_vec(),
    };
    Ok((protection, encrypted))
}

/// Reverse of [`protect_secret`]. A wrong passphrase and tampered material both yield [`KeysealError::Auth`].
pub fn unprotect_secret(
    protection: &SecretKeyProtection,
    encrypted: &[u8],
    passphrase: &str,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let nonce: [u8; NONCE_LEN] = protection
        .nonce
        .as_slice()
        .try_into()
        .map_err(|_| KeysealError::format("secret key nonce"))?;
    let key = derive_key(passphrase, &protection.salt, &protection.kdf)?;
    aead_dec(&key, &nonce, aad, encrypted).map(Zeroizing::new)
}

/* ---------------- Certifications ---------------- */

pub fn certify(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let hashed = Sha256::digest(data);
    private
        .sign(Pkcs1v15Sign::new::<Sha256>(), &hashed)
        .map_err(|e| KeysealError::crypto_with("certification signature", e))
}

pub fn verify_certification(public: &RsaPublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
    let hashed = Sha256::digest(data);
    public
        .verify(Pkcs1v15Sign::new::<Sha256>(), &hashed, signature)
        .map_err(|e| KeysealError::crypto_with("certification verification", e))
}
