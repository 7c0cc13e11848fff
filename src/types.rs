//! Wire format types and serialization utilities.
//!
//! Messages and key rings share one framing: a plain concatenation of CBOR-encoded [`Packet`]s.
//! Every algorithm choice is carried explicitly on the wire so a decoder never has to guess.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::{KeysealError, Result};

/// Version written into every public and secret key body.
pub const KEY_VERSION: u8 = 4;

/// Version written into every session key entry.
pub const SESSION_KEY_VERSION: u8 = 3;

/// Public-key algorithm of a key. Capabilities are derived from it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PublicKeyAlgorithm {
    /// RSA usable for both encryption and signing.
    RsaGeneral,
    RsaEncryptOnly,
    RsaSignOnly,
}

impl PublicKeyAlgorithm {
    pub fn can_encrypt(self) -> bool {
        matches!(self, Self::RsaGeneral | Self::RsaEncryptOnly)
    }

    pub fn can_sign(self) -> bool {
        matches!(self, Self::RsaGeneral | Self::RsaSignOnly)
    }
}

/// Symmetric cipher used for the message payload (CFB mode).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetricAlgorithm {
    #[default]
    Aes128,
    Aes192,
    Aes256,
}

impl SymmetricAlgorithm {
    /// Identifier embedded in the wrapped session key.
    pub fn id(self) -> u8 {
        match self {
            Self::Aes128 => 7,
            Self::Aes192 => 8,
            Self::Aes256 => 9,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            7 => Some(Self::Aes128),
            8 => Some(Self::Aes192),
            9 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Key length in bytes.
    pub fn key_size(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }

    /// Block (and IV) length in bytes.
    pub fn block_size(self) -> usize {
        16
    }
}

/// Compression applied to the literal data before encryption.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionAlgorithm {
    Uncompressed,
    /// Raw deflate.
    #[default]
    Zip,
    Zlib,
}

/// How the literal payload should be interpreted.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DataFormat {
    #[default]
    Binary,
    Text,
    Utf8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureType {
    Binary,
    Text,
    PositiveCertification,
}

/// Algorithm protecting secret key material at rest.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProtectionAlgorithm {
    /// Argon2id key derivation, XChaCha20-Poly1305 encryption.
    #[default]
    Argon2idXChaCha20Poly1305,
}

/// Argon2id cost parameters, stored next to every protected secret key.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost_kib: u32,
    /// Number of passes.
    pub t_cost: u32,
    /// Degree of parallelism.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost_kib: 19_456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// RSA public parameters as big-endian unsigned integers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RsaPublicParams {
    #[serde(with = "serde_bytes")]
    pub n: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub e: Vec<u8>,
}

/// RSA private parameters. Only ever exists in memory, or encrypted inside a [`SecretKeyBody`].
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(deny_unknown_fields)]
pub(crate) struct RsaSecretParams {
    #[serde(with = "serde_bytes")]
    pub d: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub p: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub q: Vec<u8>,
}

/// Public half of a key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PublicKeyBody {
    pub version: u8,
    /// Creation time, unix seconds.
    pub created_unix: u64,
    pub algorithm: PublicKeyAlgorithm,
    pub rsa: RsaPublicParams,
}

impl PublicKeyBody {
    /// SHA-256 over the canonical encoding of this body.
    pub fn fingerprint(&self) -> Result<[u8; 32]> {
        let encoded = to_cbor(self)?;
        Ok(Sha256::digest(&encoded).into())
    }

    /// The 64-bit key identifier: the last eight bytes of the fingerprint.
    pub fn key_id(&self) -> Result<u64> {
        let fingerprint = self.fingerprint()?;
        let mut id = [0u8; 8];
        id.copy_from_slice(&fingerprint[24..]);
        Ok(u64::from_be_bytes(id))
    }
}

/// How the secret material of a [`SecretKeyBody`] was encrypted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecretKeyProtection {
    pub algorithm: ProtectionAlgorithm,
    pub kdf: KdfParams,
    #[serde(with = "serde_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub nonce: Vec<u8>,
}

/// Secret key: the public body plus passphrase-encrypted private material.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SecretKeyBody {
    pub public: PublicKeyBody,
    pub protection: SecretKeyProtection,
    #[serde(with = "serde_bytes")]
    pub encrypted_material: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserId {
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Signature {
    pub signature_type: SignatureType,
    /// Key ID of the signer.
    pub issuer: u64,
    pub created_unix: u64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OnePassSignature {
    pub signature_type: SignatureType,
    pub issuer: u64,
    /// Set on the last one-pass signature before the signed data.
    pub last: bool,
}

/// Innermost unit of content: the plaintext plus its metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LiteralData {
    pub format: DataFormat,
    /// Original file name; empty when unknown.
    pub file_name: String,
    /// Modification time, unix seconds.
    pub modified_unix: u64,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// A compressed packet stream holding exactly one nested object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CompressedData {
    pub algorithm: CompressionAlgorithm,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Session key encrypted to one recipient.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionKeyEntry {
    pub version: u8,
    /// Key ID of the recipient key.
    pub key_id: u64,
    pub algorithm: PublicKeyAlgorithm,
    /// `RSA(algorithm id || flags || session key || checksum)`.
    #[serde(with = "serde_bytes")]
    pub encrypted_key: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IntegrityTag {
    /// HMAC-SHA-256 over the payload plaintext.
    #[serde(with = "serde_bytes")]
    pub mac: Vec<u8>,
}

/// Symmetrically encrypted payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EncryptedPayload {
    #[serde(with = "serde_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    pub integrity: Option<IntegrityTag>,
}

/// One framed unit of a message or key ring.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Packet {
    /// Carries no data; decoders skip it.
    Marker,
    PublicKey(PublicKeyBody),
    PublicSubkey(PublicKeyBody),
    SecretKey(SecretKeyBody),
    SecretSubkey(SecretKeyBody),
    UserId(UserId),
    Signature(Signature),
    OnePassSignature(OnePassSignature),
    LiteralData(LiteralData),
    CompressedData(CompressedData),
    SessionKey(SessionKeyEntry),
    EncryptedPayload(EncryptedPayload),
}

impl Packet {
    /// Short name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::PublicKey(_) => "public key",
            Self::PublicSubkey(_) => "public subkey",
            Self::SecretKey(_) => "secret key",
            Self::SecretSubkey(_) => "secret subkey",
            Self::UserId(_) => "user id",
            Self::Signature(_) => "signature",
            Self::OnePassSignature(_) => "one-pass signature",
            Self::LiteralData(_) => "literal data",
            Self::CompressedData(_) => "compressed data",
            Self::SessionKey(_) => "session key",
            Self::EncryptedPayload(_) => "encrypted payload",
        }
    }
}

/// Current time as unix seconds, as stored in key and literal packets.
pub(crate) fn unix_now() -> u64 {
    u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0)
}

/// Serialize a value to CBOR.
///
/// Serialization of the same value is deterministic, so the output is suitable as
/// fingerprint, signature and associated-data input.
pub fn to_cbor<T: Serialize>(v: &T) -> Result<Vec<u8>> {
    serde_cbor::to_vec(v).map_err(|e| KeysealError::format(format!("cbor encoding: {e}")))
}

/// Deserialize a single value from CBOR.
pub fn from_cbor<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_cbor::from_slice::<T>(data).map_err(|e| KeysealError::format(format!("cbor value: {e}")))
}

/// Serialize packets back to back.
pub fn encode_packets(packets: &[Packet]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for packet in packets {
        serde_cbor::to_writer(&mut buf, packet)
            .map_err(|e| KeysealError::format(format!("{} packet: {e}", packet.kind())))?;
    }
    Ok(buf)
}

/// Parse a packet stream. An empty input yields no packets.
pub fn decode_packets(data: &[u8]) -> Result<Vec<Packet>> {
    serde_cbor::Deserializer::from_slice(data)
        .into_iter::<Packet>()
        .map(|packet| packet.map_err(|e| KeysealError::format(format!("packet stream: {e}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_public() -> PublicKeyBody {
        PublicKeyBody {
            version: KEY_VERSION,
            created_unix: 1_700_000_000,
            algorithm: PublicKeyAlgorithm::RsaGeneral,
            rsa: RsaPublicParams {
                n: vec![0xC5; 128],
                e: vec![0x13],
            },
        }
    }

    #[test]
    fn packet_stream_keeps_order() {
        let packets = vec![
            Packet::Marker,
            Packet::PublicKey(sample_public()),
            Packet::UserId(UserId { id: "alice".into() }),
            Packet::LiteralData(LiteralData {
                format: DataFormat::Binary,
                file_name: "report.txt".into(),
                modified_unix: 42,
                data: b"quarterly numbers".to_vec(),
            }),
        ];
        let bytes = encode_packets(&packets).unwrap();
        assert_eq!(decode_packets(&bytes).unwrap(), packets);
    }

    #[test]
    fn unknown_field_is_a_format_error() {
        // Same shape as an encrypted payload, with the integrity field under another name
        #[derive(Serialize)]
        enum Edited {
            EncryptedPayload {
                #[serde(with = "serde_bytes")]
                iv: Vec<u8>,
                #[serde(with = "serde_bytes")]
                ciphertext: Vec<u8>,
                integrity_v2: Option<IntegrityTag>,
            },
        }
        let bytes = serde_cbor::to_vec(&Edited::EncryptedPayload {
            iv: vec![0; 16],
            ciphertext: vec![1, 2, 3],
            integrity_v2: Some(IntegrityTag { mac: vec![0; 32] }),
        })
        .unwrap();

        let err = decode_packets(&bytes).unwrap_err();
        assert!(matches!(err, KeysealError::Format(_)));
    }

    #[test]
    fn empty_stream_has_no_packets() {
        assert!(decode_packets(&[]).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_format_error() {
        let err = decode_packets(b"\xff\x00not a packet").unwrap_err();
        assert!(matches!(err, KeysealError::Format(_)));
    }

    #[test]
    fn truncated_stream_is_a_format_error() {
        let bytes = encode_packets(&[Packet::PublicKey(sample_public())]).unwrap();
        let err = decode_packets(&bytes[..bytes.len() - 5]).unwrap_err();
        assert!(matches!(err, KeysealError::Format(_)));
    }

    #[test]
    fn key_id_is_stable_and_tracks_material() {
        let body = sample_public();
        assert_eq!(body.key_id().unwrap(), body.clone().key_id().unwrap());

        let mut other = sample_public();
        other.rsa.n[0] = 0xC7;
        assert_ne!(body.key_id().unwrap(), other.key_id().unwrap());
    }

    #[test]
    fn capabilities_follow_algorithm() {
        assert!(PublicKeyAlgorithm::RsaGeneral.can_encrypt());
        assert!(PublicKeyAlgorithm::RsaGeneral.can_sign());
        assert!(!PublicKeyAlgorithm::RsaSignOnly.can_encrypt());
        assert!(!PublicKeyAlgorithm::RsaEncryptOnly.can_sign());
    }

    #[test]
    fn symmetric_ids_roundtrip() {
        for alg in [
            SymmetricAlgorithm::Aes128,
            SymmetricAlgorithm::Aes192,
            SymmetricAlgorithm::Aes256,
        ] {
            assert_eq!(SymmetricAlgorithm::from_id(alg.id()), Some(alg));
        }
        assert_eq!(SymmetricAlgorithm::from_id(3), None);
    }
}
