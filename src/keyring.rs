//! Key-ring parsing and key resolution.
//!
//! A key-ring stream holds one or more rings. Each ring starts with a primary key packet, followed by the
//! user IDs bound to it (each with its certifications) and any subkeys. Public and secret rings are loaded
//! separately and never mix packet kinds.

use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::armor;
use crate::crypto;
use crate::errors::{KeysealError, Result};
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Public,
    Secret,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub can_encrypt: bool,
    pub can_sign: bool,
}

#[derive(Clone, Debug)]
enum KeyMaterial {
    Public(PublicKeyBody),
    /// Private half still encrypted under the passphrase.
    Secret(SecretKeyBody),
}

/// A public or (locked) secret key from a key ring.
#[derive(Clone, Debug)]
pub struct Key {
    key_id: u64,
    primary: bool,
    user_ids: Vec<String>,
    material: KeyMaterial,
}

impl Key {
    fn from_public(body: PublicKeyBody, primary: bool) -> Result<Self> {
        Ok(Self {
            key_id: body.key_id()?,
            primary,
            user_ids: Vec::new(),
            material: KeyMaterial::Public(body),
        })
    }

    fn from_secret(body: SecretKeyBody, primary: bool) -> Result<Self> {
        Ok(Self {
            key_id: body.public.key_id()?,
            primary,
            user_ids: Vec::new(),
            material: KeyMaterial::Secret(body),
        })
    }

    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    pub fn kind(&self) -> KeyKind {
        match self.material {
            KeyMaterial::Public(_) => KeyKind::Public,
            KeyMaterial::Secret(_) => KeyKind::Secret,
        }
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// User IDs bound to this key. Empty for subkeys.
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    pub fn public_body(&self) -> &PublicKeyBody {
        match &self.material {
            KeyMaterial::Public(body) => body,
            KeyMaterial::Secret(body) => &body.public,
        }
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.public_body().algorithm
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            can_encrypt: self.algorithm().can_encrypt(),
            can_sign: self.algorithm().can_sign(),
        }
    }

    pub fn can_encrypt(&self) -> bool {
        self.capabilities().can_encrypt
    }

    pub fn can_sign(&self) -> bool {
        self.capabilities().can_sign
    }

    /// Public view of this key. For a public key this is a plain copy.
    pub fn to_public(&self) -> Key {
        Key {
            key_id: self.key_id,
            primary: self.primary,
            user_ids: self.user_ids.clone(),
            material: KeyMaterial::Public(self.public_body().clone()),
        }
    }

    pub(crate) fn rsa_public_key(&self) -> Result<RsaPublicKey> {
        crypto::rsa_public_key(&self.public_body().rsa)
    }
}

/// Unlocked private key. Scoped to a single operation; the RSA material is zeroized on drop.
pub struct PrivateKey {
    key_id: u64,
    algorithm: PublicKeyAlgorithm,
    inner: RsaPrivateKey,
}

impl PrivateKey {
    pub fn key_id(&self) -> u64 {
        self.key_id
    }

    pub fn algorithm(&self) -> PublicKeyAlgorithm {
        self.algorithm
    }

    pub(crate) fn rsa(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &format_key_id(self.key_id))
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A primary key and its subkeys, primary first.
#[derive(Clone, Debug)]
pub struct KeyRing {
    keys: Vec<Key>,
}

impl KeyRing {
    pub fn primary(&self) -> &Key {
        &self.keys[0]
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }
}

/// Ordered, immutable collection of key rings loaded from one stream.
#[derive(Clone, Debug)]
pub struct KeyRingBundle {
    kind: KeyKind,
    rings: Vec<KeyRing>,
}

impl KeyRingBundle {
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn rings(&self) -> &[KeyRing] {
        &self.rings
    }

    /// Every key, rings in stored order and keys in ring order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> + '_ {
        self.rings.iter().flat_map(|ring| ring.keys.iter())
    }
}

/// Upper-case hex rendering used in logs and error messages.
pub fn format_key_id(key_id: u64) -> String {
    format!("{key_id:016X}")
}

/// Bytes covered by a user-ID certification.
pub(crate) fn certification_input(
    public: &PublicKeyBody,
    user_id: &UserId,
    created_unix: u64,
) -> Result<Vec<u8>> {
    let mut input = to_cbor(public)?;
    input.extend(to_cbor(user_id)?);
    input.extend(created_unix.to_be_bytes());
    Ok(input)
}

pub fn load_public_ring(data: &[u8]) -> Result<KeyRingBundle> {
    load_ring(data, KeyKind::Public)
}

pub fn load_secret_ring(data: &[u8]) -> Result<KeyRingBundle> {
    load_ring(data, KeyKind::Secret)
}

fn current_ring<'a>(rings: &'a mut [KeyRing], packet: &Packet) -> Result<&'a mut KeyRing> {
    rings
        .last_mut()
        .ok_or_else(|| KeysealError::format(format!("key ring: {} before any primary key", packet.kind())))
}

fn load_ring(data: &[u8], kind: KeyKind) -> Result<KeyRingBundle> {
    let data = armor::dearmor_if_needed(data)?;
    let packets = decode_packets(&data)?;
    if packets.is_empty() {
        return Err(KeysealError::format("key ring: empty stream"));
    }

    let mut rings: Vec<KeyRing> = Vec::new();
    // The user ID that the next certification signatures refer to, and whether one of them was a valid
    // self-certification.
    let mut certifying: Option<(UserId, bool)> = None;

    for packet in packets {
        if matches!(
            packet,
            Packet::PublicKey(_)
                | Packet::SecretKey(_)
                | Packet::PublicSubkey(_)
                | Packet::SecretSubkey(_)
                | Packet::UserId(_)
        ) {
            require_certified(certifying.take())?;
        }
        match (kind, packet) {
            (KeyKind::Public, Packet::PublicKey(body)) => {
                rings.push(KeyRing {
                    keys: vec![Key::from_public(body, true)?],
                });
            }
            (KeyKind::Secret, Packet::SecretKey(body)) => {
                rings.push(KeyRing {
                    keys: vec![Key::from_secret(body, true)?],
                });
            }
            (KeyKind::Public, packet @ Packet::PublicSubkey(_)) => {
                let ring = current_ring(&mut rings, &packet)?;
                if let Packet::PublicSubkey(body) = packet {
                    ring.keys.push(Key::from_public(body, false)?);
                }
            }
            (KeyKind::Secret, packet @ Packet::SecretSubkey(_)) => {
                let ring = current_ring(&mut rings, &packet)?;
                if let Packet::SecretSubkey(body) = packet {
                    ring.keys.push(Key::from_secret(body, false)?);
                }
            }
            (_, packet @ Packet::UserId(_)) => {
                let ring = current_ring(&mut rings, &packet)?;
                if let Packet::UserId(user_id) = packet {
                    ring.keys[0].user_ids.push(user_id.id.clone());
                    certifying = Some((user_id, false));
                }
            }
            (_, packet @ Packet::Signature(_)) => {
                let ring = current_ring(&mut rings, &packet)?;
                if let (Packet::Signature(sig), Some((user_id, certified))) = (&packet, &mut certifying) {
                    if check_self_certification(ring.primary(), user_id, sig)? {
                        *certified = true;
                    }
                }
                // Subkey binding signatures are carried but not checked.
            }
            (_, Packet::Marker) => {}
            (_, other) => {
                return Err(KeysealError::format(format!(
                    "key ring: unexpected {} packet in {} ring",
                    other.kind(),
                    match kind {
                        KeyKind::Public => "public",
                        KeyKind::Secret => "secret",
                    }
                )));
            }
        }
    }
    require_certified(certifying)?;

    if rings.is_empty() {
        return Err(KeysealError::format("key ring: no primary key"));
    }

    debug!(
        rings = rings.len(),
        keys = rings.iter().map(|r| r.keys.len()).sum::<usize>(),
        ?kind,
        "loaded key ring bundle"
    );
    Ok(KeyRingBundle { kind, rings })
}

/// Returns whether `sig` is a valid self-certification of `user_id`. A self-certification that does not
/// verify is an error.
fn check_self_certification(primary: &Key, user_id: &UserId, sig: &Signature) -> Result<bool> {
    // Third-party certifications cannot be checked without the issuer's key.
    if sig.signature_type != SignatureType::PositiveCertification || sig.issuer != primary.key_id {
        return Ok(false);
    }
    let input = certification_input(primary.public_body(), user_id, sig.created_unix)?;
    crypto::verify_certification(&primary.rsa_public_key()?, &input, &sig.signature).map_err(|_| {
        KeysealError::format(format!(
            "key ring: certification of \"{}\" does not verify against key {}",
            user_id.id,
            format_key_id(primary.key_id)
        ))
    })?;
    Ok(true)
}

fn require_certified(pending: Option<(UserId, bool)>) -> Result<()> {
    match pending {
        Some((user_id, false)) => Err(KeysealError::format(format!(
            "key ring: user id \"{}\" has no valid self-certification",
            user_id.id
        ))),
        _ => Ok(()),
    }
}

/// First public key, in stored order, that can encrypt.
pub fn find_encryption_key(bundle: &KeyRingBundle) -> Result<&Key> {
    bundle
        .keys()
        .find(|key| key.kind() == KeyKind::Public && key.can_encrypt())
        .ok_or_else(|| KeysealError::KeyNotFound("no encryption key in key ring".into()))
}

/// First secret key, in stored order, that can sign.
pub fn find_signing_key(bundle: &KeyRingBundle) -> Result<&Key> {
    bundle
        .keys()
        .find(|key| key.kind() == KeyKind::Secret && key.can_sign())
        .ok_or_else(|| KeysealError::KeyNotFound("no signing key in key ring".into()))
}

pub fn find_secret_key_by_id(bundle: &KeyRingBundle, key_id: u64) -> Result<&Key> {
    bundle
        .keys()
        .find(|key| key.kind() == KeyKind::Secret && key.key_id == key_id)
        .ok_or_else(|| {
            KeysealError::KeyNotFound(format!("no secret key with id {}", format_key_id(key_id)))
        })
}

/// Decrypt the private material of a secret key.
///
/// A wrong passphrase and corrupted material both fail with [`KeysealError::Auth`]; a caller may retry
/// with another passphrase. Passing a public key is a [`KeysealError::Validation`].
pub fn unlock_private_key(key: &Key, passphrase: &str) -> Result<PrivateKey> {
    let KeyMaterial::Secret(body) = &key.material else {
        return Err(KeysealError::validation(format!(
            "key {} is a public key and holds no private material",
            format_key_id(key.key_id)
        )));
    };

    let aad = to_cbor(&body.public)?;
    let material =
        crypto::unprotect_secret(&body.protection, &body.encrypted_material, passphrase, &aad)?;
    let secret: RsaSecretParams = from_cbor(&material).map_err(|_| KeysealError::Auth)?;
    let inner = crypto::rsa_private_key(&body.public.rsa, &secret).map_err(|_| KeysealError::Auth)?;

    debug!(key_id = %format_key_id(key.key_id), "unlocked secret key");
    Ok(PrivateKey {
        key_id: key.key_id,
        algorithm: body.public.algorithm,
        inner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(algorithm: PublicKeyAlgorithm, seed: u8) -> PublicKeyBody {
        PublicKeyBody {
            version: KEY_VERSION,
            created_unix: 1_700_000_000,
            algorithm,
            rsa: RsaPublicParams {
                n: vec![seed; 128],
                e: vec![0x13],
            },
        }
    }

    fn stream(packets: &[Packet]) -> Vec<u8> {
        encode_packets(packets).unwrap()
    }

    #[test]
    fn empty_stream_is_format_error() {
        assert!(matches!(load_public_ring(&[]), Err(KeysealError::Format(_))));
        assert!(matches!(load_secret_ring(&[]), Err(KeysealError::Format(_))));
    }

    #[test]
    fn marker_only_stream_has_no_primary_key() {
        let data = stream(&[Packet::Marker]);
        assert!(matches!(load_public_ring(&data), Err(KeysealError::Format(_))));
    }

    #[test]
    fn subkey_before_primary_is_format_error() {
        let data = stream(&[Packet::PublicSubkey(body(PublicKeyAlgorithm::RsaGeneral, 1))]);
        assert!(matches!(load_public_ring(&data), Err(KeysealError::Format(_))));
    }

    #[test]
    fn public_packets_are_rejected_in_secret_ring() {
        let data = stream(&[Packet::PublicKey(body(PublicKeyAlgorithm::RsaGeneral, 1))]);
        assert!(matches!(load_secret_ring(&data), Err(KeysealError::Format(_))));
        assert!(load_public_ring(&data).is_ok());
    }

    #[test]
    fn message_packets_are_rejected_in_key_ring() {
        let data = stream(&[
            Packet::PublicKey(body(PublicKeyAlgorithm::RsaGeneral, 1)),
            Packet::LiteralData(LiteralData {
                format: DataFormat::Binary,
                file_name: String::new(),
                modified_unix: 0,
                data: vec![1, 2, 3],
            }),
        ]);
        assert!(matches!(load_public_ring(&data), Err(KeysealError::Format(_))));
    }

    #[test]
    fn rings_split_on_primary_keys() {
        let data = stream(&[
            Packet::PublicKey(body(PublicKeyAlgorithm::RsaSignOnly, 1)),
            Packet::PublicSubkey(body(PublicKeyAlgorithm::RsaEncryptOnly, 2)),
            Packet::PublicKey(body(PublicKeyAlgorithm::RsaGeneral, 3)),
        ]);
        let bundle = load_public_ring(&data).unwrap();
        assert_eq!(bundle.kind(), KeyKind::Public);
        assert_eq!(bundle.rings().len(), 2);
        assert_eq!(bundle.rings()[0].keys().len(), 2);
        assert!(!bundle.rings()[0].keys()[1].is_primary());
    }

    #[test]
    fn uncertified_user_id_is_format_error() {
        let primary = body(PublicKeyAlgorithm::RsaGeneral, 1);
        let third_party = Signature {
            signature_type: SignatureType::PositiveCertification,
            issuer: primary.key_id().unwrap() ^ 1,
            created_unix: 1_700_000_000,
            signature: vec![0; 128],
        };
        for tail in [
            vec![],
            vec![Packet::PublicSubkey(body(PublicKeyAlgorithm::RsaEncryptOnly, 2))],
            vec![Packet::UserId(UserId { id: "second".into() })],
            vec![Packet::Signature(third_party)],
        ] {
            let mut packets = vec![
                Packet::PublicKey(primary.clone()),
                Packet::UserId(UserId { id: "nobody".into() }),
            ];
            packets.extend(tail);
            assert!(matches!(
                load_public_ring(&stream(&packets)),
                Err(KeysealError::Format(_))
            ));
        }
    }

    #[test]
    fn encryption_search_skips_sign_only_keys() {
        let subkey = body(PublicKeyAlgorithm::RsaEncryptOnly, 2);
        let expected = subkey.key_id().unwrap();
        let data = stream(&[
            Packet::PublicKey(body(PublicKeyAlgorithm::RsaSignOnly, 1)),
            Packet::PublicSubkey(subkey),
            Packet::PublicKey(body(PublicKeyAlgorithm::RsaGeneral, 3)),
        ]);
        let bundle = load_public_ring(&data).unwrap();

        let first = find_encryption_key(&bundle).unwrap().key_id();
        let second = find_encryption_key(&bundle).unwrap().key_id();
        assert_eq!(first, expected);
        assert_eq!(first, second);
    }

    #[test]
    fn sign_only_ring_has_no_encryption_key() {
        let data = stream(&[Packet::PublicKey(body(PublicKeyAlgorithm::RsaSignOnly, 1))]);
        let bundle = load_public_ring(&data).unwrap();
        assert!(matches!(find_encryption_key(&bundle), Err(KeysealError::KeyNotFound(_))));
        // Public rings hold no signing-capable secret keys either
        assert!(matches!(find_signing_key(&bundle), Err(KeysealError::KeyNotFound(_))));
    }

    #[test]
    fn unlocking_a_public_key_is_validation_error() {
        let key = Key::from_public(body(PublicKeyAlgorithm::RsaGeneral, 1), true).unwrap();
        assert!(matches!(
            unlock_private_key(&key, "pass"),
            Err(KeysealError::Validation(_))
        ));
    }

    #[test]
    fn key_id_formatting() {
        assert_eq!(format_key_id(0xAB), "00000000000000AB");
        assert_eq!(format_key_id(u64::MAX), "FFFFFFFFFFFFFFFF");
    }
}
