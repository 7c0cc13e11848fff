//! Message decoding.
//!
//! The decoder walks a message in fixed stages:
//!
//! 1. de-armor, then locate the encrypted-data list (one leading object, such as a marker, is skipped)
//! 2. pick the first session-key entry addressed to a secret key we hold and unlock that key
//! 3. unwrap the session key and decrypt the payload
//! 4. parse the decrypted stream down to its literal data, through compression and signature lists
//! 5. materialize the literal data, then apply the integrity gate
//!
//! Signatures found in step 4 are skipped, never verified.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::vec::IntoIter;

use tracing::{debug, info, warn};

use crate::armor;
use crate::compression;
use crate::crypto::{self, IntegrityStatus, SessionKey};
use crate::errors::{KeysealError, Result};
use crate::keyring::{self, format_key_id, KeyKind, KeyRingBundle};
use crate::types::*;

/// Compressed data may wrap further compressed data, up to this depth.
const MAX_NESTING: usize = 8;

/// Structure the literal data was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageShape {
    Literal,
    /// Literal data preceded by a signature list.
    SignedLiteral,
    Compressed(Box<MessageShape>),
}

/// Result of decrypting a message in memory, before the integrity gate.
#[derive(Clone, Debug)]
pub struct DecryptedMessage {
    pub literal: LiteralData,
    pub shape: MessageShape,
    pub integrity: IntegrityStatus,
}

/// Outcome of the recursive-descent parse of a decrypted stream.
#[derive(Debug)]
enum Parsed {
    Literal(LiteralData),
    Compressed(Box<Parsed>),
    SignedLiteral(LiteralData),
}

impl Parsed {
    fn into_parts(self) -> (MessageShape, LiteralData) {
        match self {
            Self::Literal(literal) => (MessageShape::Literal, literal),
            Self::SignedLiteral(literal) => (MessageShape::SignedLiteral, literal),
            Self::Compressed(inner) => {
                let (shape, literal) = inner.into_parts();
                (MessageShape::Compressed(Box::new(shape)), literal)
            }
        }
    }
}

/// Consecutive packets that belong together.
#[derive(Debug)]
enum PgpObject {
    Marker,
    EncryptedDataList {
        entries: Vec<SessionKeyEntry>,
        payload: EncryptedPayload,
    },
    Compressed(CompressedData),
    Literal(LiteralData),
    OnePassSignatureList(usize),
    SignatureList(usize),
    Other(&'static str),
}

impl PgpObject {
    fn describe(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::EncryptedDataList { .. } => "encrypted data list",
            Self::Compressed(_) => "compressed data",
            Self::Literal(_) => "literal data",
            Self::OnePassSignatureList(_) => "one-pass signature list",
            Self::SignatureList(_) => "signature list",
            Self::Other(kind) => *kind,
        }
    }
}

struct ObjectReader {
    packets: Peekable<IntoIter<Packet>>,
}

impl ObjectReader {
    fn new(packets: Vec<Packet>) -> Self {
        Self {
            packets: packets.into_iter().peekable(),
        }
    }

    fn next_object(&mut self) -> Result<Option<PgpObject>> {
        let Some(packet) = self.packets.next() else {
            return Ok(None);
        };

        let object = match packet {
            Packet::Marker => PgpObject::Marker,
            Packet::SessionKey(first) => {
                let mut entries = vec![first];
                while let Some(Packet::SessionKey(entry)) =
                    self.packets.next_if(|p| matches!(p, Packet::SessionKey(_)))
                {
                    entries.push(entry);
                }
                match self.packets.next() {
                    Some(Packet::EncryptedPayload(payload)) => {
                        PgpObject::EncryptedDataList { entries, payload }
                    }
                    Some(other) => {
                        return Err(KeysealError::format(format!(
                            "encrypted data list: {} packet where encrypted payload expected",
                            other.kind()
                        )))
                    }
                    None => {
                        return Err(KeysealError::format(
                            "encrypted data list: session keys without encrypted payload",
                        ))
                    }
                }
            }
            Packet::EncryptedPayload(payload) => PgpObject::EncryptedDataList {
                entries: Vec::new(),
                payload,
            },
            Packet::OnePassSignature(_) => {
                let mut count = 1;
                while self
                    .packets
                    .next_if(|p| matches!(p, Packet::OnePassSignature(_)))
                    .is_some()
                {
                    count += 1;
                }
                PgpObject::OnePassSignatureList(count)
            }
            Packet::Signature(_) => {
                let mut count = 1;
                while self
                    .packets
                    .next_if(|p| matches!(p, Packet::Signature(_)))
                    .is_some()
                {
                    count += 1;
                }
                PgpObject::SignatureList(count)
            }
            Packet::CompressedData(data) => PgpObject::Compressed(data),
            Packet::LiteralData(data) => PgpObject::Literal(data),
            other => PgpObject::Other(other.kind()),
        };
        Ok(Some(object))
    }

    /// Next object that is not a marker.
    fn next_significant(&mut self) -> Result<Option<PgpObject>> {
        loop {
            match self.next_object()? {
                Some(PgpObject::Marker) => continue,
                other => return Ok(other),
            }
        }
    }
}

fn read_encrypted_list(message: &[u8]) -> Result<(Vec<SessionKeyEntry>, EncryptedPayload)> {
    let data = armor::dearmor_if_needed(message)?;
    let mut reader = ObjectReader::new(decode_packets(&data)?);

    let first = reader
        .next_object()?
        .ok_or_else(|| KeysealError::format("message: empty stream"))?;
    let list = if matches!(first, PgpObject::EncryptedDataList { .. }) {
        first
    } else {
        debug!(object = first.describe(), "skipping leading object");
        reader
            .next_object()?
            .ok_or_else(|| KeysealError::format("message: no encrypted data list"))?
    };

    match list {
        PgpObject::EncryptedDataList { entries, payload } => Ok((entries, payload)),
        other => Err(KeysealError::format(format!(
            "message: {} where encrypted data list expected",
            other.describe()
        ))),
    }
}

/// Unlock the first owned key named by an entry and unwrap its session key.
fn unlock_session_key(
    entries: &[SessionKeyEntry],
    secret_keys: &KeyRingBundle,
    passphrase: &str,
) -> Result<SessionKey> {
    let mut rejected = false;

    for entry in entries {
        let Ok(key) = keyring::find_secret_key_by_id(secret_keys, entry.key_id) else {
            debug!(key_id = %format_key_id(entry.key_id), "no secret key for session key entry");
            continue;
        };
        match keyring::unlock_private_key(key, passphrase) {
            Ok(private) => {
                debug!(key_id = %format_key_id(entry.key_id), "session key entry matched");
                return crypto::unwrap_session_key(private.rsa(), &entry.encrypted_key);
            }
            Err(KeysealError::Auth) => {
                warn!(key_id = %format_key_id(entry.key_id), "passphrase rejected");
                rejected = true;
            }
            Err(e) => return Err(e),
        }
    }

    if rejected {
        Err(KeysealError::Auth)
    } else {
        Err(KeysealError::KeyNotFound(format!(
            "none of the {} session key entries is addressed to a key in the secret key ring",
            entries.len()
        )))
    }
}

fn parse_stream(stream: &[u8], depth: usize) -> Result<Parsed> {
    let mut reader = ObjectReader::new(decode_packets(stream)?);

    match reader.next_significant()? {
        None => Err(KeysealError::format("decrypted stream: no packets")),
        Some(PgpObject::Literal(literal)) => Ok(Parsed::Literal(literal)),
        Some(PgpObject::Compressed(envelope)) => {
            if depth >= MAX_NESTING {
                return Err(KeysealError::format("compressed data: nested too deeply"));
            }
            let inner = compression::decompress(&envelope)?;
            Ok(Parsed::Compressed(Box::new(parse_stream(&inner, depth + 1)?)))
        }
        Some(PgpObject::OnePassSignatureList(count)) | Some(PgpObject::SignatureList(count)) => {
            match reader.next_significant()? {
                Some(PgpObject::Literal(literal)) => {
                    debug!(signatures = count, "ignoring signatures on literal data");
                    Ok(Parsed::SignedLiteral(literal))
                }
                _ => Err(KeysealError::UnsupportedMessage(
                    "signature list without literal data".into(),
                )),
            }
        }
        Some(other) => Err(KeysealError::UnsupportedMessage(format!(
            "{} where literal or compressed data expected",
            other.describe()
        ))),
    }
}

/// Decrypt `message` with a key from `secret_keys`, reporting but not enforcing the integrity check.
///
/// If the payload fails its integrity check and also does not parse, the result is
/// [`KeysealError::Integrity`] rather than the parse error.
pub fn decrypt_message(
    message: &[u8],
    secret_keys: &KeyRingBundle,
    passphrase: &str,
) -> Result<DecryptedMessage> {
    if secret_keys.kind() != KeyKind::Secret {
        return Err(KeysealError::validation("decryption needs a secret key ring"));
    }

    let (entries, payload) = read_encrypted_list(message)?;
    debug!(entries = entries.len(), "found encrypted data list");

    let session_key = unlock_session_key(&entries, secret_keys, passphrase)?;
    let decrypted = crypto::symmetric_decrypt(&session_key, &payload)?;

    let parsed = match parse_stream(&decrypted.plaintext, 0) {
        Ok(parsed) => parsed,
        Err(e) if decrypted.integrity == IntegrityStatus::Failed => {
            warn!(error = %e, "unparseable payload failed integrity check");
            return Err(KeysealError::Integrity);
        }
        Err(e) => return Err(e),
    };

    let (shape, literal) = parsed.into_parts();
    debug!(?shape, integrity = ?decrypted.integrity, "decoded message");
    Ok(DecryptedMessage {
        literal,
        shape,
        integrity: decrypted.integrity,
    })
}

fn integrity_gate(integrity: IntegrityStatus) -> Result<()> {
    match integrity {
        IntegrityStatus::Failed => Err(KeysealError::Integrity),
        IntegrityStatus::Verified => Ok(()),
        IntegrityStatus::NotProtected => {
            debug!("message carries no integrity tag");
            Ok(())
        }
    }
}

/// Decrypt `message` to its literal data. A failed integrity check is an error.
pub fn decrypt(message: &[u8], secret_keys: &KeyRingBundle, passphrase: &str) -> Result<LiteralData> {
    let decrypted = decrypt_message(message, secret_keys, passphrase)?;
    integrity_gate(decrypted.integrity)?;
    Ok(decrypted.literal)
}

/// Where literal data named `file_name` lands for a caller-chosen `target`.
///
/// Only the final component of a non-empty name is used, placed next to `target`.
pub fn resolve_output_path(target: &Path, file_name: &str) -> Result<PathBuf> {
    if file_name.is_empty() {
        return Ok(target.to_path_buf());
    }
    let name = Path::new(file_name).file_name().ok_or_else(|| {
        KeysealError::validation(format!("literal file name {file_name:?} has no usable final component"))
    })?;
    Ok(match target.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    })
}

fn write_new(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => {
                KeysealError::validation(format!("{} already exists", path.display()))
            }
            _ => e.into(),
        })?;
    file.write_all(data)?;
    file.flush()?;
    Ok(())
}

/// Decrypt `message` and write its literal data next to `target`, returning the path written.
///
/// Existing files are never overwritten. The integrity gate runs after the file is written: on
/// [`KeysealError::Integrity`] the file is left on disk and its content must not be trusted. A message
/// that fails its integrity check reports [`KeysealError::Integrity`] even when no file could be written.
pub fn decrypt_to_path(
    message: &[u8],
    secret_keys: &KeyRingBundle,
    passphrase: &str,
    target: &Path,
) -> Result<PathBuf> {
    if target.exists() {
        return Err(KeysealError::validation(format!(
            "decryption target {} already exists",
            target.display()
        )));
    }

    let decrypted = decrypt_message(message, secret_keys, passphrase)?;
    let output = resolve_output_path(target, &decrypted.literal.file_name)
        .and_then(|output| write_new(&output, &decrypted.literal.data).map(|()| output))
        .map_err(|e| {
            if decrypted.integrity == IntegrityStatus::Failed {
                warn!(error = %e, "output of a tampered message not written");
                KeysealError::Integrity
            } else {
                e
            }
        })?;
    info!(path = %output.display(), bytes = decrypted.literal.data.len(), "wrote decrypted data");

    if let Err(e) = integrity_gate(decrypted.integrity) {
        warn!(path = %output.display(), "decrypted output failed integrity check");
        return Err(e);
    }
    Ok(output)
}
