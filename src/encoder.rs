//! Message encoding: literal data, compression, encryption to one recipient, armor.
//!
//! Layering of an encoded message, outermost first:
//!
//! ```text
//! [armor]
//!   SessionKey            session key wrapped for the recipient
//!   EncryptedPayload      CFB ciphertext + optional integrity tag
//!     CompressedData
//!       LiteralData       file name, timestamp, plaintext
//! ```

use std::io::{Read, Write};

use tracing::debug;

use crate::armor::{self, ArmorType};
use crate::compression;
use crate::crypto;
use crate::errors::{KeysealError, Result};
use crate::keyring::{format_key_id, Key, KeyKind};
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncryptOptions {
    /// Armor the output as `PGP MESSAGE`.
    pub armor: bool,
    /// Attach an integrity tag to the encrypted payload.
    pub with_integrity: bool,
    pub symmetric: SymmetricAlgorithm,
    pub compression: CompressionAlgorithm,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            armor: true,
            with_integrity: true,
            symmetric: SymmetricAlgorithm::default(),
            compression: CompressionAlgorithm::default(),
        }
    }
}

fn check_recipient(recipient: &Key) -> Result<()> {
    if recipient.kind() != KeyKind::Public {
        return Err(KeysealError::validation(format!(
            "recipient {} is not a public key",
            format_key_id(recipient.key_id())
        )));
    }
    if !recipient.can_encrypt() {
        return Err(KeysealError::validation(format!(
            "recipient {} cannot encrypt",
            format_key_id(recipient.key_id())
        )));
    }
    Ok(())
}

/// Encrypt an already serialized inner packet stream for `recipient`.
///
/// Callers normally go through [`encrypt`] or [`encrypt_bytes`]; this entry point is for inner streams built
/// by hand.
pub fn encrypt_payload(inner: &[u8], recipient: &Key, options: &EncryptOptions) -> Result<Vec<u8>> {
    check_recipient(recipient)?;

    let session_key = crypto::generate_session_key(options.symmetric, options.with_integrity);
    let payload = crypto::symmetric_encrypt(&session_key, inner)?;
    let entry = SessionKeyEntry {
        version: SESSION_KEY_VERSION,
        key_id: recipient.key_id(),
        algorithm: recipient.algorithm(),
        encrypted_key: crypto::wrap_session_key(&recipient.rsa_public_key()?, &session_key)?,
    };

    debug!(
        recipient = %format_key_id(recipient.key_id()),
        cipher = ?options.symmetric,
        integrity = options.with_integrity,
        "encrypted payload"
    );

    let message = encode_packets(&[Packet::SessionKey(entry), Packet::EncryptedPayload(payload)])?;
    if options.armor {
        Ok(armor::armor_encode(ArmorType::Message, &[armor::version_header()], &message).into_bytes())
    } else {
        Ok(message)
    }
}

/// In-memory form of [`encrypt`].
pub fn encrypt_bytes(
    plaintext: &[u8],
    file_name: &str,
    recipient: &Key,
    options: &EncryptOptions,
) -> Result<Vec<u8>> {
    check_recipient(recipient)?;

    let literal = LiteralData {
        format: DataFormat::Binary,
        file_name: file_name.to_string(),
        modified_unix: unix_now(),
        data: plaintext.to_vec(),
    };
    let literal_stream = encode_packets(&[Packet::LiteralData(literal)])?;
    let compressed = compression::compress(options.compression, &literal_stream)?;
    debug!(
        plain = plaintext.len(),
        compressed = compressed.data.len(),
        algorithm = ?options.compression,
        "packed literal data"
    );

    let inner = encode_packets(&[Packet::CompressedData(compressed)])?;
    encrypt_payload(&inner, recipient, options)
}

/// Read all of `input`, encrypt it for `recipient` and write the message to `output`.
///
/// `file_name` is recorded in the literal data so the decoder can restore it; it may be empty.
pub fn encrypt<W: Write, R: Read>(
    output: &mut W,
    input: &mut R,
    file_name: &str,
    recipient: &Key,
    options: &EncryptOptions,
) -> Result<()> {
    let mut plaintext = Vec::new();
    input.read_to_end(&mut plaintext)?;
    let message = encrypt_bytes(&plaintext, file_name, recipient, options)?;
    output.write_all(&message)?;
    output.flush()?;
    Ok(())
}
