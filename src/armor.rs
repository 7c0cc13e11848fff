//! ASCII armor for transporting packet streams through text-only channels.
//!
//! Format:
//! ```text
//! -----BEGIN PGP MESSAGE-----
//! Version: keyseal 0.1.0
//!
//! omRLaW5koWNSc2FHZW5lcmFs...
//! (base64 continues, 64 columns)
//! =njUN
//! -----END PGP MESSAGE-----
//! ```
//!
//! The line starting with `=` carries the base64 of the 24-bit CRC of the decoded payload.

use std::borrow::Cow;
use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::errors::{KeysealError, Result};

const CRC24_INIT: u32 = 0x00B7_04CE;
const CRC24_POLY: u32 = 0x0186_4CFB;
const LINE_WIDTH: usize = 64;

/// Types of armored content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmorType {
    Message,
    PublicKeyBlock,
    PrivateKeyBlock,
    Signature,
}

impl ArmorType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Message => "MESSAGE",
            Self::PublicKeyBlock => "PUBLIC KEY BLOCK",
            Self::PrivateKeyBlock => "PRIVATE KEY BLOCK",
            Self::Signature => "SIGNATURE",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "MESSAGE" => Some(Self::Message),
            "PUBLIC KEY BLOCK" => Some(Self::PublicKeyBlock),
            "PRIVATE KEY BLOCK" => Some(Self::PrivateKeyBlock),
            "SIGNATURE" => Some(Self::Signature),
            _ => None,
        }
    }
}

/// Parsed armor block
#[derive(Debug)]
pub struct ArmorBlock {
    pub armor_type: ArmorType,
    pub headers: HashMap<String, String>,
    pub payload: Vec<u8>,
}

/// OpenPGP CRC-24.
pub fn crc24(data: &[u8]) -> u32 {
    let mut crc = CRC24_INIT;
    for &byte in data {
        crc ^= u32::from(byte) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x0100_0000 != 0 {
                crc ^= CRC24_POLY;
            }
        }
    }
    crc & 0x00FF_FFFF
}

fn checksum_line(payload: &[u8]) -> String {
    let crc = crc24(payload).to_be_bytes();
    format!("={}", BASE64.encode(&crc[1..]))
}

/// Encode data as ASCII armor
pub fn armor_encode(armor_type: ArmorType, headers: &[(&str, &str)], payload: &[u8]) -> String {
    let label = armor_type.label();
    let mut result = format!("-----BEGIN PGP {label}-----\n");

    for (key, value) in headers {
        result.push_str(&format!("{key}: {value}\n"));
    }
    result.push('\n');

    let b64 = BASE64.encode(payload);
    // base64 output is pure ASCII, so any byte offset is a char boundary
    let mut rest = b64.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(LINE_WIDTH));
        result.push_str(line);
        result.push('\n');
        rest = tail;
    }

    result.push_str(&checksum_line(payload));
    result.push('\n');
    result.push_str(&format!("-----END PGP {label}-----\n"));
    result
}

/// Decode ASCII armor to bytes
pub fn armor_decode(s: &str) -> Result<ArmorBlock> {
    let lines: Vec<&str> = s.lines().map(str::trim_end).collect();

    let begin_idx = lines
        .iter()
        .position(|l| l.starts_with("-----BEGIN PGP "))
        .ok_or_else(|| KeysealError::format("armor: missing BEGIN line"))?;

    let type_str = lines[begin_idx]
        .strip_prefix("-----BEGIN PGP ")
        .and_then(|s| s.strip_suffix("-----"))
        .ok_or_else(|| KeysealError::format("armor: invalid BEGIN line"))?;
    let armor_type = ArmorType::from_label(type_str)
        .ok_or_else(|| KeysealError::format(format!("armor: unknown block type {type_str}")))?;

    let end_marker = format!("-----END PGP {}-----", armor_type.label());
    let end_idx = lines[begin_idx..]
        .iter()
        .position(|l| *l == end_marker)
        .map(|i| begin_idx + i)
        .ok_or_else(|| KeysealError::format("armor: missing END line"))?;

    // Headers run until the first blank line
    let mut headers = HashMap::new();
    let mut body_start = begin_idx + 1;
    for (i, line) in lines[begin_idx + 1..end_idx].iter().enumerate() {
        if line.is_empty() {
            body_start = begin_idx + 1 + i + 1;
            break;
        }
        match line.split_once(": ") {
            Some((key, value)) => {
                headers.insert(key.to_string(), value.to_string());
            }
            // No header section at all: the body starts right after BEGIN
            None => break,
        }
    }

    let mut payload_b64 = String::new();
    let mut checksum = None;
    for line in &lines[body_start..end_idx] {
        if let Some(crc) = line.strip_prefix('=') {
            checksum = Some(crc.trim());
        } else {
            payload_b64.extend(line.chars().filter(|c| !c.is_whitespace()));
        }
    }

    let payload = BASE64
        .decode(&payload_b64)
        .map_err(|e| KeysealError::format(format!("armor: base64 body: {e}")))?;

    if let Some(crc) = checksum {
        let expected = checksum_line(&payload);
        if expected[1..] != *crc {
            return Err(KeysealError::format("armor: checksum mismatch"));
        }
    }

    Ok(ArmorBlock {
        armor_type,
        headers,
        payload,
    })
}

/// Returns true when the input looks like an armored block rather than a binary packet stream.
pub fn is_armored(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(b"-----BEGIN PGP ")
}

/// De-armor `data` if it is armored; binary input passes through untouched.
pub fn dearmor_if_needed(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if !is_armored(data) {
        return Ok(Cow::Borrowed(data));
    }
    let text = std::str::from_utf8(data)
        .map_err(|_| KeysealError::format("armor: not valid UTF-8"))?;
    Ok(Cow::Owned(armor_decode(text)?.payload))
}

/// The `Version` header written on every block this crate produces.
pub fn version_header() -> (&'static str, &'static str) {
    ("Version", concat!("keyseal ", env!("CARGO_PKG_VERSION")))
}
