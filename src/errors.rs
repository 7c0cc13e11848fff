//! Error types for keyseal operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while generating keys, resolving key rings, or encoding and decoding messages.
///
/// Every variant is surfaced to the caller unchanged; nothing is downgraded to a default value.
#[derive(Debug, Error)]
pub enum KeysealError {
    /// Bad caller input: empty names or passphrases, bad file extensions, an existing decrypt target.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A referenced path does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A stream does not parse as the expected structure.
    #[error("malformed {0}")]
    Format(String),

    /// No key-ring entry satisfies a capability or identifier search.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The passphrase failed to unlock a secret key, or the secret material is corrupted.
    #[error("secret key could not be unlocked: wrong passphrase or corrupted key material")]
    Auth,

    /// Provider-level symmetric or asymmetric failure.
    #[error("cryptographic failure: {context}")]
    Crypto {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The decrypted payload does not match its integrity tag. Any output already written is untrusted.
    #[error("message failed integrity check")]
    Integrity,

    /// A recognized message shape that this crate deliberately does not handle.
    #[error("unsupported message: {0}")]
    UnsupportedMessage(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeysealError {
    pub(crate) fn crypto(context: impl Into<String>) -> Self {
        Self::Crypto {
            context: context.into(),
            source: None,
        }
    }

    pub(crate) fn crypto_with<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Crypto {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn format(what: impl Into<String>) -> Self {
        Self::Format(what.into())
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KeysealError>;
