// CLI configuration file

use anyhow::{Context, Result};
use directories::ProjectDirs;
use keyseal::{
    CompressionAlgorithm, EncryptOptions, KdfParams, KeyGenOptions, SymmetricAlgorithm,
    DEFAULT_KEY_SIZE_BITS, DEFAULT_PUBLIC_EXPONENT,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that `keygen` writes to when no directory is given.
    pub key_store: Option<PathBuf>,
    pub encrypt: EncryptDefaults,
    pub keygen: KeygenDefaults,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptDefaults {
    pub armor: bool,
    pub integrity: bool,
    pub cipher: SymmetricAlgorithm,
    pub compression: CompressionAlgorithm,
}

impl Default for EncryptDefaults {
    fn default() -> Self {
        let options = EncryptOptions::default();
        Self {
            armor: options.armor,
            integrity: options.with_integrity,
            cipher: options.symmetric,
            compression: options.compression,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygenDefaults {
    pub key_size_bits: usize,
    pub public_exponent: u64,
    pub armor: bool,
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
    pub kdf_parallelism: u32,
}

impl Default for KeygenDefaults {
    fn default() -> Self {
        let kdf = KdfParams::default();
        Self {
            key_size_bits: DEFAULT_KEY_SIZE_BITS,
            public_exponent: DEFAULT_PUBLIC_EXPONENT,
            armor: true,
            kdf_memory_kib: kdf.m_cost_kib,
            kdf_iterations: kdf.t_cost,
            kdf_parallelism: kdf.p_cost,
        }
    }
}

impl From<&EncryptDefaults> for EncryptOptions {
    fn from(defaults: &EncryptDefaults) -> Self {
        EncryptOptions {
            armor: defaults.armor,
            with_integrity: defaults.integrity,
            symmetric: defaults.cipher,
            compression: defaults.compression,
        }
    }
}

impl From<&KeygenDefaults> for KeyGenOptions {
    fn from(defaults: &KeygenDefaults) -> Self {
        KeyGenOptions {
            key_size_bits: defaults.key_size_bits,
            public_exponent: defaults.public_exponent,
            armor: defaults.armor,
            kdf: KdfParams {
                m_cost_kib: defaults.kdf_memory_kib,
                t_cost: defaults.kdf_iterations,
                p_cost: defaults.kdf_parallelism,
            },
        }
    }
}

impl Config {
    /// Load from `explicit` if given (the file must exist), else from the platform config path if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::config_path()?;
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn config_path() -> Result<PathBuf> {
        // Linux: ~/.config/keyseal/config.toml
        let dirs = ProjectDirs::from("io", "keyseal", "keyseal")
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_library_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(EncryptOptions::from(&config.encrypt), EncryptOptions::default());

        let keygen = KeyGenOptions::from(&config.keygen);
        assert_eq!(keygen.key_size_bits, DEFAULT_KEY_SIZE_BITS);
        assert_eq!(keygen.kdf, KdfParams::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            key_store = "/var/lib/keys"

            [encrypt]
            cipher = "aes256"
            compression = "zlib"

            [keygen]
            key_size_bits = 2048
            "#,
        )
        .unwrap();

        assert_eq!(config.key_store, Some(PathBuf::from("/var/lib/keys")));
        let options = EncryptOptions::from(&config.encrypt);
        assert_eq!(options.symmetric, SymmetricAlgorithm::Aes256);
        assert_eq!(options.compression, CompressionAlgorithm::Zlib);
        assert!(options.armor);
        assert!(options.with_integrity);
        assert_eq!(config.keygen.key_size_bits, 2048);
        assert_eq!(config.keygen.public_exponent, DEFAULT_PUBLIC_EXPONENT);
    }

    #[test]
    fn unknown_cipher_is_rejected() {
        assert!(Config::parse("[encrypt]\ncipher = \"des\"\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/keyseal.toml"))).is_err());
    }
}
