//! keyseal command line: key pair generation, file encryption and decryption.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

use keyseal::{
    CompressionAlgorithm, EncryptOptions, KeyGenOptions, SymmetricAlgorithm,
    DEFAULT_PUBLIC_KEY_FILE, DEFAULT_SECRET_KEY_FILE,
};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "keyseal")]
#[command(about = "Encrypt files to RSA public keys")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true, env = "KEYSEAL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PassphraseArg {
    /// Secret key passphrase
    #[arg(long, env = "KEYSEAL_PASSPHRASE", hide_env_values = true)]
    passphrase: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key pair into a key store directory
    Keygen {
        /// Identity bound to the key, e.g. an email address
        identity: String,

        #[command(flatten)]
        passphrase: PassphraseArg,

        /// Key store directory (defaults to `key_store` from the config, else the current directory)
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long, default_value = DEFAULT_SECRET_KEY_FILE)]
        secret_name: String,

        #[arg(long, default_value = DEFAULT_PUBLIC_KEY_FILE)]
        public_name: String,

        /// RSA modulus size in bits
        #[arg(long)]
        bits: Option<usize>,

        /// Write binary keys (.gpg) instead of armored ones (.asc)
        #[arg(long)]
        binary: bool,
    },
    /// Encrypt a file for the first encryption key in a public key file
    Encrypt {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Public key file
        #[arg(short = 'k', long)]
        key: PathBuf,

        #[arg(long, value_enum)]
        cipher: Option<CipherArg>,

        #[arg(long, value_enum)]
        compression: Option<CompressionArg>,

        /// Write a binary message instead of an armored one
        #[arg(long)]
        binary: bool,

        /// Omit the integrity tag
        #[arg(long)]
        no_integrity: bool,
    },
    /// Decrypt a message with a secret key file
    Decrypt {
        input: PathBuf,

        /// Secret key file
        #[arg(short = 'k', long)]
        key: PathBuf,

        #[command(flatten)]
        passphrase: PassphraseArg,

        /// Output path; a file name stored in the message takes precedence within the same directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CipherArg {
    Aes128,
    Aes192,
    Aes256,
}

impl From<CipherArg> for SymmetricAlgorithm {
    fn from(arg: CipherArg) -> Self {
        match arg {
            CipherArg::Aes128 => SymmetricAlgorithm::Aes128,
            CipherArg::Aes192 => SymmetricAlgorithm::Aes192,
            CipherArg::Aes256 => SymmetricAlgorithm::Aes256,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CompressionArg {
    None,
    Zip,
    Zlib,
}

impl From<CompressionArg> for CompressionAlgorithm {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => CompressionAlgorithm::Uncompressed,
            CompressionArg::Zip => CompressionAlgorithm::Zip,
            CompressionArg::Zlib => CompressionAlgorithm::Zlib,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyseal=debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyseal=warn"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen {
            identity,
            passphrase,
            dir,
            secret_name,
            public_name,
            bits,
            binary,
        } => {
            let mut options = KeyGenOptions::from(&config.keygen);
            if let Some(bits) = bits {
                options.key_size_bits = bits;
            }
            if binary {
                options.armor = false;
            }
            let dir = dir
                .or(config.key_store)
                .unwrap_or_else(|| PathBuf::from("."));

            let key_id = keyseal::generate_key_pair_files(
                &identity,
                &passphrase.passphrase,
                &dir,
                &secret_name,
                &public_name,
                &options,
            )
            .with_context(|| format!("generating key pair in {}", dir.display()))?;

            println!("Generated key {}", keyseal::format_key_id(key_id));
            println!("  secret: {}", dir.join(&secret_name).display());
            println!("  public: {}", dir.join(&public_name).display());
        }
        Commands::Encrypt {
            input,
            output,
            key,
            cipher,
            compression,
            binary,
            no_integrity,
        } => {
            let mut options = EncryptOptions::from(&config.encrypt);
            if let Some(cipher) = cipher {
                options.symmetric = cipher.into();
            }
            if let Some(compression) = compression {
                options.compression = compression.into();
            }
            if binary {
                options.armor = false;
            }
            if no_integrity {
                options.with_integrity = false;
            }

            keyseal::encrypt_file(&output, &input, &key, &options)
                .with_context(|| format!("encrypting {}", input.display()))?;
            println!("Encrypted {} -> {}", input.display(), output.display());
        }
        Commands::Decrypt {
            input,
            key,
            passphrase,
            output,
        } => {
            let written = keyseal::decrypt_file(&input, &key, &passphrase.passphrase, &output)
                .with_context(|| format!("decrypting {}", input.display()))?;
            println!("Decrypted {} -> {}", input.display(), written.display());
        }
    }

    Ok(())
}
