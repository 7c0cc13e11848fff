//! Path-based entry points: key pair files, file encryption and file decryption.
//!
//! These wrap the in-memory encoder, decoder and key generator with the argument and file-system checks a
//! caller working on paths expects.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::decoder;
use crate::encoder::{self, EncryptOptions};
use crate::errors::{KeysealError, Result};
use crate::keygen::{self, KeyGenOptions};
use crate::keyring;

pub const DEFAULT_SECRET_KEY_FILE: &str = "PGPPrivateKey.asc";
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "PGPPublicKey.asc";

fn non_empty(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(KeysealError::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn non_empty_path(path: &Path, what: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(KeysealError::validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn must_exist(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(KeysealError::FileNotFound(path.to_path_buf()));
    }
    Ok(())
}

fn check_key_extension(file_name: &str, armor: bool) -> Result<()> {
    let expected = if armor { "asc" } else { "gpg" };
    match Path::new(file_name).extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case(expected) => Ok(()),
        _ => Err(KeysealError::validation(format!(
            "key file {file_name:?} must have the .{expected} extension"
        ))),
    }
}

fn create_new(path: &Path, secret: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if secret {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = secret;

    options.open(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => KeysealError::validation(format!("{} already exists", path.display())),
        _ => e.into(),
    })
}

/// Generate a key pair and store it as two new files in `key_store_dir`. Returns the new key's ID.
///
/// Key file names must end in `.asc` when armored and `.gpg` otherwise. Existing files are never replaced.
pub fn generate_key_pair_files(
    identity: &str,
    passphrase: &str,
    key_store_dir: &Path,
    secret_file_name: &str,
    public_file_name: &str,
    options: &KeyGenOptions,
) -> Result<u64> {
    non_empty(identity, "identity")?;
    non_empty(passphrase, "passphrase")?;
    non_empty_path(key_store_dir, "key store directory")?;
    non_empty(secret_file_name, "secret key file name")?;
    non_empty(public_file_name, "public key file name")?;
    check_key_extension(secret_file_name, options.armor)?;
    check_key_extension(public_file_name, options.armor)?;
    if secret_file_name == public_file_name {
        return Err(KeysealError::validation("secret and public key file names must differ"));
    }
    if !key_store_dir.is_dir() {
        return Err(KeysealError::validation(format!(
            "key store {} is not an existing directory",
            key_store_dir.display()
        )));
    }

    let secret_path = key_store_dir.join(secret_file_name);
    let public_path = key_store_dir.join(public_file_name);
    for path in [&secret_path, &public_path] {
        if path.exists() {
            return Err(KeysealError::validation(format!("{} already exists", path.display())));
        }
    }

    let pair = keygen::generate_key_pair(identity, passphrase, options)?;

    let mut secret = create_new(&secret_path, true)?;
    secret.write_all(&pair.secret_key)?;
    secret.sync_all()?;
    let mut public = create_new(&public_path, false)?;
    public.write_all(&pair.public_key)?;
    public.sync_all()?;

    info!(
        key_id = %keyring::format_key_id(pair.key_id),
        secret = %secret_path.display(),
        public = %public_path.display(),
        "stored key pair"
    );
    Ok(pair.key_id)
}

/// Encrypt `input_path` to the first encryption key found in `public_key_path`.
///
/// The input's file name is recorded in the message. An existing output file is truncated, unless it is
/// the input itself.
pub fn encrypt_file(
    output_path: &Path,
    input_path: &Path,
    public_key_path: &Path,
    options: &EncryptOptions,
) -> Result<()> {
    non_empty_path(output_path, "output path")?;
    non_empty_path(input_path, "input path")?;
    non_empty_path(public_key_path, "public key path")?;
    must_exist(input_path)?;
    must_exist(public_key_path)?;

    let bundle = keyring::load_public_ring(&fs::read(public_key_path)?)?;
    let recipient = keyring::find_encryption_key(&bundle)?;
    let file_name = input_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if output_path.exists() && fs::canonicalize(output_path)? == fs::canonicalize(input_path)? {
        return Err(KeysealError::validation(format!(
            "output {} is the input file",
            output_path.display()
        )));
    }

    // Read fully before the output is created or truncated
    let plaintext = fs::read(input_path)?;
    let message = encoder::encrypt_bytes(&plaintext, &file_name, recipient, options)?;
    let mut output = BufWriter::new(File::create(output_path)?);
    output.write_all(&message)?;
    output.flush()?;

    info!(
        input = %input_path.display(),
        output = %output_path.display(),
        recipient = %keyring::format_key_id(recipient.key_id()),
        "encrypted file"
    );
    Ok(())
}

/// Decrypt `input_path` with a key from `private_key_path`. Returns the path of the file written.
///
/// The output lands next to `target_path`, under the file name stored in the message when there is one.
/// On [`KeysealError::Integrity`] the written file is left in place and must be discarded by the caller.
pub fn decrypt_file(
    input_path: &Path,
    private_key_path: &Path,
    passphrase: &str,
    target_path: &Path,
) -> Result<PathBuf> {
    non_empty_path(input_path, "input path")?;
    non_empty_path(private_key_path, "private key path")?;
    non_empty(passphrase, "passphrase")?;
    non_empty_path(target_path, "target path")?;
    must_exist(input_path)?;
    must_exist(private_key_path)?;
    if target_path.exists() {
        return Err(KeysealError::validation(format!(
            "decryption target {} already exists",
            target_path.display()
        )));
    }

    let bundle = keyring::load_secret_ring(&fs::read(private_key_path)?)?;
    let message = fs::read(input_path)?;
    let written = decoder::decrypt_to_path(&message, &bundle, passphrase, target_path)?;

    info!(input = %input_path.display(), output = %written.display(), "decrypted file");
    Ok(written)
}
