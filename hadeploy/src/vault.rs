use crate::error::Error;
use crate::Result;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, info};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_SIZE: usize = 32;
const IV_SIZE: usize = 16;
const KEY_FILE_NAME: &str = "secret.key";

/// Symmetric encryption of secrets at rest. Envelopes are
/// `base64(iv) ":" base64(ciphertext)` with a fresh random IV per call;
/// the 256-bit key lives in a local file readable only by the owner and is
/// cached in memory after first use.
pub struct Vault {
    key_file: PathBuf,
    key: OnceLock<[u8; KEY_SIZE]>,
}

impl Vault {
    pub fn open(key_dir: impl AsRef<Path>) -> Self {
        Vault {
            key_file: key_dir.as_ref().join(KEY_FILE_NAME),
            key: OnceLock::new(),
        }
    }

    /// Key material under `$HOME/.hadeploy/keys`.
    pub fn open_default() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| Error::Vault("HOME is not set, cannot locate key directory".into()))?;
        Ok(Self::open(
            PathBuf::from(home).join(".hadeploy").join("keys"),
        ))
    }

    /// Encrypt a secret. Empty input means "no secret set" and passes
    /// through unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let key = self.key()?;

        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
            .map_err(|e| Error::Vault(format!("cipher setup failed: {}", e)))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        debug!("secret encrypted");
        Ok(format!(
            "{}:{}",
            STANDARD.encode(iv),
            STANDARD.encode(ciphertext)
        ))
    }

    /// Decrypt an envelope produced by [`Vault::encrypt`]. Empty input
    /// passes through unchanged; a malformed envelope is an error, never a
    /// silently dropped secret.
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        if envelope.is_empty() {
            return Ok(String::new());
        }

        let parts: Vec<&str> = envelope.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::Vault(
                "malformed envelope, expected base64(iv):base64(ciphertext)".into(),
            ));
        }

        let iv = STANDARD
            .decode(parts[0])
            .map_err(|e| Error::Vault(format!("invalid IV encoding: {}", e)))?;
        let ciphertext = STANDARD
            .decode(parts[1])
            .map_err(|e| Error::Vault(format!("invalid ciphertext encoding: {}", e)))?;

        let key = self.key()?;

        let cipher = Aes256CbcDec::new_from_slices(key, &iv)
            .map_err(|e| Error::Vault(format!("cipher setup failed: {}", e)))?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| Error::Vault("decryption failed, wrong key or corrupt envelope".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Vault("decrypted secret is not valid UTF-8".into()))
    }

    fn key(&self) -> Result<&[u8; KEY_SIZE]> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }

        let key = self.load_or_generate_key()?;
        Ok(self.key.get_or_init(|| key))
    }

    fn load_or_generate_key(&self) -> Result<[u8; KEY_SIZE]> {
        if self.key_file.exists() {
            let bytes = std::fs::read(&self.key_file)
                .map_err(|e| Error::Vault(format!("cannot read key file: {}", e)))?;
            let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
                Error::Vault(format!(
                    "key file {} is corrupt, expected {} bytes",
                    self.key_file.display(),
                    KEY_SIZE
                ))
            })?;
            debug!("encryption key loaded from {}", self.key_file.display());
            return Ok(key);
        }

        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        self.persist_key(&key)?;
        info!("generated new encryption key at {}", self.key_file.display());
        Ok(key)
    }

    /// The key must be on disk before the first envelope is produced, or
    /// secrets written now could never be decrypted later.
    fn persist_key(&self, key: &[u8; KEY_SIZE]) -> Result<()> {
        if let Some(dir) = self.key_file.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::Vault(format!("cannot create key directory: {}", e)))?;
            restrict_permissions(dir, 0o700)?;
        }

        std::fs::write(&self.key_file, key)
            .map_err(|e| Error::Vault(format!("cannot write key file: {}", e)))?;
        restrict_permissions(&self.key_file, 0o600)?;

        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::Vault(format!("cannot set permissions on {}: {}", path.display(), e)))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path());

        for secret in ["hunter2", "p@ss w0rd with spaces", "密码", "x"] {
            let envelope = vault.encrypt(secret).unwrap();
            assert_ne!(envelope, secret);
            assert_eq!(vault.decrypt(&envelope).unwrap(), secret);
        }
    }

    #[test]
    fn empty_input_passes_through() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path());

        assert_eq!(vault.encrypt("").unwrap(), "");
        assert_eq!(vault.decrypt("").unwrap(), "");
    }

    #[test]
    fn fresh_iv_per_call() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path());

        let first = vault.encrypt("same secret").unwrap();
        let second = vault.encrypt("same secret").unwrap();

        assert_ne!(first, second);
        assert_eq!(vault.decrypt(&first).unwrap(), "same secret");
        assert_eq!(vault.decrypt(&second).unwrap(), "same secret");
    }

    #[test]
    fn key_is_persisted_and_reused() {
        let dir = tempdir().unwrap();

        let envelope = {
            let vault = Vault::open(dir.path());
            vault.encrypt("persist me").unwrap()
        };

        // A new vault over the same directory must load the same key.
        let vault = Vault::open(dir.path());
        assert_eq!(vault.decrypt(&envelope).unwrap(), "persist me");
        assert!(dir.path().join(KEY_FILE_NAME).exists());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path());
        vault.encrypt("secret").unwrap();

        let mode = std::fs::metadata(dir.path().join(KEY_FILE_NAME))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        let dir = tempdir().unwrap();
        let vault = Vault::open(dir.path());

        for bad in ["no-delimiter", "a:b:c", "!!!:???", "YWJj"] {
            assert!(vault.decrypt(bad).is_err(), "{bad} should be rejected");
        }
    }
}
