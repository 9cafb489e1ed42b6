// SecretStore Service
// AES-256-GCM encryption of credentials at rest with a per-machine key

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::Rng;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, Zeroizing};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const KEY_FILE: &str = ".secret_key";

/// Marks a value as encrypted
const ENCRYPTED_PREFIX: &str = "ENC::";

pub struct SecretStore {
    data_dir: PathBuf,
}

impl SecretStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }

    /// Encrypt a secret for storage. Empty and already encrypted values pass through.
    pub fn encrypt(&self, secret: &str) -> Result<String, String> {
        if secret.is_empty() || Self::is_encrypted(secret) {
            return Ok(secret.to_string());
        }

        let key = self.machine_key()?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();

        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
            .map_err(|e| format!("Secret encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(combined)))
    }

    /// Decrypt a stored secret. Plaintext values are returned unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String, String> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let mut combined = BASE64
            .decode(encoded)
            .map_err(|e| format!("Failed to decode encrypted secret: {e}"))?;
        if combined.len() < NONCE_LEN {
            combined.zeroize();
            return Err("Invalid encrypted secret".to_string());
        }

        let key = self.machine_key()?;
        let cipher = Aes256Gcm::new_from_slice(&*key)
            .map_err(|e| format!("Failed to create cipher: {e}"))?;
        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| format!("Secret decryption failed: {e}"));
        combined.zeroize();

        let mut plaintext = plaintext?;
        let result = String::from_utf8(plaintext.clone())
            .map_err(|e| format!("Invalid UTF-8 in decrypted secret: {e}"));
        plaintext.zeroize();
        result
    }

    /// Load the machine key, creating it on first use
    fn machine_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, String> {
        let key_file = self.data_dir.join(KEY_FILE);

        if key_file.exists() {
            let mut key_data = std::fs::read(&key_file)
                .map_err(|e| format!("Failed to read machine key: {e}"))?;
            if key_data.len() != KEY_LEN {
                key_data.zeroize();
                return Err("Invalid machine key file".to_string());
            }

            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(&key_data);
            key_data.zeroize();
            return Ok(key);
        }

        std::fs::create_dir_all(&self.data_dir)
            .map_err(|e| format!("Failed to create data directory: {e}"))?;
        let key = Zeroizing::new(rand::thread_rng().gen::<[u8; KEY_LEN]>());
        std::fs::write(&key_file, *key).map_err(|e| format!("Failed to save machine key: {e}"))?;
        restrict_permissions(&key_file)?;
        log::info!("Created machine key at {key_file:?}");

        Ok(key)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| format!("Failed to set key file permissions: {e}"))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), String> {
    Ok(())
}
