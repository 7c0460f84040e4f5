//! Keyed hashing and AES-256-GCM field encryption for CRM records.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

pub const HASH_KEY_ENV: &str = "CRYPTO_HASH_SECRET_KEY_PLUGIN_CRM";
pub const ENCRYPT_KEY_ENV: &str = "CRYPTO_ENCRYPT_SECRET_KEY_PLUGIN_CRM";

const NONCE_LEN: usize = 12;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("missing crypto key: {0} is not set")]
    MissingKey(&'static str),

    #[error("invalid crypto key: {0}")]
    InvalidKey(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("failed to decrypt field '{path}': {reason}")]
    Decrypt { path: String, reason: String },

    #[error("failed to decrypt record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<CryptoError>,
    },
}

/// The two CRM secrets as configured. Either may be absent until a CRM path
/// actually needs it.
#[derive(Debug, Clone, Default)]
pub struct CrmSecrets {
    pub hash_secret: Option<String>,
    pub encrypt_secret: Option<String>,
}

impl CrmSecrets {
    pub fn new(hash_secret: impl Into<String>, encrypt_secret: impl Into<String>) -> Self {
        Self {
            hash_secret: Some(hash_secret.into()),
            encrypt_secret: Some(encrypt_secret.into()),
        }
    }

    /// Builds the cipher, failing on the first missing key.
    pub fn crypto(&self) -> Result<Crypto, CryptoError> {
        let hash_secret = present(&self.hash_secret).ok_or(CryptoError::MissingKey(HASH_KEY_ENV))?;
        let encrypt_secret =
            present(&self.encrypt_secret).ok_or(CryptoError::MissingKey(ENCRYPT_KEY_ENV))?;
        Crypto::new(hash_secret, encrypt_secret)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

pub struct Crypto {
    mac: HmacSha256,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}

impl Crypto {
    /// `encrypt_secret` is a hex-encoded 32-byte AES-256 key.
    pub fn new(hash_secret: &str, encrypt_secret: &str) -> Result<Self, CryptoError> {
        let key_bytes = hex::decode(encrypt_secret.trim()).map_err(|err| {
            CryptoError::InvalidKey(format!("{ENCRYPT_KEY_ENV} is not valid hex: {err}"))
        })?;
        if key_bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "{ENCRYPT_KEY_ENV} must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mac = <HmacSha256 as Mac>::new_from_slice(hash_secret.as_bytes())
            .map_err(|err| CryptoError::InvalidKey(format!("{HASH_KEY_ENV}: {err}")))?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            mac,
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Lowercase hex HMAC-SHA256 of `value`.
    pub fn hash(&self, value: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|err| CryptoError::Cipher(err.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(payload))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let payload = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|err| CryptoError::Cipher(format!("invalid base64: {err}")))?;
        if payload.len() <= NONCE_LEN {
            return Err(CryptoError::Cipher(format!(
                "ciphertext too short ({} bytes)",
                payload.len()
            )));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Cipher("authentication failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|err| CryptoError::Cipher(format!("plaintext is not utf-8: {err}")))
    }
}
