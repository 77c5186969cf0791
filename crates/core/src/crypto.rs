//! Field-level encryption for reserver PII (guest names and emails, user
//! contact details held by the collaborator domain).
//!
//! Values are sealed with AES-256-GCM under a process-wide data key. Each
//! encryption draws a fresh 96-bit nonce; the stored form is
//! `nonce || ciphertext+tag`. When no key is configured the cipher runs in
//! plaintext mode: [`PiiCipher::seal`] returns [`Pii::Plain`] and nothing is
//! ever written to the ciphertext columns.
//!
//! The data key itself is stored wrapped (encrypted) under a master key, see
//! [`wrap_data_key`] / [`unwrap_data_key`].

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::Rng;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failures raised by the cipher or the key-management collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Encrypted value present but no data key is configured")]
    KeyUnavailable,

    #[error("Decrypted value is not valid UTF-8")]
    InvalidUtf8,

    #[error("Key storage error: {0}")]
    KeyStore(String),
}

impl From<CryptoError> for CoreError {
    fn from(err: CryptoError) -> Self {
        CoreError::Internal(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A 256-bit symmetric key. The `Debug` impl never prints key material.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; KEY_LENGTH]);

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "expected {KEY_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LENGTH];
        rand::rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Parse a key from 64 hexadecimal characters (the `PII_MASTER_KEY` format).
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(input.trim())
            .ok_or_else(|| CryptoError::InvalidKey("key must be hexadecimal".into()))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

/// Key-management collaborator: hands out the process data key.
///
/// Consumed exactly once, when the cipher is built at startup.
#[async_trait]
pub trait DataKeyProvider: Send + Sync {
    async fn get_or_create_data_key(&self) -> Result<DataKey, CryptoError>;
}

/// Provider that always returns the key it was built with.
pub struct StaticKeyProvider(DataKey);

impl StaticKeyProvider {
    pub fn new(key: DataKey) -> Self {
        Self(key)
    }
}

#[async_trait]
impl DataKeyProvider for StaticKeyProvider {
    async fn get_or_create_data_key(&self) -> Result<DataKey, CryptoError> {
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Stored representation
// ---------------------------------------------------------------------------

/// How a PII field is held at rest.
///
/// Rows written before encryption was enabled keep their plaintext column;
/// rows written afterwards only carry ciphertext. Exactly one form is
/// authoritative per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pii {
    Plain(String),
    Encrypted(Vec<u8>),
}

impl Pii {
    /// Pick the authoritative representation from a pair of columns.
    ///
    /// Ciphertext wins when both are present. Returns `None` when neither is.
    pub fn from_columns(plain: Option<String>, encrypted: Option<Vec<u8>>) -> Option<Self> {
        match (encrypted, plain) {
            (Some(bytes), _) if !bytes.is_empty() => Some(Pii::Encrypted(bytes)),
            (_, Some(text)) => Some(Pii::Plain(text)),
            _ => None,
        }
    }

    /// Split into `(plaintext column, ciphertext column)` for persistence.
    pub fn into_columns(self) -> (Option<String>, Option<Vec<u8>>) {
        match self {
            Pii::Plain(text) => (Some(text), None),
            Pii::Encrypted(bytes) => (None, Some(bytes)),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Pii::Encrypted(_))
    }
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Stateless encrypt/decrypt of free-text PII fields.
#[derive(Clone)]
pub struct PiiCipher {
    inner: Option<Aes256Gcm>,
}

impl fmt::Debug for PiiCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PiiCipher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl PiiCipher {
    /// Build an enabled cipher from a data key.
    pub fn new(key: &DataKey) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            inner: Some(cipher),
        })
    }

    /// Plaintext mode: no key configured.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Fetch the data key from the key-management collaborator and build the cipher.
    pub async fn from_provider(provider: &dyn DataKeyProvider) -> Result<Self, CryptoError> {
        let key = provider.get_or_create_data_key().await?;
        Self::new(&key)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Encrypt a string. Fails with [`CryptoError::KeyUnavailable`] when disabled.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.inner.as_ref().ok_or(CryptoError::KeyUnavailable)?;
        seal_bytes(cipher, plaintext.as_bytes())
    }

    /// Decrypt a value produced by [`PiiCipher::encrypt`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<String, CryptoError> {
        let cipher = self.inner.as_ref().ok_or(CryptoError::KeyUnavailable)?;
        let bytes = open_bytes(cipher, ciphertext)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Produce the at-rest form of a field: ciphertext when enabled, plaintext otherwise.
    pub fn seal(&self, plaintext: &str) -> Result<Pii, CryptoError> {
        if self.is_enabled() {
            Ok(Pii::Encrypted(self.encrypt(plaintext)?))
        } else {
            Ok(Pii::Plain(plaintext.to_string()))
        }
    }

    /// Recover the plaintext of a stored field regardless of how it was written.
    pub fn open(&self, value: &Pii) -> Result<String, CryptoError> {
        match value {
            Pii::Plain(text) => Ok(text.clone()),
            Pii::Encrypted(bytes) => self.decrypt(bytes),
        }
    }
}

/// Encrypt a data key under a master key for storage.
pub fn wrap_data_key(master: &DataKey, data_key: &DataKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    seal_bytes(&cipher, data_key.as_bytes())
}

/// Reverse of [`wrap_data_key`].
pub fn unwrap_data_key(master: &DataKey, wrapped: &[u8]) -> Result<DataKey, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(master.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let bytes = open_bytes(&cipher, wrapped)?;
    DataKey::from_slice(&bytes)
}

fn seal_bytes(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_bytes(cipher: &Aes256Gcm, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LENGTH {
        return Err(CryptoError::Decrypt);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

// ---------------------------------------------------------------------------
// hex decoding helper (no extra dep)
// ---------------------------------------------------------------------------

mod hex {
    /// Decode a hex string. Returns `None` on odd length or a non-hex digit.
    pub fn decode(input: &str) -> Option<Vec<u8>> {
        if input.len() % 2 != 0 {
            return None;
        }
        input
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                let hi = (pair[0] as char).to_digit(16)?;
                let lo = (pair[1] as char).to_digit(16)?;
                Some((hi * 16 + lo) as u8)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> PiiCipher {
        PiiCipher::new(&DataKey::from_bytes([7u8; KEY_LENGTH])).unwrap()
    }

    #[test]
    fn round_trips_ascii_unicode_and_empty() {
        let cipher = enabled();
        for input in ["Ann", "ann@x.com", "Zoë Ångström 贈り物 🎁", ""] {
            let sealed = cipher.encrypt(input).unwrap();
            assert_eq!(cipher.decrypt(&sealed).unwrap(), input);
        }
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let cipher = enabled();
        let a = cipher.encrypt("ann@x.com").unwrap();
        let b = cipher.encrypt("ann@x.com").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ciphertext_carries_nonce_prefix() {
        let sealed = enabled().encrypt("x").unwrap();
        // nonce + 1 byte of ciphertext + 16 byte tag
        assert_eq!(sealed.len(), NONCE_LENGTH + 1 + 16);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = enabled().encrypt("secret").unwrap();
        let other = PiiCipher::new(&DataKey::from_bytes([8u8; KEY_LENGTH])).unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        assert!(matches!(
            enabled().decrypt(&[1, 2, 3]),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn disabled_cipher_seals_as_plain() {
        let cipher = PiiCipher::disabled();
        assert_eq!(cipher.seal("Ann").unwrap(), Pii::Plain("Ann".into()));
        assert!(matches!(
            cipher.encrypt("Ann"),
            Err(CryptoError::KeyUnavailable)
        ));
    }

    #[test]
    fn open_reads_both_representations() {
        let cipher = enabled();
        let sealed = cipher.seal("Ann").unwrap();
        assert!(sealed.is_encrypted());
        assert_eq!(cipher.open(&sealed).unwrap(), "Ann");
        assert_eq!(cipher.open(&Pii::Plain("Bob".into())).unwrap(), "Bob");
    }

    #[test]
    fn disabled_cipher_cannot_open_ciphertext() {
        let sealed = enabled().seal("Ann").unwrap();
        assert!(matches!(
            PiiCipher::disabled().open(&sealed),
            Err(CryptoError::KeyUnavailable)
        ));
    }

    #[test]
    fn from_columns_prefers_ciphertext() {
        assert_eq!(
            Pii::from_columns(Some("plain".into()), Some(vec![1, 2])),
            Some(Pii::Encrypted(vec![1, 2]))
        );
        assert_eq!(
            Pii::from_columns(Some("plain".into()), None),
            Some(Pii::Plain("plain".into()))
        );
        assert_eq!(
            Pii::from_columns(Some("plain".into()), Some(vec![])),
            Some(Pii::Plain("plain".into()))
        );
        assert_eq!(Pii::from_columns(None, None), None);
    }

    #[test]
    fn data_key_wraps_and_unwraps() {
        let master = DataKey::generate();
        let data = DataKey::generate();
        let wrapped = wrap_data_key(&master, &data).unwrap();
        assert_eq!(unwrap_data_key(&master, &wrapped).unwrap(), data);
        assert!(unwrap_data_key(&DataKey::generate(), &wrapped).is_err());
    }

    #[test]
    fn hex_key_parsing() {
        let key = DataKey::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(key.as_bytes(), &[0xab; 32]);
        assert!(DataKey::from_hex("abc").is_err());
        assert!(DataKey::from_hex(&"zz".repeat(32)).is_err());
        assert!(DataKey::from_hex(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn data_key_debug_is_redacted() {
        let key = DataKey::from_bytes([1u8; KEY_LENGTH]);
        assert_eq!(format!("{key:?}"), "DataKey(..)");
    }

    #[tokio::test]
    async fn cipher_from_provider_is_enabled() {
        let provider = StaticKeyProvider::new(DataKey::generate());
        let cipher = PiiCipher::from_provider(&provider).await.unwrap();
        assert!(cipher.is_enabled());
    }
}
