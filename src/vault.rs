//! Encryption of stored provider API keys.
//!
//! ChaCha20-Poly1305 AEAD. The stored form is base64 of
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`. The (owner, provider)
//! pair is bound as associated data, so a ciphertext copied to another row
//! fails to open.
//!
//! There is no built-in key. Without the key variable set, key storage is
//! unavailable.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ring::aead::{
    Aad, BoundKey, CHACHA20_POLY1305, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey,
};
use ring::error::Unspecified;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Default name of the environment variable holding the key.
pub const DEFAULT_KEY_ENV: &str = "AGENTFLOW_ENCRYPTION_KEY";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption key not set (expected in ${0})")]
    MissingKey(String),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("failed to generate random bytes")]
    RandomGeneration,

    #[error("encryption failed")]
    Encryption,

    /// Wrong key, tampered ciphertext, or ciphertext from another row.
    #[error("decryption failed")]
    Decryption,

    #[error("invalid ciphertext: {0}")]
    InvalidFormat(String),
}

/// A nonce sequence that yields exactly one nonce.
struct OneNonce(Option<Nonce>);

impl NonceSequence for OneNonce {
    fn advance(&mut self) -> Result<Nonce, Unspecified> {
        self.0.take().ok_or(Unspecified)
    }
}

/// Seals and opens API keys with a single master key.
pub struct Vault {
    key: [u8; KEY_LEN],
    rng: SystemRandom,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Vault { key: <redacted> }")
    }
}

impl Vault {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self {
            key,
            rng: SystemRandom::new(),
        })
    }

    /// Parse a key given as 64 hex characters or base64 of 32 bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self, VaultError> {
        let encoded = encoded.trim();
        if encoded.len() == KEY_LEN * 2
            && let Ok(bytes) = hex::decode(encoded)
        {
            return Self::from_bytes(&bytes);
        }
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| VaultError::InvalidKey(format!("not hex or base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Read the key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, VaultError> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => Self::from_encoded(&value),
            _ => Err(VaultError::MissingKey(var.to_string())),
        }
    }

    /// Generate a fresh random key, returned base64-encoded.
    pub fn generate_key() -> Result<String, VaultError> {
        let mut bytes = [0u8; KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| VaultError::RandomGeneration)?;
        Ok(BASE64.encode(bytes))
    }

    /// Encrypt `plaintext` bound to `context`. Every call uses a fresh nonce.
    pub fn encrypt(&self, plaintext: &str, context: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| VaultError::RandomGeneration)?;

        let unbound =
            UnboundKey::new(&CHACHA20_POLY1305, &self.key).map_err(|_| VaultError::Encryption)?;
        let mut sealing_key = SealingKey::new(
            unbound,
            OneNonce(Some(Nonce::assume_unique_for_key(nonce_bytes))),
        );

        let mut in_out = plaintext.as_bytes().to_vec();
        sealing_key
            .seal_in_place_append_tag(Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| VaultError::Encryption)?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt a value produced by [`Vault::encrypt`] with the same `context`.
    pub fn decrypt(&self, encoded: &str, context: &str) -> Result<String, VaultError> {
        let sealed = BASE64
            .decode(encoded.trim())
            .map_err(|e| VaultError::InvalidFormat(e.to_string()))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::InvalidFormat(format!(
                "expected at least {} bytes, got {}",
                NONCE_LEN + TAG_LEN,
                sealed.len()
            )));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| VaultError::InvalidFormat("bad nonce".into()))?;

        let unbound =
            UnboundKey::new(&CHACHA20_POLY1305, &self.key).map_err(|_| VaultError::Decryption)?;
        let mut opening_key = OpeningKey::new(unbound, OneNonce(Some(nonce)));

        let mut in_out = body.to_vec();
        let plaintext = opening_key
            .open_in_place(Aad::from(context.as_bytes()), &mut in_out)
            .map_err(|_| VaultError::Decryption)?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|_| VaultError::InvalidFormat("plaintext is not UTF-8".into()))
    }
}

/// Associated data for an (owner, provider) row.
pub fn key_context(owner_id: &str, provider: &str) -> String {
    format!("{}:{}", owner_id, provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        Vault::from_bytes(&[7u8; KEY_LEN]).unwrap()
    }

    #[test]
    fn round_trip() {
        let v = vault();
        let sealed = v.encrypt("sk-test-123", "u1:openai").unwrap();
        assert_eq!(v.decrypt(&sealed, "u1:openai").unwrap(), "sk-test-123");
    }

    #[test]
    fn ciphertext_differs_per_call() {
        let v = vault();
        let a = v.encrypt("same", "ctx").unwrap();
        let b = v.encrypt("same", "ctx").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_context_or_key_fails() {
        let sealed = vault().encrypt("sk", "u1:openai").unwrap();
        assert!(matches!(
            vault().decrypt(&sealed, "u2:openai"),
            Err(VaultError::Decryption)
        ));
        let other = Vault::from_bytes(&[9u8; KEY_LEN]).unwrap();
        assert!(matches!(
            other.decrypt(&sealed, "u1:openai"),
            Err(VaultError::Decryption)
        ));
    }

    #[test]
    fn short_ciphertext_rejected() {
        let short = BASE64.encode([0u8; 10]);
        assert!(matches!(
            vault().decrypt(&short, "ctx"),
            Err(VaultError::InvalidFormat(_))
        ));
    }

    #[test]
    fn key_parsing() {
        let hex = "ab".repeat(KEY_LEN);
        assert!(Vault::from_encoded(&hex).is_ok());
        let b64 = Vault::generate_key().unwrap();
        assert!(Vault::from_encoded(&b64).is_ok());
        assert!(matches!(
            Vault::from_encoded("too-short"),
            Err(VaultError::InvalidKey(_))
        ));
    }

    #[test]
    fn hex_key_decodes_to_the_same_key() {
        let bytes: Vec<u8> = (0..KEY_LEN as u8).collect();
        let from_hex = Vault::from_encoded(&hex::encode_upper(&bytes)).unwrap();
        let sealed = from_hex.encrypt("sk-hex", "u1:groq").unwrap();
        let direct = Vault::from_bytes(&bytes).unwrap();
        assert_eq!(direct.decrypt(&sealed, "u1:groq").unwrap(), "sk-hex");
    }

    #[test]
    fn missing_env_key_is_an_error() {
        let err = Vault::from_env("AGENTFLOW_TEST_KEY_THAT_IS_NEVER_SET").unwrap_err();
        assert!(matches!(err, VaultError::MissingKey(_)));
    }
}
