use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Format tag distinguishing encrypted values from legacy plaintext rows.
const PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Reversible transform applied to free text before persistence and after
/// retrieval. Without a key it degrades to identity, so the service stays
/// usable in development.
#[derive(Clone)]
pub struct TextCipher {
    key: Option<[u8; 32]>,
}

impl std::fmt::Debug for TextCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextCipher")
            .field("enabled", &self.key.is_some())
            .finish()
    }
}

impl TextCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key: Some(key) }
    }

    /// Identity transform: values persist as given.
    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt a value for storage. Empty text stays empty, and a value that
    /// already carries the format tag is not double-encrypted.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let Some(key) = &self.key else {
            return plaintext.to_string();
        };
        if plaintext.is_empty() || plaintext.starts_with(PREFIX) {
            return plaintext.to_string();
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; repack as iv|tag|ct to
        // match the stored format.
        let Ok(sealed) = cipher.encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
        else {
            // Encryption only fails on absurd input sizes; store nothing
            // rather than leaking plaintext.
            return String::new();
        };
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut packed = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct.len());
        packed.extend_from_slice(&nonce_bytes);
        packed.extend_from_slice(tag);
        packed.extend_from_slice(ct);

        format!("{PREFIX}{}", BASE64.encode(packed))
    }

    /// Decrypt a stored value for display. Fails closed: if the key changed
    /// or the value is corrupted, returns an empty string instead of
    /// ciphertext or an error, so listing endpoints stay usable.
    pub fn decrypt(&self, value: &str) -> String {
        let Some(key) = &self.key else {
            return value.to_string();
        };
        if value.is_empty() {
            return String::new();
        }
        let Some(packed_b64) = value.strip_prefix(PREFIX) else {
            // Legacy plaintext row.
            return value.to_string();
        };

        let Ok(packed) = BASE64.decode(packed_b64) else {
            return String::new();
        };
        if packed.len() < NONCE_LEN + TAG_LEN + 1 {
            return String::new();
        }

        let (nonce, rest) = packed.split_at(NONCE_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(ct.len() + TAG_LEN);
        sealed.extend_from_slice(ct);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        match cipher.decrypt(Nonce::from_slice(nonce), sealed.as_slice()) {
            Ok(plain) => String::from_utf8(plain).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = TextCipher::new(generate_key());
        let stored = cipher.encrypt("see you tuesday at 6");

        assert!(stored.starts_with(PREFIX));
        assert_eq!(cipher.decrypt(&stored), "see you tuesday at 6");
    }

    #[test]
    fn disabled_cipher_passes_through() {
        let cipher = TextCipher::disabled();
        assert_eq!(cipher.encrypt("hello"), "hello");
        assert_eq!(cipher.decrypt("hello"), "hello");
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = TextCipher::new(generate_key());
        assert_eq!(cipher.decrypt("plain old row"), "plain old row");
    }

    #[test]
    fn wrong_key_fails_closed() {
        let stored = TextCipher::new(generate_key()).encrypt("secret");
        let other = TextCipher::new(generate_key());
        assert_eq!(other.decrypt(&stored), "");
    }

    #[test]
    fn corrupted_value_fails_closed() {
        let cipher = TextCipher::new(generate_key());
        assert_eq!(cipher.decrypt("enc:v1:not-base64!!"), "");
        assert_eq!(cipher.decrypt("enc:v1:AAAA"), "");
    }

    #[test]
    fn empty_text_stays_empty() {
        let cipher = TextCipher::new(generate_key());
        assert_eq!(cipher.encrypt(""), "");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn already_tagged_value_not_double_encrypted() {
        let cipher = TextCipher::new(generate_key());
        let stored = cipher.encrypt("once");
        assert_eq!(cipher.encrypt(&stored), stored);
    }
}
