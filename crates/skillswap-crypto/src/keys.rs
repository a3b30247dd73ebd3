use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

/// Generate a random 256-bit text-encryption key.
pub fn generate_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for storage in the environment.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Parse a key from its environment representation: 64 hex chars or base64
/// of exactly 32 bytes.
pub fn key_from_str(raw: &str) -> Result<[u8; 32]> {
    let raw = raw.trim();

    let bytes = if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut out = Vec::with_capacity(32);
        let chars: Vec<char> = raw.chars().collect();
        for pair in chars.chunks(2) {
            let hi = pair[0].to_digit(16).ok_or_else(|| anyhow!("bad hex"))?;
            let lo = pair[1].to_digit(16).ok_or_else(|| anyhow!("bad hex"))?;
            out.push(((hi << 4) | lo) as u8);
        }
        out
    } else {
        BASE64.decode(raw)?
    };

    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("text key must be exactly 32 bytes"))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = generate_key();
        let encoded = key_to_base64(&key);
        assert_eq!(key_from_str(&encoded).unwrap(), key);
    }

    #[test]
    fn hex_accepted() {
        let hex = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
        let key = key_from_str(hex).unwrap();
        assert_eq!(key[0], 0x00);
        assert_eq!(key[1], 0x11);
        assert_eq!(key[31], 0xff);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(key_from_str("dG9vLXNob3J0").is_err());
    }
}
