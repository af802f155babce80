// Jaskier Shared Pattern — crypto
// Credential-at-rest encryption (spec §4.A, §9). Generalised from the AES-256-GCM
// scheme the platform uses for OAuth tokens: same key derivation, same
// "enc:" prefix, same graceful plaintext degradation when no key is set.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use sha2::{Digest, Sha256};

const ENCRYPTED_PREFIX: &str = "enc:";

/// Derive a 256-bit encryption key from `CREDENTIAL_ENCRYPTION_KEY` (falls
/// back to `AUTH_SECRET`). `None` if neither is configured.
fn get_encryption_key() -> Option<[u8; 32]> {
    let raw = std::env::var("CREDENTIAL_ENCRYPTION_KEY")
        .or_else(|_| std::env::var("AUTH_SECRET"))
        .ok()
        .filter(|s| !s.is_empty())?;

    let hash = Sha256::digest(raw.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash);
    Some(key)
}

/// Encrypt a plaintext credential. Returns `"enc:<base64(nonce||ciphertext)>"`,
/// or the plaintext unchanged if no key is configured.
pub fn encrypt(plaintext: &str) -> String {
    let Some(key_bytes) = get_encryption_key() else {
        return plaintext.to_string();
    };

    let cipher = Aes256Gcm::new_from_slice(&key_bytes).expect("AES-256-GCM key is exactly 32 bytes");
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    match cipher.encrypt(&nonce, plaintext.as_bytes()) {
        Ok(ciphertext) => {
            let mut combined = nonce.to_vec();
            combined.extend_from_slice(&ciphertext);
            format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(&combined))
        }
        Err(e) => {
            tracing::error!("credential encryption failed: {} — storing plaintext", e);
            plaintext.to_string()
        }
    }
}

/// Decrypt a stored credential. Handles both encrypted and legacy plaintext values.
pub fn decrypt(stored: &str) -> Option<String> {
    if !stored.starts_with(ENCRYPTED_PREFIX) {
        return Some(stored.to_string());
    }

    let key_bytes = get_encryption_key()?;
    let encoded = &stored[ENCRYPTED_PREFIX.len()..];
    let combined = STANDARD.decode(encoded).ok()?;

    if combined.len() < 12 {
        tracing::error!("credential decryption: data too short for nonce + ciphertext");
        return None;
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new_from_slice(&key_bytes).expect("AES-256-GCM key is exactly 32 bytes");

    match cipher.decrypt(nonce, ciphertext) {
        Ok(plaintext) => String::from_utf8(plaintext).ok(),
        Err(e) => {
            tracing::error!("credential decryption failed: {e}");
            None
        }
    }
}

pub fn random_base64url(len: usize) -> String {
    let buf: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
    URL_SAFE_NO_PAD.encode(buf)
}

pub fn sha256_base64url(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_key() {
        std::env::set_var("CREDENTIAL_ENCRYPTION_KEY", "test-key-roundtrip");
        let enc = encrypt("SESSDATA=abc123");
        assert!(enc.starts_with(ENCRYPTED_PREFIX));
        assert_eq!(decrypt(&enc).as_deref(), Some("SESSDATA=abc123"));
        std::env::remove_var("CREDENTIAL_ENCRYPTION_KEY");
    }

    #[test]
    fn plaintext_passthrough_without_key() {
        std::env::remove_var("CREDENTIAL_ENCRYPTION_KEY");
        std::env::remove_var("AUTH_SECRET");
        let out = encrypt("plain");
        assert_eq!(out, "plain");
        assert_eq!(decrypt("plain").as_deref(), Some("plain"));
    }

    #[test]
    fn legacy_plaintext_decrypts_unchanged() {
        assert_eq!(decrypt("not-encrypted").as_deref(), Some("not-encrypted"));
    }
}
