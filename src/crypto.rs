//! Encryption and verification primitives
//!
//! - AES-256-GCM for stored credential material (salt ‖ nonce ‖ ciphertext,
//!   one base64 blob; fresh salt and nonce per call)
//! - ed25519 verification for self-reported feeds
//!
//! The failure modes are deliberately asymmetric: a missing master secret is
//! an operator error and returns `Err`, while a malformed signature or key is
//! adversarial input and `verify_signature` answers `false`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("master encryption key is not configured")]
    MasterKeyMissing,
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

/// Derive the 256-bit cipher key from the operator master secret and a
/// per-blob salt.
fn derive_key(master: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(master.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Encrypt `plaintext` under the master secret. Each call produces a
/// different blob for identical input.
pub fn encrypt(plaintext: &str, master: &str) -> Result<String, CryptoError> {
    if master.is_empty() {
        return Err(CryptoError::MasterKeyMissing);
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let key = derive_key(master, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`]. Fails on a wrong key, tampered
/// tag, or malformed blob rather than returning garbage.
pub fn decrypt(blob: &str, master: &str) -> Result<String, CryptoError> {
    if master.is_empty() {
        return Err(CryptoError::MasterKeyMissing);
    }

    let bytes = BASE64
        .decode(blob)
        .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;
    if bytes.len() <= SALT_LEN + NONCE_LEN {
        return Err(CryptoError::Decryption("blob too short".to_string()));
    }

    let (salt, rest) = bytes.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(master, salt);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption("authentication failed".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".to_string()))
}

/// Verify an ed25519 signature over `message`. Any malformed input answers
/// `false`; this function never errors on adversarial data.
pub fn verify_signature(message: &[u8], signature_b64: &str, public_key_b64: &str) -> bool {
    let key_bytes = match BASE64.decode(public_key_b64) {
        Ok(b) => b,
        Err(e) => {
            debug!("Failed to decode public key: {}", e);
            return false;
        }
    };
    let key_array: [u8; 32] = match key_bytes.as_slice().try_into() {
        Ok(a) => a,
        Err(_) => {
            debug!("Invalid public key length: {}", key_bytes.len());
            return false;
        }
    };
    let verifying_key = match VerifyingKey::from_bytes(&key_array) {
        Ok(k) => k,
        Err(e) => {
            debug!("Invalid ed25519 public key: {}", e);
            return false;
        }
    };

    let sig_bytes = match BASE64.decode(signature_b64) {
        Ok(b) => b,
        Err(e) => {
            debug!("Failed to decode signature: {}", e);
            return false;
        }
    };
    let sig_array: [u8; 64] = match sig_bytes.as_slice().try_into() {
        Ok(a) => a,
        Err(_) => {
            debug!("Invalid signature length: {}", sig_bytes.len());
            return false;
        }
    };
    let signature = Signature::from_bytes(&sig_array);

    verifying_key.verify(message, &signature).is_ok()
}

/// Short hex fingerprint of a key for log lines. Never log the key itself.
pub fn key_fingerprint(key_b64: &str) -> String {
    let digest = Sha256::digest(key_b64.as_bytes());
    hex::encode(&digest[..8])
}

/// Age check for signed payloads. Staleness warns upstream, it does not
/// reject.
pub fn is_stale(timestamp: DateTime<Utc>, max_age: Duration) -> bool {
    Utc::now() - timestamp > max_age
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    const MASTER: &str = "test-master-secret";

    #[test]
    fn encrypt_roundtrip() {
        let blob = encrypt("sk_live_abc123", MASTER).unwrap();
        assert_eq!(decrypt(&blob, MASTER).unwrap(), "sk_live_abc123");
    }

    #[test]
    fn encrypt_is_randomized() {
        let a = encrypt("same input", MASTER).unwrap();
        let b = encrypt("same input", MASTER).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_master_key_is_fatal() {
        assert!(matches!(
            encrypt("data", ""),
            Err(CryptoError::MasterKeyMissing)
        ));
        assert!(matches!(
            decrypt("data", ""),
            Err(CryptoError::MasterKeyMissing)
        ));
    }

    #[test]
    fn decrypt_rejects_wrong_key_and_tampering() {
        let blob = encrypt("secret", MASTER).unwrap();
        assert!(decrypt(&blob, "other-master").is_err());

        let mut bytes = BASE64.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(decrypt(&BASE64.encode(bytes), MASTER).is_err());

        assert!(decrypt("not base64 at all!!", MASTER).is_err());
        assert!(decrypt(&BASE64.encode(b"short"), MASTER).is_err());
    }

    #[test]
    fn signature_verification() {
        let signing_key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let public_b64 = BASE64.encode(signing_key.verifying_key().as_bytes());
        let message = br#"[{"date":"2026-05-01","revenue":100}]"#;
        let sig_b64 = BASE64.encode(signing_key.sign(message).to_bytes());

        assert!(verify_signature(message, &sig_b64, &public_b64));
        assert!(!verify_signature(b"other message", &sig_b64, &public_b64));
    }

    #[test]
    fn malformed_inputs_verify_false() {
        assert!(!verify_signature(b"msg", "!!!", "also not base64"));
        assert!(!verify_signature(b"msg", &BASE64.encode([0u8; 10]), &BASE64.encode([0u8; 32])));
        assert!(!verify_signature(b"msg", &BASE64.encode([0u8; 64]), &BASE64.encode([0u8; 7])));
    }

    #[test]
    fn staleness_window() {
        assert!(!is_stale(Utc::now(), Duration::minutes(10)));
        assert!(is_stale(
            Utc::now() - Duration::minutes(30),
            Duration::minutes(10)
        ));
    }
}
