//! Cryptographic primitives for the credential vault.
//!
//! # Algorithms
//!
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//! - **Nonces**: 12 random bytes from the OS CSPRNG, fresh per encryption
//!
//! The auth tag makes tampering and wrong-key decryption surface as a
//! [`CadenceError::Decryption`] instead of silently returning garbage.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::types::{CadenceError, Result};

/// Vault key length (ChaCha20-Poly1305, 32 bytes)
pub const KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Generate cryptographically secure random bytes.
pub fn generate_random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypt a credential payload under the given vault key.
///
/// # Returns
///
/// `(nonce, ciphertext)` - the nonce is fresh per call and must be stored
/// alongside the ciphertext.
pub fn encrypt_payload(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce: [u8; NONCE_LEN] = generate_random_bytes();

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CadenceError::Internal(format!("Encryption failed: {e}")))?;

    Ok((nonce, ciphertext))
}

/// Decrypt a credential payload.
///
/// # Errors
///
/// [`CadenceError::Decryption`] if the ciphertext was tampered with or the
/// wrong key was used (auth tag verification fails).
pub fn decrypt_payload(
    ciphertext: &[u8],
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            CadenceError::Decryption(
                "Ciphertext failed authentication (tampered data or wrong key)".into(),
            )
        })?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key: [u8; KEY_LEN] = generate_random_bytes();
        let payload = br#"{"api_token":"secret","task_id":"t1","user_id":"u1"}"#;

        let (nonce, ciphertext) = encrypt_payload(payload, &key).unwrap();

        // Ciphertext carries the 16-byte auth tag
        assert_eq!(ciphertext.len(), payload.len() + AUTH_TAG_LEN);

        let decrypted = decrypt_payload(&ciphertext, &key, &nonce).unwrap();
        assert_eq!(decrypted.as_slice(), payload);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let key: [u8; KEY_LEN] = generate_random_bytes();
        let (n1, c1) = encrypt_payload(b"same payload", &key).unwrap();
        let (n2, c2) = encrypt_payload(b"same payload", &key).unwrap();

        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key: [u8; KEY_LEN] = generate_random_bytes();
        let (nonce, mut ciphertext) = encrypt_payload(b"secret", &key).unwrap();

        ciphertext[0] ^= 0x01;

        let err = decrypt_payload(&ciphertext, &key, &nonce).unwrap_err();
        assert!(matches!(err, CadenceError::Decryption(_)));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key: [u8; KEY_LEN] = generate_random_bytes();
        let other: [u8; KEY_LEN] = generate_random_bytes();
        let (nonce, ciphertext) = encrypt_payload(b"secret", &key).unwrap();

        let err = decrypt_payload(&ciphertext, &other, &nonce).unwrap_err();
        assert!(matches!(err, CadenceError::Decryption(_)));
    }
}
