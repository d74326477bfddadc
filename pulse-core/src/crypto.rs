//! RSA-OAEP payload encryption.
//!
//! RSA-OAEP can only seal `key_size − 2·hash_size − 2` bytes at a time, so
//! payloads are split into chunks which are encrypted independently and
//! concatenated in order. Decryption walks the ciphertext in `key_size`
//! strides.

use std::path::Path;

use rsa::pkcs8::DecodePrivateKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{PulseError, Result};

/// Load an RSA public key from a PEM file (SPKI `PUBLIC KEY` block).
pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey> {
    let path = path.as_ref();
    let pem = std::fs::read_to_string(path)
        .map_err(|e| PulseError::Io { path: path.to_path_buf(), source: e })?;

    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| PulseError::InvalidConfig {
        reason: format!("{} is not an RSA public key: {e}", path.display()),
    })
}

/// Load an RSA private key from a PEM file (PKCS#8 `PRIVATE KEY` block).
pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey> {
    let path = path.as_ref();
    let pem = std::fs::read_to_string(path)
        .map_err(|e| PulseError::Io { path: path.to_path_buf(), source: e })?;

    RsaPrivateKey::from_pkcs8_pem(&pem).map_err(|e| PulseError::InvalidConfig {
        reason: format!("{} is not an RSA private key: {e}", path.display()),
    })
}

/// Encrypt `msg` with RSA-OAEP/SHA-256, chunked to the key's capacity.
pub fn encrypt_oaep(key: &RsaPublicKey, msg: &[u8]) -> Result<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let chunk_size = key.size() - 2 * Sha256::output_size() - 2;

    let mut out = Vec::new();

    for chunk in msg.chunks(chunk_size) {
        let sealed = key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
            .map_err(|e| PulseError::Encryption(e.to_string()))?;
        out.extend_from_slice(&sealed);
    }

    Ok(out)
}

/// Decrypt a concatenation of RSA-OAEP/SHA-256 chunks.
pub fn decrypt_oaep(key: &RsaPrivateKey, msg: &[u8]) -> Result<Vec<u8>> {
    let chunk_size = key.size();

    let mut out = Vec::new();

    for chunk in msg.chunks(chunk_size) {
        let opened = key
            .decrypt(Oaep::new::<Sha256>(), chunk)
            .map_err(|e| PulseError::Decryption(e.to_string()))?;
        out.extend_from_slice(&opened);
    }

    Ok(out)
}
