//! Keyed SHA-256 digests over request payloads.
//!
//! The agent signs the raw JSON bytes before compression; the server
//! verifies after decompression. The digest travels hex-encoded in the
//! `HashSHA256` HTTP header or the `hashsum` gRPC metadata entry.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Digest length in bytes.
pub const DIGEST_LEN: usize = 32;

fn mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC takes variable-length keys")
}

/// Compute the keyed SHA-256 digest of `payload`.
pub fn sign(key: &[u8], payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut h = mac(key);
    h.update(payload);
    h.finalize().into_bytes().into()
}

/// Compute the digest and return it hex-encoded for header transport.
pub fn sign_hex(key: &[u8], payload: &[u8]) -> String {
    hex::encode(sign(key, payload))
}

/// Constant-time verification of a raw digest.
pub fn verify(key: &[u8], payload: &[u8], digest: &[u8]) -> bool {
    let mut h = mac(key);
    h.update(payload);
    h.verify_slice(digest).is_ok()
}

/// Verification of a hex-encoded digest. A digest that does not decode
/// never verifies.
pub fn verify_hex(key: &[u8], payload: &[u8], digest: &str) -> bool {
    match hex::decode(digest) {
        Ok(raw) => verify(key, payload, &raw),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let digest = sign(b"secret", b"payload");
        assert_eq!(digest.len(), DIGEST_LEN);
        assert!(verify(b"secret", b"payload", &digest));
        assert!(!verify(b"secret", b"tampered", &digest));
        assert!(!verify(b"other-key", b"payload", &digest));
    }

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign(b"k", b"data"), sign(b"k", b"data"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = sign_hex(b"k", b"data");
        assert_eq!(digest.len(), DIGEST_LEN * 2);
        assert!(verify_hex(b"k", b"data", &digest));
        assert!(!verify_hex(b"k", b"data", "not hex"));
        assert!(!verify_hex(b"k", b"data", ""));
    }
}
