//! End-to-end codec pipeline tests.
//!
//! The agent encodes a batch as: JSON → sign (over the JSON bytes) →
//! gzip → optional RSA-OAEP. The server decodes in reverse: decrypt →
//! decompress → verify. Every supported combination of signing and
//! encryption must round-trip.

use pulse_core::{codec, crypto, signature, MetricEnvelope};
use rsa::{RsaPrivateKey, RsaPublicKey};

fn sample_batch() -> Vec<MetricEnvelope> {
    vec![
        MetricEnvelope::counter("PollCount", 12),
        MetricEnvelope::gauge("CPUutilization", 37.5),
        MetricEnvelope::gauge("FreeMemory", 8.0 * 1024.0 * 1024.0 * 1024.0),
    ]
}

fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, 2048).unwrap();
    let public = RsaPublicKey::from(&private);
    (private, public)
}

#[test]
fn gzipped_batch_roundtrips() {
    let batch = sample_batch();
    let payload = serde_json::to_vec(&batch).unwrap();

    let wire = codec::compress_gzip(&payload).unwrap();

    let received = codec::decompress_gzip(&wire).unwrap();
    let decoded: Vec<MetricEnvelope> = serde_json::from_slice(&received).unwrap();
    assert_eq!(decoded, batch);
}

#[test]
fn signed_and_gzipped_batch_roundtrips() {
    let key = b"shared-secret";
    let batch = sample_batch();
    let payload = serde_json::to_vec(&batch).unwrap();

    // The digest covers the JSON bytes, not the compressed stream.
    let digest = signature::sign_hex(key, &payload);
    let wire = codec::compress_gzip(&payload).unwrap();

    let received = codec::decompress_gzip(&wire).unwrap();
    assert!(signature::verify_hex(key, &received, &digest));

    let decoded: Vec<MetricEnvelope> = serde_json::from_slice(&received).unwrap();
    assert_eq!(decoded, batch);
}

#[test]
fn encrypted_gzipped_batch_roundtrips() {
    let (private, public) = test_keypair();
    let batch = sample_batch();
    let payload = serde_json::to_vec(&batch).unwrap();

    let compressed = codec::compress_gzip(&payload).unwrap();
    let wire = crypto::encrypt_oaep(&public, &compressed).unwrap();

    let opened = crypto::decrypt_oaep(&private, &wire).unwrap();
    let received = codec::decompress_gzip(&opened).unwrap();

    let decoded: Vec<MetricEnvelope> = serde_json::from_slice(&received).unwrap();
    assert_eq!(decoded, batch);
}

#[test]
fn signed_encrypted_gzipped_batch_roundtrips() {
    let key = b"shared-secret";
    let (private, public) = test_keypair();
    let batch = sample_batch();
    let payload = serde_json::to_vec(&batch).unwrap();

    let digest = signature::sign_hex(key, &payload);
    let compressed = codec::compress_gzip(&payload).unwrap();
    let wire = crypto::encrypt_oaep(&public, &compressed).unwrap();

    let opened = crypto::decrypt_oaep(&private, &wire).unwrap();
    let received = codec::decompress_gzip(&opened).unwrap();

    assert!(signature::verify_hex(key, &received, &digest));
    let decoded: Vec<MetricEnvelope> = serde_json::from_slice(&received).unwrap();
    assert_eq!(decoded, batch);

    // A digest computed under a different key must not verify.
    assert!(!signature::verify_hex(b"wrong", &received, &digest));
}

#[test]
fn tampered_ciphertext_fails_decryption() {
    let (private, public) = test_keypair();
    let payload = serde_json::to_vec(&sample_batch()).unwrap();

    let compressed = codec::compress_gzip(&payload).unwrap();
    let mut wire = crypto::encrypt_oaep(&public, &compressed).unwrap();

    let last = wire.len() - 1;
    wire[last] ^= 0xff;

    assert!(crypto::decrypt_oaep(&private, &wire).is_err());
}
