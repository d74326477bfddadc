//! Gzip payload codec.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{PulseError, Result};

/// Compress `data` with gzip at the default level.
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|e| PulseError::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| PulseError::Compression(e.to_string()))
}

/// Decompress a gzip stream.
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| PulseError::Compression(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gzip_roundtrip() {
        let payload = br#"[{"id":"hits","type":"counter","delta":1}]"#;
        let compressed = compress_gzip(payload).unwrap();
        assert_ne!(compressed.as_slice(), payload.as_slice());
        assert_eq!(decompress_gzip(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        assert!(decompress_gzip(b"definitely not gzip").is_err());
    }
}
