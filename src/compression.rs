//! Compression of inner packet streams.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;

use crate::errors::{KeysealError, Result};
use crate::types::{CompressedData, CompressionAlgorithm};

/// Compress a serialized packet stream into a [`CompressedData`] envelope.
pub fn compress(algorithm: CompressionAlgorithm, packets: &[u8]) -> Result<CompressedData> {
    let data = match algorithm {
        CompressionAlgorithm::Uncompressed => packets.to_vec(),
        CompressionAlgorithm::Zip => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(packets)?;
            encoder.finish()?
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(packets)?;
            encoder.finish()?
        }
    };
    Ok(CompressedData { algorithm, data })
}

/// Largest packet stream one envelope may expand to.
pub const MAX_DECOMPRESSED_LEN: u64 = 256 * 1024 * 1024;

/// Recover the nested packet stream of a [`CompressedData`] envelope.
pub fn decompress(envelope: &CompressedData) -> Result<Vec<u8>> {
    decompress_bounded(envelope, MAX_DECOMPRESSED_LEN)
}

fn decompress_bounded(envelope: &CompressedData, limit: u64) -> Result<Vec<u8>> {
    let too_large = || KeysealError::format(format!("compressed data expands beyond {limit} bytes"));
    let mut out = Vec::new();
    let result = match envelope.algorithm {
        CompressionAlgorithm::Uncompressed => {
            if envelope.data.len() as u64 > limit {
                return Err(too_large());
            }
            return Ok(envelope.data.clone());
        }
        CompressionAlgorithm::Zip => DeflateDecoder::new(envelope.data.as_slice())
            .take(limit + 1)
            .read_to_end(&mut out),
        CompressionAlgorithm::Zlib => ZlibDecoder::new(envelope.data.as_slice())
            .take(limit + 1)
            .read_to_end(&mut out),
    };
    result.map_err(|e| KeysealError::format(format!("compressed data: {e}")))?;
    if out.len() as u64 > limit {
        return Err(too_large());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_algorithm_restores_input() {
        let input = b"abcabcabcabcabcabcabcabcabcabcabcabc".repeat(20);
        for algorithm in [
            CompressionAlgorithm::Uncompressed,
            CompressionAlgorithm::Zip,
            CompressionAlgorithm::Zlib,
        ] {
            let envelope = compress(algorithm, &input).unwrap();
            assert_eq!(envelope.algorithm, algorithm);
            assert_eq!(decompress(&envelope).unwrap(), input);
        }
    }

    #[test]
    fn deflate_shrinks_repetitive_input() {
        let input = vec![0u8; 10_000];
        let envelope = compress(CompressionAlgorithm::Zip, &input).unwrap();
        assert!(envelope.data.len() < input.len() / 10);
    }

    #[test]
    fn corrupt_zlib_stream_is_format_error() {
        let envelope = CompressedData {
            algorithm: CompressionAlgorithm::Zlib,
            data: vec![0x12, 0x34, 0x56, 0x78],
        };
        assert!(matches!(decompress(&envelope), Err(KeysealError::Format(_))));
    }

    #[test]
    fn expansion_past_limit_is_format_error() {
        let input = vec![0u8; 4096];
        for algorithm in [
            CompressionAlgorithm::Uncompressed,
            CompressionAlgorithm::Zip,
            CompressionAlgorithm::Zlib,
        ] {
            let envelope = compress(algorithm, &input).unwrap();
            assert_eq!(decompress_bounded(&envelope, 4096).unwrap().len(), 4096);
            assert!(matches!(
                decompress_bounded(&envelope, 4095),
                Err(KeysealError::Format(_))
            ));
        }
    }
}
