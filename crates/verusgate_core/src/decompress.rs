//! Gzip decompression with zip-bomb defence.

use std::io::Read;

use flate2::read::GzDecoder;
use tracing::warn;

use crate::error::GatewayError;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Inflates gzip payloads, bounded by a maximum decompressed size.
#[derive(Debug, Clone)]
pub struct Decompressor {
    max_size: u64,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

impl Decompressor {
    /// Create a decompressor with the given decompressed-size ceiling.
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    /// True iff the content starts with the 2-byte gzip magic.
    pub fn is_gzipped(content: &[u8]) -> bool {
        content.len() >= 2 && content[..2] == GZIP_MAGIC
    }

    /// Decompress gzipped content; non-gzipped input is returned unchanged.
    ///
    /// Inflation stops once `max_size` bytes have been produced; exceeding
    /// the cap is a `DECOMPRESSION_FAILED` error, as is a malformed stream.
    pub fn decompress(&self, content: &[u8]) -> Result<Vec<u8>, GatewayError> {
        if !Self::is_gzipped(content) {
            return Ok(content.to_vec());
        }

        let mut out = Vec::with_capacity(content.len().saturating_mul(2));
        // One byte past the cap so overflow is distinguishable from an
        // exact-size payload.
        let mut limited = GzDecoder::new(content).take(self.max_size + 1);
        limited
            .read_to_end(&mut out)
            .map_err(|e| GatewayError::DecompressionFailed {
                reason: format!("gzip decompression failed: {e}"),
            })?;

        if out.len() as u64 > self.max_size {
            return Err(GatewayError::DecompressionFailed {
                reason: format!("decompressed size exceeds limit of {} bytes", self.max_size),
            });
        }

        Ok(out)
    }

    /// Decompress, falling back to the original bytes on any failure.
    ///
    /// Used where the gateway prefers delivering the raw payload over a 5xx.
    pub fn try_decompress(&self, content: &[u8]) -> Vec<u8> {
        match self.decompress(content) {
            Ok(out) => out,
            Err(e) => {
                warn!("serving raw payload, decompression failed: {e}");
                content.to_vec()
            }
        }
    }
}
