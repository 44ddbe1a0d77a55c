//! Content-Encoding negotiation, decoding and encoding.
//!
//! # Responsibilities
//! - Map `Content-Encoding` values to codecs (gzip, deflate, br)
//! - Decode bodies before parsing, bounded by the body size limit
//! - Re-encode modified bodies, and compress eligible identity responses
//! - Honor `Accept-Encoding` (q-values, `*`, `identity`)
//!
//! # Design Decisions
//! - `deflate` is zlib-wrapped on the wire; raw deflate is accepted on decode
//! - Unknown encodings are never decoded; such bodies pass through untouched

use std::io::{Read, Write};

use axum::http::{header, HeaderMap};
use brotli::{CompressorReader, Decompressor};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

use crate::config::{CompressionConfig, CompressionProvider};
use crate::content::normalize_mime;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{encoding} decoding failed: {source}")]
    Decode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{encoding} encoding failed: {source}")]
    Encode {
        encoding: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// A content coding this proxy can apply or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Identity => "identity",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }

    /// Parse one coding token. `None` for codings this proxy cannot handle.
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Some(Encoding::Identity),
            "gzip" | "x-gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Brotli),
            _ => None,
        }
    }

    /// Encoding named by the `Content-Encoding` header.
    ///
    /// Stacked codings (`gzip, br`) are reported as unsupported.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let Some(value) = headers.get(header::CONTENT_ENCODING) else {
            return Some(Encoding::Identity);
        };
        let value = value.to_str().ok()?;
        if value.contains(',') {
            return None;
        }
        Self::parse(value)
    }

    /// Decode `body`, refusing output larger than `limit` bytes.
    pub fn decode(self, body: &[u8], limit: usize) -> Result<Vec<u8>, CompressionError> {
        let encoding = self.as_str();
        let read = |reader: &mut dyn Read| -> Result<Vec<u8>, CompressionError> {
            let mut out = Vec::with_capacity(body.len().saturating_mul(4).min(limit));
            reader
                .take(limit as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|source| CompressionError::Decode { encoding, source })?;
            if out.len() > limit {
                return Err(CompressionError::TooLarge { limit });
            }
            Ok(out)
        };

        match self {
            Encoding::Identity => {
                if body.len() > limit {
                    return Err(CompressionError::TooLarge { limit });
                }
                Ok(body.to_vec())
            }
            Encoding::Gzip => read(&mut GzDecoder::new(body)),
            Encoding::Deflate => read(&mut ZlibDecoder::new(body)).or_else(|e| match e {
                CompressionError::Decode { .. } => read(&mut DeflateDecoder::new(body)),
                other => Err(other),
            }),
            Encoding::Brotli => read(&mut Decompressor::new(body, BROTLI_BUFFER_SIZE)),
        }
    }

    /// Encode `body` at `level` (clamped per codec).
    pub fn encode(self, body: &[u8], level: u32) -> Result<Vec<u8>, CompressionError> {
        let encoding = self.as_str();
        let fail = |source| CompressionError::Encode { encoding, source };
        match self {
            Encoding::Identity => Ok(body.to_vec()),
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
                encoder.write_all(body).map_err(fail)?;
                encoder.finish().map_err(fail)
            }
            Encoding::Deflate => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
                encoder.write_all(body).map_err(fail)?;
                encoder.finish().map_err(fail)
            }
            Encoding::Brotli => {
                let mut out = Vec::new();
                CompressorReader::new(body, BROTLI_BUFFER_SIZE, level.min(11), BROTLI_WINDOW)
                    .read_to_end(&mut out)
                    .map_err(fail)?;
                Ok(out)
            }
        }
    }
}

impl From<CompressionProvider> for Encoding {
    fn from(provider: CompressionProvider) -> Self {
        match provider {
            CompressionProvider::Gzip => Encoding::Gzip,
            CompressionProvider::Deflate => Encoding::Deflate,
            CompressionProvider::Br => Encoding::Brotli,
        }
    }
}

/// Whether an `Accept-Encoding` value admits `encoding`.
///
/// A missing header admits only identity. An explicit `q=0` refuses.
pub fn accepts(accept_encoding: Option<&str>, encoding: Encoding) -> bool {
    let Some(accept_encoding) = accept_encoding else {
        return encoding == Encoding::Identity;
    };

    let mut wildcard = None;
    for entry in accept_encoding.split(',') {
        let mut parts = entry.split(';');
        let token = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let quality = parts
            .find_map(|p| {
                let (k, v) = p.split_once('=')?;
                (k.trim().eq_ignore_ascii_case("q")).then(|| v.trim().parse::<f32>().unwrap_or(0.0))
            })
            .unwrap_or(1.0);

        if token == "*" {
            wildcard = Some(quality > 0.0);
        } else if Encoding::parse(&token) == Some(encoding) && !token.is_empty() {
            return quality > 0.0;
        }
    }
    wildcard.unwrap_or(encoding == Encoding::Identity)
}

/// Compression policy for responses.
#[derive(Debug, Clone)]
pub struct Compressor {
    enabled: bool,
    providers: Vec<Encoding>,
    mime_types: Vec<String>,
    level: u32,
}

impl Compressor {
    pub fn from_config(config: &CompressionConfig) -> Self {
        Self {
            enabled: config.enabled,
            providers: config.providers.iter().copied().map(Encoding::from).collect(),
            mime_types: config.mime_types.iter().map(|m| normalize_mime(m)).collect(),
            level: config.level,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_compressible(&self, content_type: &str) -> bool {
        let essence = normalize_mime(content_type);
        self.mime_types.iter().any(|m| *m == essence)
    }

    /// First configured provider the client accepts for an identity body of `content_type`.
    pub fn negotiate(&self, accept_encoding: Option<&str>, content_type: &str) -> Option<Encoding> {
        if !self.enabled || !self.is_compressible(content_type) {
            return None;
        }
        self.providers
            .iter()
            .copied()
            .find(|encoding| accepts(accept_encoding, *encoding))
    }
}
