//! VT5BIN10 binary container.
//!
//! A fixed 40-byte little-endian header followed by an optionally
//! GZIP-compressed payload. The header carries its own CRC32 over the first
//! 36 bytes, so torn writes and bit rot are detected before any payload
//! parsing happens.
//!
//! Layout (byte offsets):
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0      | 8    | magic `"VT5BIN10"` |
//! | 8      | 2    | header version (u16, >= 1) |
//! | 10     | 2    | dataset kind (u16) |
//! | 12     | 1    | payload codec (0 = JSON, 1 = CBOR) |
//! | 13     | 1    | compression (0 = none, 1 = gzip) |
//! | 14     | 2    | reserved, written as 0 |
//! | 16     | 8    | payload length (u64) |
//! | 24     | 8    | uncompressed length (u64) |
//! | 32     | 4    | record count (u32, `0xFFFFFFFF` = unknown) |
//! | 36     | 4    | CRC32 of bytes `[0..36)` |

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub const MAGIC: [u8; 8] = *b"VT5BIN10";
pub const HEADER_LEN: usize = 40;
pub const HEADER_VERSION: u16 = 1;

/// Dataset kind for the alias index container.
pub const DATASET_ALIAS_INDEX: u16 = 100;

/// Record count sentinel when the writer does not know the count.
pub const RECORD_COUNT_UNKNOWN: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadCodec {
    Json = 0,
    Cbor = 1,
}

impl TryFrom<u8> for PayloadCodec {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::Json),
            1 => Ok(Self::Cbor),
            other => Err(CodecError::UnknownCodec(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadCompression {
    None = 0,
    Gzip = 1,
}

impl TryFrom<u8> for PayloadCompression {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Gzip),
            other => Err(CodecError::UnknownCompression(other)),
        }
    }
}

/// Container verification or payload decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported header version {0}")]
    UnsupportedVersion(u16),
    #[error("dataset kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: u16, found: u16 },
    #[error("unknown payload codec byte {0}")]
    UnknownCodec(u8),
    #[error("unknown compression byte {0}")]
    UnknownCompression(u8),
    #[error("header checksum mismatch")]
    CrcMismatch,
    #[error("container truncated: {0}")]
    Truncated(&'static str),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cbor payload error: {0}")]
    Cbor(String),
}

/// Encodes `value` into a VT5BIN10 container.
pub fn encode<T: Serialize>(
    value: &T,
    dataset_kind: u16,
    codec: PayloadCodec,
    compression: PayloadCompression,
    record_count: u32,
) -> Result<Vec<u8>, CodecError> {
    let raw = match codec {
        PayloadCodec::Json => serde_json::to_vec(value)?,
        PayloadCodec::Cbor => {
            let mut buf = Vec::new();
            ciborium::ser::into_writer(value, &mut buf)
                .map_err(|e| CodecError::Cbor(e.to_string()))?;
            buf
        }
    };
    let uncompressed_len = raw.len() as u64;

    let payload = match compression {
        PayloadCompression::None => raw,
        PayloadCompression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&raw)?;
            encoder.finish()?
        }
    };

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&HEADER_VERSION.to_le_bytes());
    out.extend_from_slice(&dataset_kind.to_le_bytes());
    out.push(codec as u8);
    out.push(compression as u8);
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&uncompressed_len.to_le_bytes());
    out.extend_from_slice(&record_count.to_le_bytes());
    let crc = crc32fast::hash(&out[..36]);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decodes a VT5BIN10 container, verifying magic, version, dataset kind,
/// field ranges and the header CRC before touching the payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], expected_kind: u16) -> Result<T, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated("header"));
    }
    if bytes[..8] != MAGIC {
        return Err(CodecError::BadMagic);
    }

    let header_version = u16::from_le_bytes([bytes[8], bytes[9]]);
    if header_version < 1 {
        return Err(CodecError::UnsupportedVersion(header_version));
    }

    let crc_stored = u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
    if crc32fast::hash(&bytes[..36]) != crc_stored {
        return Err(CodecError::CrcMismatch);
    }

    let dataset_kind = u16::from_le_bytes([bytes[10], bytes[11]]);
    if dataset_kind != expected_kind {
        return Err(CodecError::KindMismatch {
            expected: expected_kind,
            found: dataset_kind,
        });
    }

    let codec = PayloadCodec::try_from(bytes[12])?;
    let compression = PayloadCompression::try_from(bytes[13])?;

    let payload_len = u64::from_le_bytes(bytes[16..24].try_into().expect("slice of 8")) as usize;
    let body = &bytes[HEADER_LEN..];
    if body.len() < payload_len {
        return Err(CodecError::Truncated("payload"));
    }
    let payload = &body[..payload_len];

    let raw = match compression {
        PayloadCompression::None => payload.to_vec(),
        PayloadCompression::Gzip => {
            let mut decoder = GzDecoder::new(payload);
            let mut buf = Vec::new();
            decoder.read_to_end(&mut buf)?;
            buf
        }
    };

    match codec {
        PayloadCodec::Json => Ok(serde_json::from_slice(&raw)?),
        PayloadCodec::Cbor => {
            ciborium::de::from_reader(raw.as_slice()).map_err(|e| CodecError::Cbor(e.to_string()))
        }
    }
}
