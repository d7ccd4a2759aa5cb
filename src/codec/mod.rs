//! Chunk codec registry.
//!
//! Every compressed chunk names its method with a one-byte id.  The id is
//! the on-disk identity; an id this build does not know is a configuration
//! problem (the title needs a codec we do not ship), never silently treated
//! as stored data.
//!
//! Decompression is always told the expected output size.  Codecs that
//! cannot know it up front still verify it afterwards, so a short or long
//! chunk is caught here rather than surfacing as a misaligned read later.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;

// ── Method ids ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    None   = 0,
    Zlib   = 1,
    Zstd   = 2,
    Lz4    = 3,
    Lzma   = 4,
    Brotli = 5,
}

impl CompressionMethod {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Zlib),
            2 => Some(CompressionMethod::Zstd),
            3 => Some(CompressionMethod::Lz4),
            4 => Some(CompressionMethod::Lzma),
            5 => Some(CompressionMethod::Brotli),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name (diagnostics and CLI).
    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None   => "none",
            CompressionMethod::Zlib   => "zlib",
            CompressionMethod::Zstd   => "zstd",
            CompressionMethod::Lz4    => "lz4",
            CompressionMethod::Lzma   => "lzma",
            CompressionMethod::Brotli => "brotli",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none"   => Some(CompressionMethod::None),
            "zlib"   => Some(CompressionMethod::Zlib),
            "zstd"   => Some(CompressionMethod::Zstd),
            "lz4"    => Some(CompressionMethod::Lz4),
            "lzma"   => Some(CompressionMethod::Lzma),
            "brotli" => Some(CompressionMethod::Brotli),
            _        => None,
        }
    }
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("compression method {0} is not available in this build")]
    UnavailableMethod(u8),
}

impl CodecError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CodecError::UnavailableMethod(_) => ErrorClass::Configuration,
            _ => ErrorClass::Corruption,
        }
    }
}

// ── Codec trait ──────────────────────────────────────────────────────────────

pub trait Codec: Send + Sync {
    fn method(&self) -> CompressionMethod;
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError>;
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError>;
}

fn check_size(out: Vec<u8>, expected: usize) -> Result<Vec<u8>, CodecError> {
    if out.len() != expected {
        return Err(CodecError::SizeMismatch { expected, actual: out.len() });
    }
    Ok(out)
}

// ── Built-in codecs ──────────────────────────────────────────────────────────

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::None }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> { Ok(data.to_vec()) }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        check_size(data.to_vec(), expected)
    }
}

pub struct ZlibCodec;
impl Codec for ZlibCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Zlib }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level.clamp(0, 9) as u32));
        enc.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        enc.finish().map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected);
        ZlibDecoder::new(data)
            .take(expected as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_size(out, expected)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Zstd }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        zstd::encode_all(data, level).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let out = zstd::bulk::decompress(data, expected)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_size(out, expected)
    }
}

pub struct Lz4Codec;
impl Codec for Lz4Codec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Lz4 }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress(data))
    }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let out = lz4_flex::decompress(data, expected)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_size(out, expected)
    }
}

pub struct LzmaCodec;
impl Codec for LzmaCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Lzma }
    fn compress(&self, data: &[u8], _: i32) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        Ok(out)
    }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected);
        lzma_rs::lzma_decompress(&mut std::io::Cursor::new(data), &mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_size(out, expected)
    }
}

pub struct BrotliCodec;
impl Codec for BrotliCodec {
    fn method(&self) -> CompressionMethod { CompressionMethod::Brotli }
    fn compress(&self, data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
        let quality = level.clamp(0, 11) as u32;
        let mut out = Vec::new();
        {
            let mut w = brotli::CompressorWriter::new(&mut out, 4096, quality, 22);
            w.write_all(data).map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8], expected: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(expected);
        brotli::Decompressor::new(data, 4096)
            .take(expected as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_size(out, expected)
    }
}

// ── Factory ──────────────────────────────────────────────────────────────────

pub fn get_codec(method: CompressionMethod) -> Box<dyn Codec> {
    match method {
        CompressionMethod::None   => Box::new(NoneCodec),
        CompressionMethod::Zlib   => Box::new(ZlibCodec),
        CompressionMethod::Zstd   => Box::new(ZstdCodec),
        CompressionMethod::Lz4    => Box::new(Lz4Codec),
        CompressionMethod::Lzma   => Box::new(LzmaCodec),
        CompressionMethod::Brotli => Box::new(BrotliCodec),
    }
}

/// Resolve an on-disk method id.  Unknown ids fail hard.
pub fn get_codec_by_id(id: u8) -> Result<Box<dyn Codec>, CodecError> {
    CompressionMethod::from_id(id)
        .map(get_codec)
        .ok_or(CodecError::UnavailableMethod(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CompressionMethod; 6] = [
        CompressionMethod::None,
        CompressionMethod::Zlib,
        CompressionMethod::Zstd,
        CompressionMethod::Lz4,
        CompressionMethod::Lzma,
        CompressionMethod::Brotli,
    ];

    #[test]
    fn every_method_roundtrips() {
        let data: Vec<u8> = b"tagged property payload ".iter().cycle().take(5000).copied().collect();
        for m in ALL {
            let c = get_codec(m);
            let packed = c.compress(&data, 6).unwrap();
            assert_eq!(c.decompress(&packed, data.len()).unwrap(), data, "{}", m.name());
        }
    }

    #[test]
    fn wrong_expected_size_is_reported() {
        let c = get_codec(CompressionMethod::Zlib);
        let packed = c.compress(b"abcdef", 6).unwrap();
        assert!(matches!(
            c.decompress(&packed, 3),
            Err(CodecError::SizeMismatch { expected: 3, .. })
        ));
    }

    #[test]
    fn ids_and_names() {
        for m in ALL {
            assert_eq!(CompressionMethod::from_id(m.id()), Some(m));
            assert_eq!(CompressionMethod::from_name(m.name()), Some(m));
        }
        assert!(matches!(get_codec_by_id(42), Err(CodecError::UnavailableMethod(42))));
        assert_eq!(get_codec_by_id(42).err().map(|e| e.class()), Some(ErrorClass::Configuration));
    }
}
