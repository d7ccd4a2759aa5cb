//! Crate-wide error taxonomy.
//!
//! Every fatal error carries the archive identifier and the byte offset at
//! which it was raised.  Kinds fall into three classes:
//!
//! | Class | Examples | Caller response |
//! |-------|----------|-----------------|
//! | `Corruption` | truncated read, bad count, name index out of range | abort this archive |
//! | `Configuration` | missing key material, unresolvable custom version | fix the profile |
//! | `Unsupported` | backward seek on a compressed stream, trailer patch without a key file | skip the entity or archive, continue the batch |
//!
//! Warnings are not errors: they are emitted through `tracing::warn!` and
//! decoding continues with a substituted default.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::version::Guid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Corruption,
    Configuration,
    Unsupported,
}

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("unexpected end of data: needed {needed} bytes, {available} available")]
    Truncated { needed: u64, available: u64 },

    #[error("invalid element count {count} (min element size {elem_size}, {remaining} bytes remaining)")]
    BadCount { count: i64, elem_size: usize, remaining: u64 },

    #[error("invalid string length {0}")]
    BadStringLength(i32),

    #[error("invalid boolean encoding {0}")]
    BadBool(u32),

    #[error("seek target {target} is past the end of data ({len})")]
    SeekOutOfRange { target: u64, len: u64 },

    #[error("bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("unsupported legacy file version {0}")]
    BadLegacyVersion(i32),

    #[error("name index {index} out of range (table size {len})")]
    NameOutOfRange { index: i64, len: usize },

    #[error("decompression of block {block} produced no more data")]
    NoMoreData { block: usize },

    #[error("chunk table is inconsistent: {0}")]
    BadChunkTable(String),

    #[error("{type_name} tag is missing its {what} type")]
    MissingInnerType { type_name: String, what: &'static str },

    #[error("property `{name}` overran its declared size ({consumed} > {size})")]
    TagOverrun { name: String, consumed: u64, size: u64 },

    #[error("cannot size elements of unknown type `{0}`")]
    UnknownElementType(String),

    #[error("nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),

    #[error("invalid text history type {0}")]
    BadTextHistory(i8),

    #[error("no version known for custom version {guid} ({name})")]
    UnresolvedVersion { guid: Guid, name: String },

    #[error("unknown title profile `{0}`")]
    UnknownProfile(String),

    #[error("invalid profile: {0}")]
    BadProfile(String),

    #[error("backward seek from {from} to {to} is not supported on this stream")]
    BackwardSeek { from: u64, to: u64 },

    #[error("no decryption key file at {}", .0.display())]
    KeyFileMissing(PathBuf),

    #[error("cannot map struct `{struct_name}` onto the target type: {reason}")]
    Mapping { struct_name: String, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ErrorKind {
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::UnresolvedVersion { .. }
            | ErrorKind::UnknownProfile(_)
            | ErrorKind::BadProfile(_)
            | ErrorKind::Mapping { .. }
            | ErrorKind::Io(_) => ErrorClass::Configuration,
            ErrorKind::BackwardSeek { .. }
            | ErrorKind::KeyFileMissing(_)
            | ErrorKind::UnknownElementType(_) => ErrorClass::Unsupported,
            ErrorKind::Codec(e) => e.class(),
            ErrorKind::Crypto(e) => e.class(),
            _ => ErrorClass::Corruption,
        }
    }
}

/// A fatal decode failure, located in a specific archive.
#[derive(Error, Debug)]
#[error("{archive} @ {offset:#x}: {kind}")]
pub struct Error {
    pub archive: String,
    pub offset:  u64,
    pub kind:    ErrorKind,
}

impl Error {
    /// Build the error and forward it to the diagnostics sink.
    pub fn new(archive: impl Into<String>, offset: u64, kind: impl Into<ErrorKind>) -> Self {
        let err = Self { archive: archive.into(), offset, kind: kind.into() };
        tracing::error!(
            archive = %err.archive,
            offset = err.offset,
            class = ?err.class(),
            "{}", err.kind
        );
        err
    }

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn is_corruption(&self) -> bool {
        self.class() == ErrorClass::Corruption
    }

    pub fn is_unsupported(&self) -> bool {
        self.class() == ErrorClass::Unsupported
    }

    pub fn is_configuration(&self) -> bool {
        self.class() == ErrorClass::Configuration
    }
}
