//! Trailer-signature patch.
//!
//! Some titles protect only the directory footer.  The stream ends with a
//! short plaintext prefix and an RSA-signed block:
//!
//! ```text
//! [ body ][ prefix: prefix_len ][ signed: signed_len ]
//! ```
//!
//! The signed block is opened with the public key from the archive's
//! sibling `.key` file, its PKCS#1 type-1 padding stripped, and the
//! recovered bytes overwrite the tail of `body`.  The prefix is kept and the
//! signed block dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use num_bigint::BigUint;
use serde::Deserialize;

use super::CryptoError;
use crate::error::ErrorKind;

#[derive(Deserialize)]
struct KeyFile {
    modulus:  String,
    exponent: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    modulus:  BigUint,
    exponent: BigUint,
}

fn parse_hex(field: &str, s: &str) -> Result<BigUint, CryptoError> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    BigUint::parse_bytes(s.as_bytes(), 16)
        .ok_or_else(|| CryptoError::BadPublicKey(format!("{field} is not a hex number")))
}

impl PublicKey {
    pub fn new(modulus: BigUint, exponent: BigUint) -> Result<Self, CryptoError> {
        if modulus.bits() < 88 {
            return Err(CryptoError::BadPublicKey("modulus is too small for PKCS#1 padding".into()));
        }
        Ok(Self { modulus, exponent })
    }

    /// `{ "modulus": "<hex>", "exponent": "<hex>" }`
    pub fn from_json(s: &str) -> Result<Self, CryptoError> {
        let file: KeyFile = serde_json::from_str(s).map_err(|e| CryptoError::BadPublicKey(e.to_string()))?;
        Self::new(parse_hex("modulus", &file.modulus)?, parse_hex("exponent", &file.exponent)?)
    }

    /// Read a key file.  An absent file is an unsupported operation for the
    /// archive, a malformed one a configuration error.
    pub fn load(path: &Path) -> Result<Self, ErrorKind> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::KeyFileMissing(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        })?;
        tracing::debug!(path = %path.display(), "loaded public key");
        Ok(Self::from_json(&text)?)
    }

    /// Modulus length in bytes.
    pub fn size(&self) -> usize {
        self.modulus.bits().div_ceil(8) as usize
    }

    /// Apply the public operation to `signed` and strip the padding.
    pub fn recover(&self, signed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let c = BigUint::from_bytes_be(signed);
        if c >= self.modulus {
            return Err(CryptoError::BadSignature("signature exceeds the modulus".into()));
        }
        let m = c.modpow(&self.exponent, &self.modulus).to_bytes_be();
        let mut block = vec![0u8; self.size()];
        block[self.size() - m.len()..].copy_from_slice(&m);
        strip_pkcs1_type1(&block).map(<[u8]>::to_vec)
    }
}

/// `00 01 FF{8,} 00 payload`
pub fn strip_pkcs1_type1(block: &[u8]) -> Result<&[u8], CryptoError> {
    let bad = |why: &str| CryptoError::BadSignature(why.into());
    if block.len() < 11 || block[0] != 0 || block[1] != 1 {
        return Err(bad("missing block type 1 header"));
    }
    let pad = block[2..].iter().take_while(|&&b| b == 0xFF).count();
    if pad < 8 {
        return Err(bad("padding shorter than 8 bytes"));
    }
    match block.get(2 + pad) {
        Some(0) => Ok(&block[3 + pad..]),
        _ => Err(bad("padding not terminated by a zero byte")),
    }
}

/// `archive.pak` -> `archive.key`
pub fn sibling_key_path(archive: &Path) -> PathBuf {
    archive.with_extension("key")
}

/// Splice the recovered trailer into the stream.  The result is
/// `signed_len` bytes shorter than `data`.
pub fn patch_trailer(
    data:       &[u8],
    prefix_len: usize,
    signed_len: usize,
    key:        &PublicKey,
) -> Result<Vec<u8>, CryptoError> {
    let needed = prefix_len + signed_len;
    if data.len() < needed {
        return Err(CryptoError::TrailerTooShort { len: data.len(), needed });
    }
    let body_len = data.len() - needed;
    let (body, tail) = data.split_at(body_len);
    let (prefix, signed) = tail.split_at(prefix_len);

    let recovered = key.recover(signed)?;
    if recovered.len() > body_len {
        return Err(CryptoError::BadSignature(format!(
            "{} recovered bytes do not fit a {body_len}-byte body",
            recovered.len()
        )));
    }
    let mut out = Vec::with_capacity(body_len + prefix_len);
    out.extend_from_slice(body);
    out[body_len - recovered.len()..].copy_from_slice(&recovered);
    out.extend_from_slice(prefix);
    tracing::debug!(recovered = recovered.len(), "patched signed trailer");
    Ok(out)
}
