//! Decryption Preprocessor.
//!
//! Raw bytes pass through here before they become an [`Archive`](crate::archive::Archive):
//!
//! 1. Base step: AES-256 in ECB mode over `[offset, offset + count)`.
//!    `count` must be a multiple of the 16-byte block size.
//! 2. Post-processing, in profile order (see [`post`]): salt-recovery XOR,
//!    edge-lane XOR, trailer-signature patch.  Each is optional and
//!    selected per title.
//!
//! A [`DecryptionContext`] holds the key material and the salt discovered
//! while opening one archive's directory.  It is built from the profile once
//! and dropped when the directory has been read.

pub mod post;
pub mod trailer;

use std::path::Path;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes256, Block};
use thiserror::Error;

use crate::error::{Error, ErrorClass, ErrorKind, Result};

pub use post::{PostProcess, PostProcessSpec};
pub use trailer::PublicKey;

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 16;
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("data is encrypted but the profile provides no key")]
    MissingKey,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("region length {count} is not a multiple of the {BLOCK_SIZE}-byte cipher block")]
    Misaligned { count: usize },
    #[error("region {offset}+{count} lies outside the {len}-byte buffer")]
    RegionOutOfRange { offset: usize, count: usize, len: usize },
    #[error("cannot determine salt from leading bytes {0:02x?}")]
    CannotDetermineSalt([u8; 4]),
    #[error("invalid public key: {0}")]
    BadPublicKey(String),
    #[error("trailer signature is invalid: {0}")]
    BadSignature(String),
    #[error("stream of {len} bytes is too short for a {needed}-byte trailer")]
    TrailerTooShort { len: usize, needed: usize },
}

impl CryptoError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CryptoError::MissingKey | CryptoError::InvalidKey(_) | CryptoError::BadPublicKey(_) => {
                ErrorClass::Configuration
            }
            _ => ErrorClass::Corruption,
        }
    }
}

// ── Key ──────────────────────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct AesKey([u8; KEY_LEN]);

impl AesKey {
    pub const fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// 64 hex digits, optionally prefixed with `0x`.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

// ── Base step ────────────────────────────────────────────────────────────────

fn region(buf_len: usize, offset: usize, count: usize) -> Result<std::ops::Range<usize>, CryptoError> {
    if !count.is_multiple_of(BLOCK_SIZE) {
        return Err(CryptoError::Misaligned { count });
    }
    let end = offset
        .checked_add(count)
        .filter(|&e| e <= buf_len)
        .ok_or(CryptoError::RegionOutOfRange { offset, count, len: buf_len })?;
    Ok(offset..end)
}

/// Decrypt `buf[offset..offset + count]` in place.
pub fn decrypt_in_place(key: &AesKey, buf: &mut [u8], offset: usize, count: usize) -> Result<(), CryptoError> {
    let range = region(buf.len(), offset, count)?;
    let cipher = Aes256::new_from_slice(&key.0).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    for chunk in buf[range].chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(Block::from_mut_slice(chunk));
    }
    Ok(())
}

/// Inverse of [`decrypt_in_place`]; used to build encrypted fixtures.
pub fn encrypt_in_place(key: &AesKey, buf: &mut [u8], offset: usize, count: usize) -> Result<(), CryptoError> {
    let range = region(buf.len(), offset, count)?;
    let cipher = Aes256::new_from_slice(&key.0).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    for chunk in buf[range].chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(Block::from_mut_slice(chunk));
    }
    Ok(())
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Key material and discovered state for one archive open.
#[derive(Debug, Default)]
pub struct DecryptionContext {
    key:        Option<AesKey>,
    /// Adopted from the first directory block; never configured.
    salt:       Option<[u8; 8]>,
    public_key: Option<PublicKey>,
    post:       Vec<PostProcess>,
}

impl DecryptionContext {
    pub fn new(key: AesKey) -> Self {
        Self { key: Some(key), ..Self::default() }
    }

    /// Build from a profile's settings.  The public key is read from the
    /// archive's sibling key file only when a trailer step is configured;
    /// without an archive path that step is unsupported.
    pub fn from_specs(
        key:          Option<AesKey>,
        specs:        &[PostProcessSpec],
        archive_path: Option<&Path>,
    ) -> Result<Self, ErrorKind> {
        let mut ctx = Self { key, ..Self::default() };
        for spec in specs {
            if matches!(spec, PostProcessSpec::TrailerSignature { .. }) && ctx.public_key.is_none() {
                let path = archive_path
                    .map(trailer::sibling_key_path)
                    .ok_or_else(|| ErrorKind::KeyFileMissing("<no archive path>".into()))?;
                ctx.public_key = Some(PublicKey::load(&path)?);
            }
            let step = PostProcess::from_spec(spec, ctx.key.as_ref())?;
            ctx.post.push(step);
        }
        Ok(ctx)
    }

    pub fn with_post(mut self, step: PostProcess) -> Self {
        self.post.push(step);
        self
    }

    pub fn with_public_key(mut self, key: PublicKey) -> Self {
        self.public_key = Some(key);
        self
    }

    pub fn salt(&self) -> Option<[u8; 8]> {
        self.salt
    }

    pub fn steps(&self) -> &[PostProcess] {
        &self.post
    }

    /// Base decryption of the region followed by every post-processing step.
    /// A trailer patch shortens `data` by the signed block; steps after it
    /// see the region clipped to what remains.
    pub fn decrypt(&mut self, data: &mut Vec<u8>, offset: usize, count: usize) -> Result<(), ErrorKind> {
        let key = self.key.as_ref().ok_or(CryptoError::MissingKey)?;
        decrypt_in_place(key, data, offset, count)?;
        for step in &self.post {
            match *step {
                PostProcess::SaltXor => {
                    let lane = clipped(data, offset, count);
                    let salt = match self.salt {
                        Some(s) => s,
                        None => {
                            let s = post::recover_salt(lane)?;
                            tracing::debug!(salt = %hex::encode(s), "adopted archive salt");
                            self.salt = Some(s);
                            s
                        }
                    };
                    post::xor_salt(lane, &salt);
                }
                PostProcess::EdgeLane { first, last } => {
                    post::xor_edge_lanes(clipped(data, offset, count), first, last);
                }
                PostProcess::TrailerSignature { prefix_len, signed_len } => {
                    let key = self.public_key.as_ref().ok_or(CryptoError::BadPublicKey("not loaded".into()))?;
                    *data = trailer::patch_trailer(data, prefix_len, signed_len, key)?;
                }
            }
        }
        Ok(())
    }

    /// [`decrypt`](Self::decrypt) with failures located in archive `id`.
    pub fn decrypt_located(&mut self, id: &str, data: &mut Vec<u8>, offset: usize, count: usize) -> Result<()> {
        self.decrypt(data, offset, count).map_err(|kind| Error::new(id, offset as u64, kind))
    }
}

/// `data[offset..offset + count]`, cut at the end of `data`.
fn clipped(data: &mut [u8], offset: usize, count: usize) -> &mut [u8] {
    let end = offset.saturating_add(count).min(data.len());
    &mut data[offset.min(end)..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AesKey {
        AesKey::new(core::array::from_fn(|i| i as u8 * 3 + 1))
    }

    #[test]
    fn roundtrip_region() {
        let plain: Vec<u8> = (0..80u8).collect();
        let mut buf = plain.clone();
        encrypt_in_place(&key(), &mut buf, 16, 48).unwrap();
        assert_eq!(buf[..16], plain[..16]);
        assert_ne!(buf[16..64], plain[16..64]);
        assert_eq!(buf[64..], plain[64..]);
        decrypt_in_place(&key(), &mut buf, 16, 48).unwrap();
        assert_eq!(buf, plain);
    }

    #[test]
    fn misaligned_and_out_of_range_rejected() {
        let mut buf = vec![0u8; 32];
        assert!(matches!(decrypt_in_place(&key(), &mut buf, 0, 15), Err(CryptoError::Misaligned { count: 15 })));
        assert!(matches!(
            decrypt_in_place(&key(), &mut buf, 16, 32),
            Err(CryptoError::RegionOutOfRange { .. })
        ));
    }

    #[test]
    fn key_from_hex() {
        let k = AesKey::from_hex(&format!("0x{}", "ab".repeat(32))).unwrap();
        assert_eq!(k.as_bytes(), &[0xab; 32]);
        let err = AesKey::from_hex("abcd").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
        assert!(AesKey::from_hex("zz").is_err());
    }

    #[test]
    fn missing_key_is_configuration() {
        let mut ctx = DecryptionContext::default();
        let mut data = vec![0u8; 16];
        let err = ctx.decrypt(&mut data, 0, 16).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn salt_is_discovered_once_and_reused() {
        let salt_byte = 0x5Au8;
        let mut plain = vec![0u8; 32];
        plain[4..8].copy_from_slice(b"DATA");
        let mut first: Vec<u8> = plain.iter().map(|b| b ^ salt_byte).collect();
        encrypt_in_place(&key(), &mut first, 0, 32).unwrap();

        let mut ctx = DecryptionContext::new(key()).with_post(PostProcess::SaltXor);
        ctx.decrypt(&mut first, 0, 32).unwrap();
        assert_eq!(first, plain);
        assert_eq!(ctx.salt(), Some([salt_byte; 8]));

        // A later block need not start with a recognisable pattern.
        let other: Vec<u8> = (1..=16u8).collect();
        let mut second: Vec<u8> = other.iter().map(|b| b ^ salt_byte).collect();
        encrypt_in_place(&key(), &mut second, 0, 16).unwrap();
        ctx.decrypt(&mut second, 0, 16).unwrap();
        assert_eq!(second, other);
    }

    #[test]
    fn trailer_without_path_is_unsupported() {
        let specs = [PostProcessSpec::TrailerSignature { prefix_len: 4, signed_len: 64 }];
        let err = DecryptionContext::from_specs(Some(key()), &specs, None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unsupported);
    }

    #[test]
    fn xor_step_after_trailer_uses_shortened_region() {
        let body: Vec<u8> = b"directory-entries-here..xxxxxxxx".to_vec();
        let mut data = body.clone();
        data.extend_from_slice(b"PFX!");
        data.extend(trailer::tests::sign(b"TAIL"));
        encrypt_in_place(&key(), &mut data, 0, 96).unwrap();

        let public = PublicKey::from_json(&trailer::tests::key_json()).unwrap();
        let mut ctx = DecryptionContext::new(key())
            .with_public_key(public)
            .with_post(PostProcess::TrailerSignature { prefix_len: 4, signed_len: 64 })
            .with_post(PostProcess::EdgeLane { first: 1, last: 2 });
        ctx.decrypt(&mut data, 0, 96).unwrap();

        let mut expected = b"directory-entries-here..xxxxTAILPFX!".to_vec();
        post::xor_edge_lanes(&mut expected, 1, 2);
        assert_eq!(data, expected);
    }

    #[test]
    fn salt_step_after_trailer_uses_shortened_region() {
        let mut plain = vec![0u8; 32];
        plain[4..].copy_from_slice(&[7u8; 28]);
        let mut data = plain.clone();
        data.extend_from_slice(b"PFX!");
        data.extend(trailer::tests::sign(b"ZZ"));
        post::xor_salt(&mut data[..36], &[0x33; 8]);
        encrypt_in_place(&key(), &mut data, 0, 96).unwrap();

        let public = PublicKey::from_json(&trailer::tests::key_json()).unwrap();
        let mut ctx = DecryptionContext::new(key())
            .with_public_key(public)
            .with_post(PostProcess::TrailerSignature { prefix_len: 4, signed_len: 64 })
            .with_post(PostProcess::SaltXor);
        ctx.decrypt(&mut data, 0, 96).unwrap();
        assert_eq!(ctx.salt(), Some([0x33; 8]));
        assert_eq!(data.len(), 36);
        assert_eq!(&data[32..], b"PFX!");
    }
}
