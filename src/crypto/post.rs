//! Title-selected post-processing applied after the base decryption.
//!
//! The strategies share nothing and are applied in the order a profile
//! lists them, so a title may combine any of them.

use serde::{Deserialize, Serialize};

use super::{AesKey, CryptoError, KEY_LEN};

/// Profile form of a post-processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PostProcessSpec {
    SaltXor,
    /// Either byte may be omitted; it is then taken from the key
    /// (first and last key byte respectively).
    EdgeLane {
        #[serde(default)]
        first: Option<u8>,
        #[serde(default)]
        last:  Option<u8>,
    },
    TrailerSignature { prefix_len: usize, signed_len: usize },
}

/// Resolved step, ready to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    SaltXor,
    EdgeLane { first: u8, last: u8 },
    TrailerSignature { prefix_len: usize, signed_len: usize },
}

impl PostProcess {
    pub fn from_spec(spec: &PostProcessSpec, key: Option<&AesKey>) -> Result<Self, CryptoError> {
        Ok(match *spec {
            PostProcessSpec::SaltXor => PostProcess::SaltXor,
            PostProcessSpec::EdgeLane { first, last } => {
                let derived = |i: usize| key.map(|k| k.as_bytes()[i]).ok_or(CryptoError::MissingKey);
                PostProcess::EdgeLane {
                    first: first.map_or_else(|| derived(0), Ok)?,
                    last:  last.map_or_else(|| derived(KEY_LEN - 1), Ok)?,
                }
            }
            PostProcessSpec::TrailerSignature { prefix_len, signed_len } => {
                PostProcess::TrailerSignature { prefix_len, signed_len }
            }
        })
    }
}

// ── Salt recovery ────────────────────────────────────────────────────────────

/// Derive the 8-byte salt from a freshly decrypted directory block: the
/// first four bytes must be equal, and that byte is the salt.
pub fn recover_salt(block: &[u8]) -> Result<[u8; 8], CryptoError> {
    let mut head = [0u8; 4];
    let n = block.len().min(4);
    head[..n].copy_from_slice(&block[..n]);
    if n < 4 || head.iter().any(|&b| b != head[0]) {
        return Err(CryptoError::CannotDetermineSalt(head));
    }
    Ok([head[0]; 8])
}

/// XOR every 8-byte lane with `salt`.
pub fn xor_salt(buf: &mut [u8], salt: &[u8; 8]) {
    for lane in buf.chunks_mut(8) {
        for (b, s) in lane.iter_mut().zip(salt) {
            *b ^= s;
        }
    }
}

// ── Edge lanes ───────────────────────────────────────────────────────────────

/// XOR the first and last byte of every complete 16-byte block.
pub fn xor_edge_lanes(buf: &mut [u8], first: u8, last: u8) {
    for block in buf.chunks_exact_mut(super::BLOCK_SIZE) {
        block[0] ^= first;
        block[super::BLOCK_SIZE - 1] ^= last;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_from_uniform_prefix() {
        assert_eq!(recover_salt(&[0xAB, 0xAB, 0xAB, 0xAB, 1, 2]).unwrap(), [0xAB; 8]);
    }

    #[test]
    fn salt_from_mixed_prefix_fails() {
        let err = recover_salt(&[0x01, 0x02, 0x03, 0x04]).unwrap_err();
        assert!(matches!(err, CryptoError::CannotDetermineSalt([1, 2, 3, 4])));
        assert!(recover_salt(&[7, 7]).is_err());
    }

    #[test]
    fn salt_xor_is_an_involution() {
        let salt = *b"\x01\x02\x03\x04\x05\x06\x07\x08";
        let orig: Vec<u8> = (0..20).collect();
        let mut buf = orig.clone();
        xor_salt(&mut buf, &salt);
        assert_eq!(buf[8], 8 ^ 1);
        assert_eq!(buf[19], 19 ^ 4);
        xor_salt(&mut buf, &salt);
        assert_eq!(buf, orig);
    }

    #[test]
    fn edge_lanes_leave_interior() {
        let mut buf = vec![0u8; 40];
        xor_edge_lanes(&mut buf, 0xF0, 0x0F);
        for (i, b) in buf.iter().enumerate() {
            let expect = match i {
                0 | 16 => 0xF0,
                15 | 31 => 0x0F,
                _ => 0,
            };
            assert_eq!(*b, expect, "byte {i}");
        }
    }

    #[test]
    fn edge_bytes_default_to_key() {
        let key = AesKey::new(core::array::from_fn(|i| i as u8));
        let spec = PostProcessSpec::EdgeLane { first: None, last: Some(9) };
        assert_eq!(
            PostProcess::from_spec(&spec, Some(&key)).unwrap(),
            PostProcess::EdgeLane { first: 0, last: 9 }
        );
        assert!(PostProcess::from_spec(&spec, None).is_err());
    }

    #[test]
    fn spec_json_shape() {
        let specs: Vec<PostProcessSpec> = serde_json::from_str(
            r#"[{"kind":"salt_xor"},{"kind":"edge_lane","first":1,"last":2},
                {"kind":"trailer_signature","prefix_len":4,"signed_len":256}]"#,
        )
        .unwrap();
        assert_eq!(specs[0], PostProcessSpec::SaltXor);
        assert_eq!(specs[1], PostProcessSpec::EdgeLane { first: Some(1), last: Some(2) });
        assert_eq!(specs[2], PostProcessSpec::TrailerSignature { prefix_len: 4, signed_len: 256 });
    }
}
