//! Serializing counterpart of [`Archive`](super::Archive).
//!
//! Writes the same layouts the reader accepts.  Used to build chunked
//! streams and test fixtures.

use crate::names::NameToken;
use crate::version::Guid;

#[derive(Debug, Default, Clone)]
pub struct ArchiveWriter {
    buf: Vec<u8>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_le_bytes());
    }

    /// 32-bit boolean.
    pub fn write_bool(&mut self, v: bool) {
        self.write_u32(v as u32);
    }

    pub fn write_guid(&mut self, g: &Guid) {
        for w in g.0 {
            self.write_u32(w);
        }
    }

    /// Narrow when every character is ASCII, UTF-16 otherwise.  Non-empty
    /// strings carry a terminator.
    pub fn write_string(&mut self, s: &str) {
        if s.is_empty() {
            self.write_i32(0);
        } else if s.is_ascii() {
            self.write_i32(s.len() as i32 + 1);
            self.write_bytes(s.as_bytes());
            self.write_u8(0);
        } else {
            self.write_string_wide(s);
        }
    }

    pub fn write_string_wide(&mut self, s: &str) {
        let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
        self.write_i32(-(units.len() as i32));
        for u in units {
            self.write_u16(u);
        }
    }

    pub fn write_name(&mut self, token: NameToken) {
        self.write_i32(token.index);
        self.write_i32(token.number);
    }

    /// Overwrite four bytes at `offset`, e.g. a size fixed up after the fact.
    pub fn patch_i32(&mut self, offset: usize, v: i32) {
        self.buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }
}
