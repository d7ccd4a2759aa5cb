//! Byte sources backing an [`Archive`](super::Archive).
//!
//! A source is a positioned view over fully materialized bytes.  Reads are
//! all-or-nothing: a read that cannot be satisfied in full fails without
//! moving the cursor.

use std::sync::Arc;

use crate::error::ErrorKind;

pub trait Source {
    /// Current cursor, relative to the start of the source.
    fn position(&self) -> u64;

    /// Total readable length.
    fn len(&self) -> u64;

    /// Fill `buf` entirely from the cursor, advancing it by `buf.len()`.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind>;

    /// Move the cursor to the absolute position `pos`.
    fn seek(&mut self, pos: u64) -> Result<(), ErrorKind>;

    /// An independent cursor at the same position over the same bytes.
    /// Buffers private to `self` are never shared with the fork.
    fn fork(&self) -> Result<Self, ErrorKind>
    where
        Self: Sized;

    /// Return the cursor to `pos` after a failed composite read.  Sources
    /// that cannot seek backwards may support a narrower rewind here.
    fn restore(&mut self, pos: u64) -> Result<(), ErrorKind> {
        self.seek(pos)
    }

    fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.position())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── MemorySource ─────────────────────────────────────────────────────────────

/// Cursor over a shared, memory-resident buffer, optionally restricted to an
/// `offset + len` window of it.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data:   Arc<[u8]>,
    start:  usize,
    end:    usize,
    cursor: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        let end = data.len();
        Self { data, start: 0, end, cursor: 0 }
    }

    /// A window of `len` bytes starting at `offset` within `data`.
    pub fn segment(data: Arc<[u8]>, offset: u64, len: u64) -> Result<Self, ErrorKind> {
        let total = data.len() as u64;
        let end = offset.checked_add(len).filter(|&e| e <= total).ok_or(
            ErrorKind::SeekOutOfRange { target: offset.saturating_add(len), len: total },
        )?;
        Ok(Self {
            data,
            start:  offset as usize,
            end:    end as usize,
            cursor: offset as usize,
        })
    }

    /// The bytes of the window.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

impl Source for MemorySource {
    fn position(&self) -> u64 {
        (self.cursor - self.start) as u64
    }

    fn len(&self) -> u64 {
        (self.end - self.start) as u64
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let available = self.end - self.cursor;
        if buf.len() > available {
            return Err(ErrorKind::Truncated {
                needed:    buf.len() as u64,
                available: available as u64,
            });
        }
        buf.copy_from_slice(&self.data[self.cursor..self.cursor + buf.len()]);
        self.cursor += buf.len();
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<(), ErrorKind> {
        if pos > self.len() {
            return Err(ErrorKind::SeekOutOfRange { target: pos, len: self.len() });
        }
        self.cursor = self.start + pos as usize;
        Ok(())
    }

    fn fork(&self) -> Result<Self, ErrorKind> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_read_does_not_advance() {
        let mut s = MemorySource::new(vec![1u8, 2, 3]);
        let mut two = [0u8; 2];
        s.read_into(&mut two).unwrap();
        assert_eq!(two, [1, 2]);
        let err = s.read_into(&mut two).unwrap_err();
        assert!(matches!(err, ErrorKind::Truncated { needed: 2, available: 1 }));
        assert_eq!(s.position(), 2);
    }

    #[test]
    fn segment_is_relative() {
        let data: Arc<[u8]> = (0u8..10).collect::<Vec<_>>().into();
        let mut s = MemorySource::segment(data.clone(), 4, 3).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.as_slice(), &[4, 5, 6]);
        s.seek(1).unwrap();
        let mut b = [0u8; 2];
        s.read_into(&mut b).unwrap();
        assert_eq!(b, [5, 6]);
        assert!(s.seek(4).is_err());
        assert!(MemorySource::segment(data, 8, 3).is_err());
    }

    #[test]
    fn fork_has_own_cursor() {
        let mut a = MemorySource::new(vec![0u8; 8]);
        a.seek(3).unwrap();
        let mut b = a.fork().unwrap();
        b.seek(7).unwrap();
        assert_eq!(a.position(), 3);
        assert_eq!(b.position(), 7);
    }
}
