//! Per-archive name table and the tokens that index it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::archive::{Archive, ArchiveWriter, Source};
use crate::error::{ErrorKind, Result};

/// Reference into a [`NameTable`]: `index` selects the string, a non-zero
/// `number` appends an instance suffix (`number - 1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NameToken {
    pub index:  i32,
    pub number: i32,
}

impl NameToken {
    pub const fn new(index: i32) -> Self {
        Self { index, number: 0 }
    }

    pub const fn numbered(index: i32, number: i32) -> Self {
        Self { index, number }
    }
}

/// What follows each string in a serialized name table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameLayout {
    /// Two `u16` hashes after the string.
    #[serde(default)]
    pub hashes:  bool,
    /// A `u64` object-flags word after the string.
    #[serde(default)]
    pub flags64: bool,
}

impl NameLayout {
    pub const MODERN: NameLayout = NameLayout { hashes: true, flags64: false };
    pub const LEGACY: NameLayout = NameLayout { hashes: false, flags64: true };

    /// Smallest possible serialized entry: an empty string plus the trailer.
    pub fn min_entry_size(&self) -> usize {
        4 + if self.hashes { 4 } else { 0 } + if self.flags64 { 8 } else { 0 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTable {
    entries: Vec<String>,
}

impl NameTable {
    pub fn from_entries(entries: Vec<String>) -> Self {
        Self { entries }
    }

    /// Read `count` entries.  The up-front reservation is clamped to what
    /// the remaining bytes could possibly hold, so a corrupt count cannot
    /// force a huge allocation; reading stops with an error at the first
    /// entry that does not fit.
    pub fn read<S: Source>(ar: &mut Archive<S>, count: i32, layout: NameLayout) -> Result<Self> {
        if count < 0 {
            return Err(ar.error(ErrorKind::BadCount {
                count:     count as i64,
                elem_size: layout.min_entry_size(),
                remaining: ar.remaining(),
            }));
        }
        let ceiling = ar.remaining() / layout.min_entry_size() as u64;
        let mut entries = Vec::with_capacity((count as u64).min(ceiling) as usize);
        ar.atomic(|ar| {
            for _ in 0..count {
                let s = ar.read_string()?;
                if layout.hashes {
                    ar.read_u32()?;
                }
                if layout.flags64 {
                    ar.read_u64()?;
                }
                entries.push(s);
            }
            Ok(())
        })?;
        tracing::debug!(archive = ar.id(), count, "read name table");
        Ok(Self { entries })
    }

    /// `i32` count followed by the entries.
    pub fn read_counted<S: Source>(ar: &mut Archive<S>, layout: NameLayout) -> Result<Self> {
        ar.atomic(|ar| {
            let count = ar.read_i32()?;
            Self::read(ar, count, layout)
        })
    }

    /// Entries only; the count is written by the caller (usually a header).
    pub fn write(&self, w: &mut ArchiveWriter, layout: NameLayout) {
        for s in &self.entries {
            w.write_string(s);
            if layout.hashes {
                w.write_u32(0);
            }
            if layout.flags64 {
                w.write_u64(0);
            }
        }
    }

    /// Add `s` if it is not present yet; returns its token.
    pub fn intern(&mut self, s: &str) -> NameToken {
        let index = match self.entries.iter().position(|e| e == s) {
            Some(i) => i,
            None => {
                self.entries.push(s.to_owned());
                self.entries.len() - 1
            }
        };
        NameToken::new(index as i32)
    }

    pub fn get(&self, index: i32) -> Result<&str, ErrorKind> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.entries.get(i))
            .map(String::as_str)
            .ok_or(ErrorKind::NameOutOfRange { index: index as i64, len: self.entries.len() })
    }

    /// The token's string with its instance suffix applied.
    pub fn display(&self, token: NameToken) -> Result<String, ErrorKind> {
        let base = self.get(token.index)?;
        Ok(if token.number > 0 {
            format!("{}_{}", base, token.number - 1)
        } else {
            base.to_owned()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

impl fmt::Display for NameToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)?;
        if self.number > 0 {
            write!(f, "_{}", self.number - 1)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_bytes(names: &[&str], layout: NameLayout) -> Vec<u8> {
        let t = NameTable::from_entries(names.iter().map(|s| s.to_string()).collect());
        let mut w = ArchiveWriter::new();
        w.write_i32(names.len() as i32);
        t.write(&mut w, layout);
        w.into_bytes()
    }

    #[test]
    fn read_both_layouts() {
        for layout in [NameLayout::MODERN, NameLayout::LEGACY, NameLayout::default()] {
            let mut ar = Archive::from_bytes("n", table_bytes(&["None", "Foo", "Bar"], layout));
            let t = NameTable::read_counted(&mut ar, layout).unwrap();
            assert_eq!(t.iter().collect::<Vec<_>>(), ["None", "Foo", "Bar"]);
            assert!(ar.at_end());
        }
    }

    #[test]
    fn index_bounds() {
        let t = NameTable::from_entries(vec!["A".into(), "B".into()]);
        assert_eq!(t.get(0).unwrap(), "A");
        assert_eq!(t.get(1).unwrap(), "B");
        assert!(matches!(t.get(2), Err(ErrorKind::NameOutOfRange { index: 2, len: 2 })));
        assert!(matches!(t.get(-1), Err(ErrorKind::NameOutOfRange { index: -1, len: 2 })));
    }

    #[test]
    fn instance_suffix() {
        let t = NameTable::from_entries(vec!["Mesh".into()]);
        assert_eq!(t.display(NameToken::numbered(0, 0)).unwrap(), "Mesh");
        assert_eq!(t.display(NameToken::numbered(0, 3)).unwrap(), "Mesh_2");
    }

    #[test]
    fn corrupt_count_fails_cleanly() {
        let mut w = ArchiveWriter::new();
        w.write_i32(i32::MAX);
        w.write_string("only");
        let mut ar = Archive::from_bytes("n", w.into_bytes());
        let err = NameTable::read_counted(&mut ar, NameLayout::default()).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(ar.position(), 0);

        let mut w = ArchiveWriter::new();
        w.write_i32(-4);
        let mut ar = Archive::from_bytes("n", w.into_bytes());
        assert!(NameTable::read_counted(&mut ar, NameLayout::default()).is_err());
    }

    #[test]
    fn intern_dedups() {
        let mut t = NameTable::default();
        let a = t.intern("A");
        let b = t.intern("B");
        assert_eq!(t.intern("A"), a);
        assert_ne!(a, b);
        assert_eq!(t.len(), 2);
    }
}
