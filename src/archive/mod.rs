//! Archive Core: a seekable, typed, little-endian cursor.
//!
//! An [`Archive`] couples a [`Source`] with the per-archive resolution
//! tables (names, custom versions) and the title's version stamps.  The
//! tables are held behind `Arc` and are never mutated once installed, so
//! [`Archive::try_clone`] can hand out independent cursors that share them.
//! That is the basis of both re-entrant lookahead and the parallel decode in
//! [`crate::batch`].
//!
//! # Failure model
//! Every read is fail-fast.  A fixed-size read checks the remaining length
//! before touching the cursor; composite reads (strings, arrays) restore the
//! cursor to where they started when any inner step fails.  Counts read from
//! the data are validated against the remaining byte budget before any
//! allocation is made.

mod source;
mod writer;

pub use source::{MemorySource, Source};
pub use writer::ArchiveWriter;

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ErrorKind, Result};
use crate::names::{NameTable, NameToken};
use crate::version::ladder::Ladder;
use crate::version::{CustomVersionTable, EngineVersion, Guid};

/// Per-archive identity and version stamps, shared by every clone.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Identifier used in diagnostics (usually a path or entry name).
    pub id:               Arc<str>,
    /// Title the archive belongs to; selects the profile.
    pub title:            Arc<str>,
    pub engine:           EngineVersion,
    pub file_version:     i32,
    pub licensee_version: i32,
}

pub struct Archive<S: Source = MemorySource> {
    source:   S,
    info:     ArchiveInfo,
    versions: Arc<CustomVersionTable>,
    names:    Arc<NameTable>,
}

impl Archive<MemorySource> {
    /// Archive over an in-memory buffer with empty tables.
    pub fn from_bytes(id: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(id, MemorySource::new(bytes))
    }
}

macro_rules! fixed_reads {
    ($($(#[$meta:meta])* $name:ident -> $ty:ty, $n:expr, $conv:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self) -> Result<$ty> {
                let mut b = [0u8; $n];
                self.read_exact(&mut b)?;
                Ok($conv(&b[..]))
            }
        )*
    };
}

impl<S: Source> Archive<S> {
    pub fn new(id: &str, source: S) -> Self {
        Self {
            source,
            info: ArchiveInfo {
                id:               id.into(),
                title:            "".into(),
                engine:           EngineVersion::default(),
                file_version:     0,
                licensee_version: 0,
            },
            versions: Arc::new(CustomVersionTable::new()),
            names:    Arc::new(NameTable::default()),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.info.title = title.into();
        self
    }

    pub fn with_engine(mut self, engine: EngineVersion) -> Self {
        self.info.engine = engine;
        self
    }

    pub fn set_file_versions(&mut self, file_version: i32, licensee_version: i32) {
        self.info.file_version = file_version;
        self.info.licensee_version = licensee_version;
    }

    /// Install a freshly built name table.  Clones made earlier keep the
    /// table they were created with.
    pub fn set_names(&mut self, names: NameTable) {
        self.names = Arc::new(names);
    }

    pub fn set_versions(&mut self, versions: CustomVersionTable) {
        self.versions = Arc::new(versions);
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn info(&self) -> &ArchiveInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn engine(&self) -> EngineVersion {
        self.info.engine
    }

    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub fn versions(&self) -> &CustomVersionTable {
        &self.versions
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn position(&self) -> u64 {
        self.source.position()
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn remaining(&self) -> u64 {
        self.source.remaining()
    }

    pub fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Stored custom version, or [`crate::version::UNKNOWN_VERSION`].
    pub fn custom_version(&self, guid: &Guid) -> i32 {
        self.versions.get(guid)
    }

    /// Stored custom version, falling back to the static ladder.
    pub fn resolve_version(&self, ladder: &Ladder) -> Result<i32> {
        let r = self.versions.resolve(&ladder.guid, self.info.engine);
        self.lift(r)
    }

    // ── Cursor control ──────────────────────────────────────────────────────

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let r = self.source.seek(pos);
        self.lift(r)
    }

    pub fn skip(&mut self, n: u64) -> Result<()> {
        let target = self.position().saturating_add(n);
        self.seek(target)
    }

    /// Independent cursor at the same position, sharing the tables.
    pub fn try_clone(&self) -> Result<Self> {
        let source = self.lift(self.source.fork())?;
        Ok(Self {
            source,
            info:     self.info.clone(),
            versions: Arc::clone(&self.versions),
            names:    Arc::clone(&self.names),
        })
    }

    /// Independent cursor positioned at `pos`.
    pub fn clone_at(&self, pos: u64) -> Result<Self> {
        let mut ar = self.try_clone()?;
        ar.seek(pos)?;
        Ok(ar)
    }

    /// A located error for the current cursor, forwarded to diagnostics.
    pub fn error(&self, kind: impl Into<ErrorKind>) -> Error {
        Error::new(&*self.info.id, self.position(), kind)
    }

    pub(crate) fn lift<T>(&self, r: std::result::Result<T, ErrorKind>) -> Result<T> {
        r.map_err(|kind| self.error(kind))
    }

    /// Run a composite read; on failure the cursor goes back to where it was.
    pub fn atomic<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let start = self.position();
        let result = f(self);
        if result.is_err() && self.position() != start {
            // A forward-only source may refuse; the read error is still the
            // one returned.
            if let Err(kind) = self.source.restore(start) {
                tracing::warn!(archive = self.id(), from = self.position(), to = start, %kind, "could not rewind after failed read");
            }
        }
        result
    }

    // ── Primitive reads ─────────────────────────────────────────────────────

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let r = self.source.read_into(buf);
        self.lift(r)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n as u64 > self.remaining() {
            return Err(self.error(ErrorKind::Truncated {
                needed:    n as u64,
                available: self.remaining(),
            }));
        }
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fixed_reads! {
        read_u8  -> u8,  1, |b: &[u8]| b[0];
        read_i8  -> i8,  1, |b: &[u8]| b[0] as i8;
        read_u16 -> u16, 2, LittleEndian::read_u16;
        read_i16 -> i16, 2, LittleEndian::read_i16;
        read_u32 -> u32, 4, LittleEndian::read_u32;
        read_i32 -> i32, 4, LittleEndian::read_i32;
        read_u64 -> u64, 8, LittleEndian::read_u64;
        read_i64 -> i64, 8, LittleEndian::read_i64;
        read_f32 -> f32, 4, LittleEndian::read_f32;
        read_f64 -> f64, 8, LittleEndian::read_f64;
    }

    /// 32-bit boolean; anything but 0 or 1 is corruption.
    pub fn read_bool(&mut self) -> Result<bool> {
        self.atomic(|ar| match ar.read_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(ar.error(ErrorKind::BadBool(v))),
        })
    }

    pub fn read_guid(&mut self) -> Result<Guid> {
        let mut b = [0u8; 16];
        self.read_exact(&mut b)?;
        let mut words = [0u32; 4];
        LittleEndian::read_u32_into(&b, &mut words);
        Ok(Guid(words))
    }

    /// Length-prefixed string.  A negative length means `|len|` UTF-16 code
    /// units; a positive one means `len` single-byte (Latin-1) characters.
    /// The trailing terminator is stripped.
    pub fn read_string(&mut self) -> Result<String> {
        self.atomic(|ar| {
            let len = ar.read_i32()?;
            if len == 0 {
                return Ok(String::new());
            }
            if len == i32::MIN {
                return Err(ar.error(ErrorKind::BadStringLength(len)));
            }
            let chars = len.unsigned_abs() as u64;
            let width = if len < 0 { 2 } else { 1 };
            if chars * width > ar.remaining() {
                return Err(ar.error(ErrorKind::BadStringLength(len)));
            }
            let raw = ar.read_bytes((chars * width) as usize)?;
            let mut s: String = if len < 0 {
                let units = raw.chunks_exact(2).map(LittleEndian::read_u16);
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect()
            } else {
                raw.iter().map(|&b| b as char).collect()
            };
            if s.ends_with('\0') {
                s.pop();
            }
            Ok(s)
        })
    }

    // ── Arrays ──────────────────────────────────────────────────────────────

    /// Validate an element count read from the data against the bytes left.
    pub fn check_count(&self, count: i64, min_elem_size: usize) -> Result<usize> {
        let remaining = self.remaining();
        let fits = count >= 0
            && (count as u64).checked_mul(min_elem_size as u64).map_or(false, |n| n <= remaining);
        if !fits {
            return Err(self.error(ErrorKind::BadCount { count, elem_size: min_elem_size, remaining }));
        }
        Ok(count as usize)
    }

    /// `i32` count followed by that many elements.
    pub fn read_array<T>(
        &mut self,
        min_elem_size: usize,
        f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        self.atomic(|ar| {
            let count = ar.read_i32()?;
            ar.read_array_n(count as i64, min_elem_size, f)
        })
    }

    /// `count` elements; the count is validated before anything is reserved.
    pub fn read_array_n<T>(
        &mut self,
        count: i64,
        min_elem_size: usize,
        mut f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.check_count(count, min_elem_size)?;
        let cap = count.min((self.remaining() / min_elem_size.max(1) as u64) as usize);
        self.atomic(|ar| {
            let mut out = Vec::with_capacity(cap);
            for _ in 0..count {
                out.push(f(ar)?);
            }
            Ok(out)
        })
    }

    // ── Names ───────────────────────────────────────────────────────────────

    pub fn read_name_token(&mut self) -> Result<NameToken> {
        self.atomic(|ar| {
            let index = ar.read_i32()?;
            let number = ar.read_i32()?;
            Ok(NameToken { index, number })
        })
    }

    pub fn resolve_name(&self, token: NameToken) -> Result<String> {
        let r = self.names.display(token);
        self.lift(r)
    }

    /// Read a name token and resolve it against the installed table.
    pub fn read_name(&mut self) -> Result<String> {
        self.atomic(|ar| {
            let token = ar.read_name_token()?;
            ar.resolve_name(token)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive(bytes: Vec<u8>) -> Archive {
        Archive::from_bytes("test", bytes)
    }

    #[test]
    fn primitives_are_little_endian() {
        let mut w = ArchiveWriter::new();
        w.write_u16(0xBEEF);
        w.write_i32(-5);
        w.write_f32(1.5);
        w.write_u64(u64::MAX - 1);
        w.write_f64(-2.25);
        let mut ar = archive(w.into_bytes());
        assert_eq!(ar.read_u16().unwrap(), 0xBEEF);
        assert_eq!(ar.read_i32().unwrap(), -5);
        assert_eq!(ar.read_f32().unwrap(), 1.5);
        assert_eq!(ar.read_u64().unwrap(), u64::MAX - 1);
        assert_eq!(ar.read_f64().unwrap(), -2.25);
        assert!(ar.at_end());
    }

    #[test]
    fn short_fixed_read_fails_without_advancing() {
        let mut ar = archive(vec![1, 2, 3]);
        let err = ar.read_u32().unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(err.offset, 0);
        assert_eq!(ar.position(), 0);
        assert_eq!(ar.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn strings_narrow_and_wide() {
        let mut w = ArchiveWriter::new();
        w.write_string("Hello");
        w.write_string("Grüße ☃");
        w.write_string("");
        let mut ar = archive(w.into_bytes());
        assert_eq!(ar.read_string().unwrap(), "Hello");
        assert_eq!(ar.read_string().unwrap(), "Grüße ☃");
        assert_eq!(ar.read_string().unwrap(), "");
    }

    #[test]
    fn wide_string_counts_characters() {
        let mut w = ArchiveWriter::new();
        w.write_i32(-3);
        for u in ['h' as u16, 'i' as u16, 0] {
            w.write_u16(u);
        }
        let mut ar = archive(w.into_bytes());
        assert_eq!(ar.read_string().unwrap(), "hi");
        assert!(ar.at_end());
    }

    #[test]
    fn oversized_string_rejected_and_rewound() {
        let mut w = ArchiveWriter::new();
        w.write_i32(1000);
        w.write_bytes(b"abc");
        let mut ar = archive(w.into_bytes());
        let err = ar.read_string().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadStringLength(1000)));
        assert_eq!(ar.position(), 0);

        let mut w = ArchiveWriter::new();
        w.write_i32(i32::MIN);
        assert!(archive(w.into_bytes()).read_string().is_err());
    }

    #[test]
    fn array_count_guard() {
        let mut w = ArchiveWriter::new();
        w.write_i32(-1);
        let mut ar = archive(w.into_bytes());
        assert!(matches!(ar.read_array(4, |a| a.read_u32()).unwrap_err().kind, ErrorKind::BadCount { .. }));
        assert_eq!(ar.position(), 0);

        let mut w = ArchiveWriter::new();
        w.write_i32(0x4000_0000);
        w.write_u32(7);
        let mut ar = archive(w.into_bytes());
        assert!(ar.read_array(4, |a| a.read_u32()).is_err());

        let mut w = ArchiveWriter::new();
        w.write_i32(2);
        w.write_u32(7);
        w.write_u32(8);
        let mut ar = archive(w.into_bytes());
        assert_eq!(ar.read_array(4, |a| a.read_u32()).unwrap(), vec![7, 8]);
    }

    #[test]
    fn bool_must_be_zero_or_one() {
        let mut w = ArchiveWriter::new();
        w.write_bool(true);
        w.write_u32(2);
        let mut ar = archive(w.into_bytes());
        assert!(ar.read_bool().unwrap());
        assert!(matches!(ar.read_bool().unwrap_err().kind, ErrorKind::BadBool(2)));
        assert_eq!(ar.position(), 4);
    }

    #[test]
    fn clone_shares_tables_not_cursor() {
        let mut names = NameTable::default();
        let tok = names.intern("Thing");
        let mut w = ArchiveWriter::new();
        w.write_name(tok);
        w.write_name(tok);
        let mut ar = archive(w.into_bytes());
        ar.set_names(names);

        let mut c = ar.try_clone().unwrap();
        assert_eq!(c.read_name().unwrap(), "Thing");
        assert_eq!(ar.position(), 0);
        assert_eq!(ar.read_name().unwrap(), "Thing");
        assert_eq!(c.position(), 8);

        ar.set_names(NameTable::default());
        assert_eq!(c.names().len(), 1);
    }
}
