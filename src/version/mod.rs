//! Engine version stamps, GUIDs and the per-archive custom-version table.
//!
//! A custom version is a GUID-keyed counter that gates format changes
//! independently of the overall engine version.  The table is read once per
//! archive and is immutable afterwards.  A GUID missing from the table
//! resolves to [`UNKNOWN_VERSION`]; callers then fall back to the static
//! [`ladder`] for that GUID.

pub mod ladder;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::archive::{Archive, ArchiveWriter, Source};
use crate::error::{ErrorKind, Result};

/// Sentinel returned by [`CustomVersionTable::get`] for an absent GUID.
pub const UNKNOWN_VERSION: i32 = -1;

// ── Guid ─────────────────────────────────────────────────────────────────────

/// 128-bit identifier serialized as four little-endian `u32` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Guid(pub [u32; 4]);

impl Guid {
    pub const fn from_parts(a: u32, b: u32, c: u32, d: u32) -> Self {
        Guid([a, b, c, d])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// Parse the hyphenated form `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`.
    pub fn parse(s: &str) -> Option<Self> {
        let v = uuid::Uuid::parse_str(s).ok()?.as_u128();
        Some(Guid([(v >> 96) as u32, (v >> 64) as u32, (v >> 32) as u32, v as u32]))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:04X}{:08X}",
            a,
            b >> 16,
            b & 0xFFFF,
            c >> 16,
            c & 0xFFFF,
            d
        )
    }
}

impl FromStr for Guid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guid::parse(s).ok_or_else(|| format!("invalid GUID `{s}`"))
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── EngineVersion ────────────────────────────────────────────────────────────

/// Engine release a title was built with.  Orders as `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: u16,
    pub minor: u16,
}

impl EngineVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub const fn ue4(minor: u16) -> Self {
        Self::new(4, minor)
    }

    pub const fn ue5(minor: u16) -> Self {
        Self::new(5, minor)
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self::ue4(27)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UE{}.{}", self.major, self.minor)
    }
}

// ── Custom version table ─────────────────────────────────────────────────────

/// Serialized layout of a custom-version table, chosen by legacy file version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomVersionFormat {
    /// No table is serialized.
    Unknown,
    /// `u32` tag + `i32` version.  The tag becomes GUID `{0, 0, 0, tag}`.
    Enums,
    /// GUID + `i32` version + friendly-name string.
    Guids,
    /// GUID + `i32` version.
    Optimized,
}

impl CustomVersionFormat {
    pub fn for_legacy_version(legacy: i32) -> Self {
        match legacy {
            l if l < -5 => CustomVersionFormat::Optimized,
            l if l < -2 => CustomVersionFormat::Guids,
            -2 => CustomVersionFormat::Enums,
            _ => CustomVersionFormat::Unknown,
        }
    }

    fn min_entry_size(self) -> usize {
        match self {
            CustomVersionFormat::Unknown => 0,
            CustomVersionFormat::Enums => 8,
            CustomVersionFormat::Guids => 24,
            CustomVersionFormat::Optimized => 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomVersion {
    pub guid:          Guid,
    pub version:       i32,
    pub friendly_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomVersionTable {
    entries: Vec<CustomVersion>,
}

impl CustomVersionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<S: Source>(ar: &mut Archive<S>, format: CustomVersionFormat) -> Result<Self> {
        if format == CustomVersionFormat::Unknown {
            return Ok(Self::default());
        }
        let entries = ar.read_array(format.min_entry_size(), |ar| {
            Ok(match format {
                CustomVersionFormat::Enums => {
                    let tag = ar.read_u32()?;
                    let version = ar.read_i32()?;
                    CustomVersion { guid: Guid([0, 0, 0, tag]), version, friendly_name: None }
                }
                CustomVersionFormat::Guids => {
                    let guid = ar.read_guid()?;
                    let version = ar.read_i32()?;
                    let name = ar.read_string()?;
                    CustomVersion { guid, version, friendly_name: Some(name) }
                }
                _ => {
                    let guid = ar.read_guid()?;
                    let version = ar.read_i32()?;
                    CustomVersion { guid, version, friendly_name: None }
                }
            })
        })?;
        tracing::debug!(count = entries.len(), ?format, "read custom version table");
        Ok(Self { entries })
    }

    pub fn write(&self, w: &mut ArchiveWriter, format: CustomVersionFormat) {
        if format == CustomVersionFormat::Unknown {
            return;
        }
        w.write_i32(self.entries.len() as i32);
        for e in &self.entries {
            match format {
                CustomVersionFormat::Enums => w.write_u32(e.guid.0[3]),
                _ => w.write_guid(&e.guid),
            }
            w.write_i32(e.version);
            if format == CustomVersionFormat::Guids {
                w.write_string(e.friendly_name.as_deref().unwrap_or(""));
            }
        }
    }

    /// Insert or replace the version for `guid`.
    pub fn set(&mut self, guid: Guid, version: i32) {
        match self.entries.iter_mut().find(|e| e.guid == guid) {
            Some(e) => e.version = version,
            None => self.entries.push(CustomVersion { guid, version, friendly_name: None }),
        }
    }

    /// Stored version for `guid`, or [`UNKNOWN_VERSION`].
    pub fn get(&self, guid: &Guid) -> i32 {
        self.entries
            .iter()
            .find(|e| &e.guid == guid)
            .map(|e| e.version)
            .unwrap_or(UNKNOWN_VERSION)
    }

    /// Stored version, else the ladder value for `engine`.
    pub fn resolve(&self, guid: &Guid, engine: EngineVersion) -> Result<i32, ErrorKind> {
        let stored = self.get(guid);
        if stored != UNKNOWN_VERSION {
            return Ok(stored);
        }
        let ladder = ladder::find(guid);
        ladder
            .and_then(|l| l.resolve(engine))
            .ok_or_else(|| ErrorKind::UnresolvedVersion {
                guid: *guid,
                name: ladder.map(|l| l.name).unwrap_or("unregistered").to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &CustomVersion> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Guid, i32)> for CustomVersionTable {
    fn from_iter<I: IntoIterator<Item = (Guid, i32)>>(iter: I) -> Self {
        let mut table = Self::default();
        for (guid, version) in iter {
            table.set(guid, version);
        }
        table
    }
}
