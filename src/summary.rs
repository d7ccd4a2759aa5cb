//! Package summary: the fixed header at the start of a package that stamps
//! its versions and locates the name, export and import tables.

use std::sync::Arc;

use serde::Serialize;

use crate::archive::{Archive, ArchiveWriter, MemorySource, Source};
use crate::error::{ErrorKind, Result};
use crate::names::{NameLayout, NameTable};
use crate::profile::TitleProfile;
use crate::version::{CustomVersionFormat, CustomVersionTable};

pub const PACKAGE_TAG: u32 = 0x9E2A_83C1;

/// Oldest and newest legacy file versions this reader understands.
const LEGACY_NEWEST: i32 = -1;
const LEGACY_OLDEST: i32 = -7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageSummary {
    pub legacy_version:     i32,
    pub legacy_ue3_version: Option<i32>,
    pub file_version:       i32,
    pub licensee_version:   i32,
    pub custom_versions:    CustomVersionTable,
    pub total_header_size:  i32,
    pub folder_name:        String,
    pub package_flags:      u32,
    pub name_count:         i32,
    pub name_offset:        i32,
    pub export_count:       i32,
    pub export_offset:      i32,
    pub import_count:       i32,
    pub import_offset:      i32,
}

impl Default for PackageSummary {
    fn default() -> Self {
        Self {
            legacy_version:     -7,
            legacy_ue3_version: Some(864),
            file_version:       522,
            licensee_version:   0,
            custom_versions:    CustomVersionTable::new(),
            total_header_size:  0,
            folder_name:        "None".into(),
            package_flags:      0,
            name_count:         0,
            name_offset:        0,
            export_count:       0,
            export_offset:      0,
            import_count:       0,
            import_offset:      0,
        }
    }
}

impl PackageSummary {
    pub fn read<S: Source>(ar: &mut Archive<S>) -> Result<Self> {
        ar.atomic(|ar| {
            let tag = ar.read_u32()?;
            if tag != PACKAGE_TAG {
                return Err(ar.error(ErrorKind::BadMagic { expected: PACKAGE_TAG, found: tag }));
            }
            let legacy_version = ar.read_i32()?;
            if !(LEGACY_OLDEST..=LEGACY_NEWEST).contains(&legacy_version) {
                return Err(ar.error(ErrorKind::BadLegacyVersion(legacy_version)));
            }
            let legacy_ue3_version = if legacy_version != -4 { Some(ar.read_i32()?) } else { None };
            let file_version = ar.read_i32()?;
            let licensee_version = ar.read_i32()?;
            let custom_versions =
                CustomVersionTable::read(ar, CustomVersionFormat::for_legacy_version(legacy_version))?;
            let total_header_size = ar.read_i32()?;
            let folder_name = ar.read_string()?;
            let package_flags = ar.read_u32()?;
            let name_count = ar.read_i32()?;
            let name_offset = ar.read_i32()?;
            let export_count = ar.read_i32()?;
            let export_offset = ar.read_i32()?;
            let import_count = ar.read_i32()?;
            let import_offset = ar.read_i32()?;
            Ok(Self {
                legacy_version,
                legacy_ue3_version,
                file_version,
                licensee_version,
                custom_versions,
                total_header_size,
                folder_name,
                package_flags,
                name_count,
                name_offset,
                export_count,
                export_offset,
                import_count,
                import_offset,
            })
        })
    }

    pub fn write(&self, w: &mut ArchiveWriter) {
        w.write_u32(PACKAGE_TAG);
        w.write_i32(self.legacy_version);
        if self.legacy_version != -4 {
            w.write_i32(self.legacy_ue3_version.unwrap_or(0));
        }
        w.write_i32(self.file_version);
        w.write_i32(self.licensee_version);
        self.custom_versions.write(w, CustomVersionFormat::for_legacy_version(self.legacy_version));
        w.write_i32(self.total_header_size);
        w.write_string(&self.folder_name);
        w.write_u32(self.package_flags);
        for v in [
            self.name_count,
            self.name_offset,
            self.export_count,
            self.export_offset,
            self.import_count,
            self.import_offset,
        ] {
            w.write_i32(v);
        }
    }
}

/// An opened package: its summary plus an archive with the name and
/// custom-version tables installed, positioned after the summary.
pub struct Package<S: Source = MemorySource> {
    pub summary: PackageSummary,
    pub archive: Archive<S>,
}

impl Package<MemorySource> {
    pub fn open(id: &str, bytes: impl Into<Arc<[u8]>>, profile: &TitleProfile) -> Result<Self> {
        Self::from_archive(Archive::from_bytes(id, bytes), profile)
    }
}

impl<S: Source> Package<S> {
    pub fn from_archive(archive: Archive<S>, profile: &TitleProfile) -> Result<Self> {
        let mut archive = archive.with_title(&profile.title).with_engine(profile.engine);
        let summary = PackageSummary::read(&mut archive)?;

        let mut versions = summary.custom_versions.clone();
        profile.merge_versions(&mut versions);
        archive.set_versions(versions);
        let file_version = if summary.file_version != 0 { summary.file_version } else { profile.file_version };
        archive.set_file_versions(file_version, summary.licensee_version);

        let names = read_names(&archive, &summary, profile.name_layout)?;
        archive.set_names(names);
        tracing::debug!(
            archive = archive.id(),
            names = summary.name_count,
            exports = summary.export_count,
            file_version,
            "opened package"
        );
        Ok(Self { summary, archive })
    }

    /// Independent cursor at `offset` sharing the package tables.
    pub fn cursor_at(&self, offset: u64) -> Result<Archive<S>> {
        self.archive.clone_at(offset)
    }
}

fn read_names<S: Source>(archive: &Archive<S>, summary: &PackageSummary, layout: NameLayout) -> Result<NameTable> {
    if summary.name_count == 0 {
        return Ok(NameTable::default());
    }
    if summary.name_offset < 0 {
        return Err(archive.error(ErrorKind::SeekOutOfRange { target: summary.name_offset as u64, len: archive.len() }));
    }
    let mut cursor = archive.try_clone()?;
    if (summary.name_offset as u64) < cursor.position() {
        // Forward-only sources cannot revisit the header region.
        return Err(cursor.error(ErrorKind::BackwardSeek {
            from: cursor.position(),
            to:   summary.name_offset as u64,
        }));
    }
    cursor.seek(summary.name_offset as u64)?;
    NameTable::read(&mut cursor, summary.name_count, layout)
}
