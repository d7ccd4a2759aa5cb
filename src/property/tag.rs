//! Property tags: the self-describing header in front of every serialized
//! property value.
//!
//! Two on-disk layouts are supported; a title profile selects one.
//!
//! ```text
//! Classic: name | type | size i32 | array_index i32 | type meta | has_guid u8 [| guid]
//! Flagged: name | type | size i32 | type meta | flags u8 [| array_index i32] [| guid]
//! ```
//!
//! Type meta depends on the type name: `StructProperty` carries the struct
//! name and a GUID, `BoolProperty` its value byte (classic only),
//! `ByteProperty`/`EnumProperty` the enum name, `ArrayProperty`,
//! `SetProperty` and `OptionalProperty` the inner type, `MapProperty` the key
//! and value types.  A tag list ends with the name `None`.

use serde::{Deserialize, Serialize};

use crate::archive::{Archive, ArchiveWriter, Source};
use crate::error::{ErrorKind, Result};
use crate::names::NameTable;
use crate::version::Guid;

pub const TERMINATOR: &str = "None";

pub const FLAG_ARRAY_INDEX: u8 = 0x01;
pub const FLAG_PROPERTY_GUID: u8 = 0x02;
pub const FLAG_BOOL_TRUE: u8 = 0x08;
pub const FLAG_SKIPPED: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagLayout {
    #[default]
    Classic,
    Flagged,
}

/// A declared property type, with whatever metadata the tag carried.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PropertyType {
    pub name:        String,
    pub struct_name: Option<String>,
    pub struct_guid: Option<Guid>,
    pub enum_name:   Option<String>,
    /// Element type of arrays, sets and optionals; key type of maps.
    pub inner:       Option<Box<PropertyType>>,
    /// Value type of maps.
    pub value:       Option<Box<PropertyType>>,
}

impl PropertyType {
    pub fn named(name: &str) -> Self {
        Self { name: name.to_owned(), ..Self::default() }
    }

    pub fn structure(struct_name: &str) -> Self {
        Self { struct_name: Some(struct_name.to_owned()), ..Self::named("StructProperty") }
    }

    pub fn enumerated(name: &str, enum_name: &str) -> Self {
        Self { enum_name: Some(enum_name.to_owned()), ..Self::named(name) }
    }

    pub fn container(name: &str, inner: PropertyType) -> Self {
        Self { inner: Some(Box::new(inner)), ..Self::named(name) }
    }

    pub fn map(key: PropertyType, value: PropertyType) -> Self {
        Self {
            inner: Some(Box::new(key)),
            value: Some(Box::new(value)),
            ..Self::named("MapProperty")
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyTag {
    pub name:          String,
    pub ty:            PropertyType,
    /// Serialized value length in bytes.
    pub size:          u64,
    pub array_index:   i32,
    pub property_guid: Option<Guid>,
    /// Value of a `BoolProperty`, which carries no payload.
    pub bool_value:    bool,
    /// The value was not serialized; read it in ZERO mode.
    pub skipped:       bool,
}

fn optional_name(s: String) -> Option<String> {
    (s != TERMINATOR && !s.is_empty()).then_some(s)
}

impl PropertyTag {
    pub fn new(name: &str, ty: PropertyType) -> Self {
        Self { name: name.to_owned(), ty, ..Self::default() }
    }

    /// Read the next tag, or `None` at the terminator.
    pub fn read<S: Source>(ar: &mut Archive<S>, layout: TagLayout) -> Result<Option<Self>> {
        ar.atomic(|ar| {
            let name = ar.read_name()?;
            if name == TERMINATOR {
                return Ok(None);
            }
            let type_name = ar.read_name()?;
            let size = ar.read_i32()?;
            if size < 0 {
                return Err(ar.error(ErrorKind::BadCount {
                    count:     size as i64,
                    elem_size: 1,
                    remaining: ar.remaining(),
                }));
            }
            let mut tag = PropertyTag { name, size: size as u64, ..Self::default() };
            if layout == TagLayout::Classic {
                tag.array_index = ar.read_i32()?;
            }

            tag.ty = PropertyType::named(&type_name);
            match type_name.as_str() {
                "StructProperty" => {
                    tag.ty.struct_name = Some(ar.read_name()?);
                    tag.ty.struct_guid = Some(ar.read_guid()?).filter(|g| !g.is_zero());
                }
                "BoolProperty" if layout == TagLayout::Classic => {
                    tag.bool_value = ar.read_u8()? != 0;
                }
                "ByteProperty" | "EnumProperty" => {
                    tag.ty.enum_name = optional_name(ar.read_name()?);
                }
                "ArrayProperty" | "SetProperty" | "OptionalProperty" => {
                    tag.ty.inner = Some(Box::new(PropertyType::named(&ar.read_name()?)));
                }
                "MapProperty" => {
                    tag.ty.inner = Some(Box::new(PropertyType::named(&ar.read_name()?)));
                    tag.ty.value = Some(Box::new(PropertyType::named(&ar.read_name()?)));
                }
                _ => {}
            }

            match layout {
                TagLayout::Classic => {
                    if ar.read_u8()? != 0 {
                        tag.property_guid = Some(ar.read_guid()?);
                    }
                }
                TagLayout::Flagged => {
                    let flags = ar.read_u8()?;
                    if flags & FLAG_ARRAY_INDEX != 0 {
                        tag.array_index = ar.read_i32()?;
                    }
                    if flags & FLAG_PROPERTY_GUID != 0 {
                        tag.property_guid = Some(ar.read_guid()?);
                    }
                    tag.bool_value = flags & FLAG_BOOL_TRUE != 0;
                    tag.skipped = flags & FLAG_SKIPPED != 0;
                }
            }
            Ok(Some(tag))
        })
    }

    /// Write the tag with its current `size`; returns the offset of the size
    /// field so the caller can patch it once the value is written.
    pub fn write(&self, w: &mut ArchiveWriter, names: &mut NameTable, layout: TagLayout) -> usize {
        w.write_name(names.intern(&self.name));
        w.write_name(names.intern(&self.ty.name));
        let size_at = w.position();
        w.write_i32(self.size as i32);
        if layout == TagLayout::Classic {
            w.write_i32(self.array_index);
        }

        let name_or_none = |s: &Option<String>| s.as_deref().unwrap_or(TERMINATOR).to_owned();
        match self.ty.name.as_str() {
            "StructProperty" => {
                w.write_name(names.intern(&name_or_none(&self.ty.struct_name)));
                w.write_guid(&self.ty.struct_guid.unwrap_or_default());
            }
            "BoolProperty" if layout == TagLayout::Classic => w.write_u8(self.bool_value as u8),
            "ByteProperty" | "EnumProperty" => w.write_name(names.intern(&name_or_none(&self.ty.enum_name))),
            "ArrayProperty" | "SetProperty" | "OptionalProperty" | "MapProperty" => {
                let inner = self.ty.inner.as_ref().map_or(TERMINATOR, |t| t.name.as_str());
                w.write_name(names.intern(inner));
                if self.ty.is("MapProperty") {
                    let value = self.ty.value.as_ref().map_or(TERMINATOR, |t| t.name.as_str());
                    w.write_name(names.intern(value));
                }
            }
            _ => {}
        }

        match layout {
            TagLayout::Classic => match &self.property_guid {
                Some(g) => {
                    w.write_u8(1);
                    w.write_guid(g);
                }
                None => w.write_u8(0),
            },
            TagLayout::Flagged => {
                let mut flags = 0;
                if self.array_index != 0 {
                    flags |= FLAG_ARRAY_INDEX;
                }
                if self.property_guid.is_some() {
                    flags |= FLAG_PROPERTY_GUID;
                }
                if self.bool_value {
                    flags |= FLAG_BOOL_TRUE;
                }
                if self.skipped {
                    flags |= FLAG_SKIPPED;
                }
                w.write_u8(flags);
                if self.array_index != 0 {
                    w.write_i32(self.array_index);
                }
                if let Some(g) = &self.property_guid {
                    w.write_guid(g);
                }
            }
        }
        size_at
    }

    /// Write the tag followed by its value, fixing up the size afterwards.
    pub fn write_with(
        &self,
        w:      &mut ArchiveWriter,
        names:  &mut NameTable,
        layout: TagLayout,
        value:  impl FnOnce(&mut ArchiveWriter, &mut NameTable),
    ) {
        let size_at = self.write(w, names, layout);
        let start = w.position();
        value(w, names);
        let size = w.position() - start;
        w.patch_i32(size_at, size as i32);
    }
}

/// Terminate a tag list.
pub fn write_terminator(w: &mut ArchiveWriter, names: &mut NameTable) {
    w.write_name(names.intern(TERMINATOR));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tag: &PropertyTag, layout: TagLayout) -> PropertyTag {
        let mut names = NameTable::default();
        let mut w = ArchiveWriter::new();
        tag.write(&mut w, &mut names, layout);
        write_terminator(&mut w, &mut names);
        let mut ar = Archive::from_bytes("tag", w.into_bytes());
        ar.set_names(names);
        let back = PropertyTag::read(&mut ar, layout).unwrap().unwrap();
        assert!(PropertyTag::read(&mut ar, layout).unwrap().is_none());
        assert!(ar.at_end());
        back
    }

    #[test]
    fn struct_and_map_meta() {
        for layout in [TagLayout::Classic, TagLayout::Flagged] {
            let mut t = PropertyTag::new("Location", PropertyType::structure("Vector"));
            t.size = 12;
            t.property_guid = Some(Guid::from_parts(1, 2, 3, 4));
            assert_eq!(roundtrip(&t, layout), t);

            let mut m = PropertyTag::new(
                "Lookup",
                PropertyType::map(PropertyType::named("NameProperty"), PropertyType::named("IntProperty")),
            );
            m.array_index = 2;
            assert_eq!(roundtrip(&m, layout), m);
        }
    }

    #[test]
    fn flagged_bool_and_skip() {
        let mut t = PropertyTag::new("bEnabled", PropertyType::named("BoolProperty"));
        t.bool_value = true;
        t.skipped = true;
        assert_eq!(roundtrip(&t, TagLayout::Flagged), t);
        t.skipped = false;
        assert_eq!(roundtrip(&t, TagLayout::Classic), t);
    }

    #[test]
    fn enum_name_none_means_plain_byte() {
        let t = PropertyTag::new("Raw", PropertyType::named("ByteProperty"));
        assert_eq!(roundtrip(&t, TagLayout::Classic).ty.enum_name, None);
        let e = PropertyTag::new("Mode", PropertyType::enumerated("EnumProperty", "EMode"));
        assert_eq!(roundtrip(&e, TagLayout::Classic).ty.enum_name.as_deref(), Some("EMode"));
    }

    #[test]
    fn negative_size_is_corruption() {
        let mut names = NameTable::default();
        let mut w = ArchiveWriter::new();
        let mut t = PropertyTag::new("X", PropertyType::named("IntProperty"));
        t.size = u32::MAX as u64;
        t.write(&mut w, &mut names, TagLayout::Classic);
        let mut ar = Archive::from_bytes("tag", w.into_bytes());
        ar.set_names(names);
        let err = PropertyTag::read(&mut ar, TagLayout::Classic).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadCount { count: -1, .. }));
        assert_eq!(ar.position(), 0);
    }
}
