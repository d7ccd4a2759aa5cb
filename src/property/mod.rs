//! Property Tag Decoder.
//!
//! Reads a [`PropertyTag`] and dispatches on its declared type name to
//! produce one [`Value`].  Containers recurse through the same dispatcher
//! using the inner-type metadata from the tag; structs go to the native
//! layout registry first and otherwise are captured generically as a
//! [`StructFallback`] by reading nested tags up to the terminator.
//!
//! After a top-level value is decoded its consumed length is reconciled
//! with the tag size: an overrun is corruption, an underrun is logged and
//! the remainder skipped.

mod native;
mod tag;
mod value;

pub use native::{FieldKind, NativeField, NativeLayout, NativeStructs};
pub use tag::{write_terminator, PropertyTag, PropertyType, TagLayout, TERMINATOR};
pub use value::{zero_value, EnumValue, MapValue, ObjectRef, StructFallback, Text, TextHistory, Value};

use std::sync::Arc;

use crate::archive::{Archive, Source};
use crate::error::{ErrorKind, Result};

/// Deepest container/struct nesting accepted before the data is treated as
/// corrupt.
pub const MAX_DEPTH: usize = 32;

/// How a value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Normal,
    /// Produce the type's zero value without consuming bytes.
    Zero,
}

/// Source of translated strings for `TextProperty` values.
pub trait Localizer: Send + Sync {
    fn lookup(&self, namespace: &str, key: &str) -> Option<String>;
}

impl<F> Localizer for F
where
    F: Fn(&str, &str) -> Option<String> + Send + Sync,
{
    fn lookup(&self, namespace: &str, key: &str) -> Option<String> {
        self(namespace, key)
    }
}

/// Where a value sits; changes how some kinds are encoded.
#[derive(Debug, Clone, Copy)]
struct Slot {
    depth:        usize,
    /// Container element: bools are a byte, enums are names.
    in_container: bool,
    /// Payload size from the tag, for top-level values.
    size:         Option<u64>,
    bool_value:   bool,
}

impl Slot {
    fn top(tag: &PropertyTag, depth: usize) -> Self {
        Self { depth, in_container: false, size: Some(tag.size), bool_value: tag.bool_value }
    }

    fn element(depth: usize) -> Self {
        Self { depth, in_container: true, size: None, bool_value: false }
    }
}

#[derive(Clone)]
pub struct PropertyDecoder {
    layout:    TagLayout,
    natives:   Arc<NativeStructs>,
    localizer: Option<Arc<dyn Localizer>>,
}

impl std::fmt::Debug for PropertyDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyDecoder")
            .field("layout", &self.layout)
            .field("natives", &self.natives)
            .field("localizer", &self.localizer.is_some())
            .finish()
    }
}

impl Default for PropertyDecoder {
    fn default() -> Self {
        Self::new(TagLayout::Classic)
    }
}

impl PropertyDecoder {
    pub fn new(layout: TagLayout) -> Self {
        Self { layout, natives: Arc::new(NativeStructs::default()), localizer: None }
    }

    pub fn with_natives(mut self, natives: NativeStructs) -> Self {
        self.natives = Arc::new(natives);
        self
    }

    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn layout(&self) -> TagLayout {
        self.layout
    }

    pub fn natives(&self) -> &NativeStructs {
        &self.natives
    }

    pub fn read_tag<S: Source>(&self, ar: &mut Archive<S>) -> Result<Option<PropertyTag>> {
        PropertyTag::read(ar, self.layout)
    }

    /// Read tagged properties up to the terminator.
    pub fn read_properties<S: Source>(&self, ar: &mut Archive<S>, struct_name: &str) -> Result<StructFallback> {
        self.read_properties_at(ar, struct_name, 0)
    }

    fn read_properties_at<S: Source>(&self, ar: &mut Archive<S>, struct_name: &str, depth: usize) -> Result<StructFallback> {
        if depth > MAX_DEPTH {
            return Err(ar.error(ErrorKind::DepthExceeded(MAX_DEPTH)));
        }
        let mut fields = Vec::new();
        while let Some(tag) = self.read_tag(ar)? {
            let value = self.read_tagged_at(ar, &tag, depth)?;
            let name = if tag.array_index > 0 {
                format!("{}[{}]", tag.name, tag.array_index)
            } else {
                tag.name
            };
            fields.push((name, value));
        }
        Ok(StructFallback::new(struct_name, fields))
    }

    /// Decode the value for `tag` and reconcile its length with the tag size.
    pub fn read_tagged_value<S: Source>(&self, ar: &mut Archive<S>, tag: &PropertyTag) -> Result<Value> {
        self.read_tagged_at(ar, tag, 0)
    }

    fn read_tagged_at<S: Source>(&self, ar: &mut Archive<S>, tag: &PropertyTag, depth: usize) -> Result<Value> {
        let start = ar.position();
        let end = start.saturating_add(tag.size);
        if end > ar.len() {
            return Err(ar.error(ErrorKind::Truncated { needed: tag.size, available: ar.remaining() }));
        }
        let mode = if tag.skipped { ReadMode::Zero } else { ReadMode::Normal };
        let value = if mode == ReadMode::Normal && !is_known(&tag.ty.name) {
            tracing::warn!(
                archive = ar.id(),
                property = %tag.name,
                type_name = %tag.ty.name,
                size = tag.size,
                "unknown property type, keeping raw bytes"
            );
            Value::Raw { type_name: tag.ty.name.clone(), bytes: ar.read_bytes(tag.size as usize)? }
        } else {
            self.read_value_at(ar, &tag.ty, mode, Slot::top(tag, depth))?
        };

        let consumed = ar.position() - start;
        if consumed > tag.size {
            return Err(ar.error(ErrorKind::TagOverrun { name: tag.name.clone(), consumed, size: tag.size }));
        }
        if consumed < tag.size {
            if mode == ReadMode::Normal {
                tracing::warn!(
                    archive = ar.id(),
                    property = %tag.name,
                    consumed,
                    size = tag.size,
                    "property shorter than its tag, skipping the rest"
                );
            }
            ar.seek(end)?;
        }
        Ok(value)
    }

    /// Decode one value of type `ty` outside any tag (container elements,
    /// consumer-driven reads).
    pub fn read_value<S: Source>(&self, ar: &mut Archive<S>, ty: &PropertyType, mode: ReadMode) -> Result<Value> {
        self.read_value_at(ar, ty, mode, Slot::element(0))
    }

    fn read_value_at<S: Source>(&self, ar: &mut Archive<S>, ty: &PropertyType, mode: ReadMode, slot: Slot) -> Result<Value> {
        if mode == ReadMode::Zero {
            return Ok(zero_value(ty));
        }
        if slot.depth > MAX_DEPTH {
            return Err(ar.error(ErrorKind::DepthExceeded(MAX_DEPTH)));
        }
        ar.atomic(|ar| {
            Ok(match ty.name.as_str() {
                "BoolProperty" if !slot.in_container => Value::Bool(slot.bool_value),
                "BoolProperty" => match ar.read_u8()? {
                    0 => Value::Bool(false),
                    1 => Value::Bool(true),
                    v => return Err(ar.error(ErrorKind::BadBool(v as u32))),
                },
                "Int8Property" => Value::Int8(ar.read_i8()?),
                "Int16Property" => Value::Int16(ar.read_i16()?),
                "IntProperty" => Value::Int(ar.read_i32()?),
                "Int64Property" => Value::Int64(ar.read_i64()?),
                "UInt16Property" => Value::UInt16(ar.read_u16()?),
                "UInt32Property" => Value::UInt32(ar.read_u32()?),
                "UInt64Property" => Value::UInt64(ar.read_u64()?),
                "FloatProperty" => Value::Float(ar.read_f32()?),
                "DoubleProperty" => Value::Double(ar.read_f64()?),
                "StrProperty" => Value::Str(ar.read_string()?),
                "NameProperty" => Value::Name(ar.read_name()?),
                "TextProperty" => Value::Text(self.read_text(ar, slot.size)?),
                "ByteProperty" | "EnumProperty" => self.read_enum(ar, ty, slot)?,
                "ObjectProperty" | "ClassProperty" | "InterfaceProperty" | "WeakObjectProperty"
                | "LazyObjectProperty" => Value::Object(ObjectRef(ar.read_i32()?)),
                "SoftObjectProperty" | "SoftClassProperty" => {
                    let path = ar.read_name()?;
                    let sub_path = ar.read_string()?;
                    Value::SoftObject { path, sub_path }
                }
                "ArrayProperty" => Value::Array(self.read_elements(ar, ty, slot.depth, true)?),
                "SetProperty" => {
                    // Removed entries precede the live ones and are dropped.
                    self.read_elements(ar, ty, slot.depth, false)?;
                    Value::Set(self.read_elements(ar, ty, slot.depth, false)?)
                }
                "MapProperty" => Value::Map(self.read_map(ar, ty, slot.depth)?),
                "OptionalProperty" => {
                    let inner = inner_type(ar, ty, "inner")?;
                    let present = ar.read_bool()?;
                    let value = if present {
                        self.read_value_at(ar, inner, ReadMode::Normal, Slot::element(slot.depth + 1))?
                    } else {
                        zero_value(inner)
                    };
                    Value::Optional { present, value: Box::new(value) }
                }
                "StructProperty" => Value::Struct(self.read_struct(ar, ty, slot.depth + 1)?),
                other => return Err(ar.error(ErrorKind::UnknownElementType(other.to_owned()))),
            })
        })
    }

    fn read_enum<S: Source>(&self, ar: &mut Archive<S>, ty: &PropertyType, slot: Slot) -> Result<Value> {
        let Some(enum_name) = ty.enum_name.clone() else {
            return Ok(if ty.is("ByteProperty") {
                Value::Byte(ar.read_u8()?)
            } else {
                Value::Enum { enum_name: String::new(), value: EnumValue::Label(ar.read_name()?) }
            });
        };
        // Tagged enums are stored by label unless the tag says the payload is
        // a plain integer of that width.
        let value = match (slot.in_container, slot.size) {
            (false, Some(1)) => EnumValue::Numeric(ar.read_u8()? as i64),
            (false, Some(2)) => EnumValue::Numeric(ar.read_u16()? as i64),
            (false, Some(4)) => EnumValue::Numeric(ar.read_u32()? as i64),
            (true, _) if ty.is("ByteProperty") => EnumValue::Numeric(ar.read_u8()? as i64),
            _ => EnumValue::Label(ar.read_name()?),
        };
        Ok(Value::Enum { enum_name, value })
    }

    fn read_text<S: Source>(&self, ar: &mut Archive<S>, size: Option<u64>) -> Result<Text> {
        let start = ar.position();
        let flags = ar.read_u32()?;
        let kind = ar.read_i8()?;
        let (history, display) = match kind {
            -1 => {
                let invariant = if ar.read_bool()? { Some(ar.read_string()?) } else { None };
                let display = invariant.clone().unwrap_or_default();
                (TextHistory::None { invariant }, display)
            }
            0 => {
                let namespace = ar.read_string()?;
                let key = ar.read_string()?;
                let source = ar.read_string()?;
                let display = self.localize(ar, &namespace, &key, &source);
                (TextHistory::Base { namespace, key, source }, display)
            }
            other => match size {
                Some(size) => {
                    let used = ar.position() - start;
                    let bytes = ar.read_bytes(size.saturating_sub(used) as usize)?;
                    (TextHistory::Raw { kind: other, bytes }, String::new())
                }
                None => return Err(ar.error(ErrorKind::BadTextHistory(other))),
            },
        };
        Ok(Text { flags, history, display })
    }

    fn localize<S: Source>(&self, ar: &Archive<S>, namespace: &str, key: &str, source: &str) -> String {
        let Some(loc) = &self.localizer else {
            return source.to_owned();
        };
        loc.lookup(namespace, key).unwrap_or_else(|| {
            tracing::warn!(archive = ar.id(), namespace, key, "no localization, using source string");
            source.to_owned()
        })
    }

    /// `i32` count, then elements of the inner type.  An array of structs
    /// whose struct name is not known carries one inner tag naming it,
    /// between the count and the elements.
    fn read_elements<S: Source>(
        &self,
        ar:         &mut Archive<S>,
        ty:         &PropertyType,
        depth:      usize,
        inner_tag:  bool,
    ) -> Result<Vec<Value>> {
        let inner = inner_type(ar, ty, "inner")?;
        let count = ar.read_i32()? as i64;

        let described;
        let inner = if inner_tag && inner.is("StructProperty") && inner.struct_name.is_none() {
            let tag = self.read_tag(ar)?.ok_or_else(|| {
                ar.error(ErrorKind::MissingInnerType { type_name: ty.name.clone(), what: "struct" })
            })?;
            described = tag.ty;
            &described
        } else {
            inner
        };
        ar.read_array_n(count, min_size(inner), |ar| {
            self.read_value_at(ar, inner, ReadMode::Normal, Slot::element(depth + 1))
        })
    }

    /// Removed keys (dropped), then all keys, then all values.
    fn read_map<S: Source>(&self, ar: &mut Archive<S>, ty: &PropertyType, depth: usize) -> Result<MapValue> {
        let key_ty = inner_type(ar, ty, "key")?;
        let value_ty = ty
            .value
            .as_deref()
            .ok_or_else(|| ar.error(ErrorKind::MissingInnerType { type_name: ty.name.clone(), what: "value" }))?;
        let elem = Slot::element(depth + 1);

        let removed = ar.read_i32()?;
        ar.read_array_n(removed as i64, min_size(key_ty), |ar| {
            self.read_value_at(ar, key_ty, ReadMode::Normal, elem)
        })?;

        let count = ar.read_i32()? as i64;
        let pair_size = min_size(key_ty) + min_size(value_ty);
        ar.check_count(count, pair_size)?;
        let keys = ar.read_array_n(count, min_size(key_ty), |ar| {
            self.read_value_at(ar, key_ty, ReadMode::Normal, elem)
        })?;
        let values = ar.read_array_n(count, min_size(value_ty), |ar| {
            self.read_value_at(ar, value_ty, ReadMode::Normal, elem)
        })?;
        Ok(keys.into_iter().zip(values).collect())
    }

    fn read_struct<S: Source>(&self, ar: &mut Archive<S>, ty: &PropertyType, depth: usize) -> Result<StructFallback> {
        let name = ty.struct_name.as_deref().unwrap_or("");
        if let Some(native) = self.natives.read(ar, name, depth)? {
            return Ok(native);
        }
        self.read_properties_at(ar, name, depth)
    }
}

fn inner_type<'t, S: Source>(ar: &Archive<S>, ty: &'t PropertyType, what: &'static str) -> Result<&'t PropertyType> {
    ty.inner
        .as_deref()
        .filter(|t| !t.name.is_empty() && t.name != TERMINATOR)
        .ok_or_else(|| ar.error(ErrorKind::MissingInnerType { type_name: ty.name.clone(), what }))
}

fn is_known(type_name: &str) -> bool {
    matches!(
        type_name,
        "BoolProperty"
            | "Int8Property"
            | "Int16Property"
            | "IntProperty"
            | "Int64Property"
            | "UInt16Property"
            | "UInt32Property"
            | "UInt64Property"
            | "FloatProperty"
            | "DoubleProperty"
            | "StrProperty"
            | "NameProperty"
            | "TextProperty"
            | "ByteProperty"
            | "EnumProperty"
            | "ObjectProperty"
            | "ClassProperty"
            | "InterfaceProperty"
            | "WeakObjectProperty"
            | "LazyObjectProperty"
            | "SoftObjectProperty"
            | "SoftClassProperty"
            | "ArrayProperty"
            | "SetProperty"
            | "MapProperty"
            | "OptionalProperty"
            | "StructProperty"
    )
}

/// Smallest encoding of one element of `ty`, for count validation.
fn min_size(ty: &PropertyType) -> usize {
    match ty.name.as_str() {
        "BoolProperty" | "Int8Property" | "ByteProperty" => 1,
        "Int16Property" | "UInt16Property" => 2,
        "IntProperty" | "UInt32Property" | "FloatProperty" | "StrProperty" | "ObjectProperty"
        | "ClassProperty" | "InterfaceProperty" | "WeakObjectProperty" | "LazyObjectProperty"
        | "ArrayProperty" | "SetProperty" | "OptionalProperty" => 4,
        "Int64Property" | "UInt64Property" | "DoubleProperty" | "NameProperty" | "EnumProperty"
        | "MapProperty" => 8,
        "SoftObjectProperty" | "SoftClassProperty" => 12,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::names::NameTable;

    struct Fixture {
        w:      ArchiveWriter,
        names:  NameTable,
        layout: TagLayout,
    }

    impl Fixture {
        fn new(layout: TagLayout) -> Self {
            Self { w: ArchiveWriter::new(), names: NameTable::default(), layout }
        }

        fn prop(&mut self, tag: PropertyTag, body: impl FnOnce(&mut ArchiveWriter, &mut NameTable)) {
            tag.write_with(&mut self.w, &mut self.names, self.layout, body);
        }

        fn finish(mut self) -> Archive {
            write_terminator(&mut self.w, &mut self.names);
            let mut ar = Archive::from_bytes("props", self.w.into_bytes());
            ar.set_names(self.names);
            ar
        }
    }

    fn decode(f: Fixture) -> StructFallback {
        let layout = f.layout;
        let mut ar = f.finish();
        let s = PropertyDecoder::new(layout).read_properties(&mut ar, "Test").unwrap();
        assert!(ar.at_end());
        s
    }

    #[test]
    fn scalars_and_bool_in_tag() {
        for layout in [TagLayout::Classic, TagLayout::Flagged] {
            let mut f = Fixture::new(layout);
            f.prop(PropertyTag::new("Health", PropertyType::named("IntProperty")), |w, _| w.write_i32(100));
            f.prop(PropertyTag::new("Speed", PropertyType::named("FloatProperty")), |w, _| w.write_f32(2.5));
            let mut b = PropertyTag::new("bAlive", PropertyType::named("BoolProperty"));
            b.bool_value = true;
            f.prop(b, |_, _| {});
            f.prop(PropertyTag::new("Label", PropertyType::named("StrProperty")), |w, _| w.write_string("hi"));
            f.prop(PropertyTag::new("Kind", PropertyType::named("NameProperty")), |w, n| {
                w.write_name(n.intern("Boss"))
            });
            let s = decode(f);
            assert_eq!(s.get("Health"), Some(&Value::Int(100)));
            assert_eq!(s.get("Speed"), Some(&Value::Float(2.5)));
            assert_eq!(s.get("bAlive"), Some(&Value::Bool(true)));
            assert_eq!(s.get("Label"), Some(&Value::Str("hi".into())));
            assert_eq!(s.get("Kind"), Some(&Value::Name("Boss".into())));
        }
    }

    #[test]
    fn array_of_ints_and_bools() {
        let mut f = Fixture::new(TagLayout::Classic);
        let ints = PropertyTag::new("Ids", PropertyType::container("ArrayProperty", PropertyType::named("IntProperty")));
        f.prop(ints, |w, _| {
            w.write_i32(3);
            for v in [4, 5, 6] {
                w.write_i32(v);
            }
        });
        let bools =
            PropertyTag::new("Flags", PropertyType::container("ArrayProperty", PropertyType::named("BoolProperty")));
        f.prop(bools, |w, _| {
            w.write_i32(2);
            w.write_u8(1);
            w.write_u8(0);
        });
        let s = decode(f);
        assert_eq!(s.get("Ids"), Some(&Value::Array(vec![Value::Int(4), Value::Int(5), Value::Int(6)])));
        assert_eq!(s.get("Flags"), Some(&Value::Array(vec![Value::Bool(true), Value::Bool(false)])));
    }

    #[test]
    fn map_duplicate_key_last_wins() {
        let mut f = Fixture::new(TagLayout::Classic);
        let tag = PropertyTag::new(
            "Scores",
            PropertyType::map(PropertyType::named("NameProperty"), PropertyType::named("IntProperty")),
        );
        f.prop(tag, |w, n| {
            w.write_i32(0);
            w.write_i32(3);
            for k in ["a", "b", "a"] {
                w.write_name(n.intern(k));
            }
            for v in [1, 2, 3] {
                w.write_i32(v);
            }
        });
        let s = decode(f);
        let m = s.get("Scores").and_then(Value::as_map).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&Value::Name("a".into())), Some(&Value::Int(3)));
        assert_eq!(m.get(&Value::Name("b".into())), Some(&Value::Int(2)));
    }

    #[test]
    fn set_drops_removed_entries() {
        let mut f = Fixture::new(TagLayout::Classic);
        let tag = PropertyTag::new("Tags", PropertyType::container("SetProperty", PropertyType::named("IntProperty")));
        f.prop(tag, |w, _| {
            w.write_i32(1);
            w.write_i32(99);
            w.write_i32(2);
            w.write_i32(7);
            w.write_i32(8);
        });
        assert_eq!(decode(f).get("Tags"), Some(&Value::Set(vec![Value::Int(7), Value::Int(8)])));
    }

    #[test]
    fn optional_presence_gates_read() {
        let mut f = Fixture::new(TagLayout::Classic);
        let ty = PropertyType::container("OptionalProperty", PropertyType::named("IntProperty"));
        f.prop(PropertyTag::new("Some", ty.clone()), |w, _| {
            w.write_bool(true);
            w.write_i32(42);
        });
        f.prop(PropertyTag::new("Gone", ty), |w, _| w.write_bool(false));
        let s = decode(f);
        assert_eq!(s.get("Some"), Some(&Value::Optional { present: true, value: Box::new(Value::Int(42)) }));
        assert_eq!(s.get("Gone"), Some(&Value::Optional { present: false, value: Box::new(Value::Int(0)) }));
    }

    #[test]
    fn enums_keep_type_name() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Mode", PropertyType::enumerated("EnumProperty", "EMode")), |w, n| {
            w.write_name(n.intern("EMode::Fast"))
        });
        f.prop(PropertyTag::new("Tier", PropertyType::enumerated("ByteProperty", "ETier")), |w, _| w.write_u8(2));
        f.prop(PropertyTag::new("Raw", PropertyType::named("ByteProperty")), |w, _| w.write_u8(9));
        let s = decode(f);
        assert_eq!(
            s.get("Mode"),
            Some(&Value::Enum { enum_name: "EMode".into(), value: EnumValue::Label("EMode::Fast".into()) })
        );
        assert_eq!(s.get("Tier"), Some(&Value::Enum { enum_name: "ETier".into(), value: EnumValue::Numeric(2) }));
        assert_eq!(s.get("Raw"), Some(&Value::Byte(9)));
    }

    #[test]
    fn skipped_flag_reads_zero() {
        let mut f = Fixture::new(TagLayout::Flagged);
        let mut t = PropertyTag::new("Cached", PropertyType::named("DoubleProperty"));
        t.skipped = true;
        f.prop(t, |_, _| {});
        f.prop(PropertyTag::new("After", PropertyType::named("IntProperty")), |w, _| w.write_i32(1));
        let s = decode(f);
        assert_eq!(s.get("Cached"), Some(&Value::Double(0.0)));
        assert_eq!(s.get("After"), Some(&Value::Int(1)));
    }

    #[test]
    fn zero_mode_consumes_nothing() {
        let mut ar = Archive::from_bytes("z", vec![1, 2, 3, 4]);
        let d = PropertyDecoder::default();
        for name in ["IntProperty", "StrProperty", "ArrayProperty", "MapProperty", "StructProperty"] {
            d.read_value(&mut ar, &PropertyType::named(name), ReadMode::Zero).unwrap();
        }
        assert_eq!(ar.position(), 0);
    }

    #[test]
    fn missing_inner_type_is_named() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Bad", PropertyType::named("ArrayProperty")), |w, _| w.write_i32(0));
        let mut ar = f.finish();
        let err = PropertyDecoder::default().read_properties(&mut ar, "T").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MissingInnerType { ref type_name, what: "inner" } if type_name == "ArrayProperty"));
    }

    #[test]
    fn overrun_is_fatal_underrun_skips() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Padded", PropertyType::named("IntProperty")), |w, _| {
            w.write_i32(5);
            w.write_u32(0xDEAD);
        });
        f.prop(PropertyTag::new("Next", PropertyType::named("IntProperty")), |w, _| w.write_i32(6));
        let s = decode(f);
        assert_eq!(s.get("Padded"), Some(&Value::Int(5)));
        assert_eq!(s.get("Next"), Some(&Value::Int(6)));

        let mut names = NameTable::default();
        let mut w = ArchiveWriter::new();
        let mut t = PropertyTag::new("Short", PropertyType::named("Int64Property"));
        t.size = 4;
        t.write(&mut w, &mut names, TagLayout::Classic);
        w.write_i64(1);
        write_terminator(&mut w, &mut names);
        let mut ar = Archive::from_bytes("o", w.into_bytes());
        ar.set_names(names);
        let err = PropertyDecoder::default().read_properties(&mut ar, "T").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TagOverrun { consumed: 8, size: 4, .. }));
    }

    #[test]
    fn unknown_type_kept_raw() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Future", PropertyType::named("FancyProperty")), |w, _| w.write_bytes(&[1, 2, 3]));
        let s = decode(f);
        assert_eq!(s.get("Future"), Some(&Value::Raw { type_name: "FancyProperty".into(), bytes: vec![1, 2, 3] }));
    }

    #[test]
    fn text_histories_and_localizer() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Title", PropertyType::named("TextProperty")), |w, _| {
            w.write_u32(0);
            w.write_i8(0);
            w.write_string("UI");
            w.write_string("k1");
            w.write_string("Hello");
        });
        f.prop(PropertyTag::new("Missing", PropertyType::named("TextProperty")), |w, _| {
            w.write_u32(0);
            w.write_i8(0);
            w.write_string("UI");
            w.write_string("k2");
            w.write_string("Fallback");
        });
        f.prop(PropertyTag::new("Plain", PropertyType::named("TextProperty")), |w, _| {
            w.write_u32(2);
            w.write_i8(-1);
            w.write_bool(true);
            w.write_string("Fixed");
        });
        let mut ar = f.finish();
        let loc = |ns: &str, key: &str| (ns == "UI" && key == "k1").then(|| "Bonjour".to_string());
        let d = PropertyDecoder::default().with_localizer(Arc::new(loc));
        let s = d.read_properties(&mut ar, "T").unwrap();
        assert_eq!(s.get("Title").and_then(Value::as_str), Some("Bonjour"));
        assert_eq!(s.get("Missing").and_then(Value::as_str), Some("Fallback"));
        assert_eq!(s.get("Plain").and_then(Value::as_str), Some("Fixed"));
    }

    #[test]
    fn depth_guard() {
        let mut ty = PropertyType::named("IntProperty");
        for _ in 0..=MAX_DEPTH {
            ty = PropertyType::container("OptionalProperty", ty);
        }
        let mut w = ArchiveWriter::new();
        for _ in 0..=MAX_DEPTH {
            w.write_bool(true);
        }
        w.write_i32(1);
        let mut ar = Archive::from_bytes("d", w.into_bytes());
        let err = PropertyDecoder::default().read_value(&mut ar, &ty, ReadMode::Normal).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DepthExceeded(MAX_DEPTH)));
    }

    #[test]
    fn native_struct_and_nested_fallback() {
        let mut f = Fixture::new(TagLayout::Classic);
        f.prop(PropertyTag::new("Pos", PropertyType::structure("Vector")), |w, _| {
            for v in [1.0f32, 2.0, 3.0] {
                w.write_f32(v);
            }
        });
        f.prop(PropertyTag::new("Stats", PropertyType::structure("MyStats")), |w, n| {
            PropertyTag::new("Level", PropertyType::named("IntProperty")).write_with(w, n, TagLayout::Classic, |w, _| {
                w.write_i32(12)
            });
            write_terminator(w, n);
        });
        let s = decode(f);
        let pos = s.get("Pos").and_then(Value::as_struct).unwrap();
        assert_eq!(pos.get("Y"), Some(&Value::Float(2.0)));
        let stats = s.get("Stats").and_then(Value::as_struct).unwrap();
        assert_eq!(stats.name(), "MyStats");
        assert_eq!(stats.get("Level"), Some(&Value::Int(12)));
    }
}
