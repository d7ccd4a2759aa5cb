//! Tagged values produced by the property decoder.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

use super::tag::PropertyType;
use crate::version::Guid;

/// Index into the package's object table.  Positive values are exports
/// (`index - 1`), negative values imports (`-index - 1`), zero is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ObjectRef(pub i32);

impl ObjectRef {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn export_index(self) -> Option<usize> {
        (self.0 > 0).then(|| self.0 as usize - 1)
    }

    pub fn import_index(self) -> Option<usize> {
        (self.0 < 0).then(|| (-(self.0 as i64) - 1) as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum EnumValue {
    Numeric(i64),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "history", rename_all = "snake_case")]
pub enum TextHistory {
    None { invariant: Option<String> },
    Base { namespace: String, key: String, source: String },
    /// History types this decoder does not interpret, captured verbatim.
    Raw { kind: i8, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Text {
    pub flags:   u32,
    pub history: TextHistory,
    /// Localized string, or the source string when no translation exists.
    pub display: String,
}

impl Text {
    pub fn empty() -> Self {
        Self { flags: 0, history: TextHistory::None { invariant: None }, display: String::new() }
    }
}

// ── Struct fallback ──────────────────────────────────────────────────────────

/// Ordered `(field name, value)` capture of a struct.  Immutable once built.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructFallback {
    name:   String,
    fields: Vec<(String, Value)>,
}

impl StructFallback {
    pub fn new(name: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Self { name: name.into(), fields }
    }

    /// Declared native struct name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First field called `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for StructFallback {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("$struct", &self.name)?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

// ── Map ──────────────────────────────────────────────────────────────────────

/// Insertion-ordered map with unique keys.  Re-inserting a key replaces its
/// value in place, so the last occurrence wins and the count equals the
/// number of distinct keys.
#[derive(Debug, Clone, Default)]
pub struct MapValue {
    entries: Vec<(Value, Value)>,
    index:   HashMap<u64, Vec<usize>>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        let h = hash_of(&key);
        let bucket = self.index.entry(h).or_default();
        if let Some(&i) = bucket.iter().find(|&&i| self.entries[i].0 == key) {
            self.entries[i].1 = value;
            return;
        }
        bucket.push(self.entries.len());
        self.entries.push((key, value));
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index
            .get(&hash_of(key))?
            .iter()
            .find(|&&i| &self.entries[i].0 == key)
            .map(|&i| &self.entries[i].1)
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for MapValue {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(Value, Value)> for MapValue {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl Serialize for MapValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Entry<'a> {
            key:   &'a Value,
            value: &'a Value,
        }
        serializer.collect_seq(self.entries.iter().map(|(key, value)| Entry { key, value }))
    }
}

fn hash_of(v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    v.hash(&mut h);
    h.finish()
}

// ── Value ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int(i32),
    Int64(i64),
    Byte(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Str(String),
    Name(String),
    Text(Text),
    Guid(Guid),
    /// Numeric layouts shift between versions, so the enum type is kept.
    Enum { enum_name: String, value: EnumValue },
    Object(ObjectRef),
    SoftObject { path: String, sub_path: String },
    Array(Vec<Value>),
    Set(Vec<Value>),
    Map(MapValue),
    /// An absent optional carries the zero value of its inner type.
    Optional { present: bool, value: Box<Value> },
    Struct(StructFallback),
    /// Undecodable payload kept by size.
    Raw { type_name: String, bytes: Vec<u8> },
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Any integer kind, widened.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Value::Int8(v) => v as i64,
            Value::Int16(v) => v as i64,
            Value::Int(v) => v as i64,
            Value::Int64(v) => v,
            Value::Byte(v) => v as i64,
            Value::UInt16(v) => v as i64,
            Value::UInt32(v) => v as i64,
            Value::UInt64(v) => i64::try_from(v).ok()?,
            Value::Enum { value: EnumValue::Numeric(v), .. } => v,
            _ => return None,
        })
    }

    /// Any numeric kind as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v as f64),
            Value::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Strings, names, enum labels and text display strings.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Name(s) => Some(s),
            Value::Enum { value: EnumValue::Label(s), .. } => Some(s),
            Value::Text(t) => Some(&t.display),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructFallback> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, h: &mut H) {
        std::mem::discriminant(self).hash(h);
        match self {
            Value::Bool(v) => v.hash(h),
            Value::Int8(v) => v.hash(h),
            Value::Int16(v) => v.hash(h),
            Value::Int(v) => v.hash(h),
            Value::Int64(v) => v.hash(h),
            Value::Byte(v) => v.hash(h),
            Value::UInt16(v) => v.hash(h),
            Value::UInt32(v) => v.hash(h),
            Value::UInt64(v) => v.hash(h),
            Value::Float(v) => v.to_bits().hash(h),
            Value::Double(v) => v.to_bits().hash(h),
            Value::Str(s) | Value::Name(s) => s.hash(h),
            Value::Text(t) => t.hash(h),
            Value::Guid(g) => g.hash(h),
            Value::Enum { enum_name, value } => {
                enum_name.hash(h);
                value.hash(h);
            }
            Value::Object(o) => o.hash(h),
            Value::SoftObject { path, sub_path } => {
                path.hash(h);
                sub_path.hash(h);
            }
            Value::Array(v) | Value::Set(v) => v.hash(h),
            Value::Map(m) => m.entries.hash(h),
            Value::Optional { present, value } => {
                present.hash(h);
                value.hash(h);
            }
            Value::Struct(s) => {
                s.name.hash(h);
                s.fields.hash(h);
            }
            Value::Raw { type_name, bytes } => {
                type_name.hash(h);
                bytes.hash(h);
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Bool(v) => v.serialize(serializer),
            Value::Int8(v) => v.serialize(serializer),
            Value::Int16(v) => v.serialize(serializer),
            Value::Int(v) => v.serialize(serializer),
            Value::Int64(v) => v.serialize(serializer),
            Value::Byte(v) => v.serialize(serializer),
            Value::UInt16(v) => v.serialize(serializer),
            Value::UInt32(v) => v.serialize(serializer),
            Value::UInt64(v) => v.serialize(serializer),
            Value::Float(v) => v.serialize(serializer),
            Value::Double(v) => v.serialize(serializer),
            Value::Str(s) | Value::Name(s) => s.serialize(serializer),
            Value::Text(t) => t.display.serialize(serializer),
            Value::Guid(g) => g.serialize(serializer),
            Value::Enum { enum_name, value } => match value {
                EnumValue::Label(l) => serializer.collect_str(l),
                EnumValue::Numeric(n) => serializer.collect_str(&format_args!("{enum_name}({n})")),
            },
            Value::Object(o) => o.serialize(serializer),
            Value::SoftObject { path, sub_path } => {
                let mut s = serializer.serialize_struct("SoftObject", 2)?;
                s.serialize_field("path", path)?;
                s.serialize_field("sub_path", sub_path)?;
                s.end()
            }
            Value::Array(v) | Value::Set(v) => v.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
            Value::Optional { present, value } => {
                if *present {
                    value.serialize(serializer)
                } else {
                    serializer.serialize_none()
                }
            }
            Value::Struct(s) => s.serialize(serializer),
            Value::Raw { bytes, .. } => serializer.collect_str(&hex::encode(bytes)),
        }
    }
}

// ── Zero values ──────────────────────────────────────────────────────────────

/// Well-defined default for a type, consuming nothing.  Used for ZERO-mode
/// reads and to initialize absent optionals.
pub fn zero_value(ty: &PropertyType) -> Value {
    match ty.name.as_str() {
        "BoolProperty" => Value::Bool(false),
        "Int8Property" => Value::Int8(0),
        "Int16Property" => Value::Int16(0),
        "IntProperty" => Value::Int(0),
        "Int64Property" => Value::Int64(0),
        "UInt16Property" => Value::UInt16(0),
        "UInt32Property" => Value::UInt32(0),
        "UInt64Property" => Value::UInt64(0),
        "FloatProperty" => Value::Float(0.0),
        "DoubleProperty" => Value::Double(0.0),
        "StrProperty" => Value::Str(String::new()),
        "NameProperty" => Value::Name("None".into()),
        "TextProperty" => Value::Text(Text::empty()),
        "ByteProperty" | "EnumProperty" => match &ty.enum_name {
            Some(e) => Value::Enum { enum_name: e.clone(), value: EnumValue::Numeric(0) },
            None if ty.name == "ByteProperty" => Value::Byte(0),
            None => Value::Enum { enum_name: String::new(), value: EnumValue::Numeric(0) },
        },
        "ObjectProperty" | "ClassProperty" | "InterfaceProperty" | "WeakObjectProperty"
        | "LazyObjectProperty" => Value::Object(ObjectRef(0)),
        "SoftObjectProperty" | "SoftClassProperty" => {
            Value::SoftObject { path: "None".into(), sub_path: String::new() }
        }
        "ArrayProperty" => Value::Array(Vec::new()),
        "SetProperty" => Value::Set(Vec::new()),
        "MapProperty" => Value::Map(MapValue::new()),
        "OptionalProperty" => Value::Optional {
            present: false,
            value:   Box::new(ty.inner.as_deref().map_or(Value::Raw { type_name: String::new(), bytes: Vec::new() }, zero_value)),
        },
        "StructProperty" => Value::Struct(StructFallback::new(ty.struct_name.as_deref().unwrap_or(""), Vec::new())),
        other => Value::Raw { type_name: other.to_owned(), bytes: Vec::new() },
    }
}
