//! Native struct layouts.
//!
//! Engine structs such as `Vector` or `Guid` are serialized as packed binary
//! rather than as tagged property lists.  Layouts are data, so a title
//! profile can override or add one without code.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::value::{StructFallback, Value};
use super::MAX_DEPTH;
use crate::archive::{Archive, Source};
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    U8,
    I32,
    U32,
    I64,
    F32,
    F64,
    /// `f32`, or `f64` for large-world-coordinate titles.
    Real,
    Guid,
    Name,
    Str,
    /// Another native struct, by name.
    Struct(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeField {
    pub name: String,
    pub kind: FieldKind,
}

pub type NativeLayout = Vec<NativeField>;

fn layout(fields: &[(&str, FieldKind)]) -> NativeLayout {
    fields.iter().map(|(n, k)| NativeField { name: (*n).to_owned(), kind: k.clone() }).collect()
}

#[derive(Debug, Clone)]
pub struct NativeStructs {
    large_world_coordinates: bool,
    layouts:                 HashMap<String, NativeLayout>,
}

impl Default for NativeStructs {
    fn default() -> Self {
        Self::builtin(false)
    }
}

impl NativeStructs {
    pub fn empty(large_world_coordinates: bool) -> Self {
        Self { large_world_coordinates, layouts: HashMap::new() }
    }

    /// The engine's common math and identity structs.
    pub fn builtin(large_world_coordinates: bool) -> Self {
        use FieldKind::*;
        let mut s = Self::empty(large_world_coordinates);
        s.insert("Vector", layout(&[("X", Real), ("Y", Real), ("Z", Real)]));
        s.insert("Vector2D", layout(&[("X", Real), ("Y", Real)]));
        s.insert("Vector4", layout(&[("X", Real), ("Y", Real), ("Z", Real), ("W", Real)]));
        s.insert("Rotator", layout(&[("Pitch", Real), ("Yaw", Real), ("Roll", Real)]));
        s.insert("Quat", layout(&[("X", Real), ("Y", Real), ("Z", Real), ("W", Real)]));
        s.insert("Guid", layout(&[("Value", Guid)]));
        s.insert("Color", layout(&[("B", U8), ("G", U8), ("R", U8), ("A", U8)]));
        s.insert("LinearColor", layout(&[("R", F32), ("G", F32), ("B", F32), ("A", F32)]));
        s.insert("IntPoint", layout(&[("X", I32), ("Y", I32)]));
        s.insert("IntVector", layout(&[("X", I32), ("Y", I32), ("Z", I32)]));
        s.insert(
            "Box",
            layout(&[("Min", Struct("Vector".into())), ("Max", Struct("Vector".into())), ("IsValid", U8)]),
        );
        s.insert("DateTime", layout(&[("Ticks", I64)]));
        s.insert("Timespan", layout(&[("Ticks", I64)]));
        s.insert("SoftObjectPath", layout(&[("AssetPathName", Name), ("SubPathString", Str)]));
        s
    }

    pub fn large_world_coordinates(&self) -> bool {
        self.large_world_coordinates
    }

    /// Add or replace a layout.
    pub fn insert(&mut self, name: &str, layout: NativeLayout) {
        self.layouts.insert(name.to_owned(), layout);
    }

    pub fn get(&self, name: &str) -> Option<&NativeLayout> {
        self.layouts.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layouts.contains_key(name)
    }

    /// Read struct `name`, or `Ok(None)` when it has no native layout.
    pub fn read<S: Source>(&self, ar: &mut Archive<S>, name: &str, depth: usize) -> Result<Option<StructFallback>> {
        let Some(fields) = self.layouts.get(name) else {
            return Ok(None);
        };
        if depth > MAX_DEPTH {
            return Err(ar.error(ErrorKind::DepthExceeded(MAX_DEPTH)));
        }
        let values = ar.atomic(|ar| {
            fields
                .iter()
                .map(|f| Ok((f.name.clone(), self.read_field(ar, &f.kind, depth)?)))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Some(StructFallback::new(name, values)))
    }

    fn read_field<S: Source>(&self, ar: &mut Archive<S>, kind: &FieldKind, depth: usize) -> Result<Value> {
        Ok(match kind {
            FieldKind::U8 => Value::Byte(ar.read_u8()?),
            FieldKind::I32 => Value::Int(ar.read_i32()?),
            FieldKind::U32 => Value::UInt32(ar.read_u32()?),
            FieldKind::I64 => Value::Int64(ar.read_i64()?),
            FieldKind::F32 => Value::Float(ar.read_f32()?),
            FieldKind::F64 => Value::Double(ar.read_f64()?),
            FieldKind::Real if self.large_world_coordinates => Value::Double(ar.read_f64()?),
            FieldKind::Real => Value::Float(ar.read_f32()?),
            FieldKind::Guid => Value::Guid(ar.read_guid()?),
            FieldKind::Name => Value::Name(ar.read_name()?),
            FieldKind::Str => Value::Str(ar.read_string()?),
            FieldKind::Struct(inner) => match self.read(ar, inner, depth + 1)? {
                Some(s) => Value::Struct(s),
                None => {
                    return Err(ar.error(ErrorKind::Mapping {
                        struct_name: inner.clone(),
                        reason:      "nested native struct has no layout".into(),
                    }))
                }
            },
        })
    }
}
