//! Projection of [`StructFallback`] captures onto known Rust types.
//!
//! Two strategies, chosen per target type:
//!
//! * a registered builder that receives the whole fallback and has full
//!   control over the result;
//! * otherwise a name-matched copy through [`Reflect`]: each source field is
//!   offered to the target by name, unmatched source fields are dropped with
//!   a warning, and target fields nobody offered keep their defaults.
//!
//! The embedding application swaps strategies with
//! [`StructMapper::register`] / [`StructMapper::unregister`].

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::property::{StructFallback, Value};

/// Field-by-name assignment for the default mapping strategy.
pub trait Reflect: Default + 'static {
    /// Assign `value` to the field called `name`.  Returns `false` when the
    /// type has no such field or the value does not convert.
    fn set_field(&mut self, name: &str, value: &Value) -> bool;
}

/// Conversion of a single [`Value`] into a field type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! from_value_int {
    ($($t:ty),*) => {$(
        impl FromValue for $t {
            fn from_value(value: &Value) -> Option<Self> {
                value.as_i64().and_then(|v| <$t>::try_from(v).ok())
            }
        }
    )*};
}

from_value_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromValue for f32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_array()?.iter().map(T::from_value).collect()
    }
}

/// Absent optionals map to `None`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Optional { present: false, .. } => Some(None),
            Value::Optional { value, .. } => T::from_value(value).map(Some),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Implement [`Reflect`] (and [`FromValue`] for nesting) by listing
/// `field: "SerializedName"` pairs.
///
/// ```
/// use uarchive::reflect_struct;
///
/// #[derive(Default)]
/// struct Stats { level: i32, name: String }
/// reflect_struct!(Stats { level: "Level", name: "Name" });
/// ```
#[macro_export]
macro_rules! reflect_struct {
    ($ty:ty { $($field:ident : $name:literal),* $(,)? }) => {
        impl $crate::mapper::Reflect for $ty {
            fn set_field(&mut self, name: &str, value: &$crate::property::Value) -> bool {
                match name {
                    $($name => match $crate::mapper::FromValue::from_value(value) {
                        Some(v) => {
                            self.$field = v;
                            true
                        }
                        None => false,
                    },)*
                    _ => false,
                }
            }
        }

        impl $crate::mapper::FromValue for $ty {
            fn from_value(value: &$crate::property::Value) -> Option<Self> {
                value.as_struct().map($crate::mapper::copy_by_name::<$ty>)
            }
        }
    };
}

/// Default strategy: offer every source field to the target by name.
pub fn copy_by_name<T: Reflect>(fallback: &StructFallback) -> T {
    let mut target = T::default();
    for (name, value) in fallback.fields() {
        if !target.set_field(name, value) {
            tracing::warn!(
                struct_name = fallback.name(),
                field = %name,
                target = std::any::type_name::<T>(),
                "fallback field has no match in the target type"
            );
        }
    }
    target
}

type Builder<T> = Box<dyn Fn(&StructFallback) -> Result<T, ErrorKind> + Send + Sync>;

/// Per-type strategy registry.
#[derive(Default)]
pub struct StructMapper {
    builders: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl StructMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `build` for every projection onto `T`, replacing any earlier one.
    pub fn register<T, F>(&mut self, build: F)
    where
        T: Reflect,
        F: Fn(&StructFallback) -> Result<T, ErrorKind> + Send + Sync + 'static,
    {
        let boxed: Builder<T> = Box::new(build);
        self.builders.insert(TypeId::of::<T>(), Box::new(boxed));
    }

    /// Return `T` to the name-matched default.
    pub fn unregister<T: Reflect>(&mut self) -> bool {
        self.builders.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn has_builder<T: Reflect>(&self) -> bool {
        self.builders.contains_key(&TypeId::of::<T>())
    }

    pub fn map<T: Reflect>(&self, fallback: &StructFallback) -> Result<T, ErrorKind> {
        match self.builders.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<Builder<T>>()) {
            Some(build) => build(fallback),
            None => Ok(copy_by_name(fallback)),
        }
    }

    /// Map a struct value; any other kind is a mapping error.
    pub fn map_value<T: Reflect>(&self, value: &Value) -> Result<T, ErrorKind> {
        match value {
            Value::Struct(s) => self.map(s),
            other => Err(ErrorKind::Mapping {
                struct_name: std::any::type_name::<T>().to_owned(),
                reason:      format!("expected a struct value, found {other:?}"),
            }),
        }
    }
}

impl std::fmt::Debug for StructMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructMapper").field("builders", &self.builders.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x:     f32,
        y:     f32,
        label: String,
    }
    reflect_struct!(Point { x: "X", y: "Y", label: "Label" });

    #[derive(Debug, Default, PartialEq)]
    struct Spawn {
        at:    Point,
        count: u8,
        tags:  Vec<String>,
    }
    reflect_struct!(Spawn { at: "At", count: "Count", tags: "Tags" });

    fn point(x: f32, y: f32) -> StructFallback {
        StructFallback::new("Point", vec![("X".into(), Value::Float(x)), ("Y".into(), Value::Double(y as f64))])
    }

    #[test]
    fn name_matched_copy_keeps_defaults() {
        let fb = StructFallback::new(
            "Point",
            vec![("X".into(), Value::Float(1.0)), ("Extra".into(), Value::Int(9))],
        );
        let p: Point = StructMapper::new().map(&fb).unwrap();
        assert_eq!(p, Point { x: 1.0, y: 0.0, label: String::new() });
    }

    #[test]
    fn nested_and_containers() {
        let fb = StructFallback::new(
            "Spawn",
            vec![
                ("At".into(), Value::Struct(point(2.0, 3.0))),
                ("Count".into(), Value::Int(4)),
                ("Tags".into(), Value::Array(vec![Value::Name("a".into()), Value::Str("b".into())])),
            ],
        );
        let s: Spawn = StructMapper::new().map(&fb).unwrap();
        assert_eq!(s.at, Point { x: 2.0, y: 3.0, label: String::new() });
        assert_eq!(s.count, 4);
        assert_eq!(s.tags, ["a", "b"]);
    }

    #[test]
    fn out_of_range_int_is_unmatched() {
        let fb = StructFallback::new("Spawn", vec![("Count".into(), Value::Int(300))]);
        let s: Spawn = StructMapper::new().map(&fb).unwrap();
        assert_eq!(s.count, 0);
    }

    #[test]
    fn registered_builder_takes_over() {
        let mut mapper = StructMapper::new();
        mapper.register(|fb: &StructFallback| {
            Ok(Point {
                x:     fb.get("Y").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                y:     0.0,
                label: format!("from {}", fb.name()),
            })
        });
        assert!(mapper.has_builder::<Point>());
        let p: Point = mapper.map(&point(1.0, 5.0)).unwrap();
        assert_eq!(p, Point { x: 5.0, y: 0.0, label: "from Point".into() });

        assert!(mapper.unregister::<Point>());
        let p: Point = mapper.map(&point(1.0, 5.0)).unwrap();
        assert_eq!(p.x, 1.0);
    }

    #[test]
    fn builder_errors_propagate() {
        let mut mapper = StructMapper::new();
        mapper.register::<Point, _>(|fb| {
            Err(ErrorKind::Mapping { struct_name: fb.name().into(), reason: "nope".into() })
        });
        assert!(mapper.map::<Point>(&point(0.0, 0.0)).is_err());
        assert!(mapper.map_value::<Spawn>(&Value::Int(1)).is_err());
    }
}
