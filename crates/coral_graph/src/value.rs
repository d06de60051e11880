// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete value types carried by attributes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete type an attribute can be specialized to.
///
/// Array and scalar variants of the same base type are distinct tags and
/// never unify with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// Single integer
    Int,
    /// Integer array
    IntArray,
    /// Single float
    Float,
    /// Float array
    FloatArray,
    /// 3D vector
    Vec3,
    /// 3D vector array
    Vec3Array,
    /// Quaternion (x, y, z, w)
    Quat,
    /// Quaternion array
    QuatArray,
    /// Row-major 4x4 matrix
    Matrix44,
    /// Matrix array
    Matrix44Array,
    /// Single boolean
    Bool,
    /// Boolean array
    BoolArray,
    /// Text
    String,
    /// Polygon geometry
    Geo,
}

impl TypeTag {
    /// Every numeric tag, in declaration order
    pub const NUMERIC: [TypeTag; 10] = [
        TypeTag::Int,
        TypeTag::IntArray,
        TypeTag::Float,
        TypeTag::FloatArray,
        TypeTag::Vec3,
        TypeTag::Vec3Array,
        TypeTag::Quat,
        TypeTag::QuatArray,
        TypeTag::Matrix44,
        TypeTag::Matrix44Array,
    ];

    /// Name used in presets, files and the UI
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::IntArray => "IntArray",
            Self::Float => "Float",
            Self::FloatArray => "FloatArray",
            Self::Vec3 => "Vec3",
            Self::Vec3Array => "Vec3Array",
            Self::Quat => "Quat",
            Self::QuatArray => "QuatArray",
            Self::Matrix44 => "Matrix44",
            Self::Matrix44Array => "Matrix44Array",
            Self::Bool => "Bool",
            Self::BoolArray => "BoolArray",
            Self::String => "String",
            Self::Geo => "Geo",
        }
    }

    /// Parse a tag from its name
    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::Int,
            Self::IntArray,
            Self::Float,
            Self::FloatArray,
            Self::Vec3,
            Self::Vec3Array,
            Self::Quat,
            Self::QuatArray,
            Self::Matrix44,
            Self::Matrix44Array,
            Self::Bool,
            Self::BoolArray,
            Self::String,
            Self::Geo,
        ]
        .into_iter()
        .find(|tag| tag.name() == name)
    }

    /// Whether this is an array variant
    pub fn is_array(self) -> bool {
        matches!(
            self,
            Self::IntArray
                | Self::FloatArray
                | Self::Vec3Array
                | Self::QuatArray
                | Self::Matrix44Array
                | Self::BoolArray
        )
    }

    /// The scalar counterpart of an array tag (identity for scalars)
    pub fn base(self) -> Self {
        match self {
            Self::IntArray => Self::Int,
            Self::FloatArray => Self::Float,
            Self::Vec3Array => Self::Vec3,
            Self::QuatArray => Self::Quat,
            Self::Matrix44Array => Self::Matrix44,
            Self::BoolArray => Self::Bool,
            other => other,
        }
    }

    /// Hook color for this type's base (for UI)
    pub fn color(self) -> [u8; 3] {
        match self.base() {
            Self::Int => [255, 107, 109],
            Self::Float => [5, 247, 176],
            Self::Vec3 => [0, 120, 255],
            Self::Quat => [0, 255, 0],
            Self::Matrix44 => [179, 102, 255],
            Self::Bool => [200, 80, 80],
            Self::String => [200, 180, 150],
            Self::Geo => [200, 200, 250],
            _ => [255, 255, 95],
        }
    }

    /// Zero value of this type
    pub fn default_value(self) -> Value {
        match self {
            Self::Int => Value::Int(0),
            Self::IntArray => Value::IntArray(Vec::new()),
            Self::Float => Value::Float(0.0),
            Self::FloatArray => Value::FloatArray(Vec::new()),
            Self::Vec3 => Value::Vec3([0.0; 3]),
            Self::Vec3Array => Value::Vec3Array(Vec::new()),
            Self::Quat => Value::Quat([0.0, 0.0, 0.0, 1.0]),
            Self::QuatArray => Value::QuatArray(Vec::new()),
            Self::Matrix44 => Value::Matrix44(IDENTITY),
            Self::Matrix44Array => Value::Matrix44Array(Vec::new()),
            Self::Bool => Value::Bool(false),
            Self::BoolArray => Value::BoolArray(Vec::new()),
            Self::String => Value::String(String::new()),
            Self::Geo => Value::Geo(Geo::default()),
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row-major identity matrix
pub const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Polygon geometry: shared points and index faces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
    /// Point positions
    pub points: Vec<[f32; 3]>,
    /// Faces as indices into `points`
    pub faces: Vec<Vec<u32>>,
}

impl Geo {
    /// Number of points
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

/// Value stored in an attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Integer
    Int(i32),
    /// Integer array
    IntArray(Vec<i32>),
    /// Float
    Float(f32),
    /// Float array
    FloatArray(Vec<f32>),
    /// 3D vector
    Vec3([f32; 3]),
    /// 3D vector array
    Vec3Array(Vec<[f32; 3]>),
    /// Quaternion
    Quat([f32; 4]),
    /// Quaternion array
    QuatArray(Vec<[f32; 4]>),
    /// Matrix
    Matrix44([f32; 16]),
    /// Matrix array
    Matrix44Array(Vec<[f32; 16]>),
    /// Boolean
    Bool(bool),
    /// Boolean array
    BoolArray(Vec<bool>),
    /// String
    String(String),
    /// Geometry
    Geo(Geo),
}

/// Why an indexed element write was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementError {
    /// Index past the end of the value
    OutOfRange,
    /// Element type does not match the value's base type
    WrongType,
}

impl Value {
    /// Get the type tag for this value
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Int(_) => TypeTag::Int,
            Self::IntArray(_) => TypeTag::IntArray,
            Self::Float(_) => TypeTag::Float,
            Self::FloatArray(_) => TypeTag::FloatArray,
            Self::Vec3(_) => TypeTag::Vec3,
            Self::Vec3Array(_) => TypeTag::Vec3Array,
            Self::Quat(_) => TypeTag::Quat,
            Self::QuatArray(_) => TypeTag::QuatArray,
            Self::Matrix44(_) => TypeTag::Matrix44,
            Self::Matrix44Array(_) => TypeTag::Matrix44Array,
            Self::Bool(_) => TypeTag::Bool,
            Self::BoolArray(_) => TypeTag::BoolArray,
            Self::String(_) => TypeTag::String,
            Self::Geo(_) => TypeTag::Geo,
        }
    }

    /// Number of elements (1 for scalars)
    pub fn len(&self) -> usize {
        match self {
            Self::IntArray(v) => v.len(),
            Self::FloatArray(v) => v.len(),
            Self::Vec3Array(v) => v.len(),
            Self::QuatArray(v) => v.len(),
            Self::Matrix44Array(v) => v.len(),
            Self::BoolArray(v) => v.len(),
            _ => 1,
        }
    }

    /// True for empty arrays
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integer view of element 0, converting floats
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::IntArray(v) => v.first().copied(),
            Self::Float(v) => Some(*v as i32),
            Self::FloatArray(v) => v.first().map(|f| *f as i32),
            _ => None,
        }
    }

    /// Float view of element 0, converting ints
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::FloatArray(v) => v.first().copied(),
            Self::Int(v) => Some(*v as f32),
            Self::IntArray(v) => v.first().map(|i| *i as f32),
            _ => None,
        }
    }

    /// Boolean view of element 0
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::BoolArray(v) => v.first().copied(),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Replace element `index` with the scalar `element`.
    ///
    /// Scalars only accept index 0; arrays never grow.
    pub fn set_at(&mut self, index: usize, element: Value) -> Result<(), ElementError> {
        fn put<T>(slot: Option<&mut T>, value: T) -> Result<(), ElementError> {
            let slot = slot.ok_or(ElementError::OutOfRange)?;
            *slot = value;
            Ok(())
        }

        if index >= self.len() {
            return Err(ElementError::OutOfRange);
        }

        match (self, element) {
            (Self::Int(v), Value::Int(e)) => put(Some(v), e),
            (Self::IntArray(v), Value::Int(e)) => put(v.get_mut(index), e),
            (Self::Float(v), Value::Float(e)) => put(Some(v), e),
            (Self::FloatArray(v), Value::Float(e)) => put(v.get_mut(index), e),
            (Self::Vec3(v), Value::Vec3(e)) => put(Some(v), e),
            (Self::Vec3Array(v), Value::Vec3(e)) => put(v.get_mut(index), e),
            (Self::Quat(v), Value::Quat(e)) => put(Some(v), e),
            (Self::QuatArray(v), Value::Quat(e)) => put(v.get_mut(index), e),
            (Self::Matrix44(v), Value::Matrix44(e)) => put(Some(v), e),
            (Self::Matrix44Array(v), Value::Matrix44(e)) => put(v.get_mut(index), e),
            (Self::Bool(v), Value::Bool(e)) => put(Some(v), e),
            (Self::BoolArray(v), Value::Bool(e)) => put(v.get_mut(index), e),
            _ => Err(ElementError::WrongType),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Float(0.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Vec3(v) => write!(f, "{v:?}"),
            Self::Quat(v) => write!(f, "{v:?}"),
            Self::Matrix44(v) => write!(f, "{v:?}"),
            Self::Geo(g) => write!(f, "Geo({} points, {} faces)", g.point_count(), g.face_count()),
            array => write!(f, "{}[{}]", array.type_tag(), array.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names_round_trip() {
        for tag in TypeTag::NUMERIC {
            assert_eq!(TypeTag::from_name(tag.name()), Some(tag));
        }
        assert_eq!(TypeTag::from_name("Geo"), Some(TypeTag::Geo));
        assert_eq!(TypeTag::from_name("Vector3"), None);
    }

    #[test]
    fn test_array_and_scalar_are_distinct() {
        assert_ne!(TypeTag::Float, TypeTag::FloatArray);
        assert_eq!(TypeTag::FloatArray.base(), TypeTag::Float);
        assert!(TypeTag::FloatArray.is_array());
        assert!(!TypeTag::Float.is_array());
        assert_eq!(TypeTag::FloatArray.color(), TypeTag::Float.color());
    }

    #[test]
    fn test_set_at() {
        let mut value = Value::FloatArray(vec![0.0, 1.0, 2.0]);
        value.set_at(1, Value::Float(5.0)).unwrap();
        assert_eq!(value, Value::FloatArray(vec![0.0, 5.0, 2.0]));

        assert_eq!(value.set_at(3, Value::Float(1.0)), Err(ElementError::OutOfRange));
        assert_eq!(value.set_at(0, Value::Int(1)), Err(ElementError::WrongType));

        let mut scalar = Value::Int(3);
        scalar.set_at(0, Value::Int(4)).unwrap();
        assert_eq!(scalar.as_int(), Some(4));
        assert_eq!(scalar.set_at(1, Value::Int(4)), Err(ElementError::OutOfRange));
    }
}
