// SPDX-License-Identifier: MIT OR Apache-2.0
//! Arithmetic and vector nodes.
//!
//! Binary operators work on any numeric type both inputs agree on. Arrays
//! are combined element-wise; a single-element array broadcasts against a
//! longer one.

use crate::attribute::{AttributeClass, AttributeTemplate};
use crate::error::EvaluationError;
use crate::evaluation::{NodeLogic, UpdateContext};
use crate::node::{NodeCategory, NodeClass, NodeClassRegistry, Preset};
use crate::specialization::LinkRule;
use crate::value::{TypeTag, Value};
use std::sync::Arc;

/// Types the binary operators accept
const OPERAND_TYPES: [TypeTag; 6] = [
    TypeTag::Int,
    TypeTag::Float,
    TypeTag::Vec3,
    TypeTag::IntArray,
    TypeTag::FloatArray,
    TypeTag::Vec3Array,
];

/// Register the math node classes
pub fn register(registry: &mut NodeClassRegistry) {
    // ========================================================================
    // Binary operators
    // ========================================================================

    for (id, op, description) in [
        ("Add", BinaryOp::Add, "Sum of two numbers"),
        ("Sub", BinaryOp::Sub, "Difference of two numbers"),
        ("Mul", BinaryOp::Mul, "Product of two numbers"),
    ] {
        registry.register(binary_class(id, op, description));
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    registry.register(
        NodeClass::new("Vec3", NodeCategory::Math, Arc::new(Vec3Compose))
            .with_description("Build a vector from three floats")
            .with_attribute(float_input("x"))
            .with_attribute(float_input("y"))
            .with_attribute(float_input("z"))
            .with_attribute(
                AttributeTemplate::output("vector", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Vec3, TypeTag::Vec3Array]),
            )
            .with_affect("x", "vector")
            .with_affect("y", "vector")
            .with_affect("z", "vector")
            .with_link("x", "vector", float_to_vec3())
            .with_link("x", "y", LinkRule::Same)
            .with_link("y", "z", LinkRule::Same)
            .with_preset(Preset::new(
                "single",
                [
                    ("x", TypeTag::Float),
                    ("y", TypeTag::Float),
                    ("z", TypeTag::Float),
                    ("vector", TypeTag::Vec3),
                ],
            ))
            .with_preset(Preset::new(
                "array",
                [
                    ("x", TypeTag::FloatArray),
                    ("y", TypeTag::FloatArray),
                    ("z", TypeTag::FloatArray),
                    ("vector", TypeTag::Vec3Array),
                ],
            ))
            .with_default_preset("single"),
    );

    registry.register(
        NodeClass::new("Vec3Length", NodeCategory::Math, Arc::new(Vec3Length))
            .with_description("Length of a vector")
            .with_attribute(
                AttributeTemplate::input("vector", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Vec3, TypeTag::Vec3Array]),
            )
            .with_attribute(
                AttributeTemplate::output("length", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Float, TypeTag::FloatArray]),
            )
            .with_affect("vector", "length")
            .with_link(
                "vector",
                "length",
                LinkRule::Map(vec![
                    (TypeTag::Vec3, TypeTag::Float),
                    (TypeTag::Vec3Array, TypeTag::FloatArray),
                ]),
            ),
    );
}

fn binary_class(id: &str, op: BinaryOp, description: &str) -> NodeClass {
    let operand = |name: &str| {
        AttributeTemplate::input(name, AttributeClass::Numeric).with_allowed(OPERAND_TYPES)
    };
    let preset = |name: &str, tag: TypeTag| {
        Preset::new(name, [("in0", tag), ("in1", tag), ("out", tag)])
    };

    NodeClass::new(id, NodeCategory::Math, Arc::new(Binary(op)))
        .with_description(description)
        .with_attribute(operand("in0"))
        .with_attribute(operand("in1"))
        .with_attribute(
            AttributeTemplate::output("out", AttributeClass::Numeric).with_allowed(OPERAND_TYPES),
        )
        .with_affect("in0", "out")
        .with_affect("in1", "out")
        .with_link("in0", "out", LinkRule::Same)
        .with_link("in1", "out", LinkRule::Same)
        .with_preset(preset("Int", TypeTag::Int))
        .with_preset(preset("Float", TypeTag::Float))
        .with_preset(preset("Vec3", TypeTag::Vec3))
}

fn float_input(name: &str) -> AttributeTemplate {
    AttributeTemplate::input(name, AttributeClass::Numeric)
        .with_allowed([TypeTag::Float, TypeTag::FloatArray])
}

fn float_to_vec3() -> LinkRule {
    LinkRule::Map(vec![
        (TypeTag::Float, TypeTag::Vec3),
        (TypeTag::FloatArray, TypeTag::Vec3Array),
    ])
}

/// Element-wise operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
}

impl BinaryOp {
    fn int(self, a: i32, b: i32) -> i32 {
        match self {
            Self::Add => a.wrapping_add(b),
            Self::Sub => a.wrapping_sub(b),
            Self::Mul => a.wrapping_mul(b),
        }
    }

    fn float(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
        }
    }

    fn vec3(self, a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [
            self.float(a[0], b[0]),
            self.float(a[1], b[1]),
            self.float(a[2], b[2]),
        ]
    }

    /// Combine two values of the same type
    pub fn apply(self, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
        Ok(match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(self.int(*x, *y)),
            (Value::Float(x), Value::Float(y)) => Value::Float(self.float(*x, *y)),
            (Value::Vec3(x), Value::Vec3(y)) => Value::Vec3(self.vec3(*x, *y)),
            (Value::IntArray(x), Value::IntArray(y)) => {
                Value::IntArray(zip_with(x, y, |p, q| self.int(p, q))?)
            }
            (Value::FloatArray(x), Value::FloatArray(y)) => {
                Value::FloatArray(zip_with(x, y, |p, q| self.float(p, q))?)
            }
            (Value::Vec3Array(x), Value::Vec3Array(y)) => {
                Value::Vec3Array(zip_with(x, y, |p, q| self.vec3(p, q))?)
            }
            (_, other) => {
                return Err(EvaluationError::TypeMismatch {
                    attribute: "in1".to_string(),
                    found: other.type_tag(),
                })
            }
        })
    }
}

/// Pairwise combination; a one-element side broadcasts
fn zip_with<T: Copy>(a: &[T], b: &[T], f: impl Fn(T, T) -> T) -> Result<Vec<T>, EvaluationError> {
    match (a.len(), b.len()) {
        (x, y) if x == y => Ok(a.iter().zip(b).map(|(p, q)| f(*p, *q)).collect()),
        (_, 1) => Ok(a.iter().map(|p| f(*p, b[0])).collect()),
        (1, _) => Ok(b.iter().map(|q| f(a[0], *q)).collect()),
        (x, y) => Err(EvaluationError::SizeMismatch(x, y)),
    }
}

struct Binary(BinaryOp);

impl NodeLogic for Binary {
    fn update(&self, ctx: &mut UpdateContext) -> Result<(), EvaluationError> {
        let result = self.0.apply(ctx.input("in0")?, ctx.input("in1")?)?;
        ctx.set_output("out", result);
        Ok(())
    }
}

struct Vec3Compose;

impl NodeLogic for Vec3Compose {
    fn update(&self, ctx: &mut UpdateContext) -> Result<(), EvaluationError> {
        let axis = |name: &str| -> Result<Vec<f32>, EvaluationError> {
            match ctx.input(name)? {
                Value::Float(v) => Ok(vec![*v]),
                Value::FloatArray(v) => Ok(v.clone()),
                other => Err(EvaluationError::TypeMismatch {
                    attribute: name.to_string(),
                    found: other.type_tag(),
                }),
            }
        };
        let (x, y, z) = (axis("x")?, axis("y")?, axis("z")?);

        let as_array = ctx
            .specialization("vector")
            .and_then(|s| s.resolved())
            .is_some_and(|t| t == TypeTag::Vec3Array);
        let len = x.len().max(y.len()).max(z.len());
        for axis in [&x, &y, &z] {
            // Empty and single-element axes broadcast
            if axis.len() > 1 && axis.len() != len {
                return Err(EvaluationError::SizeMismatch(axis.len(), len));
            }
        }
        let at = |axis: &[f32], i: usize| axis.get(i).or(axis.first()).copied().unwrap_or(0.0);
        let vectors: Vec<[f32; 3]> = (0..len).map(|i| [at(&x, i), at(&y, i), at(&z, i)]).collect();

        let value = if as_array {
            Value::Vec3Array(vectors)
        } else {
            Value::Vec3(vectors.first().copied().unwrap_or_default())
        };
        ctx.set_output("vector", value);
        Ok(())
    }
}

struct Vec3Length;

impl NodeLogic for Vec3Length {
    fn update(&self, ctx: &mut UpdateContext) -> Result<(), EvaluationError> {
        let length = |v: &[f32; 3]| (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        let value = match ctx.input("vector")? {
            Value::Vec3(v) => Value::Float(length(v)),
            Value::Vec3Array(v) => Value::FloatArray(v.iter().map(length).collect()),
            other => {
                return Err(EvaluationError::TypeMismatch {
                    attribute: "vector".to_string(),
                    found: other.type_tag(),
                })
            }
        };
        ctx.set_output("length", value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::specialization::Specialization;

    #[test]
    fn test_binary_ops() {
        assert_eq!(
            BinaryOp::Sub.apply(&Value::Int(5), &Value::Int(7)).unwrap(),
            Value::Int(-2)
        );
        assert_eq!(
            BinaryOp::Mul
                .apply(&Value::Vec3([1.0, 2.0, 3.0]), &Value::Vec3([2.0, 2.0, 2.0]))
                .unwrap(),
            Value::Vec3([2.0, 4.0, 6.0])
        );
        assert_eq!(
            BinaryOp::Add
                .apply(&Value::FloatArray(vec![1.0, 2.0]), &Value::FloatArray(vec![10.0]))
                .unwrap(),
            Value::FloatArray(vec![11.0, 12.0])
        );
        assert!(matches!(
            BinaryOp::Add.apply(&Value::Int(1), &Value::Float(1.0)),
            Err(EvaluationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_vec3_defaults_to_single_preset() {
        let mut network = Network::with_builtins("test");
        let node = network.add_node("Vec3", "v").unwrap();
        let x = network.find_child_attribute(node, "x").unwrap();
        let vector = network.find_child_attribute(node, "vector").unwrap();

        assert_eq!(
            network.node(node).unwrap().enabled_specialization_preset(),
            Some("single")
        );
        network.set_value(x, Value::Float(3.0)).unwrap();
        assert_eq!(network.value(vector).unwrap(), Value::Vec3([3.0, 0.0, 0.0]));
    }

    #[test]
    fn test_vec3_length_through_network() {
        let mut network = Network::with_builtins("test");
        let compose = network.add_node("Vec3", "v").unwrap();
        let x = network.find_child_attribute(compose, "x").unwrap();
        let y = network.find_child_attribute(compose, "y").unwrap();
        let vector = network.find_child_attribute(compose, "vector").unwrap();
        let measure = network.add_node("Vec3Length", "len").unwrap();
        let input = network.find_child_attribute(measure, "vector").unwrap();
        let length = network.find_child_attribute(measure, "length").unwrap();

        network.connect(vector, input).unwrap();
        assert_eq!(
            network.specialization(length),
            Some(&Specialization::single(TypeTag::Float))
        );

        network.set_value(x, Value::Float(3.0)).unwrap();
        network.set_value(y, Value::Float(4.0)).unwrap();
        assert_eq!(network.value(length).unwrap(), Value::Float(5.0));
    }

    #[test]
    fn test_vec3_array_preset() {
        let mut network = Network::with_builtins("test");
        let compose = network.add_node("Vec3", "v").unwrap();
        network.enable_specialization_preset(compose, Some("array")).unwrap();
        let x = network.find_child_attribute(compose, "x").unwrap();
        let z = network.find_child_attribute(compose, "z").unwrap();
        let vector = network.find_child_attribute(compose, "vector").unwrap();

        network.set_value(x, Value::FloatArray(vec![1.0, 2.0])).unwrap();
        network.set_value(z, Value::FloatArray(vec![5.0])).unwrap();
        assert_eq!(
            network.value(vector).unwrap(),
            Value::Vec3Array(vec![[1.0, 0.0, 5.0], [2.0, 0.0, 5.0]])
        );
    }
}
