// SPDX-License-Identifier: MIT OR Apache-2.0
//! Container nodes.
//!
//! A `CollapsedNode` holds child nodes and exposes them through pass-through
//! attributes added at runtime. It never computes anything itself.
//!
//! A `ForLoop` runs its children once per entry of `indexRange`, writing
//! the entry into `currentIndex` before each run. Reading one of its output
//! attributes runs the whole loop. A `NumericIterator` child gathers the
//! value of its `element` input at every iteration into `array`.

use crate::attribute::{AttributeClass, AttributeTemplate};
use crate::error::EvaluationError;
use crate::evaluation::{LoopStep, NodeLogic, NoopLogic, UpdateContext};
use crate::node::{NodeCategory, NodeClass, NodeClassRegistry};
use crate::specialization::LinkRule;
use crate::value::{TypeTag, Value, IDENTITY};
use std::sync::Arc;

/// Input of a loop container listing the indices to iterate
pub const INDEX_RANGE: &str = "indexRange";

/// Input of a loop container holding the index being iterated
pub const CURRENT_INDEX: &str = "currentIndex";

/// Register the container node classes
pub fn register(registry: &mut NodeClassRegistry) {
    registry.register(
        NodeClass::new("CollapsedNode", NodeCategory::Container, Arc::new(NoopLogic))
            .with_description("Groups nodes behind pass-through attributes")
            .container(),
    );

    registry.register(
        NodeClass::new("ForLoop", NodeCategory::Container, Arc::new(NoopLogic))
            .with_description("Runs the contained nodes once per index")
            .with_attribute(
                AttributeTemplate::input(INDEX_RANGE, AttributeClass::Numeric)
                    .with_allowed([TypeTag::IntArray])
                    .with_default(Value::IntArray(Vec::new())),
            )
            .with_attribute(
                AttributeTemplate::input(CURRENT_INDEX, AttributeClass::Numeric)
                    .with_allowed([TypeTag::Int])
                    .with_default(Value::Int(0)),
            )
            .loop_container(),
    );

    registry.register(
        NodeClass::new("NumericIterator", NodeCategory::Math, Arc::new(NumericIterator))
            .with_description("Collects a value from every iteration of the enclosing loop")
            .with_attribute(
                AttributeTemplate::input("element", AttributeClass::Numeric)
                    .with_allowed(GATHERED.map(|(element, _)| element)),
            )
            .with_attribute(
                AttributeTemplate::output("array", AttributeClass::Numeric)
                    .with_allowed(GATHERED.map(|(_, array)| array)),
            )
            .with_affect("element", "array")
            .with_link("element", "array", LinkRule::Map(GATHERED.to_vec())),
    );
}

/// Element types a `NumericIterator` gathers, with the array they fill
const GATHERED: [(TypeTag, TypeTag); 4] = [
    (TypeTag::Int, TypeTag::IntArray),
    (TypeTag::Float, TypeTag::FloatArray),
    (TypeTag::Vec3, TypeTag::Vec3Array),
    (TypeTag::Matrix44, TypeTag::Matrix44Array),
];

struct NumericIterator;

impl NumericIterator {
    fn blank(element: &Value, len: usize) -> Result<Value, EvaluationError> {
        Ok(match element {
            Value::Int(_) => Value::IntArray(vec![0; len]),
            Value::Float(_) => Value::FloatArray(vec![0.0; len]),
            Value::Vec3(_) => Value::Vec3Array(vec![[0.0; 3]; len]),
            Value::Matrix44(_) => Value::Matrix44Array(vec![IDENTITY; len]),
            other => {
                return Err(EvaluationError::TypeMismatch {
                    attribute: "element".to_string(),
                    found: other.type_tag(),
                })
            }
        })
    }
}

impl NodeLogic for NumericIterator {
    // Outside a loop the array keeps whatever the last loop gathered
    fn update(&self, _ctx: &mut UpdateContext) -> Result<(), EvaluationError> {
        Ok(())
    }

    fn loop_step(&self, step: LoopStep, ctx: &mut UpdateContext) -> Result<(), EvaluationError> {
        let element = ctx.input("element")?.clone();
        match step {
            LoopStep::Start(len) => {
                let array = Self::blank(&element, len)?;
                ctx.set_output("array", array);
            }
            LoopStep::Step(position) => {
                let mut array = ctx
                    .output("array")
                    .cloned()
                    .ok_or_else(|| EvaluationError::MissingInput("array".to_string()))?;
                let found = element.type_tag();
                array
                    .set_at(position, element)
                    .map_err(|_| EvaluationError::TypeMismatch {
                        attribute: "element".to_string(),
                        found,
                    })?;
                ctx.set_output("array", array);
            }
            LoopStep::End => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::attribute::{AttributeClass, AttributeId, AttributeTemplate};
    use crate::error::GraphError;
    use crate::network::Network;
    use crate::node::NodeId;
    use crate::value::Value;

    /// `squares` loop: every index times itself, gathered into `result`
    fn squares() -> (Network, NodeId, AttributeId) {
        let mut network = Network::with_builtins("test");
        let looping = network.add_node("ForLoop", "squares").unwrap();
        let index = network.find_child_attribute(looping, "currentIndex").unwrap();
        let result = network
            .add_attribute_with(
                looping,
                AttributeTemplate::output("result", AttributeClass::PassThrough),
            )
            .unwrap();

        let mul = network.add_node_in(looping, "Mul", "mul").unwrap();
        let gather = network
            .add_node_in(looping, "NumericIterator", "gather")
            .unwrap();
        let in0 = network.find_child_attribute(mul, "in0").unwrap();
        let in1 = network.find_child_attribute(mul, "in1").unwrap();
        let product = network.find_child_attribute(mul, "out").unwrap();
        let element = network.find_child_attribute(gather, "element").unwrap();
        let array = network.find_child_attribute(gather, "array").unwrap();
        network.connect(index, in0).unwrap();
        network.connect(index, in1).unwrap();
        network.connect(product, element).unwrap();
        network.connect(array, result).unwrap();
        (network, looping, result)
    }

    #[test]
    fn test_for_loop_gathers_every_iteration() {
        let (mut network, looping, result) = squares();
        let range = network.find_child_attribute(looping, "indexRange").unwrap();
        network
            .set_value(range, Value::IntArray(vec![0, 1, 2, 3]))
            .unwrap();

        assert!(!network.is_clean(result).unwrap());
        assert_eq!(
            network.value(result).unwrap(),
            Value::IntArray(vec![0, 1, 4, 9])
        );
        assert!(network.is_clean(result).unwrap());

        let index = network.find_child_attribute(looping, "currentIndex").unwrap();
        assert_eq!(network.out_value(index).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_for_loop_reruns_when_range_changes() {
        let (mut network, looping, result) = squares();
        let range = network.find_child_attribute(looping, "indexRange").unwrap();
        network.set_value(range, Value::IntArray(vec![2])).unwrap();
        assert_eq!(network.value(result).unwrap(), Value::IntArray(vec![4]));

        network.set_value(range, Value::IntArray(vec![5, 6])).unwrap();
        assert!(!network.is_clean(result).unwrap());
        assert_eq!(
            network.value(result).unwrap(),
            Value::IntArray(vec![25, 36])
        );

        network.set_value(range, Value::IntArray(Vec::new())).unwrap();
        assert_eq!(network.value(result).unwrap(), Value::IntArray(Vec::new()));
    }

    #[test]
    fn test_for_loop_without_iterator_keeps_last_iteration() {
        let mut network = Network::with_builtins("test");
        let looping = network.add_node("ForLoop", "loop").unwrap();
        let range = network.find_child_attribute(looping, "indexRange").unwrap();
        let index = network.find_child_attribute(looping, "currentIndex").unwrap();
        let last = network
            .add_attribute_with(
                looping,
                AttributeTemplate::output("last", AttributeClass::PassThrough),
            )
            .unwrap();
        let add = network.add_node_in(looping, "Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let in1 = network.find_child_attribute(add, "in1").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();
        network.connect(index, in0).unwrap();
        network.set_value(in1, Value::Int(100)).unwrap();
        network.connect(sum, last).unwrap();

        network.set_value(range, Value::IntArray(vec![1, 2, 7])).unwrap();
        assert_eq!(network.value(last).unwrap(), Value::Int(107));
    }

    #[test]
    fn test_loop_outputs_only_on_loops() {
        let mut network = Network::with_builtins("test");
        let looping = network.add_node("ForLoop", "loop").unwrap();
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let range = network.find_child_attribute(looping, "indexRange").unwrap();

        let out = network
            .add_attribute_with(looping, AttributeTemplate::output("out", AttributeClass::PassThrough))
            .unwrap();
        assert_eq!(network.affected_by(out), &[range]);
        assert!(network.node(looping).unwrap().iterates());

        let through = network
            .add_attribute_with(group, AttributeTemplate::output("out", AttributeClass::PassThrough))
            .unwrap();
        assert!(network.affected_by(through).is_empty());
        assert!(!network.node(group).unwrap().iterates());

        network.delete_attribute(out).unwrap();
        assert!(network.attribute(range).unwrap().affects().is_empty());
    }

    #[test]
    fn test_failing_child_keeps_loop_dirty() {
        let mut network = Network::with_builtins("test");
        let looping = network.add_node("ForLoop", "loop").unwrap();
        let range = network.find_child_attribute(looping, "indexRange").unwrap();
        let last = network
            .add_attribute_with(
                looping,
                AttributeTemplate::output("last", AttributeClass::PassThrough),
            )
            .unwrap();
        let add = network.add_node_in(looping, "Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let in1 = network.find_child_attribute(add, "in1").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();
        network.set_value(in0, Value::FloatArray(vec![1.0, 2.0])).unwrap();
        network
            .set_value(in1, Value::FloatArray(vec![1.0, 2.0, 3.0]))
            .unwrap();
        network.connect(sum, last).unwrap();
        network.set_value(range, Value::IntArray(vec![0, 1])).unwrap();

        assert!(matches!(
            network.value(last),
            Err(GraphError::RecomputeFailure { .. })
        ));
        assert!(!network.is_clean(last).unwrap());

        assert!(matches!(
            network.set_value(range, Value::Int(1)),
            Err(GraphError::ValueType { .. })
        ));
    }
}
