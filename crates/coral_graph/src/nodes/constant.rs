// SPDX-License-Identifier: MIT OR Apache-2.0
//! Constant nodes: a single settable output.

use crate::attribute::{AttributeClass, AttributeTemplate};
use crate::evaluation::NoopLogic;
use crate::node::{NodeCategory, NodeClass, NodeClassRegistry};
use crate::value::{TypeTag, Value};
use std::sync::Arc;

/// Register the constant node classes
pub fn register(registry: &mut NodeClassRegistry) {
    registry.register(
        NodeClass::new("Int", NodeCategory::Constant, Arc::new(NoopLogic))
            .with_description("Constant integer")
            .with_attribute(
                AttributeTemplate::output("out", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Int])
                    .with_default(Value::Int(0)),
            ),
    );

    registry.register(
        NodeClass::new("Float", NodeCategory::Constant, Arc::new(NoopLogic))
            .with_description("Constant float")
            .with_attribute(
                AttributeTemplate::output("out", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Float])
                    .with_default(Value::Float(0.0)),
            ),
    );

    registry.register(
        NodeClass::new("Bool", NodeCategory::Constant, Arc::new(NoopLogic))
            .with_description("Constant boolean")
            .with_attribute(
                AttributeTemplate::output("out", AttributeClass::Bool)
                    .with_allowed([TypeTag::Bool])
                    .with_default(Value::Bool(false)),
            ),
    );

    registry.register(
        NodeClass::new("String", NodeCategory::Constant, Arc::new(NoopLogic))
            .with_description("Constant text")
            .with_attribute(AttributeTemplate::output("out", AttributeClass::String)),
    );
}

#[cfg(test)]
mod tests {
    use crate::network::Network;
    use crate::value::Value;

    #[test]
    fn test_constants_are_settable() {
        let mut network = Network::with_builtins("test");
        let text = network.add_node("String", "text").unwrap();
        let out = network.find_child_attribute(text, "out").unwrap();

        assert_eq!(network.value(out).unwrap(), Value::String(String::new()));
        network
            .set_value(out, Value::String("hello".to_string()))
            .unwrap();
        assert_eq!(network.value(out).unwrap().as_str(), Some("hello"));
    }
}
