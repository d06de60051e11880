// SPDX-License-Identifier: MIT OR Apache-2.0
//! Time source.
//!
//! `Time.time` counts frames. It can be set by hand, or advanced by an
//! external driver at `framesPerSecond` while the node plays.

use crate::attribute::{AttributeClass, AttributeTemplate};
use crate::driver::DEFAULT_RATE;
use crate::evaluation::NoopLogic;
use crate::node::{DriverSpec, NodeCategory, NodeClass, NodeClassRegistry};
use crate::value::{TypeTag, Value};
use std::sync::Arc;

/// Register the time node classes
pub fn register(registry: &mut NodeClassRegistry) {
    registry.register(
        NodeClass::new("Time", NodeCategory::Time, Arc::new(NoopLogic))
            .with_description("Frame counter that can be played")
            .with_attribute(
                AttributeTemplate::input("framesPerSecond", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Float])
                    .with_default(Value::Float(DEFAULT_RATE)),
            )
            .with_attribute(
                AttributeTemplate::output("time", AttributeClass::Numeric)
                    .with_allowed([TypeTag::Float])
                    .with_default(Value::Float(0.0)),
            )
            .driven_by(DriverSpec {
                attribute: "time".to_string(),
                rate_attribute: "framesPerSecond".to_string(),
            }),
    );
}

#[cfg(test)]
mod tests {
    use crate::network::Network;
    use crate::value::Value;

    #[test]
    fn test_time_is_scrubbable() {
        let mut network = Network::with_builtins("test");
        let time = network.add_node("Time", "time").unwrap();
        let out = network.find_child_attribute(time, "time").unwrap();

        assert!(network.node(time).unwrap().is_playable());
        network.set_value(out, Value::Float(12.0)).unwrap();
        assert_eq!(network.value(out).unwrap(), Value::Float(12.0));
    }
}
