// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builtin node classes.

pub mod constant;
pub mod container;
pub mod math;
pub mod time;

use crate::node::NodeClassRegistry;

/// Create a registry holding every builtin node class
pub fn builtin_registry() -> NodeClassRegistry {
    let mut registry = NodeClassRegistry::new();
    constant::register(&mut registry);
    math::register(&mut registry);
    time::register(&mut registry);
    container::register(&mut registry);
    registry
}
