// SPDX-License-Identifier: MIT OR Apache-2.0
//! Attribute definitions for node inputs/outputs.

use crate::node::NodeId;
use crate::specialization::Specialization;
use crate::value::{TypeTag, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub Uuid);

impl AttributeId {
    /// Create a new random attribute ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AttributeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Declared class of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeClass {
    /// Int/Float/Vec3/Quat/Matrix44 and their arrays
    Numeric,
    /// Text
    String,
    /// Boolean or boolean array
    Bool,
    /// Geometry
    Geo,
    /// Forwards whatever it is connected to
    PassThrough,
    /// Interface stand-in for an attribute inside a collapsed node
    Proxy,
}

impl AttributeClass {
    /// Specialization an attribute of this class starts with
    pub fn allowed(self) -> Specialization {
        match self {
            Self::Numeric => Specialization::of(TypeTag::NUMERIC),
            Self::String => Specialization::single(TypeTag::String),
            Self::Bool => Specialization::of([TypeTag::Bool, TypeTag::BoolArray]),
            Self::Geo => Specialization::single(TypeTag::Geo),
            Self::PassThrough | Self::Proxy => Specialization::any(),
        }
    }

    /// Whether attributes of this class delegate to their connections
    pub fn is_pass_through(self) -> bool {
        matches!(self, Self::PassThrough | Self::Proxy)
    }

    /// Value used when no default is given and the type is still open
    pub fn fallback_value(self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Bool => Value::Bool(false),
            Self::Geo => TypeTag::Geo.default_value(),
            Self::Numeric | Self::PassThrough | Self::Proxy => Value::Float(0.0),
        }
    }
}

/// Attribute direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeDirection {
    /// Input attribute
    Input,
    /// Output attribute
    Output,
}

/// Evaluation state of an attribute's cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalState {
    /// Value is up to date
    Clean,
    /// Value must be recomputed before it is read
    #[default]
    Dirty,
}

/// Shared, lock-protected value slot.
///
/// Writers always replace the whole value, so a reader on another thread
/// sees either the old value or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct ValueCell(Arc<RwLock<Value>>);

impl ValueCell {
    /// Create a cell holding `value`
    pub fn new(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Snapshot of the current value
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Borrow the current value for the duration of `f`
    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.0.read())
    }

    /// Replace the value, returning the previous one
    pub fn replace(&self, value: Value) -> Value {
        std::mem::replace(&mut *self.0.write(), value)
    }

    /// Compute a new value from the current one and store it
    pub fn update(&self, f: impl FnOnce(&Value) -> Value) {
        let mut slot = self.0.write();
        let next = f(&slot);
        *slot = next;
    }
}

/// Blueprint for an attribute, used by node classes and dynamic attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeTemplate {
    /// Attribute name
    pub name: String,
    /// Declared class
    pub class: AttributeClass,
    /// Direction
    pub direction: AttributeDirection,
    /// Allowed specialization, `None` for the class default
    pub allowed: Option<Specialization>,
    /// Initial value
    pub default_value: Option<Value>,
}

impl AttributeTemplate {
    /// Create a new input template
    pub fn input(name: impl Into<String>, class: AttributeClass) -> Self {
        Self {
            name: name.into(),
            class,
            direction: AttributeDirection::Input,
            allowed: None,
            default_value: None,
        }
    }

    /// Create a new output template
    pub fn output(name: impl Into<String>, class: AttributeClass) -> Self {
        Self {
            name: name.into(),
            class,
            direction: AttributeDirection::Output,
            allowed: None,
            default_value: None,
        }
    }

    /// Restrict the allowed types
    pub fn with_allowed(mut self, tags: impl IntoIterator<Item = TypeTag>) -> Self {
        self.allowed = Some(Specialization::of(tags));
        self
    }

    /// Set the default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// An attribute owned by a node
#[derive(Debug)]
pub struct Attribute {
    pub(crate) id: AttributeId,
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) class: AttributeClass,
    pub(crate) direction: AttributeDirection,
    pub(crate) allowed: Specialization,
    pub(crate) specialization: Specialization,
    pub(crate) override_tag: Option<TypeTag>,
    pub(crate) cell: ValueCell,
    pub(crate) state: EvalState,
    pub(crate) affected_by: Vec<AttributeId>,
    pub(crate) affects: Vec<AttributeId>,
    pub(crate) dynamic: bool,
    pub(crate) last_compute: Option<Duration>,
}

impl Attribute {
    pub(crate) fn from_template(node: NodeId, template: &AttributeTemplate, dynamic: bool) -> Self {
        let allowed = template
            .allowed
            .clone()
            .unwrap_or_else(|| template.class.allowed());
        let value = template.default_value.clone().unwrap_or_else(|| {
            allowed
                .first()
                .map_or_else(|| template.class.fallback_value(), TypeTag::default_value)
        });

        Self {
            id: AttributeId::new(),
            node,
            name: template.name.clone(),
            class: template.class,
            direction: template.direction,
            specialization: allowed.clone(),
            allowed,
            override_tag: None,
            cell: ValueCell::new(value),
            state: EvalState::Dirty,
            affected_by: Vec::new(),
            affects: Vec::new(),
            dynamic,
            last_compute: None,
        }
    }

    /// Attribute ID
    pub fn id(&self) -> AttributeId {
        self.id
    }

    /// Owning node
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Short name, unique inside the node
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared class
    pub fn class(&self) -> AttributeClass {
        self.class
    }

    /// Direction
    pub fn direction(&self) -> AttributeDirection {
        self.direction
    }

    /// Whether this is an input
    pub fn is_input(&self) -> bool {
        self.direction == AttributeDirection::Input
    }

    /// Whether this is an output
    pub fn is_output(&self) -> bool {
        self.direction == AttributeDirection::Output
    }

    /// Whether value and type are delegated to connections
    pub fn is_pass_through(&self) -> bool {
        self.class.is_pass_through()
    }

    /// Types this attribute was declared to accept
    pub fn allowed_specialization(&self) -> &Specialization {
        &self.allowed
    }

    /// Types this attribute may currently hold
    pub fn specialization(&self) -> &Specialization {
        &self.specialization
    }

    /// Single-type override applied by a preset
    pub fn specialization_override(&self) -> Option<TypeTag> {
        self.override_tag
    }

    /// Evaluation state
    pub fn state(&self) -> EvalState {
        self.state
    }

    /// Whether the cached value is current
    pub fn is_clean(&self) -> bool {
        self.state == EvalState::Clean
    }

    /// Same-node inputs this attribute is computed from
    pub fn affected_by(&self) -> &[AttributeId] {
        &self.affected_by
    }

    /// Same-node outputs computed from this attribute
    pub fn affects(&self) -> &[AttributeId] {
        &self.affects
    }

    /// Added after node creation
    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// Duration of the last recompute, if any
    pub fn last_compute(&self) -> Option<Duration> {
        self.last_compute
    }

    /// Own value cell (the explicit or computed value, ignoring connections)
    pub fn cell(&self) -> &ValueCell {
        &self.cell
    }

    /// Specialization before any connection narrowed it
    pub(crate) fn base_specialization(&self) -> Specialization {
        self.override_tag
            .map_or_else(|| self.allowed.clone(), Specialization::single)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_defaults() {
        let attr = Attribute::from_template(
            NodeId::new(),
            &AttributeTemplate::input("in", AttributeClass::Numeric),
            false,
        );
        assert_eq!(attr.specialization().len(), TypeTag::NUMERIC.len());
        assert_eq!(attr.cell().get(), Value::Int(0));
        assert!(!attr.is_clean());

        let attr = Attribute::from_template(
            NodeId::new(),
            &AttributeTemplate::output("out", AttributeClass::Numeric)
                .with_allowed([TypeTag::Float])
                .with_default(Value::Float(2.5)),
            false,
        );
        assert_eq!(attr.cell().get(), Value::Float(2.5));
        assert!(attr.is_output());
    }

    #[test]
    fn test_pass_through_is_generic() {
        let attr = Attribute::from_template(
            NodeId::new(),
            &AttributeTemplate::input("through", AttributeClass::PassThrough),
            true,
        );
        assert!(attr.is_pass_through());
        assert!(attr.specialization().is_any());
        assert_eq!(attr.cell().get(), Value::Float(0.0));
    }

    #[test]
    fn test_value_cell_replace() {
        let cell = ValueCell::new(Value::Int(1));
        let shared = cell.clone();
        assert_eq!(cell.replace(Value::Int(2)), Value::Int(1));
        assert_eq!(shared.get(), Value::Int(2));
        shared.update(|v| Value::Int(v.as_int().unwrap_or(0) + 1));
        assert_eq!(cell.get(), Value::Int(3));
    }
}
