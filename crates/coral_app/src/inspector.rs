// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node inspector model.
//!
//! Describes which value field each attribute of a node gets and which hook
//! color it is drawn with. A front end draws the [`FieldDescriptor`]s; the
//! [`NodeInspector`] keeps them current by listening to the network.

use crate::error::Result;
use coral_graph::{
    AttributeClass, AttributeId, EventKind, Network, NodeId, Notification, Observer, Subject,
    TypeTag, Value,
};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Hook color of a pass-through with nothing concrete behind it
pub const UNRESOLVED_COLOR: [u8; 3] = [100, 100, 100];
/// Hook color of a numeric attribute whose type is still open
pub const ANY_COLOR: [u8; 3] = [255, 255, 95];
/// Hook color of string attributes
pub const STRING_COLOR: [u8; 3] = [204, 255, 102];
/// Hook color of bool attributes
pub const BOOL_COLOR: [u8; 3] = [255, 160, 130];
/// Hook color of geometry attributes
pub const GEO_COLOR: [u8; 3] = [200, 200, 250];

/// Kind of value field drawn for an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer spin box
    Int,
    /// Float spin box
    Float,
    /// Check box
    Bool,
    /// Text entry
    String,
    /// Name only, no value
    Label,
}

/// What the inspector shows for one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Attribute shown
    pub attribute: AttributeId,
    /// Display name
    pub label: String,
    /// Field kind
    pub kind: FieldKind,
    /// Whether the user may edit the value
    pub editable: bool,
    /// Hook color
    pub color: [u8; 3],
}

/// Builds the field for an attribute
pub type FieldFactory = fn(&mut Network, AttributeId) -> Result<FieldDescriptor>;

/// Field factories keyed by attribute class
pub struct FieldRegistry {
    factories: HashMap<AttributeClass, FieldFactory>,
}

impl FieldRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the builtin factories
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(AttributeClass::Numeric, numeric_field);
        registry.register(AttributeClass::PassThrough, numeric_field);
        registry.register(AttributeClass::Proxy, numeric_field);
        registry.register(AttributeClass::Bool, bool_field);
        registry.register(AttributeClass::String, string_field);
        registry
    }

    /// Register a factory, replacing any previous one for `class`
    pub fn register(&mut self, class: AttributeClass, factory: FieldFactory) {
        self.factories.insert(class, factory);
    }

    /// Build the field for `attribute`; classes without a factory get a label
    pub fn build(&self, network: &mut Network, attribute: AttributeId) -> Result<FieldDescriptor> {
        let class = network
            .attribute(attribute)
            .ok_or(coral_graph::GraphError::AttributeNotFound(attribute))?
            .class();
        match self.factories.get(&class) {
            Some(factory) => factory(network, attribute),
            None => Ok(descriptor(network, attribute, FieldKind::Label)),
        }
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn descriptor(network: &Network, attribute: AttributeId, kind: FieldKind) -> FieldDescriptor {
    let label = network
        .attribute(attribute)
        .map(|a| a.name().to_string())
        .unwrap_or_default();
    FieldDescriptor {
        attribute,
        label,
        kind,
        editable: kind != FieldKind::Label && is_editable(network, attribute),
        color: hook_color(network, attribute),
    }
}

/// Whether the value of `attribute` is set by the user rather than computed
pub fn is_editable(network: &Network, attribute: AttributeId) -> bool {
    network.input(attribute).is_none() && network.affected_by(attribute).is_empty()
}

/// Current value for choosing a field kind; the cached value when the
/// recompute fails
fn current_value(network: &mut Network, attribute: AttributeId) -> Result<Value> {
    match network.value(attribute) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(
                attribute = %network.attribute_full_name(attribute),
                "Showing cached value: {e}"
            );
            Ok(network.out_value(attribute)?)
        }
    }
}

fn numeric_field(network: &mut Network, attribute: AttributeId) -> Result<FieldDescriptor> {
    let kind = match network.first_concrete_attribute(attribute) {
        Some(source) => {
            let value = current_value(network, source)?;
            match value.type_tag() {
                TypeTag::Int => FieldKind::Int,
                TypeTag::Float => FieldKind::Float,
                TypeTag::IntArray if value.len() == 1 => FieldKind::Int,
                TypeTag::FloatArray if value.len() == 1 => FieldKind::Float,
                _ => FieldKind::Label,
            }
        }
        None => FieldKind::Label,
    };
    Ok(descriptor(network, attribute, kind))
}

fn bool_field(network: &mut Network, attribute: AttributeId) -> Result<FieldDescriptor> {
    let kind = if current_value(network, attribute)?.len() == 1 {
        FieldKind::Bool
    } else {
        FieldKind::Label
    };
    Ok(descriptor(network, attribute, kind))
}

fn string_field(network: &mut Network, attribute: AttributeId) -> Result<FieldDescriptor> {
    Ok(descriptor(network, attribute, FieldKind::String))
}

/// Hook color of `attribute`.
///
/// Pass-through attributes take the color of the concrete attribute they
/// resolve to, read through their own specialization.
pub fn hook_color(network: &Network, attribute: AttributeId) -> [u8; 3] {
    let Some(attr) = network.attribute(attribute) else {
        return UNRESOLVED_COLOR;
    };
    let class = if attr.is_pass_through() {
        match network
            .first_concrete_attribute(attribute)
            .and_then(|source| network.attribute(source))
        {
            Some(source) => source.class(),
            None => return UNRESOLVED_COLOR,
        }
    } else {
        attr.class()
    };

    match class {
        AttributeClass::Numeric => numeric_color(attr.specialization().iter().collect::<Vec<_>>()),
        AttributeClass::String => STRING_COLOR,
        AttributeClass::Bool => BOOL_COLOR,
        AttributeClass::Geo => GEO_COLOR,
        AttributeClass::PassThrough | AttributeClass::Proxy => UNRESOLVED_COLOR,
    }
}

fn numeric_color(tags: Vec<TypeTag>) -> [u8; 3] {
    match tags.as_slice() {
        [tag] if tag.is_array() => lighter(tag.color(), 110),
        [tag] => tag.color(),
        [a, b] if a.base() == b.base() => a.color(),
        _ => ANY_COLOR,
    }
}

/// Brighten `rgb` by `factor` percent, keeping its hue.
///
/// Brightness past full is taken out of the saturation instead.
pub fn lighter(rgb: [u8; 3], factor: u32) -> [u8; 3] {
    let channels = rgb.map(f32::from);
    let max = channels[0].max(channels[1]).max(channels[2]);
    let min = channels[0].min(channels[1]).min(channels[2]);
    if max == 0.0 {
        return rgb;
    }

    let mut saturation = 255.0 * (max - min) / max;
    let mut value = max * factor as f32 / 100.0;
    if value > 255.0 {
        saturation = (saturation - (value - 255.0)).max(0.0);
        value = 255.0;
    }

    let new_min = value * (1.0 - saturation / 255.0);
    channels.map(|c| {
        let t = if max > min { (c - min) / (max - min) } else { 1.0 };
        (new_min + t * (value - new_min)).round().clamp(0.0, 255.0) as u8
    })
}

/// Scalar shown in a field: element 0 of a single-element array
pub fn field_value(network: &mut Network, field: &FieldDescriptor) -> Result<Value> {
    let value = network.value(field.attribute)?;
    Ok(match (field.kind, &value) {
        (FieldKind::Int, Value::IntArray(v)) => v.first().map_or(value.clone(), |i| Value::Int(*i)),
        (FieldKind::Float, Value::FloatArray(v)) => {
            v.first().map_or(value.clone(), |f| Value::Float(*f))
        }
        (FieldKind::Bool, Value::BoolArray(v)) => {
            v.first().map_or(value.clone(), |b| Value::Bool(*b))
        }
        _ => value,
    })
}

/// Write a scalar typed into a field back to its attribute
pub fn commit_field(network: &mut Network, field: &FieldDescriptor, input: Value) -> Result<()> {
    let current = network.out_value(field.attribute)?;
    if current.type_tag().is_array() {
        network.set_value_at(field.attribute, 0, input)?;
    } else {
        network.set_value(field.attribute, input)?;
    }
    Ok(())
}

#[derive(Default)]
struct Pending {
    all: bool,
    attributes: IndexSet<AttributeId>,
}

/// Inspector for one node.
///
/// Holds a field per attribute and rebuilds the ones whose attribute
/// changed type, connection or name since the last [`refresh`](Self::refresh).
pub struct NodeInspector {
    node: NodeId,
    title: String,
    fields: IndexMap<AttributeId, FieldDescriptor>,
    pending: Arc<Mutex<Pending>>,
    observers: Vec<Observer>,
}

impl NodeInspector {
    /// Build the inspector for `node` and start listening
    pub fn new(network: &mut Network, registry: &FieldRegistry, node: NodeId) -> Result<Self> {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let mut inspector = Self {
            node,
            title: network.node_full_name(node),
            fields: IndexMap::new(),
            pending,
            observers: Vec::new(),
        };

        // A connection anywhere on the node can change what its
        // pass-through attributes resolve to.
        for kind in [EventKind::NodeConnectionChanged, EventKind::NameChanged] {
            let sink = inspector.pending.clone();
            inspector.observers.push(network.observe(
                kind,
                Subject::Node(node),
                Box::new(move |_: &Notification| sink.lock().all = true),
            ));
        }

        let attributes: Vec<AttributeId> = network.attributes_of(node).map(|a| a.id()).collect();
        for attribute in attributes {
            inspector.watch(network, registry, attribute)?;
        }

        tracing::debug!(node = %inspector.title, fields = inspector.fields.len(), "Inspector built");
        Ok(inspector)
    }

    fn watch(
        &mut self,
        network: &mut Network,
        registry: &FieldRegistry,
        attribute: AttributeId,
    ) -> Result<()> {
        self.fields.insert(attribute, registry.build(network, attribute)?);
        for kind in [EventKind::SpecializationChanged, EventKind::NameChanged] {
            let sink = self.pending.clone();
            self.observers.push(network.observe(
                kind,
                Subject::Attribute(attribute),
                Box::new(move |n: &Notification| {
                    if let Subject::Attribute(a) = n.subject {
                        sink.lock().attributes.insert(a);
                    }
                }),
            ));
        }
        Ok(())
    }

    /// Node shown
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Full name of the node when last refreshed
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Fields in attribute order
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Field of `attribute`
    pub fn field(&self, attribute: AttributeId) -> Option<&FieldDescriptor> {
        self.fields.get(&attribute)
    }

    /// Field of the attribute named `name`
    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.values().find(|f| f.label == name)
    }

    /// Whether any field waits for a rebuild
    pub fn needs_refresh(&self) -> bool {
        let pending = self.pending.lock();
        pending.all || !pending.attributes.is_empty()
    }

    /// Rebuild stale fields. Returns how many were rebuilt.
    pub fn refresh(&mut self, network: &mut Network, registry: &FieldRegistry) -> Result<usize> {
        let stale: Vec<AttributeId> = {
            let mut pending = self.pending.lock();
            let attributes = std::mem::take(&mut pending.attributes);
            if std::mem::take(&mut pending.all) {
                self.fields.keys().copied().collect()
            } else {
                attributes.into_iter().collect()
            }
        };

        let mut rebuilt = 0;
        for attribute in stale {
            if network.attribute(attribute).is_none() {
                self.fields.shift_remove(&attribute);
                continue;
            }
            self.fields.insert(attribute, registry.build(network, attribute)?);
            rebuilt += 1;
        }
        self.title = network.node_full_name(self.node);
        Ok(rebuilt)
    }

    /// Add a numeric input to a node that takes extra attributes
    pub fn add_input(&mut self, network: &mut Network, registry: &FieldRegistry) -> Result<AttributeId> {
        let name = format!("in{}", self.fields.len());
        let attribute = network.add_numeric_attribute(self.node, &name)?;
        self.watch(network, registry, attribute)?;
        Ok(attribute)
    }

    /// Toggle playback of a playable node
    pub fn set_playing(&self, network: &mut Network, playing: bool) -> Result<()> {
        network.play(self.node, playing)?;
        Ok(())
    }
}
