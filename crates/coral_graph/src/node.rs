// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the dataflow network.

use crate::attribute::{AttributeId, AttributeTemplate};
use crate::evaluation::NodeLogic;
use crate::specialization::LinkRule;
use crate::value::TypeTag;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Node class category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Constant value nodes
    Constant,
    /// Math operations
    Math,
    /// Time and animation
    Time,
    /// Nodes that contain other nodes
    Container,
    /// Custom/user-defined
    Custom,
}

/// Named set of single-type overrides for a node's generic attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Preset name
    pub name: String,
    /// Attribute name to forced type
    pub types: Vec<(String, TypeTag)>,
}

impl Preset {
    /// Create a preset from `(attribute, type)` pairs
    pub fn new<'a>(
        name: impl Into<String>,
        types: impl IntoIterator<Item = (&'a str, TypeTag)>,
    ) -> Self {
        Self {
            name: name.into(),
            types: types
                .into_iter()
                .map(|(attr, tag)| (attr.to_string(), tag))
                .collect(),
        }
    }

    /// Forced type for an attribute name
    pub fn type_for(&self, attribute: &str) -> Option<TypeTag> {
        self.types
            .iter()
            .find(|(name, _)| name == attribute)
            .map(|(_, tag)| *tag)
    }
}

/// Attribute advanced by an external driver thread while the node plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSpec {
    /// Attribute written on each tick
    pub attribute: String,
    /// Input holding the tick rate in ticks per second
    pub rate_attribute: String,
}

/// Node class definition
#[derive(Clone)]
pub struct NodeClass {
    /// Unique class name
    pub id: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Attributes created with each instance, in order
    pub attributes: Vec<AttributeTemplate>,
    /// `(input, output)` pairs: output is recomputed from input
    pub affects: Vec<(String, String)>,
    /// Specialization links between attributes of the same node
    pub links: Vec<(String, String, LinkRule)>,
    /// Available specialization presets
    pub presets: Vec<Preset>,
    /// Preset enabled on new instances
    pub default_preset: Option<String>,
    /// Whether the node computes (containers don't)
    pub update_enabled: bool,
    /// Whether attributes can be added after creation
    pub allow_dynamic_attributes: bool,
    /// Whether outputs are computed by iterating the child nodes
    pub iterates: bool,
    /// External driver, for playable nodes
    pub driver: Option<DriverSpec>,
    /// Compute logic
    pub logic: Arc<dyn NodeLogic>,
}

impl NodeClass {
    /// Create a class with no attributes
    pub fn new(id: impl Into<String>, category: NodeCategory, logic: Arc<dyn NodeLogic>) -> Self {
        Self {
            id: id.into(),
            category,
            description: String::new(),
            attributes: Vec::new(),
            affects: Vec::new(),
            links: Vec::new(),
            presets: Vec::new(),
            default_preset: None,
            update_enabled: true,
            allow_dynamic_attributes: false,
            iterates: false,
            driver: None,
            logic,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an attribute template
    pub fn with_attribute(mut self, template: AttributeTemplate) -> Self {
        self.attributes.push(template);
        self
    }

    /// Declare that `output` is computed from `input`
    pub fn with_affect(mut self, input: &str, output: &str) -> Self {
        self.affects.push((input.to_string(), output.to_string()));
        self
    }

    /// Link the specializations of two attributes
    pub fn with_link(mut self, a: &str, b: &str, rule: LinkRule) -> Self {
        self.links.push((a.to_string(), b.to_string(), rule));
        self
    }

    /// Add a specialization preset
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    /// Enable `name` on every new instance
    pub fn with_default_preset(mut self, name: &str) -> Self {
        self.default_preset = Some(name.to_string());
        self
    }

    /// Make this a non-computing container with dynamic attributes
    pub fn container(mut self) -> Self {
        self.update_enabled = false;
        self.allow_dynamic_attributes = true;
        self
    }

    /// Make this a container whose outputs run its children once per
    /// index of its `indexRange` input
    pub fn loop_container(mut self) -> Self {
        self.allow_dynamic_attributes = true;
        self.iterates = true;
        self
    }

    /// Allow attributes to be added after creation
    pub fn with_dynamic_attributes(mut self) -> Self {
        self.allow_dynamic_attributes = true;
        self
    }

    /// Attach an external driver
    pub fn driven_by(mut self, driver: DriverSpec) -> Self {
        self.driver = Some(driver);
        self
    }
}

impl fmt::Debug for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClass")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("attributes", &self.attributes.len())
            .field("presets", &self.presets.len())
            .finish_non_exhaustive()
    }
}

/// Specialization link between two attributes of one node
#[derive(Debug, Clone)]
pub(crate) struct SpecializationLink {
    pub(crate) a: AttributeId,
    pub(crate) b: AttributeId,
    pub(crate) rule: LinkRule,
}

/// A node instance in the network
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) class_name: String,
    pub(crate) attributes: Vec<AttributeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) opened: bool,
    pub(crate) update_enabled: bool,
    pub(crate) allow_dynamic_attributes: bool,
    pub(crate) iterates: bool,
    pub(crate) links: Vec<SpecializationLink>,
    pub(crate) presets: Vec<Preset>,
    pub(crate) enabled_preset: Option<String>,
    pub(crate) driver: Option<DriverSpec>,
    pub(crate) logic: Arc<dyn NodeLogic>,
}

impl Node {
    /// Node ID
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name, unique among siblings
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class this node was created from
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Owned attributes in declaration order
    pub fn attributes(&self) -> &[AttributeId] {
        &self.attributes
    }

    /// Containing node
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Contained nodes
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Whether the container is opened (children shown) or collapsed
    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Whether the node computes its outputs
    pub fn update_enabled(&self) -> bool {
        self.update_enabled
    }

    /// Whether attributes can be added after creation
    pub fn allows_dynamic_attributes(&self) -> bool {
        self.allow_dynamic_attributes
    }

    /// Whether the node is a loop container
    pub fn iterates(&self) -> bool {
        self.iterates
    }

    /// Names of the available specialization presets
    pub fn specialization_presets(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(|p| p.name.as_str())
    }

    /// Currently enabled preset
    pub fn enabled_specialization_preset(&self) -> Option<&str> {
        self.enabled_preset.as_deref()
    }

    /// Whether this node can be played by an external driver
    pub fn is_playable(&self) -> bool {
        self.driver.is_some()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("attributes", &self.attributes)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Registry of available node classes
#[derive(Debug, Clone, Default)]
pub struct NodeClassRegistry {
    /// Registered node classes by name
    classes: indexmap::IndexMap<String, NodeClass>,
}

impl NodeClassRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the builtin classes
    pub fn with_builtins() -> Self {
        crate::nodes::builtin_registry()
    }

    /// Register a node class, replacing any class with the same name
    pub fn register(&mut self, class: NodeClass) {
        self.classes.insert(class.id.clone(), class);
    }

    /// Get a node class by name
    pub fn get(&self, id: &str) -> Option<&NodeClass> {
        self.classes.get(id)
    }

    /// Whether a class is registered
    pub fn contains(&self, id: &str) -> bool {
        self.classes.contains_key(id)
    }

    /// Get all registered classes
    pub fn classes(&self) -> impl Iterator<Item = &NodeClass> {
        self.classes.values()
    }

    /// Get classes by category
    pub fn classes_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeClass> {
        self.classes.values().filter(move |c| c.category == category)
    }
}
