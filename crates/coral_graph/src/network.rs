// SPDX-License-Identifier: MIT OR Apache-2.0
//! The network: nodes, attributes and connections, and the operations that
//! edit them.
//!
//! All topology lives in flat tables keyed by id. Nodes reference their
//! attributes and children by id, attributes reference their node, and
//! connections reference both ends, so there are no ownership cycles to
//! manage. Every editing operation validates first and mutates second;
//! notifications are collected while mutating and delivered once the network
//! is consistent again.

use crate::attribute::{
    Attribute, AttributeClass, AttributeDirection, AttributeId, AttributeTemplate, EvalState,
};
use crate::connection::{Connection, ConnectionId};
use crate::driver::ExternalLink;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeClass, NodeClassRegistry, NodeId, SpecializationLink};
use crate::nodes::container::INDEX_RANGE;
use crate::observer::{Callback, EventKind, Notification, Observer, ObserverBus, Subject};
use crate::specialization::Specialization;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Separator between the parts of a full name
pub const PATH_SEPARATOR: char = '.';

/// Which way to walk the dataflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Towards consumers: outgoing connections and affected outputs
    Downstream,
    /// Towards producers: the input connection and affecting inputs
    Upstream,
}

/// A dataflow network
pub struct Network {
    name: String,
    classes: Arc<NodeClassRegistry>,
    pub(crate) nodes: IndexMap<NodeId, Node>,
    pub(crate) attributes: IndexMap<AttributeId, Attribute>,
    pub(crate) connections: IndexMap<ConnectionId, Connection>,
    pub(crate) observers: ObserverBus,
    selection: Vec<NodeId>,
    pub(crate) external: ExternalLink,
}

impl Network {
    /// Create an empty network using `classes` to instantiate nodes
    pub fn new(name: impl Into<String>, classes: NodeClassRegistry) -> Self {
        Self {
            name: name.into(),
            classes: Arc::new(classes),
            nodes: IndexMap::new(),
            attributes: IndexMap::new(),
            connections: IndexMap::new(),
            observers: ObserverBus::new(),
            selection: Vec::new(),
            external: ExternalLink::new(),
        }
    }

    /// Create an empty network with the builtin node classes
    pub fn with_builtins(name: impl Into<String>) -> Self {
        Self::new(name, NodeClassRegistry::with_builtins())
    }

    /// Network name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the network
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Registered node classes
    pub fn classes(&self) -> &NodeClassRegistry {
        &self.classes
    }

    /// Register an additional node class
    pub fn register_class(&mut self, class: NodeClass) {
        Arc::make_mut(&mut self.classes).register(class);
    }

    /// Instantiate `class` at the top level. The name is adjusted if a
    /// sibling already uses it.
    pub fn add_node(&mut self, class: &str, name: &str) -> Result<NodeId> {
        self.create_node(None, class, name)
    }

    /// Instantiate `class` inside the container `parent`
    pub fn add_node_in(&mut self, parent: NodeId, class: &str, name: &str) -> Result<NodeId> {
        self.node_ref(parent)?;
        self.create_node(Some(parent), class, name)
    }

    pub(crate) fn create_node(
        &mut self,
        parent: Option<NodeId>,
        class: &str,
        name: &str,
    ) -> Result<NodeId> {
        let classes = Arc::clone(&self.classes);
        let class = classes
            .get(class)
            .ok_or_else(|| GraphError::InvalidClass(class.to_string()))?;

        let id = NodeId::new();
        let base = if name.is_empty() { class.id.as_str() } else { name };
        let name = self.unique_node_name(parent, base, None);

        // Attributes, in declaration order
        let mut by_name: IndexMap<String, AttributeId> = IndexMap::new();
        for template in &class.attributes {
            let attr = Attribute::from_template(id, template, false);
            by_name.insert(attr.name.clone(), attr.id);
            self.attributes.insert(attr.id, attr);
        }

        // Intra-node dependencies
        for (input, output) in &class.affects {
            match (by_name.get(input), by_name.get(output)) {
                (Some(&i), Some(&o)) => {
                    if let Some(attr) = self.attributes.get_mut(&i) {
                        attr.affects.push(o);
                    }
                    if let Some(attr) = self.attributes.get_mut(&o) {
                        attr.affected_by.push(i);
                    }
                }
                _ => tracing::warn!(class = %class.id, input = %input, output = %output, "Affect refers to unknown attribute"),
            }
        }
        for attr_id in by_name.values() {
            if let Some(attr) = self.attributes.get_mut(attr_id) {
                attr.state = if attr.affected_by.is_empty() {
                    EvalState::Clean
                } else {
                    EvalState::Dirty
                };
            }
        }

        let links = class
            .links
            .iter()
            .filter_map(|(a, b, rule)| match (by_name.get(a), by_name.get(b)) {
                (Some(&a), Some(&b)) => Some(SpecializationLink {
                    a,
                    b,
                    rule: rule.clone(),
                }),
                _ => {
                    tracing::warn!(class = %class.id, a = %a, b = %b, "Link refers to unknown attribute");
                    None
                }
            })
            .collect();

        let node = Node {
            id,
            name,
            class_name: class.id.clone(),
            attributes: by_name.values().copied().collect(),
            parent,
            children: Vec::new(),
            opened: false,
            update_enabled: class.update_enabled,
            allow_dynamic_attributes: class.allow_dynamic_attributes,
            iterates: class.iterates,
            links,
            presets: class.presets.clone(),
            enabled_preset: None,
            driver: class.driver.clone(),
            logic: Arc::clone(&class.logic),
        };
        self.nodes.insert(id, node);

        let mut notes = vec![Notification::node(EventKind::NodeAdded, id)];
        if let Some(preset) = &class.default_preset {
            if let Err(e) = self.apply_preset(id, Some(preset.as_str()), &mut notes) {
                for attr in by_name.values() {
                    self.attributes.shift_remove(attr);
                }
                self.nodes.shift_remove(&id);
                return Err(e);
            }
        }
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.push(id);
        }

        tracing::debug!(node = %self.node_full_name(id), class = %class.id, "Node added");
        self.observers.emit(&notes);
        Ok(id)
    }

    /// Delete a node together with its children, attributes and connections.
    ///
    /// Every surviving attribute that loses its input is told exactly once.
    pub fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.node_ref(node)?;
        let full_name = self.node_full_name(node);
        let doomed_nodes = self.subtree(node);

        for id in &doomed_nodes {
            if self.is_playing(*id) {
                self.play(*id, false)?;
            }
        }

        let doomed_node_set: HashSet<NodeId> = doomed_nodes.iter().copied().collect();
        let doomed_attributes: HashSet<AttributeId> = doomed_nodes
            .iter()
            .filter_map(|n| self.nodes.get(n))
            .flat_map(|n| n.attributes.iter().copied())
            .collect();

        let mut notes: Vec<Notification> = doomed_nodes
            .iter()
            .map(|n| Notification::node(EventKind::NodeDeleted, *n))
            .collect();

        // Cut connections crossing into or out of the subtree
        let touching: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| {
                doomed_attributes.contains(&c.from_attribute)
                    || doomed_attributes.contains(&c.to_attribute)
            })
            .map(|c| c.id)
            .collect();
        let mut survivors = Vec::new();
        for id in touching {
            let Some(connection) = self.connections.shift_remove(&id) else {
                continue;
            };
            if !doomed_attributes.contains(&connection.to_attribute) {
                notes.push(Notification::attribute(
                    EventKind::DisconnectedInput,
                    connection.to_attribute,
                ));
                notes.push(Notification::node(
                    EventKind::NodeConnectionChanged,
                    connection.to_node,
                ));
                survivors.push(connection.to_attribute);
            }
            if !doomed_node_set.contains(&connection.from_node) {
                notes.push(Notification::node(
                    EventKind::NodeConnectionChanged,
                    connection.from_node,
                ));
            }
        }

        // Drop the tables' entries
        for attr in &doomed_attributes {
            self.attributes.shift_remove(attr);
        }
        for id in &doomed_nodes {
            self.nodes.shift_remove(id);
        }
        let parent = self.nodes.values_mut().find(|n| n.children.contains(&node));
        if let Some(parent) = parent {
            parent.children.retain(|c| *c != node);
        }
        let selection_len = self.selection.len();
        self.selection.retain(|n| !doomed_node_set.contains(n));
        if self.selection.len() != selection_len {
            notes.push(Notification::new(EventKind::SelectionChanged, Subject::Global));
        }

        self.propagate_dirty(&survivors, true, &mut notes);
        tracing::info!(node = %full_name, removed = doomed_nodes.len(), "Node deleted");
        self.observers.emit(&notes);

        for id in doomed_nodes {
            self.observers.forget_subject(Subject::Node(id));
        }
        for id in doomed_attributes {
            self.observers.forget_subject(Subject::Attribute(id));
        }
        Ok(())
    }

    /// Rename a node. The name is adjusted to stay unique among siblings;
    /// the final name is returned.
    pub fn rename_node(&mut self, node: NodeId, name: &str) -> Result<String> {
        let parent = self.node_ref(node)?.parent;
        let unique = self.unique_node_name(parent, name, Some(node));
        if let Some(target) = self.nodes.get_mut(&node) {
            target.name = unique.clone();
        }
        self.observers
            .emit(&[Notification::node(EventKind::NameChanged, node)]);
        Ok(unique)
    }

    fn unique_node_name(&self, parent: Option<NodeId>, base: &str, exclude: Option<NodeId>) -> String {
        let base: String = base
            .chars()
            .map(|c| if c == PATH_SEPARATOR || c.is_whitespace() { '_' } else { c })
            .collect();
        let taken = |candidate: &str| {
            self.nodes.values().any(|n| {
                n.parent == parent && Some(n.id) != exclude && n.name == candidate
            })
        };

        if !taken(&base) {
            return base;
        }
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Node and every node nested inside it, parents first
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            order.push(current);
            if let Some(n) = self.nodes.get(&current) {
                stack.extend(n.children.iter().rev().copied());
            }
        }
        order
    }

    /// Open or collapse a container
    pub fn set_opened(&mut self, node: NodeId, opened: bool) -> Result<()> {
        self.node_mut(node)?.opened = opened;
        Ok(())
    }

    /// Add an input attribute of `class` to a node that accepts dynamic
    /// attributes
    pub fn add_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        class: AttributeClass,
    ) -> Result<AttributeId> {
        self.add_attribute_with(node, AttributeTemplate::input(name, class))
    }

    /// Add a generic numeric input
    pub fn add_numeric_attribute(&mut self, node: NodeId, name: &str) -> Result<AttributeId> {
        self.add_attribute(node, name, AttributeClass::Numeric)
    }

    /// Add an attribute built from `template`
    pub fn add_attribute_with(
        &mut self,
        node: NodeId,
        template: AttributeTemplate,
    ) -> Result<AttributeId> {
        let target = self.node_ref(node)?;
        if !target.allow_dynamic_attributes {
            return Err(GraphError::StaticNode(self.node_full_name(node)));
        }
        if self.find_child_attribute(node, &template.name).is_ok() {
            return Err(GraphError::DuplicateName {
                node: self.node_full_name(node),
                name: template.name,
            });
        }

        let range = if target.iterates && template.direction == AttributeDirection::Output {
            self.find_child_attribute(node, INDEX_RANGE).ok()
        } else {
            None
        };

        let mut attr = Attribute::from_template(node, &template, true);
        attr.state = EvalState::Clean;
        let id = attr.id;
        // Loop outputs are recomputed whenever the index range changes
        if let Some(range) = range {
            attr.affected_by.push(range);
            attr.state = EvalState::Dirty;
            self.attribute_mut(range)?.affects.push(id);
        }
        self.attributes.insert(id, attr);
        self.node_mut(node)?.attributes.push(id);

        tracing::debug!(attribute = %self.attribute_full_name(id), "Attribute added");
        self.observers
            .emit(&[Notification::node(EventKind::AttributeAdded, node)]);
        Ok(id)
    }

    /// Delete a dynamic attribute and its connections
    pub fn delete_attribute(&mut self, attribute: AttributeId) -> Result<()> {
        let attr = self.attribute_ref(attribute)?;
        if !attr.dynamic {
            return Err(GraphError::StaticNode(self.node_full_name(attr.node)));
        }
        let node = attr.node;

        let mut notes = vec![Notification::attribute(EventKind::AttributeDeleted, attribute)];
        let touching: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.involves_attribute(attribute))
            .map(|c| c.id)
            .collect();
        let mut survivors = Vec::new();
        for id in touching {
            if let Some(connection) = self.detach_connection(id, &mut notes) {
                if connection.to_attribute != attribute {
                    survivors.push(connection.to_attribute);
                }
            }
        }
        notes.retain(|n| {
            n.kind == EventKind::AttributeDeleted || n.subject != Subject::Attribute(attribute)
        });

        self.attributes.shift_remove(&attribute);
        for attr in self.attributes.values_mut() {
            attr.affects.retain(|a| *a != attribute);
        }
        self.node_mut(node)?.attributes.retain(|a| *a != attribute);
        self.propagate_dirty(&survivors, true, &mut notes);
        self.observers.emit(&notes);
        self.observers.forget_subject(Subject::Attribute(attribute));
        Ok(())
    }

    /// Rename an attribute; names are unique inside their node
    pub fn rename_attribute(&mut self, attribute: AttributeId, name: &str) -> Result<()> {
        let node = self.attribute_ref(attribute)?.node;
        let clash = self
            .node_ref(node)?
            .attributes
            .iter()
            .filter(|a| **a != attribute)
            .filter_map(|a| self.attributes.get(a))
            .any(|a| a.name == name);
        if clash || name.contains(PATH_SEPARATOR) {
            return Err(GraphError::DuplicateName {
                node: self.node_full_name(node),
                name: name.to_string(),
            });
        }

        self.attribute_mut(attribute)?.name = name.to_string();
        self.observers
            .emit(&[Notification::attribute(EventKind::NameChanged, attribute)]);
        Ok(())
    }

    /// Connect `source` into `destination`, replacing the destination's
    /// current input if it has one.
    ///
    /// Fails without touching the network if the destination is a computed
    /// output, the edge already exists, the edge would close a cycle, or the
    /// two ends can't agree on a type.
    pub fn connect(&mut self, source: AttributeId, destination: AttributeId) -> Result<ConnectionId> {
        let src_node = self.attribute_ref(source)?.node;
        let dst = self.attribute_ref(destination)?;
        let dst_node = dst.node;

        // Validate before touching anything
        if source == destination {
            return Err(GraphError::CycleDetected {
                source_attribute: self.attribute_full_name(source),
                destination: self.attribute_full_name(destination),
            });
        }
        if dst.is_output() && !dst.is_pass_through() {
            return Err(GraphError::OutputDestination(self.attribute_full_name(destination)));
        }
        let replaced = self.input_connection(destination).map(|c| (c.id, c.from_attribute));
        if replaced.is_some_and(|(_, from)| from == source) {
            return Err(GraphError::AlreadyConnected {
                source_attribute: self.attribute_full_name(source),
                destination: self.attribute_full_name(destination),
            });
        }
        if self.would_cycle(source, destination) {
            return Err(GraphError::CycleDetected {
                source_attribute: self.attribute_full_name(source),
                destination: self.attribute_full_name(destination),
            });
        }
        let narrowing = self.resolve_connection(source, destination, replaced.map(|(id, _)| id))?;

        // Disconnect first, then connect
        let mut notes = Vec::new();
        if let Some((old, _)) = replaced {
            self.detach_connection(old, &mut notes);
        }
        let connection = Connection::new(src_node, source, dst_node, destination);
        let id = connection.id;
        self.connections.insert(id, connection);
        notes.push(Notification::attribute(EventKind::ConnectedInput, destination));
        notes.push(Notification::node(EventKind::NodeConnectionChanged, src_node));
        if dst_node != src_node {
            notes.push(Notification::node(EventKind::NodeConnectionChanged, dst_node));
        }

        let mut dirty_roots = vec![destination];
        dirty_roots.extend(self.apply_specializations(narrowing, &mut notes));
        self.propagate_dirty(&dirty_roots, true, &mut notes);

        tracing::debug!(
            source = %self.attribute_full_name(source),
            destination = %self.attribute_full_name(destination),
            "Connected"
        );
        self.observers.emit(&notes);
        Ok(id)
    }

    /// Remove the input connection of `destination`. Returns false when there
    /// was none. The destination falls back to its own explicit value.
    pub fn disconnect(&mut self, destination: AttributeId) -> Result<bool> {
        self.attribute_ref(destination)?;
        let Some(id) = self.input_connection(destination).map(|c| c.id) else {
            return Ok(false);
        };

        let mut notes = Vec::new();
        self.detach_connection(id, &mut notes);
        self.propagate_dirty(&[destination], true, &mut notes);
        tracing::debug!(destination = %self.attribute_full_name(destination), "Disconnected");
        self.observers.emit(&notes);
        Ok(true)
    }

    /// Remove a connection, recording the disconnect notifications
    fn detach_connection(
        &mut self,
        id: ConnectionId,
        notes: &mut Vec<Notification>,
    ) -> Option<Connection> {
        let connection = self.connections.shift_remove(&id)?;
        notes.push(Notification::attribute(
            EventKind::DisconnectedInput,
            connection.to_attribute,
        ));
        notes.push(Notification::node(
            EventKind::NodeConnectionChanged,
            connection.from_node,
        ));
        if connection.to_node != connection.from_node {
            notes.push(Notification::node(
                EventKind::NodeConnectionChanged,
                connection.to_node,
            ));
        }
        Some(connection)
    }

    /// Whether `source -> destination` would make a non-pass-through
    /// attribute depend on itself
    fn would_cycle(&self, source: AttributeId, destination: AttributeId) -> bool {
        let forward = self.reachable(destination, Flow::Downstream);
        if !forward.contains(&source) {
            return false;
        }
        let backward = self.reachable(source, Flow::Upstream);
        forward.intersection(&backward).any(|id| {
            self.attributes
                .get(id)
                .is_some_and(|a| !a.is_pass_through())
        })
    }

    /// Every attribute reachable from `start` (inclusive)
    pub(crate) fn reachable(&self, start: AttributeId, flow: Flow) -> HashSet<AttributeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            queue.extend(
                self.neighbors(current, flow)
                    .into_iter()
                    .filter(|n| !seen.contains(n)),
            );
        }
        seen
    }

    /// Direct dataflow neighbors, in connection order
    pub(crate) fn neighbors(&self, attribute: AttributeId, flow: Flow) -> Vec<AttributeId> {
        let Some(attr) = self.attributes.get(&attribute) else {
            return Vec::new();
        };
        match flow {
            Flow::Downstream => self
                .outputs(attribute)
                .chain(attr.affects.iter().copied())
                .collect(),
            Flow::Upstream => self
                .input(attribute)
                .into_iter()
                .chain(attr.affected_by.iter().copied())
                .collect(),
        }
    }

    /// Set the explicit value of an attribute and dirty everything
    /// downstream.
    ///
    /// Rejected if the attribute has an input connection, is computed by its
    /// node, or can't hold the value's type.
    pub fn set_value(&mut self, attribute: AttributeId, value: Value) -> Result<()> {
        let attr = self.attribute_ref(attribute)?;
        if self.input(attribute).is_some() || !attr.affected_by.is_empty() {
            return Err(GraphError::ReadOnlyAttribute(self.attribute_full_name(attribute)));
        }
        let found = value.type_tag();
        if !attr.specialization.accepts(found) {
            return Err(GraphError::ValueType {
                attribute: self.attribute_full_name(attribute),
                found,
            });
        }

        attr.cell.replace(value);
        self.attribute_mut(attribute)?.state = EvalState::Clean;

        let mut notes = vec![Notification::attribute(EventKind::ValueChanged, attribute)];
        self.propagate_dirty(&[attribute], false, &mut notes);
        self.observers.emit(&notes);
        Ok(())
    }

    /// Set one element of an array value (index 0 for scalars)
    pub fn set_value_at(&mut self, attribute: AttributeId, index: usize, element: Value) -> Result<()> {
        let mut value = self.attribute_ref(attribute)?.cell.get();
        value.set_at(index, element.clone()).map_err(|e| match e {
            crate::value::ElementError::OutOfRange => GraphError::IndexOutOfRange {
                attribute: self.attribute_full_name(attribute),
                index,
            },
            crate::value::ElementError::WrongType => GraphError::ValueType {
                attribute: self.attribute_full_name(attribute),
                found: element.type_tag(),
            },
        })?;
        self.set_value(attribute, value)
    }

    /// Get a node by ID
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(&node)
    }

    /// Get an attribute by ID
    pub fn attribute(&self, attribute: AttributeId) -> Option<&Attribute> {
        self.attributes.get(&attribute)
    }

    /// Attributes owned by `node`, in declaration order
    pub fn attributes_of(&self, node: NodeId) -> impl Iterator<Item = &Attribute> {
        self.nodes
            .get(&node)
            .into_iter()
            .flat_map(|n| n.attributes.iter())
            .filter_map(|a| self.attributes.get(a))
    }

    /// Same-node inputs `attribute` is computed from
    pub fn affected_by(&self, attribute: AttributeId) -> &[AttributeId] {
        self.attributes
            .get(&attribute)
            .map(|a| a.affected_by.as_slice())
            .unwrap_or_default()
    }

    /// Whether `attribute` delegates to its connections
    pub fn is_pass_through(&self, attribute: AttributeId) -> bool {
        self.attributes
            .get(&attribute)
            .is_some_and(Attribute::is_pass_through)
    }

    /// Current specialization of `attribute`
    pub fn specialization(&self, attribute: AttributeId) -> Option<&Specialization> {
        self.attributes.get(&attribute).map(|a| &a.specialization)
    }

    pub(crate) fn node_ref(&self, node: NodeId) -> Result<&Node> {
        self.nodes.get(&node).ok_or(GraphError::NodeNotFound(node))
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&node).ok_or(GraphError::NodeNotFound(node))
    }

    pub(crate) fn attribute_ref(&self, attribute: AttributeId) -> Result<&Attribute> {
        self.attributes
            .get(&attribute)
            .ok_or(GraphError::AttributeNotFound(attribute))
    }

    pub(crate) fn attribute_mut(&mut self, attribute: AttributeId) -> Result<&mut Attribute> {
        self.attributes
            .get_mut(&attribute)
            .ok_or(GraphError::AttributeNotFound(attribute))
    }

    /// All nodes, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes without a parent
    pub fn top_level_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.parent.is_none())
    }

    /// Number of nodes, nested ones included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All connections, in creation order
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connection feeding `attribute`
    pub fn input_connection(&self, attribute: AttributeId) -> Option<&Connection> {
        self.connections
            .values()
            .find(|c| c.to_attribute == attribute)
    }

    /// Source of `attribute`'s input connection
    pub fn input(&self, attribute: AttributeId) -> Option<AttributeId> {
        self.input_connection(attribute).map(|c| c.from_attribute)
    }

    /// Destinations fed by `attribute`, in connection order
    pub fn outputs(&self, attribute: AttributeId) -> impl Iterator<Item = AttributeId> + '_ {
        self.connections
            .values()
            .filter(move |c| c.from_attribute == attribute)
            .map(|c| c.to_attribute)
    }

    /// Connections touching any attribute of `node`
    pub fn node_connections(&self, node: NodeId) -> impl Iterator<Item = &Connection> {
        self.connections.values().filter(move |c| c.involves_node(node))
    }

    /// Whether any attribute of `node` is connected
    pub fn node_has_connections(&self, node: NodeId) -> bool {
        self.node_connections(node).next().is_some()
    }

    /// Furthest upstream non-pass-through attribute along the input chain
    pub fn input_source(&self, attribute: AttributeId) -> Option<AttributeId> {
        let mut seen = HashSet::from([attribute]);
        let mut current = attribute;
        let mut found = None;
        while let Some(up) = self.input(current) {
            if !seen.insert(up) {
                break;
            }
            if self.attributes.get(&up).is_some_and(|a| !a.is_pass_through()) {
                found = Some(up);
            }
            current = up;
        }
        found
    }

    /// Nearest concrete attribute behind a pass-through, searching both
    /// directions. A concrete attribute is its own answer.
    pub fn first_concrete_attribute(&self, attribute: AttributeId) -> Option<AttributeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([attribute]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let attr = self.attributes.get(&current)?;
            if !attr.is_pass_through() {
                return Some(current);
            }
            queue.extend(self.input(current));
            queue.extend(self.outputs(current));
        }
        None
    }

    /// Attribute of `node` named `name`
    pub fn find_child_attribute(&self, node: NodeId, name: &str) -> Result<AttributeId> {
        self.node_ref(node)?
            .attributes
            .iter()
            .copied()
            .find(|a| self.attributes.get(a).is_some_and(|a| a.name == name))
            .ok_or_else(|| {
                GraphError::UnknownPath(format!("{}{PATH_SEPARATOR}{name}", self.node_full_name(node)))
            })
    }

    /// Direct child of `parent` (or top-level node) named `name`
    pub fn find_child_node(&self, parent: Option<NodeId>, name: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|n| n.parent == parent && n.name == name)
            .map(|n| n.id)
    }

    /// Node by full name, e.g. `group.add`
    pub fn find_node(&self, path: &str) -> Result<NodeId> {
        let mut current = None;
        for part in path.split(PATH_SEPARATOR) {
            current = Some(
                self.find_child_node(current, part)
                    .ok_or_else(|| GraphError::UnknownPath(path.to_string()))?,
            );
        }
        current.ok_or_else(|| GraphError::UnknownPath(path.to_string()))
    }

    /// Attribute by full name, e.g. `group.add.out`
    pub fn find_attribute(&self, path: &str) -> Result<AttributeId> {
        let (node_path, name) = path
            .rsplit_once(PATH_SEPARATOR)
            .ok_or_else(|| GraphError::UnknownPath(path.to_string()))?;
        let node = self.find_node(node_path)?;
        self.find_child_attribute(node, name)
            .map_err(|_| GraphError::UnknownPath(path.to_string()))
    }

    /// Dotted path from the top level down to `node`
    pub fn node_full_name(&self, node: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(n) = self.nodes.get(&id) else {
                break;
            };
            parts.push(n.name.as_str());
            current = n.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// `node.attribute` path of an attribute
    pub fn attribute_full_name(&self, attribute: AttributeId) -> String {
        match self.attributes.get(&attribute) {
            Some(attr) => format!("{}{PATH_SEPARATOR}{}", self.node_full_name(attr.node), attr.name),
            None => format!("{:?}", attribute.0),
        }
    }

    /// Selected nodes
    pub fn selection(&self) -> &[NodeId] {
        &self.selection
    }

    /// Replace the selection; unknown ids are ignored
    pub fn select_nodes(&mut self, nodes: impl IntoIterator<Item = NodeId>) {
        self.selection = nodes
            .into_iter()
            .filter(|n| self.nodes.contains_key(n))
            .collect();
        self.observers
            .emit(&[Notification::new(EventKind::SelectionChanged, Subject::Global)]);
    }

    /// Register `callback` for `kind` events about `subject`. The
    /// registration lasts as long as the returned guard.
    pub fn observe(&mut self, kind: EventKind, subject: Subject, callback: Callback) -> Observer {
        self.observers.subscribe(kind, subject, callback)
    }

    /// Value changes of one attribute
    pub fn add_attribute_value_changed_observer(
        &mut self,
        attribute: AttributeId,
        callback: Callback,
    ) -> Observer {
        self.observe(EventKind::ValueChanged, Subject::Attribute(attribute), callback)
    }

    /// An attribute receiving an input
    pub fn add_connected_input_observer(&mut self, attribute: AttributeId, callback: Callback) -> Observer {
        self.observe(EventKind::ConnectedInput, Subject::Attribute(attribute), callback)
    }

    /// An attribute losing its input
    pub fn add_disconnected_input_observer(
        &mut self,
        attribute: AttributeId,
        callback: Callback,
    ) -> Observer {
        self.observe(EventKind::DisconnectedInput, Subject::Attribute(attribute), callback)
    }

    /// Renames of a node or attribute
    pub fn add_name_changed_observer(&mut self, subject: Subject, callback: Callback) -> Observer {
        self.observe(EventKind::NameChanged, subject, callback)
    }

    /// Connection changes on any attribute of one node
    pub fn add_node_connection_changed_observer(&mut self, node: NodeId, callback: Callback) -> Observer {
        self.observe(EventKind::NodeConnectionChanged, Subject::Node(node), callback)
    }

    /// Specialization changes of one attribute
    pub fn add_attribute_specialized_observer(
        &mut self,
        attribute: AttributeId,
        callback: Callback,
    ) -> Observer {
        self.observe(EventKind::SpecializationChanged, Subject::Attribute(attribute), callback)
    }

    /// A network starting to load
    pub fn add_network_loading_observer(&mut self, callback: Callback) -> Observer {
        self.observe(EventKind::NetworkLoading, Subject::Global, callback)
    }

    /// A network finished loading
    pub fn add_network_loaded_observer(&mut self, callback: Callback) -> Observer {
        self.observe(EventKind::NetworkLoaded, Subject::Global, callback)
    }

    /// Selection changes
    pub fn add_selection_changed_observer(&mut self, callback: Callback) -> Observer {
        self.observe(EventKind::SelectionChanged, Subject::Global, callback)
    }

    /// Observer registry
    pub fn observers(&self) -> &ObserverBus {
        &self.observers
    }

    /// Remove every node, connection and selection entry
    pub(crate) fn clear(&mut self) {
        let nodes: Vec<NodeId> = self.nodes.keys().copied().collect();
        let attributes: Vec<AttributeId> = self.attributes.keys().copied().collect();
        self.external.stop_all();
        self.connections.clear();
        self.attributes.clear();
        self.nodes.clear();
        self.selection.clear();
        for id in nodes {
            self.observers.forget_subject(Subject::Node(id));
        }
        for id in attributes {
            self.observers.forget_subject(Subject::Attribute(id));
        }
    }

    /// Empty network sharing this one's classes, with no observers
    pub(crate) fn staging(&self, name: impl Into<String>) -> Network {
        let mut staged = Network::new(name, NodeClassRegistry::new());
        staged.classes = Arc::clone(&self.classes);
        staged
    }

    /// Replace the contents with those of `staged`, keeping this network's
    /// observers and driver link
    pub(crate) fn adopt(&mut self, staged: Network) {
        self.clear();
        self.name = staged.name;
        self.nodes = staged.nodes;
        self.attributes = staged.attributes;
        self.connections = staged.connections;
        self.selection = staged.selection;
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::with_builtins("Untitled")
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("attributes", &self.attributes.len())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::NoopLogic;
    use crate::node::NodeCategory;
    use crate::value::TypeTag;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Notification>>>, Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, Box::new(move |n: &Notification| sink.lock().push(*n)))
    }

    fn float_node(network: &mut Network, name: &str) -> (NodeId, AttributeId) {
        let node = network.add_node("Float", name).unwrap();
        let out = network.find_child_attribute(node, "out").unwrap();
        (node, out)
    }

    #[test]
    fn test_unique_sibling_names() {
        let mut network = Network::with_builtins("test");
        let a = network.add_node("Float", "value").unwrap();
        let b = network.add_node("Float", "value").unwrap();
        let c = network.add_node("Float", "my.value").unwrap();

        assert_eq!(network.node(a).unwrap().name(), "value");
        assert_eq!(network.node(b).unwrap().name(), "value1");
        assert_eq!(network.node(c).unwrap().name(), "my_value");
        assert_eq!(network.find_node("value1").unwrap(), b);
    }

    #[test]
    fn test_full_names_of_nested_nodes() {
        let mut network = Network::with_builtins("test");
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let inner = network.add_node_in(group, "Add", "add").unwrap();
        let out = network.find_child_attribute(inner, "out").unwrap();

        assert_eq!(network.attribute_full_name(out), "group.add.out");
        assert_eq!(network.find_attribute("group.add.out").unwrap(), out);
        assert!(matches!(
            network.find_attribute("group.missing.out"),
            Err(GraphError::UnknownPath(_))
        ));
    }

    #[test]
    fn test_invalid_class() {
        let mut network = Network::with_builtins("test");
        let err = network.add_node("Teapot", "t").unwrap_err();
        assert!(matches!(err, GraphError::InvalidClass(_)));
        assert_eq!(network.node_count(), 0);
    }

    #[test]
    fn test_failed_default_preset_leaves_no_node() {
        let mut network = Network::with_builtins("test");
        network.register_class(
            NodeClass::new("Broken", NodeCategory::Custom, Arc::new(NoopLogic))
                .with_attribute(AttributeTemplate::input("in", AttributeClass::Numeric))
                .with_default_preset("missing"),
        );
        let (log, callback) = recorder();
        let _observer = network.observe(EventKind::NodeAdded, Subject::Global, callback);

        let err = network.add_node("Broken", "broken").unwrap_err();
        assert!(matches!(err, GraphError::UnknownPreset { .. }));
        assert_eq!(network.node_count(), 0);
        assert!(network.attributes.is_empty());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_connect_replaces_input() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let (_, b) = float_node(&mut network, "b");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();

        network.connect(a, in0).unwrap();
        let (log, callback) = recorder();
        let _observer = network.observe(EventKind::DisconnectedInput, Subject::Attribute(in0), callback);
        network.connect(b, in0).unwrap();

        assert_eq!(network.input(in0), Some(b));
        assert_eq!(network.connection_count(), 1);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_connect_rejections() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();

        assert!(matches!(
            network.connect(a, a),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            network.connect(in0, sum),
            Err(GraphError::OutputDestination(_))
        ));

        network.connect(a, in0).unwrap();
        assert!(matches!(
            network.connect(a, in0),
            Err(GraphError::AlreadyConnected { .. })
        ));
        assert!(matches!(
            network.connect(sum, in0),
            Err(GraphError::CycleDetected { .. })
        ));
        assert_eq!(network.input(in0), Some(a));
    }

    #[test]
    fn test_cycle_through_two_nodes() {
        let mut network = Network::with_builtins("test");
        let first = network.add_node("Add", "first").unwrap();
        let second = network.add_node("Add", "second").unwrap();
        let first_out = network.find_child_attribute(first, "out").unwrap();
        let first_in = network.find_child_attribute(first, "in0").unwrap();
        let second_out = network.find_child_attribute(second, "out").unwrap();
        let second_in = network.find_child_attribute(second, "in0").unwrap();

        network.connect(first_out, second_in).unwrap();
        let err = network.connect(second_out, first_in).unwrap_err();
        assert!(matches!(err, GraphError::CycleDetected { .. }));
    }

    #[test]
    fn test_pass_through_loop_is_allowed() {
        let mut network = Network::with_builtins("test");
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let p = network.add_attribute(group, "p", AttributeClass::PassThrough).unwrap();
        let q = network.add_attribute(group, "q", AttributeClass::PassThrough).unwrap();

        network.connect(p, q).unwrap();
        network.connect(q, p).unwrap();
        assert_eq!(network.connection_count(), 2);
        assert_eq!(network.input_source(p), None);
    }

    #[test]
    fn test_disconnect_reverts_to_explicit_value() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();

        network.set_value(in0, Value::Int(7)).unwrap();
        network.set_value(a, Value::Float(3.0)).unwrap();
        network.connect(a, in0).unwrap();
        assert_eq!(network.value(in0).unwrap(), Value::Float(3.0));
        let narrowed = network.attribute(in0).unwrap().specialization().clone();
        assert_eq!(narrowed, Specialization::single(TypeTag::Float));

        assert!(network.disconnect(in0).unwrap());
        assert_eq!(network.value(in0).unwrap(), Value::Int(7));
        assert_eq!(network.attribute(in0).unwrap().specialization(), &narrowed);
        assert!(!network.disconnect(in0).unwrap());
    }

    #[test]
    fn test_reconnect_notification_order() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let (_, b) = float_node(&mut network, "b");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        network.connect(a, in0).unwrap();

        let (log, callback) = recorder();
        let sink = Arc::clone(&log);
        let mut observers = vec![network.observe(
            EventKind::DisconnectedInput,
            Subject::Attribute(in0),
            callback,
        )];
        for kind in [EventKind::ConnectedInput, EventKind::ValueChanged] {
            let sink = Arc::clone(&sink);
            observers.push(network.observe(
                kind,
                Subject::Attribute(in0),
                Box::new(move |n: &Notification| sink.lock().push(*n)),
            ));
        }
        network.connect(b, in0).unwrap();

        let kinds: Vec<EventKind> = log.lock().iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::DisconnectedInput,
                EventKind::ConnectedInput,
                EventKind::ValueChanged
            ]
        );
        drop(observers);
    }

    #[test]
    fn test_delete_source_reverts_destination_value() {
        let mut network = Network::with_builtins("test");
        let (a_node, a) = float_node(&mut network, "a");
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let values = network.add_numeric_attribute(group, "values").unwrap();
        network
            .set_value(values, Value::FloatArray(vec![1.0, 2.0]))
            .unwrap();

        network.set_value(a, Value::Float(8.0)).unwrap();
        network.connect(a, values).unwrap();
        assert_eq!(network.value(values).unwrap(), Value::Float(8.0));

        network.delete_node(a_node).unwrap();
        assert_eq!(network.input(values), None);
        assert_eq!(
            network.value(values).unwrap(),
            Value::FloatArray(vec![1.0, 2.0])
        );
    }

    #[test]
    fn test_set_value_rules() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();

        assert!(matches!(
            network.set_value(sum, Value::Float(1.0)),
            Err(GraphError::ReadOnlyAttribute(_))
        ));
        assert!(matches!(
            network.set_value(a, Value::Int(1)),
            Err(GraphError::ValueType { found: TypeTag::Int, .. })
        ));

        network.connect(a, in0).unwrap();
        assert!(matches!(
            network.set_value(in0, Value::Float(1.0)),
            Err(GraphError::ReadOnlyAttribute(_))
        ));
    }

    #[test]
    fn test_set_value_without_consumers_dirties_nothing() {
        let mut network = Network::with_builtins("test");
        let (_, a) = float_node(&mut network, "a");
        let add = network.add_node("Add", "add").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();
        network.value(sum).unwrap();

        network.set_value(a, Value::Float(5.0)).unwrap();
        assert!(network.attributes.values().all(|attr| attr.is_clean()));
    }

    #[test]
    fn test_set_value_at() {
        let mut network = Network::with_builtins("test");
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let values = network.add_numeric_attribute(group, "values").unwrap();
        network
            .set_value(values, Value::FloatArray(vec![0.0, 1.0, 2.0]))
            .unwrap();

        network.set_value_at(values, 1, Value::Float(9.0)).unwrap();
        assert_eq!(
            network.value(values).unwrap(),
            Value::FloatArray(vec![0.0, 9.0, 2.0])
        );
        assert!(matches!(
            network.set_value_at(values, 3, Value::Float(1.0)),
            Err(GraphError::IndexOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_delete_node_notifies_each_destination_once() {
        let mut network = Network::with_builtins("test");
        let (a_node, a) = float_node(&mut network, "a");
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let in1 = network.find_child_attribute(add, "in1").unwrap();
        network.connect(a, in0).unwrap();
        network.connect(a, in1).unwrap();

        let (log, callback) = recorder();
        let _observer = network.observe(EventKind::DisconnectedInput, Subject::Global, callback);
        network.delete_node(a_node).unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert!(log.contains(&Notification::attribute(EventKind::DisconnectedInput, in0)));
        assert!(log.contains(&Notification::attribute(EventKind::DisconnectedInput, in1)));
        assert_eq!(network.connection_count(), 0);
        assert!(network.attribute(a).is_none());
    }

    #[test]
    fn test_delete_container_removes_children() {
        let mut network = Network::with_builtins("test");
        let group = network.add_node("CollapsedNode", "group").unwrap();
        let inner = network.add_node_in(group, "Float", "inner").unwrap();
        let inner_out = network.find_child_attribute(inner, "out").unwrap();
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        network.connect(inner_out, in0).unwrap();

        network.delete_node(group).unwrap();
        assert!(network.node(inner).is_none());
        assert_eq!(network.input(in0), None);
        assert_eq!(network.node_count(), 1);
    }

    #[test]
    fn test_dynamic_attributes() {
        let mut network = Network::with_builtins("test");
        let add = network.add_node("Add", "add").unwrap();
        assert!(matches!(
            network.add_numeric_attribute(add, "extra"),
            Err(GraphError::StaticNode(_))
        ));

        let group = network.add_node("CollapsedNode", "group").unwrap();
        let extra = network.add_numeric_attribute(group, "extra").unwrap();
        assert!(matches!(
            network.add_numeric_attribute(group, "extra"),
            Err(GraphError::DuplicateName { .. })
        ));
        network.rename_attribute(extra, "renamed").unwrap();
        assert_eq!(network.find_attribute("group.renamed").unwrap(), extra);

        network.delete_attribute(extra).unwrap();
        assert!(network.attribute(extra).is_none());
        assert!(network.node(group).unwrap().attributes().is_empty());
    }

    #[test]
    fn test_selection() {
        let mut network = Network::with_builtins("test");
        let (a, _) = float_node(&mut network, "a");
        let (log, callback) = recorder();
        let _observer = network.add_selection_changed_observer(callback);

        network.select_nodes([a, NodeId::new()]);
        assert_eq!(network.selection(), &[a]);
        network.delete_node(a).unwrap();
        assert!(network.selection().is_empty());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_rename_node() {
        let mut network = Network::with_builtins("test");
        let (a, _) = float_node(&mut network, "a");
        let (b, _) = float_node(&mut network, "b");
        assert_eq!(network.rename_node(b, "a").unwrap(), "a1");
        assert_eq!(network.rename_node(a, "a").unwrap(), "a");
    }
}
