// SPDX-License-Identifier: MIT OR Apache-2.0
//! Type specialization of generic attributes.
//!
//! A generic attribute starts out accepting several concrete types. Each
//! connection intersects the sets of its two ends, and node links carry the
//! narrowing across a node (an `Add` node whose first input became `Float`
//! makes its second input and output `Float` as well). Narrowing is worked
//! out on a tentative copy and only committed once the whole connected
//! component agrees, so a conflict leaves the network untouched.

use crate::attribute::{Attribute, AttributeId};
use crate::connection::ConnectionId;
use crate::error::{GraphError, Result};
use crate::network::Network;
use crate::node::NodeId;
use crate::observer::{EventKind, Notification};
use crate::value::TypeTag;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

/// Set of concrete types an attribute may hold; empty means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Specialization(IndexSet<TypeTag>);

impl Specialization {
    /// Accepts every type
    pub fn any() -> Self {
        Self(IndexSet::new())
    }

    /// Accepts exactly `tag`
    pub fn single(tag: TypeTag) -> Self {
        Self(IndexSet::from([tag]))
    }

    /// Accepts the given tags, in preference order
    pub fn of(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        Self(tags.into_iter().collect())
    }

    /// Whether no constraint applies
    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of concrete types; 0 for "any"
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `tag` is listed explicitly
    pub fn contains(&self, tag: TypeTag) -> bool {
        self.0.contains(&tag)
    }

    /// Whether a value of type `tag` fits
    pub fn accepts(&self, tag: TypeTag) -> bool {
        self.is_any() || self.contains(tag)
    }

    /// Preferred type
    pub fn first(&self) -> Option<TypeTag> {
        self.0.first().copied()
    }

    /// The type, when exactly one remains
    pub fn resolved(&self) -> Option<TypeTag> {
        if self.0.len() == 1 {
            self.first()
        } else {
            None
        }
    }

    /// Listed types in preference order
    pub fn iter(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.0.iter().copied()
    }

    /// Common types of both sets, keeping `self`'s order.
    ///
    /// `None` when both are constrained and share nothing.
    pub fn intersect(&self, other: &Specialization) -> Option<Specialization> {
        if other.is_any() {
            return Some(self.clone());
        }
        if self.is_any() {
            return Some(other.clone());
        }
        let common: IndexSet<TypeTag> = self.0.intersection(&other.0).copied().collect();
        (!common.is_empty()).then_some(Self(common))
    }
}

impl fmt::Display for Specialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("any");
        }
        let names: Vec<&str> = self.0.iter().map(|t| t.name()).collect();
        f.write_str(&names.join("|"))
    }
}

impl FromIterator<TypeTag> for Specialization {
    fn from_iter<I: IntoIterator<Item = TypeTag>>(iter: I) -> Self {
        Self::of(iter)
    }
}

/// How narrowing one attribute of a node constrains a linked one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRule {
    /// Both attributes hold the same type
    Same,
    /// `(a, b)` pairs: when the first end holds `a` the second holds `b`
    Map(Vec<(TypeTag, TypeTag)>),
}

impl LinkRule {
    /// Constraint on the far end given `near`.
    ///
    /// `forward` is true when `near` is the link's first attribute.
    pub(crate) fn carry(&self, near: &Specialization, forward: bool) -> Option<Specialization> {
        if near.is_any() {
            return Some(Specialization::any());
        }
        match self {
            Self::Same => Some(near.clone()),
            Self::Map(pairs) => {
                let mapped: Specialization = pairs
                    .iter()
                    .filter_map(|&(a, b)| {
                        let (from, to) = if forward { (a, b) } else { (b, a) };
                        near.contains(from).then_some(to)
                    })
                    .collect();
                (!mapped.is_any()).then_some(mapped)
            }
        }
    }
}

/// Proposed specialization per attribute
pub(crate) type Narrowing = IndexMap<AttributeId, Specialization>;

impl Network {
    /// Work out every specialization change `source -> destination` implies.
    ///
    /// `replaced` is the destination's current input edge, ignored because
    /// the new edge takes its place.
    pub(crate) fn resolve_connection(
        &self,
        source: AttributeId,
        destination: AttributeId,
        replaced: Option<ConnectionId>,
    ) -> Result<Narrowing> {
        let joined = self
            .attribute_ref(source)?
            .specialization
            .intersect(&self.attribute_ref(destination)?.specialization)
            .ok_or_else(|| self.type_mismatch(source, destination))?;

        let mut tentative = Narrowing::new();
        tentative.insert(source, joined.clone());
        tentative.insert(destination, joined);
        self.narrow(&mut tentative, vec![source, destination], Some((source, destination)), replaced)?;

        tentative.retain(|id, spec| {
            self.attributes
                .get(id)
                .is_some_and(|a| a.specialization != *spec)
        });
        Ok(tentative)
    }

    /// Spread narrowing from `seeds` until nothing changes
    fn narrow(
        &self,
        tentative: &mut Narrowing,
        seeds: Vec<AttributeId>,
        extra_edge: Option<(AttributeId, AttributeId)>,
        skip: Option<ConnectionId>,
    ) -> Result<()> {
        let mut queue: VecDeque<AttributeId> = seeds.into();
        let mut visited = HashSet::new();

        while let Some(current) = queue.pop_front() {
            visited.insert(current);
            let spec = self.tentative_spec(tentative, current);
            if spec.is_any() {
                continue;
            }

            for (neighbor, link) in self.specialization_neighbors(current, extra_edge, skip) {
                let incoming = match link {
                    None => Some(spec.clone()),
                    Some((rule, forward)) => rule.carry(&spec, forward),
                }
                .ok_or_else(|| self.type_mismatch(current, neighbor))?;
                if incoming.is_any() {
                    continue;
                }

                let existing = self.tentative_spec(tentative, neighbor);
                let narrowed = existing
                    .intersect(&incoming)
                    .ok_or_else(|| self.type_mismatch(current, neighbor))?;
                if narrowed != existing || !visited.contains(&neighbor) {
                    tentative.insert(neighbor, narrowed);
                    queue.push_back(neighbor);
                }
            }
        }
        Ok(())
    }

    fn tentative_spec(&self, tentative: &Narrowing, attribute: AttributeId) -> Specialization {
        tentative.get(&attribute).cloned().unwrap_or_else(|| {
            self.attributes
                .get(&attribute)
                .map(|a| a.specialization.clone())
                .unwrap_or_default()
        })
    }

    /// Attributes whose specialization is tied to `attribute`, with the link
    /// rule and direction for node links (`None` for connections)
    fn specialization_neighbors(
        &self,
        attribute: AttributeId,
        extra_edge: Option<(AttributeId, AttributeId)>,
        skip: Option<ConnectionId>,
    ) -> Vec<(AttributeId, Option<(&LinkRule, bool)>)> {
        let mut neighbors: Vec<(AttributeId, Option<(&LinkRule, bool)>)> = self
            .connections
            .values()
            .filter(|c| Some(c.id) != skip)
            .filter_map(|c| c.other_end(attribute))
            .map(|other| (other, None))
            .collect();

        if let Some((a, b)) = extra_edge {
            if a == attribute {
                neighbors.push((b, None));
            } else if b == attribute {
                neighbors.push((a, None));
            }
        }

        let Some(node) = self.attributes.get(&attribute).and_then(|a| self.nodes.get(&a.node)) else {
            return neighbors;
        };
        for link in &node.links {
            if link.a == attribute {
                neighbors.push((link.b, Some((&link.rule, true))));
            } else if link.b == attribute {
                neighbors.push((link.a, Some((&link.rule, false))));
            }
        }
        neighbors
    }

    /// Attributes reachable from `start` through connections and node links
    fn specialization_component(&self, start: &[AttributeId]) -> Vec<AttributeId> {
        let mut seen: IndexSet<AttributeId> = IndexSet::new();
        let mut queue: VecDeque<AttributeId> = start.iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for (neighbor, _) in self.specialization_neighbors(current, None, None) {
                if !seen.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Recompute a component from base specializations under the current
    /// connections. `base` supplies the starting set per attribute.
    fn recompute_component(
        &self,
        start: &[AttributeId],
        base: impl Fn(&Attribute) -> Specialization,
    ) -> Result<Narrowing> {
        let component = self.specialization_component(start);
        let mut tentative: Narrowing = component
            .iter()
            .filter_map(|id| self.attributes.get(id).map(|a| (*id, base(a))))
            .collect();
        self.narrow(&mut tentative, component, None, None)?;
        tentative.retain(|id, spec| {
            self.attributes
                .get(id)
                .is_some_and(|a| a.specialization != *spec)
        });
        Ok(tentative)
    }

    /// Commit a narrowing. Values that no longer fit are reset to the
    /// default of the preferred type, except on attributes reading through
    /// an input: their own value is kept for when they are disconnected.
    /// Returns the changed attributes.
    pub(crate) fn apply_specializations(
        &mut self,
        narrowing: Narrowing,
        notes: &mut Vec<Notification>,
    ) -> Vec<AttributeId> {
        let mut changed = Vec::new();
        for (id, spec) in narrowing {
            let connected = self.input(id).is_some();
            let Some(attr) = self.attributes.get_mut(&id) else {
                continue;
            };
            if attr.specialization == spec {
                continue;
            }

            let fits = attr.cell.with(|v| spec.accepts(v.type_tag()));
            if !fits && !connected {
                if let Some(tag) = spec.first() {
                    attr.cell.replace(tag.default_value());
                }
            }
            tracing::trace!(attribute = %attr.name, specialization = %spec, "Specialization changed");
            attr.specialization = spec;
            notes.push(Notification::attribute(EventKind::SpecializationChanged, id));
            changed.push(id);
        }
        changed
    }

    /// Recompute the specialization of `attribute`'s component from the
    /// declared types, undoing narrowing left behind by removed connections
    pub fn reset_specialization(&mut self, attribute: AttributeId) -> Result<()> {
        self.attribute_ref(attribute)?;
        let narrowing = self.recompute_component(&[attribute], Attribute::base_specialization)?;

        let mut notes = Vec::new();
        let changed = self.apply_specializations(narrowing, &mut notes);
        self.propagate_dirty(&changed, true, &mut notes);
        self.observers.emit(&notes);
        Ok(())
    }

    /// Force a named set of types onto a node's generic attributes, or clear
    /// the preset with `None`. Only allowed while the node is unconnected.
    pub fn enable_specialization_preset(&mut self, node: NodeId, preset: Option<&str>) -> Result<()> {
        let mut notes = Vec::new();
        self.apply_preset(node, preset, &mut notes)?;
        tracing::debug!(node = %self.node_full_name(node), preset = ?preset, "Specialization preset enabled");
        self.observers.emit(&notes);
        Ok(())
    }

    /// Validate and commit a preset, recording notifications in `notes`.
    /// Nothing changes on error.
    pub(crate) fn apply_preset(
        &mut self,
        node: NodeId,
        preset: Option<&str>,
        notes: &mut Vec<Notification>,
    ) -> Result<()> {
        let target = self.node_ref(node)?;
        if self.node_has_connections(node) {
            return Err(GraphError::PresetLocked(self.node_full_name(node)));
        }
        let chosen = match preset {
            Some(name) => Some(
                target
                    .presets
                    .iter()
                    .find(|p| p.name == name)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownPreset {
                        node: self.node_full_name(node),
                        preset: name.to_string(),
                    })?,
            ),
            None => None,
        };

        let forced = |attr: &Attribute| -> Option<TypeTag> {
            chosen.as_ref().and_then(|p| p.type_for(&attr.name))
        };
        let narrowing = self.recompute_component(&target.attributes, |attr| {
            if attr.node == node {
                forced(attr).map_or_else(|| attr.allowed.clone(), Specialization::single)
            } else {
                attr.base_specialization()
            }
        })?;

        // Validated; commit overrides, then types
        let members = target.attributes.clone();
        for id in &members {
            if let Some(attr) = self.attributes.get_mut(id) {
                let tag = chosen.as_ref().and_then(|p| p.type_for(&attr.name));
                attr.override_tag = tag;
            }
        }
        if let Some(target) = self.nodes.get_mut(&node) {
            target.enabled_preset = chosen.map(|p| p.name);
        }

        notes.push(Notification::node(EventKind::PresetChanged, node));
        let changed = self.apply_specializations(narrowing, notes);
        self.propagate_dirty(&changed, true, notes);
        Ok(())
    }

    fn type_mismatch(&self, source: AttributeId, destination: AttributeId) -> GraphError {
        GraphError::TypeMismatch {
            source_attribute: self.attribute_full_name(source),
            destination: self.attribute_full_name(destination),
        }
    }
}
