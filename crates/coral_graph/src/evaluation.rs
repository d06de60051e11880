// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lazy evaluation.
//!
//! Writes never compute anything: they only mark the downstream closure
//! Dirty. Reading an attribute cleans its dirty upstream closure in
//! dependency order, asking each node to recompute the outputs that were
//! read.

use crate::attribute::{AttributeId, EvalState, ValueCell};
use crate::error::{EvaluationError, GraphError, Result};
use crate::network::{Flow, Network};
use crate::node::NodeId;
use crate::nodes::container::{CURRENT_INDEX, INDEX_RANGE};
use crate::observer::{EventKind, Notification};
use crate::specialization::Specialization;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::time::Instant;

/// Where an enclosing loop container is in its iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    /// About to run this many iterations
    Start(usize),
    /// The iteration at this position of the index range was just computed
    Step(usize),
    /// Every iteration ran
    End,
}

/// Compute logic of a node class
pub trait NodeLogic: Send + Sync {
    /// Recompute `ctx.target()` (and any other outputs it likes) from the
    /// node's inputs
    fn update(&self, ctx: &mut UpdateContext) -> std::result::Result<(), EvaluationError>;

    /// Follow the iterations of the loop container holding the node.
    ///
    /// `ctx` carries the node's inputs and its current outputs; outputs set
    /// here are stored.
    fn loop_step(
        &self,
        _step: LoopStep,
        _ctx: &mut UpdateContext,
    ) -> std::result::Result<(), EvaluationError> {
        Ok(())
    }
}

/// Logic for nodes that never compute (constants, containers)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogic;

impl NodeLogic for NoopLogic {
    fn update(&self, _ctx: &mut UpdateContext) -> std::result::Result<(), EvaluationError> {
        Ok(())
    }
}

/// Inputs and outputs of one recompute
#[derive(Debug, Clone, Default)]
pub struct UpdateContext {
    node: String,
    target: String,
    inputs: IndexMap<String, Value>,
    specializations: IndexMap<String, Specialization>,
    outputs: IndexMap<String, Value>,
}

impl UpdateContext {
    /// Create a context for recomputing `target` on `node`
    pub fn new(node: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            target: target.into(),
            ..Self::default()
        }
    }

    /// Add an input value
    pub fn with_input(mut self, name: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Add an attribute specialization
    pub fn with_specialization(mut self, name: impl Into<String>, spec: Specialization) -> Self {
        self.specializations.insert(name.into(), spec);
        self
    }

    /// Full name of the node being updated
    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// Name of the output being recomputed
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Effective value of an input
    pub fn input(&self, name: &str) -> std::result::Result<&Value, EvaluationError> {
        self.inputs
            .get(name)
            .ok_or_else(|| EvaluationError::MissingInput(name.to_string()))
    }

    /// Current specialization of one of the node's attributes
    pub fn specialization(&self, name: &str) -> Option<&Specialization> {
        self.specializations.get(name)
    }

    /// Store a computed output
    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    /// Output stored so far
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }
}

impl Network {
    /// Effective value of an attribute, recomputing whatever is stale
    pub fn value(&mut self, attribute: AttributeId) -> Result<Value> {
        self.ensure_clean(attribute)?;
        Ok(self.source_cell(attribute)?.get())
    }

    /// Effective value without recomputing; may be stale
    pub fn out_value(&self, attribute: AttributeId) -> Result<Value> {
        Ok(self.source_cell(attribute)?.get())
    }

    /// Shared handle to the cell the attribute currently reads from
    pub fn value_cell(&self, attribute: AttributeId) -> Result<ValueCell> {
        self.source_cell(attribute).cloned()
    }

    /// Whether the attribute's value is up to date
    pub fn is_clean(&self, attribute: AttributeId) -> Result<bool> {
        Ok(self.attribute_ref(attribute)?.is_clean())
    }

    /// Force a recompute of `attribute` and dirty what depends on it
    pub fn update(&mut self, attribute: AttributeId) -> Result<()> {
        self.attribute_mut(attribute)?.state = EvalState::Dirty;
        self.ensure_clean(attribute)?;

        let mut notes = vec![Notification::attribute(EventKind::ValueChanged, attribute)];
        self.propagate_dirty(&[attribute], false, &mut notes);
        self.observers.emit(&notes);
        Ok(())
    }

    /// Mark `attribute` and everything downstream Dirty
    pub fn mark_dirty(&mut self, attribute: AttributeId) -> Result<()> {
        self.attribute_ref(attribute)?;
        let mut notes = Vec::new();
        self.propagate_dirty(&[attribute], true, &mut notes);
        self.observers.emit(&notes);
        Ok(())
    }

    /// Clean the dirty upstream closure of `attribute`, producers first
    pub(crate) fn ensure_clean(&mut self, attribute: AttributeId) -> Result<()> {
        self.attribute_ref(attribute)?;
        for id in self.dirty_closure(attribute) {
            self.clean_one(id)?;
        }
        Ok(())
    }

    /// Dirty attributes `attribute` depends on, in post-order
    fn dirty_closure(&self, attribute: AttributeId) -> Vec<AttributeId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(attribute, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            let Some(attr) = self.attributes.get(&id) else {
                continue;
            };
            if attr.is_clean() {
                continue;
            }
            stack.push((id, true));
            for up in self.neighbors(id, Flow::Upstream) {
                if !visited.contains(&up) {
                    stack.push((up, false));
                }
            }
        }
        order
    }

    fn clean_one(&mut self, id: AttributeId) -> Result<()> {
        let attr = self.attribute_ref(id)?;
        let node = self.node_ref(attr.node)?;
        let computes = attr.is_output() && !attr.affected_by.is_empty() && node.update_enabled;
        if !computes {
            self.attribute_mut(id)?.state = EvalState::Clean;
            return Ok(());
        }

        let node_id = node.id;
        if node.iterates {
            return self.run_loop(node_id, id);
        }
        let logic = node.logic.clone();
        let mut ctx = self.update_context(node_id, attr.name.clone())?;
        let started = Instant::now();
        if let Err(source) = logic.update(&mut ctx) {
            let attribute = self.attribute_full_name(id);
            tracing::warn!(%attribute, error = %source, "Recompute failed");
            return Err(GraphError::RecomputeFailure { attribute, source });
        }
        let elapsed = started.elapsed();

        self.store_outputs(node_id, &mut ctx)?;
        let attr = self.attribute_mut(id)?;
        attr.state = EvalState::Clean;
        attr.last_compute = Some(elapsed);
        tracing::trace!(node = %ctx.node, target = %ctx.target, ?elapsed, "Recomputed");
        Ok(())
    }

    fn update_context(&self, node: NodeId, target: String) -> Result<UpdateContext> {
        let mut ctx = UpdateContext::new(self.node_full_name(node), target);
        for id in &self.node_ref(node)?.attributes {
            let attr = self.attribute_ref(*id)?;
            ctx.specializations
                .insert(attr.name.clone(), attr.specialization.clone());
            if attr.is_input() {
                ctx.inputs
                    .insert(attr.name.clone(), self.source_cell(*id)?.get());
            }
        }
        Ok(ctx)
    }

    /// Write the outputs a node computed into their cells
    fn store_outputs(&self, node: NodeId, ctx: &mut UpdateContext) -> Result<()> {
        for (name, value) in ctx.outputs.drain(..) {
            let Ok(output) = self.find_child_attribute(node, &name) else {
                tracing::warn!(node = %ctx.node, output = %name, "Node wrote an unknown output");
                continue;
            };
            self.attribute_ref(output)?.cell.replace(value);
        }
        Ok(())
    }

    /// Run the children of the loop container `node` once per entry of its
    /// index range. `target` is left reading the last iteration, unless an
    /// iterator child gathered every iteration.
    fn run_loop(&mut self, node: NodeId, target: AttributeId) -> Result<()> {
        let range_id = self.find_child_attribute(node, INDEX_RANGE)?;
        let index_id = self.find_child_attribute(node, CURRENT_INDEX)?;
        let range = match self.source_cell(range_id)?.get() {
            Value::IntArray(indices) => indices,
            other => {
                return Err(GraphError::RecomputeFailure {
                    attribute: self.attribute_full_name(target),
                    source: EvaluationError::TypeMismatch {
                        attribute: INDEX_RANGE.to_string(),
                        found: other.type_tag(),
                    },
                })
            }
        };

        let chain = self.loop_chain(node, target);
        let mut iterators = Vec::new();
        for id in &chain {
            let owner = self.attribute_ref(*id)?.node;
            if self.node_ref(owner)?.parent == Some(node) && !iterators.contains(&owner) {
                iterators.push(owner);
            }
        }

        let index_cell = self.attribute_ref(index_id)?.cell.clone();
        let iterations = range.len();
        let started = Instant::now();
        self.step_iterators(&iterators, LoopStep::Start(iterations), target)?;
        for (position, index) in range.into_iter().enumerate() {
            index_cell.replace(Value::Int(index));
            for id in &chain {
                self.clean_one(*id)?;
            }
            self.step_iterators(&iterators, LoopStep::Step(position), target)?;
        }
        self.step_iterators(&iterators, LoopStep::End, target)?;
        let elapsed = started.elapsed();

        let attr = self.attribute_mut(target)?;
        attr.state = EvalState::Clean;
        attr.last_compute = Some(elapsed);
        tracing::trace!(node = %self.node_full_name(node), iterations, ?elapsed, "Loop ran");
        Ok(())
    }

    /// Computed outputs of the nodes inside `container` that `target`
    /// depends on, producers first
    fn loop_chain(&self, container: NodeId, target: AttributeId) -> Vec<AttributeId> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![(target, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            let Some(attr) = self.attributes.get(&id) else {
                continue;
            };
            if !self.is_inside(attr.node, container) {
                continue;
            }
            stack.push((id, true));
            for up in self.neighbors(id, Flow::Upstream) {
                if !visited.contains(&up) {
                    stack.push((up, false));
                }
            }
        }

        order.retain(|id| {
            self.attributes.get(id).is_some_and(|attr| {
                attr.node != container
                    && attr.is_output()
                    && !attr.affected_by.is_empty()
                    && self.nodes.get(&attr.node).is_some_and(|n| n.update_enabled)
            })
        });
        order
    }

    /// Whether `node` is `container` or nested somewhere below it
    fn is_inside(&self, node: NodeId, container: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == container {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    fn step_iterators(
        &mut self,
        iterators: &[NodeId],
        step: LoopStep,
        target: AttributeId,
    ) -> Result<()> {
        for node in iterators {
            let logic = self.node_ref(*node)?.logic.clone();
            let mut ctx = self.update_context(*node, String::new())?;
            for id in &self.node_ref(*node)?.attributes {
                let attr = self.attribute_ref(*id)?;
                if attr.is_output() {
                    ctx.outputs.insert(attr.name.clone(), attr.cell.get());
                }
            }
            if let Err(source) = logic.loop_step(step, &mut ctx) {
                let attribute = self.attribute_full_name(target);
                tracing::warn!(%attribute, node = %ctx.node, error = %source, "Loop step failed");
                return Err(GraphError::RecomputeFailure { attribute, source });
            }
            self.store_outputs(*node, &mut ctx)?;
        }
        Ok(())
    }

    /// Cell at the head of the input chain: the attribute's own cell when it
    /// has no input
    fn source_cell(&self, attribute: AttributeId) -> Result<&ValueCell> {
        let mut current = attribute;
        let mut seen = HashSet::from([attribute]);
        while let Some(up) = self.input(current) {
            if !seen.insert(up) {
                break;
            }
            current = up;
        }
        Ok(&self.attribute_ref(current)?.cell)
    }

    /// Mark the downstream closure of `roots` Dirty, breadth first, and
    /// record a value change for each attribute reached
    pub(crate) fn propagate_dirty(
        &mut self,
        roots: &[AttributeId],
        include_roots: bool,
        notes: &mut Vec<Notification>,
    ) {
        let mut visited: HashSet<AttributeId> = HashSet::new();
        let mut queue = VecDeque::new();
        for root in roots {
            if include_roots {
                queue.push_back(*root);
            } else {
                visited.insert(*root);
                queue.extend(self.neighbors(*root, Flow::Downstream));
            }
        }

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(attr) = self.attributes.get_mut(&current) else {
                continue;
            };
            attr.state = EvalState::Dirty;
            notes.push(Notification::attribute(EventKind::ValueChanged, current));
            queue.extend(self.neighbors(current, Flow::Downstream));
        }
    }

    /// Human-readable evaluation state of an attribute
    pub fn debug_info(&self, attribute: AttributeId) -> Result<String> {
        let attr = self.attribute_ref(attribute)?;
        let mut info = String::new();
        // Writing to a String can't fail
        let _ = writeln!(info, "attribute: {}", self.attribute_full_name(attribute));
        let _ = writeln!(info, "class: {:?}", attr.class);
        let _ = writeln!(info, "specialization: {}", attr.specialization);
        let _ = writeln!(info, "isClean: {}", attr.is_clean());
        if let Some(source) = self.input(attribute) {
            let _ = writeln!(info, "input: {}", self.attribute_full_name(source));
        }
        match attr.last_compute {
            Some(elapsed) => {
                let _ = write!(info, "last cleaning took: {elapsed:?}");
            }
            None => info.push_str("never computed"),
        }
        Ok(info)
    }
}
