// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for graph editing and evaluation.

use crate::attribute::AttributeId;
use crate::node::NodeId;
use thiserror::Error;

/// Errors raised by [`Network`](crate::Network) operations.
///
/// Topology errors are raised before anything is mutated, so a failed call
/// leaves the network exactly as it was.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No node class registered under this name
    #[error("Unknown node class: {0}")]
    InvalidClass(String),

    /// Name already used inside the node
    #[error("Duplicate attribute name '{name}' on node {node}")]
    DuplicateName {
        /// Node full name
        node: String,
        /// Colliding name
        name: String,
    },

    /// Specializations share no concrete type
    #[error("Types don't match: {source_attribute} -> {destination}")]
    TypeMismatch {
        /// Source attribute full name
        source_attribute: String,
        /// Destination attribute full name
        destination: String,
    },

    /// Connection would make an attribute its own input
    #[error("Connection would create a cycle: {source_attribute} -> {destination}")]
    CycleDetected {
        /// Source attribute full name
        source_attribute: String,
        /// Destination attribute full name
        destination: String,
    },

    /// Attribute value is computed and cannot be set
    #[error("Attribute is read-only: {0}")]
    ReadOnlyAttribute(String),

    /// Node logic failed while cleaning an attribute
    #[error("Failed to compute {attribute}: {source}")]
    RecomputeFailure {
        /// Attribute full name
        attribute: String,
        /// Error reported by the node
        source: EvaluationError,
    },

    /// Node not found
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Attribute not found
    #[error("Attribute not found: {0:?}")]
    AttributeNotFound(AttributeId),

    /// No attribute or node with this full name
    #[error("Nothing named '{0}' in the network")]
    UnknownPath(String),

    /// Destination is a computed output
    #[error("{0} is an output")]
    OutputDestination(String),

    /// Exact edge already exists
    #[error("{source_attribute} already connected to {destination}")]
    AlreadyConnected {
        /// Source attribute full name
        source_attribute: String,
        /// Destination attribute full name
        destination: String,
    },

    /// Presets can only change while the node is unconnected
    #[error("Cannot change specialization preset of connected node {0}")]
    PresetLocked(String),

    /// Node has no preset with that name
    #[error("Node {node} has no specialization preset '{preset}'")]
    UnknownPreset {
        /// Node full name
        node: String,
        /// Requested preset
        preset: String,
    },

    /// Node class does not allow dynamic attributes
    #[error("Node {0} does not accept dynamic attributes")]
    StaticNode(String),

    /// Value type not allowed by the attribute's specialization
    #[error("{attribute} can't hold a {found} value")]
    ValueType {
        /// Attribute full name
        attribute: String,
        /// Offending type
        found: crate::value::TypeTag,
    },

    /// Element index out of range
    #[error("Index {index} out of range on {attribute}")]
    IndexOutOfRange {
        /// Attribute full name
        attribute: String,
        /// Requested index
        index: usize,
    },

    /// Node class has no external driver
    #[error("Node {0} can't be played")]
    NotPlayable(String),

    /// Network file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network file could not be encoded or decoded
    #[error("Network file error: {0}")]
    Persistence(String),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Error reported by node logic during recompute
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    /// Input attribute missing on the node
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// Input value has an unexpected type
    #[error("Unexpected type for {attribute}: {found}")]
    TypeMismatch {
        /// Attribute name
        attribute: String,
        /// Type found
        found: crate::value::TypeTag,
    },

    /// Array inputs of different sizes
    #[error("Array size mismatch: {0} vs {1}")]
    SizeMismatch(usize, usize),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
