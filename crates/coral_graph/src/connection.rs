// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the network.

use crate::attribute::AttributeId;
use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed edge from a source attribute to a destination attribute.
///
/// Connections are not owned by either endpoint; removing either endpoint
/// removes the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Source node ID
    pub from_node: NodeId,
    /// Source attribute ID
    pub from_attribute: AttributeId,
    /// Destination node ID
    pub to_node: NodeId,
    /// Destination attribute ID
    pub to_attribute: AttributeId,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        from_node: NodeId,
        from_attribute: AttributeId,
        to_node: NodeId,
        to_attribute: AttributeId,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            from_node,
            from_attribute,
            to_node,
            to_attribute,
        }
    }

    /// Check if this connection involves a specific node
    pub fn involves_node(&self, node_id: NodeId) -> bool {
        self.from_node == node_id || self.to_node == node_id
    }

    /// Check if this connection involves a specific attribute
    pub fn involves_attribute(&self, attribute_id: AttributeId) -> bool {
        self.from_attribute == attribute_id || self.to_attribute == attribute_id
    }

    /// The endpoint opposite to `attribute_id`, if it is one of the ends
    pub fn other_end(&self, attribute_id: AttributeId) -> Option<AttributeId> {
        if self.from_attribute == attribute_id {
            Some(self.to_attribute)
        } else if self.to_attribute == attribute_id {
            Some(self.from_attribute)
        } else {
            None
        }
    }
}
