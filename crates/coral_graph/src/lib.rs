// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow graph engine for coral.
//!
//! A [`Network`] holds nodes with typed attributes wired together by
//! connections. Editing the network never computes anything; it marks the
//! affected attributes Dirty and tells observers. Values are recomputed
//! lazily when read.
//!
//! ## Architecture
//!
//! - Flat id-keyed tables for nodes, attributes and connections
//! - Dirty propagation on write, lazy clean on read
//! - Generic attributes whose type narrows as they are connected
//! - Observer bus with weak registrations
//! - External drivers that advance attributes from another thread
//! - RON persistence

pub mod attribute;
pub mod connection;
pub mod driver;
pub mod error;
pub mod evaluation;
pub mod network;
pub mod node;
pub mod nodes;
pub mod observer;
pub mod persistence;
pub mod specialization;
pub mod value;

pub use attribute::{
    Attribute, AttributeClass, AttributeDirection, AttributeId, AttributeTemplate, EvalState,
    ValueCell,
};
pub use connection::{Connection, ConnectionId};
pub use error::{EvaluationError, GraphError, Result};
pub use evaluation::{LoopStep, NodeLogic, NoopLogic, UpdateContext};
pub use network::Network;
pub use node::{DriverSpec, Node, NodeCategory, NodeClass, NodeClassRegistry, NodeId, Preset};
pub use observer::{Callback, EventKind, Notification, Observer, ObserverHandle, Subject};
pub use persistence::NetworkFile;
pub use specialization::{LinkRule, Specialization};
pub use value::{Geo, TypeTag, Value};
