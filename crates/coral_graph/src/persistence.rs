// SPDX-License-Identifier: MIT OR Apache-2.0
//! Saving and loading networks as RON.
//!
//! Nodes and connections are stored by full name so a file stays readable
//! and survives id changes. Only explicit values are written, including
//! those hidden behind an input connection; computed outputs are rebuilt on
//! load.

use crate::attribute::AttributeTemplate;
use crate::error::{GraphError, Result};
use crate::network::{Network, PATH_SEPARATOR};
use crate::node::NodeId;
use crate::observer::{EventKind, Notification, Subject};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Current file format version
pub const FORMAT_VERSION: u32 = 1;

/// Saved network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFile {
    /// Format version
    pub version: u32,
    /// Network name
    pub name: String,
    /// Nodes, parents before children
    pub nodes: Vec<NodeRecord>,
    /// Connections as `(source, destination)` full names
    pub connections: Vec<(String, String)>,
}

/// Saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Name inside its parent
    pub name: String,
    /// Class name
    pub class: String,
    /// Parent full name
    #[serde(default)]
    pub parent: Option<String>,
    /// Enabled specialization preset
    #[serde(default)]
    pub preset: Option<String>,
    /// Container opened
    #[serde(default)]
    pub opened: bool,
    /// Attributes added after creation
    #[serde(default)]
    pub dynamic_attributes: Vec<AttributeTemplate>,
    /// Explicit values by attribute name
    #[serde(default)]
    pub values: Vec<(String, Value)>,
}

impl NodeRecord {
    fn path(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{parent}{PATH_SEPARATOR}{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl Network {
    /// Capture the network as a [`NetworkFile`]
    pub fn snapshot(&self) -> NetworkFile {
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                let mut dynamic_attributes = Vec::new();
                let mut values = Vec::new();
                for attr in node.attributes.iter().filter_map(|a| self.attributes.get(a)) {
                    if attr.dynamic {
                        let mut template = AttributeTemplate::input(attr.name.clone(), attr.class);
                        template.direction = attr.direction;
                        template.allowed = Some(attr.allowed.clone());
                        dynamic_attributes.push(template);
                    }
                    if attr.affected_by.is_empty() {
                        values.push((attr.name.clone(), attr.cell.get()));
                    }
                }

                NodeRecord {
                    name: node.name.clone(),
                    class: node.class_name.clone(),
                    parent: node.parent.map(|p| self.node_full_name(p)),
                    preset: node.enabled_preset.clone(),
                    opened: node.opened,
                    dynamic_attributes,
                    values,
                }
            })
            .collect();

        let connections = self
            .connections
            .values()
            .map(|c| {
                (
                    self.attribute_full_name(c.from_attribute),
                    self.attribute_full_name(c.to_attribute),
                )
            })
            .collect();

        NetworkFile {
            version: FORMAT_VERSION,
            name: self.name().to_string(),
            nodes,
            connections,
        }
    }

    /// Replace the contents of this network with `file`.
    ///
    /// The file is rebuilt on the side first; on error the network is left
    /// as it was and no load notification fires.
    pub fn restore(&mut self, file: &NetworkFile) -> Result<()> {
        if file.version > FORMAT_VERSION {
            return Err(GraphError::Persistence(format!(
                "unsupported format version {}",
                file.version
            )));
        }

        let mut staged = self.staging(file.name.clone());
        staged.rebuild(file)?;

        self.observers
            .emit(&[Notification::new(EventKind::NetworkLoading, Subject::Global)]);
        self.adopt(staged);
        tracing::info!(
            name = %file.name,
            nodes = file.nodes.len(),
            connections = file.connections.len(),
            "Network loaded"
        );
        self.observers
            .emit(&[Notification::new(EventKind::NetworkLoaded, Subject::Global)]);
        Ok(())
    }

    fn rebuild(&mut self, file: &NetworkFile) -> Result<()> {
        let mut by_path: HashMap<String, NodeId> = HashMap::new();
        for record in &file.nodes {
            let parent = match &record.parent {
                Some(path) => Some(
                    *by_path
                        .get(path)
                        .ok_or_else(|| GraphError::UnknownPath(path.clone()))?,
                ),
                None => None,
            };
            let node = self.create_node(parent, &record.class, &record.name)?;
            for template in &record.dynamic_attributes {
                self.add_attribute_with(node, template.clone())?;
            }
            if self.node_ref(node)?.enabled_preset != record.preset {
                self.enable_specialization_preset(node, record.preset.as_deref())?;
            }
            self.set_opened(node, record.opened)?;
            for (name, value) in &record.values {
                let attribute = self.find_child_attribute(node, name)?;
                self.set_value(attribute, value.clone())?;
            }
            by_path.insert(record.path(), node);
        }

        for (source, destination) in &file.connections {
            let source = self.find_attribute(source)?;
            let destination = self.find_attribute(destination)?;
            self.connect(source, destination)?;
        }
        Ok(())
    }

    /// Encode as pretty RON
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(&self.snapshot(), ron::ser::PrettyConfig::default())
            .map_err(|e| GraphError::Persistence(e.to_string()))
    }

    /// Replace the contents with a RON-encoded network
    pub fn load_ron(&mut self, text: &str) -> Result<()> {
        let file: NetworkFile =
            ron::from_str(text).map_err(|e| GraphError::Persistence(e.to_string()))?;
        self.restore(&file)
    }

    /// Write the network to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_ron()?)?;
        tracing::info!(path = %path.display(), "Network saved");
        Ok(())
    }

    /// Replace the contents with the network stored at `path`
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.load_ron(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeClass;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn build() -> Network {
        let mut network = Network::with_builtins("scene");
        let a = network.add_node("Float", "a").unwrap();
        let a_out = network.find_child_attribute(a, "out").unwrap();
        network.set_value(a_out, Value::Float(2.5)).unwrap();

        let group = network.add_node("CollapsedNode", "group").unwrap();
        network.set_opened(group, true).unwrap();
        let through = network
            .add_attribute(group, "through", AttributeClass::PassThrough)
            .unwrap();
        let add = network.add_node_in(group, "Add", "add").unwrap();
        network.enable_specialization_preset(add, Some("Float")).unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let in1 = network.find_child_attribute(add, "in1").unwrap();
        network.set_value(in1, Value::Float(1.0)).unwrap();

        network.connect(a_out, through).unwrap();
        network.connect(through, in0).unwrap();
        network
    }

    #[test]
    fn test_snapshot_skips_computed_values() {
        let network = build();
        let file = network.snapshot();
        let add = file.nodes.iter().find(|n| n.name == "add").unwrap();

        assert_eq!(add.parent.as_deref(), Some("group"));
        assert_eq!(add.preset.as_deref(), Some("Float"));
        let names: Vec<&str> = add.values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["in0", "in1"]);
        assert!(file
            .connections
            .contains(&("group.through".to_string(), "group.add.in0".to_string())));
    }

    #[test]
    fn test_ron_round_trip_restores_behaviour() {
        let text = build().to_ron().unwrap();
        let mut loaded = Network::with_builtins("empty");
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let _observer = loaded.observe(
            EventKind::NetworkLoaded,
            Subject::Global,
            Box::new(move |n: &Notification| sink.lock().push(n.kind)),
        );
        loaded.load_ron(&text).unwrap();

        assert_eq!(loaded.name(), "scene");
        assert_eq!(log.lock().as_slice(), &[EventKind::NetworkLoaded]);
        let sum = loaded.find_attribute("group.add.out").unwrap();
        assert_eq!(loaded.value(sum).unwrap(), Value::Float(3.5));
        let group = loaded.find_node("group").unwrap();
        assert!(loaded.node(group).unwrap().is_opened());
        assert_eq!(loaded.snapshot(), build().snapshot());
    }

    #[test]
    fn test_explicit_value_behind_connection_survives_load() {
        let mut network = Network::with_builtins("scene");
        let a = network.add_node("Float", "a").unwrap();
        let a_out = network.find_child_attribute(a, "out").unwrap();
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        network.set_value(in0, Value::Int(7)).unwrap();
        network.connect(a_out, in0).unwrap();

        let mut loaded = Network::with_builtins("empty");
        loaded.load_ron(&network.to_ron().unwrap()).unwrap();
        let in0 = loaded.find_attribute("add.in0").unwrap();
        assert_eq!(loaded.value(in0).unwrap(), Value::Float(0.0));
        loaded.disconnect(in0).unwrap();
        assert_eq!(loaded.value(in0).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_rejects_future_version() {
        let mut file = build().snapshot();
        file.version = FORMAT_VERSION + 1;
        let mut network = Network::with_builtins("x");
        assert!(matches!(
            network.restore(&file),
            Err(GraphError::Persistence(_))
        ));
    }

    #[test]
    fn test_failed_load_keeps_contents() {
        let mut file = build().snapshot();
        file.nodes.push(NodeRecord {
            name: "pot".to_string(),
            class: "Teapot".to_string(),
            parent: None,
            preset: None,
            opened: false,
            dynamic_attributes: Vec::new(),
            values: Vec::new(),
        });

        let mut network = Network::with_builtins("kept");
        let clock = network.add_node("Time", "clock").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let _observer = network.observe(
            EventKind::NetworkLoading,
            Subject::Global,
            Box::new(move |n: &Notification| sink.lock().push(n.kind)),
        );

        assert!(matches!(
            network.restore(&file),
            Err(GraphError::InvalidClass(_))
        ));
        assert_eq!(network.name(), "kept");
        assert_eq!(network.find_node("clock").unwrap(), clock);
        assert_eq!(network.node_count(), 1);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_load_replaces_contents() {
        let text = build().to_ron().unwrap();
        let mut network = Network::with_builtins("other");
        network.add_node("Time", "clock").unwrap();
        network.load_ron(&text).unwrap();
        assert!(network.find_node("clock").is_err());
        assert_eq!(network.connection_count(), 2);
    }
}
