// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application context.
//!
//! Owns everything the front end works with: the network, the inspector
//! field registry and the settings. Passed explicitly to whoever needs it.

use crate::coral_io;
use crate::error::Result;
use crate::inspector::{FieldRegistry, NodeInspector};
use crate::settings::Settings;
use coral_graph::{Network, NodeId, Value};
use std::path::{Path, PathBuf};

/// Shared application state
pub struct AppContext {
    /// The open network
    pub network: Network,
    /// Inspector field factories
    pub fields: FieldRegistry,
    /// Loaded settings
    pub settings: Settings,
    network_path: Option<PathBuf>,
}

impl AppContext {
    /// Create a context with an empty network
    pub fn new(settings: Settings) -> Self {
        let mut network = Network::with_builtins("untitled");
        network.register_class(coral_io::importer_class());
        Self {
            network,
            fields: FieldRegistry::with_builtins(),
            settings,
            network_path: None,
        }
    }

    /// Create a context and open the startup network, if one is configured
    pub fn startup(settings: Settings) -> Result<Self> {
        let startup = settings.startup_network.clone();
        let mut context = Self::new(settings);
        if let Some(path) = startup {
            context.open_network(&path)?;
        }
        Ok(context)
    }

    /// Path the network was last opened from or saved to
    pub fn network_path(&self) -> Option<&Path> {
        self.network_path.as_deref()
    }

    /// Replace the network with the one stored at `path`
    pub fn open_network(&mut self, path: &Path) -> Result<()> {
        self.network.load(path)?;
        self.network_path = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), nodes = self.network.node_count(), "Opened network");
        Ok(())
    }

    /// Save the network to `path`, or to where it came from, or to the
    /// configured default
    pub fn save_network(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.network_path.clone())
            .unwrap_or_else(|| self.settings.default_save_path.clone());
        self.network.save(&target)?;
        self.network_path = Some(target.clone());
        Ok(target)
    }

    /// Inspector for `node`
    pub fn inspect(&mut self, node: NodeId) -> Result<NodeInspector> {
        NodeInspector::new(&mut self.network, &self.fields, node)
    }

    /// Add a Time node running at the configured rate
    pub fn add_time_node(&mut self, name: &str) -> Result<NodeId> {
        let time = self.network.add_node("Time", name)?;
        let fps = self.network.find_child_attribute(time, "framesPerSecond")?;
        self.network
            .set_value(fps, Value::Float(self.settings.playback.frames_per_second))?;
        Ok(time)
    }

    /// Fill the network with a small animated example: a time-driven
    /// offset vector and its length
    pub fn build_demo(&mut self) -> Result<()> {
        self.network.set_name("demo");
        let time = self.add_time_node("time")?;
        let offset = self.network.add_node("Float", "offset")?;
        let add = self.network.add_node("Add", "add")?;
        let vector = self.network.add_node("Vec3", "vector")?;
        let length = self.network.add_node("Vec3Length", "length")?;

        let net = &mut self.network;
        let offset_out = net.find_child_attribute(offset, "out")?;
        net.set_value(offset_out, Value::Float(0.5))?;

        let wiring = [
            ((time, "time"), (add, "in0")),
            ((offset, "out"), (add, "in1")),
            ((add, "out"), (vector, "x")),
            ((vector, "vector"), (length, "vector")),
        ];
        for ((from, output), (to, input)) in wiring {
            let source = net.find_child_attribute(from, output)?;
            let destination = net.find_child_attribute(to, input)?;
            net.connect(source, destination)?;
        }
        tracing::info!(
            nodes = net.node_count(),
            connections = net.connection_count(),
            "Built demo network"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_evaluates() {
        let mut context = AppContext::new(Settings::default());
        context.build_demo().unwrap();
        let time = context.network.find_attribute("time.time").unwrap();
        let length = context.network.find_attribute("length.length").unwrap();

        context.network.set_value(time, Value::Float(2.5)).unwrap();
        assert_eq!(context.network.value(length).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_save_and_reopen() {
        let path = std::env::temp_dir().join(format!("coral-context-{}.ron", std::process::id()));
        let mut context = AppContext::new(Settings::default());
        context.build_demo().unwrap();
        assert_eq!(context.save_network(Some(&path)).unwrap(), path);

        let mut settings = Settings::default();
        settings.startup_network = Some(path.clone());
        let reopened = AppContext::startup(settings).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reopened.network.name(), "demo");
        assert_eq!(reopened.network.connection_count(), 4);
        assert_eq!(reopened.network_path(), Some(path.as_path()));
    }

    #[test]
    fn test_importer_is_registered() {
        let context = AppContext::new(Settings::default());
        assert!(context.network.classes().contains("CoralIOImporter"));
    }

    #[test]
    fn test_inspect_time_node() {
        let mut context = AppContext::new(Settings::default());
        let time = context.add_time_node("clock").unwrap();
        let inspector = context.inspect(time).unwrap();
        assert_eq!(inspector.title(), "clock");
        assert!(inspector.field_named("time").unwrap().editable);
    }
}
