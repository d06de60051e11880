// SPDX-License-Identifier: MIT OR Apache-2.0
//! External drivers for playable nodes.
//!
//! Playing a node starts a thread that advances one of its attributes at a
//! fixed rate. The thread writes straight into the attribute's value cell
//! and reports each tick over a channel; the owner thread applies the dirty
//! propagation when it calls [`Network::pump_external`]. Each run of a
//! driver gets its own epoch, so ticks from a driver that was stopped are
//! recognised and dropped.

use crate::attribute::{AttributeId, EvalState, ValueCell};
use crate::error::{GraphError, Result};
use crate::network::Network;
use crate::node::NodeId;
use crate::observer::{EventKind, Notification};
use crate::value::Value;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use indexmap::IndexMap;
use std::thread::JoinHandle;
use std::time::Duration;

/// Tick rate used when the rate attribute holds nothing usable
pub const DEFAULT_RATE: f32 = 24.0;

/// One tick reported by a driver thread
#[derive(Debug, Clone, Copy)]
struct ExternalEvent {
    epoch: u64,
    attribute: AttributeId,
}

struct DriverThread {
    epoch: u64,
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl DriverThread {
    /// Signal the thread and wait for it; no tick is sent after this returns
    fn halt(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(epoch = self.epoch, "Driver thread panicked");
            }
        }
    }
}

/// Running drivers and the channel their ticks come back on
pub(crate) struct ExternalLink {
    events_tx: Sender<ExternalEvent>,
    events_rx: Receiver<ExternalEvent>,
    next_epoch: u64,
    drivers: IndexMap<NodeId, DriverThread>,
}

impl ExternalLink {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            events_tx,
            events_rx,
            next_epoch: 0,
            drivers: IndexMap::new(),
        }
    }

    fn start(
        &mut self,
        node: NodeId,
        attribute: AttributeId,
        cell: ValueCell,
        interval: Duration,
    ) -> Result<()> {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let events = self.events_tx.clone();

        let handle = std::thread::Builder::new()
            .name(format!("coral-driver-{epoch}"))
            .spawn(move || run_driver(cell, attribute, epoch, interval, &events, &stop_rx))?;

        self.drivers.insert(
            node,
            DriverThread {
                epoch,
                stop: stop_tx,
                handle: Some(handle),
            },
        );
        Ok(())
    }

    fn is_live(&self, epoch: u64) -> bool {
        self.drivers.values().any(|d| d.epoch == epoch)
    }

    /// Stop every driver and drop pending ticks
    pub(crate) fn stop_all(&mut self) {
        for (_, mut driver) in self.drivers.drain(..) {
            driver.halt();
        }
        while self.events_rx.try_recv().is_ok() {}
    }
}

impl Drop for ExternalLink {
    fn drop(&mut self) {
        for driver in self.drivers.values_mut() {
            driver.halt();
        }
    }
}

fn run_driver(
    cell: ValueCell,
    attribute: AttributeId,
    epoch: u64,
    interval: Duration,
    events: &Sender<ExternalEvent>,
    stop: &Receiver<()>,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        cell.update(advance);
        if events.send(ExternalEvent { epoch, attribute }).is_err() {
            break;
        }
    }
}

/// Value after one tick
fn advance(value: &Value) -> Value {
    match value {
        Value::Float(frame) => Value::Float(frame + 1.0),
        Value::Int(frame) => Value::Int(frame.wrapping_add(1)),
        other => other.clone(),
    }
}

impl Network {
    /// Start or stop the external driver of a playable node.
    ///
    /// Stopping waits for the driver thread and applies its last ticks, so
    /// once this returns the node's attribute no longer changes.
    pub fn play(&mut self, node: NodeId, playing: bool) -> Result<()> {
        let spec = self
            .node_ref(node)?
            .driver
            .clone()
            .ok_or_else(|| GraphError::NotPlayable(self.node_full_name(node)))?;

        if !playing {
            if let Some(mut driver) = self.external.drivers.shift_remove(&node) {
                driver.halt();
                self.drain_external(Some(driver.epoch));
                tracing::info!(node = %self.node_full_name(node), "Stopped");
            }
            return Ok(());
        }
        if self.is_playing(node) {
            return Ok(());
        }

        let attribute = self.find_child_attribute(node, &spec.attribute)?;
        let rate_attribute = self.find_child_attribute(node, &spec.rate_attribute)?;
        let rate = self
            .value(rate_attribute)?
            .as_float()
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_RATE);
        let interval = Duration::from_secs_f32(1.0 / rate);
        let cell = self.attribute_ref(attribute)?.cell.clone();

        self.external.start(node, attribute, cell, interval)?;
        tracing::info!(node = %self.node_full_name(node), rate, "Playing");
        Ok(())
    }

    /// Whether a driver is running for `node`
    pub fn is_playing(&self, node: NodeId) -> bool {
        self.external.drivers.contains_key(&node)
    }

    /// Apply pending driver ticks on the calling thread. Returns the number
    /// of ticks applied.
    pub fn pump_external(&mut self) -> usize {
        self.drain_external(None)
    }

    fn drain_external(&mut self, stopped_epoch: Option<u64>) -> usize {
        let events = self.external.events_rx.clone();
        let mut notes = Vec::new();
        let mut applied = 0;

        while let Ok(event) = events.try_recv() {
            let live = stopped_epoch == Some(event.epoch) || self.external.is_live(event.epoch);
            if !live {
                continue;
            }
            let Some(attr) = self.attributes.get_mut(&event.attribute) else {
                continue;
            };
            attr.state = EvalState::Clean;
            notes.push(Notification::attribute(EventKind::ValueChanged, event.attribute));
            self.propagate_dirty(&[event.attribute], false, &mut notes);
            applied += 1;
        }

        self.observers.emit(&notes);
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn time_network(rate: f32) -> (Network, NodeId, AttributeId) {
        let mut network = Network::with_builtins("test");
        let time = network.add_node("Time", "time").unwrap();
        let fps = network.find_child_attribute(time, "framesPerSecond").unwrap();
        network.set_value(fps, Value::Float(rate)).unwrap();
        let out = network.find_child_attribute(time, "time").unwrap();
        (network, time, out)
    }

    #[test]
    fn test_not_playable() {
        let mut network = Network::with_builtins("test");
        let add = network.add_node("Add", "add").unwrap();
        assert!(matches!(
            network.play(add, true),
            Err(GraphError::NotPlayable(_))
        ));
    }

    #[test]
    fn test_play_advances_time() {
        let (mut network, time, out) = time_network(200.0);
        network.play(time, true).unwrap();
        assert!(network.is_playing(time));

        thread::sleep(Duration::from_millis(100));
        network.pump_external();
        network.play(time, false).unwrap();

        let frame = network.value(out).unwrap().as_float().unwrap();
        assert!(frame >= 1.0);
    }

    #[test]
    fn test_stop_is_final() {
        let (mut network, time, out) = time_network(500.0);
        network.play(time, true).unwrap();
        thread::sleep(Duration::from_millis(30));
        network.play(time, false).unwrap();
        assert!(!network.is_playing(time));

        let stopped_at = network.value(out).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(network.pump_external(), 0);
        assert_eq!(network.value(out).unwrap(), stopped_at);
    }

    #[test]
    fn test_tick_dirties_consumers() {
        let (mut network, time, out) = time_network(500.0);
        let add = network.add_node("Add", "add").unwrap();
        let in0 = network.find_child_attribute(add, "in0").unwrap();
        let sum = network.find_child_attribute(add, "out").unwrap();
        network.connect(out, in0).unwrap();
        network.value(sum).unwrap();

        network.play(time, true).unwrap();
        thread::sleep(Duration::from_millis(100));
        network.play(time, false).unwrap();

        assert!(!network.is_clean(sum).unwrap());
        assert_eq!(network.value(sum).unwrap(), network.value(out).unwrap());
    }

    #[test]
    fn test_delete_playing_node_stops_driver() {
        let (mut network, time, _) = time_network(500.0);
        network.play(time, true).unwrap();
        network.delete_node(time).unwrap();
        assert!(!network.is_playing(time));
        assert_eq!(network.pump_external(), 0);
    }
}
