// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change notifications for listeners outside the network.
//!
//! Listeners register a callback for an `(EventKind, Subject)` pair and get
//! back an [`Observer`] guard. The bus only keeps a weak reference to the
//! guard's token: once the listener drops its guard the registration is dead
//! and is pruned on the next dispatch. Registrations are stored in a slot
//! table with generation counters, so a stale [`ObserverHandle`] never
//! reaches a slot that was reused by someone else.

use crate::attribute::AttributeId;
use crate::node::NodeId;
use std::sync::{Arc, Weak};

/// Kind of change being reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An attribute's value changed or was dirtied
    ValueChanged,
    /// An attribute received an input connection
    ConnectedInput,
    /// An attribute lost its input connection
    DisconnectedInput,
    /// A node or attribute was renamed
    NameChanged,
    /// One of a node's attributes was connected or disconnected
    NodeConnectionChanged,
    /// An attribute's specialization changed
    SpecializationChanged,
    /// The node selection changed
    SelectionChanged,
    /// A network is about to be loaded
    NetworkLoading,
    /// A network finished loading
    NetworkLoaded,
    /// A node was added
    NodeAdded,
    /// A node is being deleted
    NodeDeleted,
    /// An attribute was added
    AttributeAdded,
    /// An attribute is being deleted
    AttributeDeleted,
    /// A node's specialization preset changed
    PresetChanged,
}

/// What a notification is about.
///
/// Registering against [`Subject::Global`] receives the kind for every subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Network-wide events
    Global,
    /// A node
    Node(NodeId),
    /// An attribute
    Attribute(AttributeId),
}

/// A single delivered notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// Kind of change
    pub kind: EventKind,
    /// Subject of the change
    pub subject: Subject,
}

impl Notification {
    /// Create a notification
    pub fn new(kind: EventKind, subject: Subject) -> Self {
        Self { kind, subject }
    }

    pub(crate) fn attribute(kind: EventKind, attribute: AttributeId) -> Self {
        Self::new(kind, Subject::Attribute(attribute))
    }

    pub(crate) fn node(kind: EventKind, node: NodeId) -> Self {
        Self::new(kind, Subject::Node(node))
    }
}

/// Callback invoked for matching notifications
pub type Callback = Box<dyn FnMut(&Notification) + Send>;

/// Slot address of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle {
    slot: u32,
    generation: u32,
}

/// Registration guard held by the listener.
///
/// Dropping it ends the registration.
#[derive(Debug)]
pub struct Observer {
    handle: ObserverHandle,
    _token: Arc<()>,
}

impl Observer {
    /// Slot address of this registration
    pub fn handle(&self) -> ObserverHandle {
        self.handle
    }
}

struct Entry {
    kind: EventKind,
    subject: Subject,
    token: Weak<()>,
    callback: Callback,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Registry of listeners
#[derive(Default)]
pub struct ObserverBus {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ObserverBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind` events about `subject`
    pub fn subscribe(&mut self, kind: EventKind, subject: Subject, callback: Callback) -> Observer {
        let token = Arc::new(());
        let entry = Entry {
            kind,
            subject,
            token: Arc::downgrade(&token),
            callback,
        };

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let target = &mut self.slots[slot as usize];
        target.entry = Some(entry);

        Observer {
            handle: ObserverHandle {
                slot,
                generation: target.generation,
            },
            _token: token,
        }
    }

    /// Remove a registration; false if the handle is stale
    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        if !self.is_registered(handle) {
            return false;
        }
        self.release(handle.slot);
        true
    }

    /// Whether the handle still addresses a live registration
    pub fn is_registered(&self, handle: ObserverHandle) -> bool {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.entry.as_ref())
            .is_some_and(|e| e.token.strong_count() > 0)
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|s| s.entry.as_ref())
            .filter(|e| e.token.strong_count() > 0)
            .count()
    }

    /// Whether no live registration exists
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration about `subject`
    pub fn forget_subject(&mut self, subject: Subject) {
        let stale: Vec<u32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.as_ref().is_some_and(|e| e.subject == subject))
            .map(|(i, _)| i as u32)
            .collect();
        for slot in stale {
            self.release(slot);
        }
    }

    /// Deliver notifications in order, synchronously
    pub fn emit(&mut self, notifications: &[Notification]) {
        let mut dead = Vec::new();

        for notification in notifications {
            for (index, slot) in self.slots.iter_mut().enumerate() {
                let Some(entry) = slot.entry.as_mut() else {
                    continue;
                };
                if entry.token.strong_count() == 0 {
                    dead.push(index as u32);
                    continue;
                }
                let subject_matches =
                    entry.subject == Subject::Global || entry.subject == notification.subject;
                if entry.kind == notification.kind && subject_matches {
                    (entry.callback)(notification);
                }
            }
        }

        dead.sort_unstable();
        dead.dedup();
        for slot in dead {
            self.release(slot);
        }
    }

    fn release(&mut self, slot: u32) {
        if let Some(target) = self.slots.get_mut(slot as usize) {
            if target.entry.take().is_some() {
                target.generation = target.generation.wrapping_add(1);
                self.free.push(slot);
            }
        }
    }
}
