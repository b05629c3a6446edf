// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Event types and the event itself (spec §3, §4.1). Grounded on
//! `examples/original_source/src/interface/event.h`: a name-keyed integer
//! registry with an immutable binding once assigned, and a payload that is
//! an opaque owning handle to a polymorphic value. The "C-style opaque
//! `Event::Private` heap object" redesign flag (spec §9) is resolved here
//! as `Arc<dyn Any + Send + Sync>`, downcast by the subscriber — the
//! pattern used in `examples/other_examples/09550dca...event.rs.rs`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// An event type handle: a lazily-allocated integer standing in for a
/// string name, so that hot-path comparisons are integer comparisons.
pub type EventType = u32;

/// The type-erased event payload. Subscribers `downcast_ref` to the
/// concrete type they expect for a given event type.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// `(type, payload)`, queued on emit and delivered during
/// [`crate::host::Host::handle_events`].
#[derive(Clone)]
pub struct Event {
    pub event_type: EventType,
    pub payload: Payload,
}

impl Event {
    pub fn new(event_type: EventType, payload: Payload) -> Self {
        Event { event_type, payload }
    }

    /// Convenience constructor for events with no payload of interest,
    /// e.g. `core:start`, `core:unload`.
    pub fn signal(event_type: EventType) -> Self {
        Event {
            event_type,
            payload: Arc::new(()),
        }
    }
}

/// Bidirectional name ↔ id map for event types. A name, once bound, keeps
/// the same id for the registry's lifetime (spec §3's Event Type
/// invariant). Kept as two maps rather than a single map plus reverse
/// linear scan, per the §3 Event Type Registry supplement: a
/// correctness-preserving strengthening of the original's linear
/// `name(id)` scan, not a behavior change.
#[derive(Default)]
pub struct EventTypeRegistry {
    name_to_id: HashMap<String, EventType>,
    id_to_name: HashMap<EventType, String>,
    next_id: EventType,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        EventTypeRegistry::default()
    }

    /// Idempotent allocation: repeated calls with the same name return the
    /// same id (spec §4.1, §8 property 6).
    pub fn type_id(&mut self, name: &str) -> EventType {
        if let Some(&id) = self.name_to_id.get(name) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.name_to_id.insert(name.to_string(), id);
        self.id_to_name.insert(id, name.to_string());
        id
    }

    /// Reverse lookup for diagnostics (spec §4.1 `name(id)`).
    pub fn name(&self, id: EventType) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }
}
