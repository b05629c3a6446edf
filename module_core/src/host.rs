// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The Module Host (spec §3, §4.2, §6.2): owns the module registry, the
//! Event Bus's subscription table and FIFO queue, and the Transient
//! Store, and drives the lifecycle state machine. Grounded on
//! `examples/original_source/src/server/state.cpp` (`CState`), whose
//! `handle_events()` drain loop, `unload_module_u` unload protocol and
//! `tmp_store_data`/`tmp_restore_data` this follows closely.

use crate::container::ModuleContainer;
use crate::error::{HostError, Result};
use crate::event::{Event, EventType, EventTypeRegistry, Payload};
use crate::module::{Module, ModuleConstructor};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// `core:*` event names recognized by the host itself.
pub const EVENT_START: &str = "core:start";
pub const EVENT_UNLOAD: &str = "core:unload";
pub const EVENT_CONTINUE: &str = "core:continue";
pub const EVENT_MODULE_LOADED: &str = "core:module_loaded";
pub const EVENT_MODULE_UNLOADED: &str = "core:module_unloaded";
pub const EVENT_MODULE_MODIFIED: &str = "core:module_modified";

/// Payload of `core:module_loaded` / `core:module_unloaded`.
pub struct ModuleLifecycle {
    pub name: String,
}

/// Payload of `core:module_modified`, emitted when a loaded module's
/// on-disk files change (§3 supplement, grounded on `state.cpp`
/// `load_module`'s file-watch-driven reload path).
pub struct ModuleModified {
    pub name: String,
    pub path: String,
}

#[derive(Default)]
struct ModuleRegistry {
    order: Vec<String>,
    by_name: HashMap<String, Arc<ModuleContainer>>,
}

struct HostInner {
    modules_path: String,
    builtin_modules_path: String,
    modules: Mutex<ModuleRegistry>,
    event_types: Mutex<EventTypeRegistry>,
    subscriptions: Mutex<HashMap<EventType, Vec<Arc<ModuleContainer>>>>,
    queue: Mutex<VecDeque<Event>>,
    pending_unload: Mutex<BTreeSet<String>>,
    transient_store: Mutex<HashMap<String, Vec<u8>>>,
    shutdown: Mutex<Option<(i32, String)>>,
}

/// A cheap-to-clone handle to the host, passed to every module at
/// construction so it can emit events, subscribe, and reach other
/// modules through `access_module`.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    pub fn new(modules_path: impl Into<String>, builtin_modules_path: impl Into<String>) -> Self {
        Host {
            inner: Arc::new(HostInner {
                modules_path: modules_path.into(),
                builtin_modules_path: builtin_modules_path.into(),
                modules: Mutex::new(ModuleRegistry::default()),
                event_types: Mutex::new(EventTypeRegistry::new()),
                subscriptions: Mutex::new(HashMap::new()),
                queue: Mutex::new(VecDeque::new()),
                pending_unload: Mutex::new(BTreeSet::new()),
                transient_store: Mutex::new(HashMap::new()),
                shutdown: Mutex::new(None),
            }),
        }
    }

    pub fn get_modules_path(&self) -> &str {
        &self.inner.modules_path
    }

    pub fn get_builtin_modules_path(&self) -> &str {
        &self.inner.builtin_modules_path
    }

    pub fn get_module_path(&self, name: &str) -> Option<String> {
        let modules = self.inner.modules.lock().unwrap();
        modules.by_name.get(name).map(|c| c.path.clone())
    }

    pub fn has_module(&self, name: &str) -> bool {
        let modules = self.inner.modules.lock().unwrap();
        modules.by_name.contains_key(name)
    }

    /// In load order (spec §6.2 `get_loaded_modules`).
    pub fn get_loaded_modules(&self) -> Vec<String> {
        let modules = self.inner.modules.lock().unwrap();
        modules.order.clone()
    }

    /// Idempotent event-type allocation (spec §4.1 `type(name)`).
    pub fn event_type(&self, name: &str) -> EventType {
        self.inner.event_types.lock().unwrap().type_id(name)
    }

    pub fn event_name(&self, id: EventType) -> Option<String> {
        self.inner
            .event_types
            .lock()
            .unwrap()
            .name(id)
            .map(str::to_string)
    }

    /// Builds and registers a module under `name`, calls `init()`, and
    /// emits `core:module_loaded{name}`. Returns `false` (logged, not an
    /// error) if `name` is already loaded — the §7 "AlreadyExists ...
    /// surfaced as false, not thrown" policy. The container is inserted
    /// into the registry *before* `init()` runs, matching
    /// `examples/original_source/src/server/state.cpp`'s `load_module`:
    /// a module's own `init()` commonly calls `sub_event(self, ...)`,
    /// which only succeeds if the host already knows about it.
    pub fn load_module(&self, name: &str, path: &str, ctor: ModuleConstructor) -> bool {
        {
            let modules = self.inner.modules.lock().unwrap();
            if modules.by_name.contains_key(name) {
                warn!(module = name, "load_module: already loaded");
                return false;
            }
        }

        let module = ctor(self.clone(), path.to_string());
        let container = Arc::new(ModuleContainer::new(name.to_string(), path.to_string(), module));

        {
            let mut modules = self.inner.modules.lock().unwrap();
            modules.order.push(name.to_string());
            modules.by_name.insert(name.to_string(), container.clone());
        }

        container.with(|m| m.init());

        info!(module = name, path, "module loaded");
        let event_type = self.event_type(EVENT_MODULE_LOADED);
        self.emit(Event::new(
            event_type,
            Arc::new(ModuleLifecycle { name: name.to_string() }),
        ));
        true
    }

    /// Defers the unload to the pending set, consumed between drain
    /// passes of `handle_events` (spec §4.2), so a handler currently
    /// iterating a subscription snapshot never sees a container vanish
    /// mid-dispatch.
    pub fn unload_module(&self, name: &str) {
        self.inner
            .pending_unload
            .lock()
            .unwrap()
            .insert(name.to_string());
    }

    /// Unloads `name` immediately if loaded, then loads it again via
    /// `ctor`, then delivers `core:continue` directly to the fresh
    /// instance — not through the queue (spec §4.2, §8 property 4).
    /// Returns `false` if `name` wasn't loaded to begin with.
    pub fn reload_module(&self, name: &str, path: &str, ctor: ModuleConstructor) -> bool {
        if !self.perform_unload(name) {
            warn!(module = name, "reload_module: not currently loaded");
        }
        if !self.load_module(name, path, ctor) {
            return false;
        }
        let continue_type = self.event_type(EVENT_CONTINUE);
        self.access_module(name, |m| m.event(continue_type, Arc::new(())));
        true
    }

    /// The unload protocol (spec §4.2): deliver `core:unload` directly,
    /// remove from every subscription list, destroy the module, then
    /// *emit* (queued) `core:module_unloaded{name}`.
    fn perform_unload(&self, name: &str) -> bool {
        let container = {
            let modules = self.inner.modules.lock().unwrap();
            modules.by_name.get(name).cloned()
        };
        let Some(container) = container else {
            return false;
        };

        let unload_type = self.event_type(EVENT_UNLOAD);
        container.with(|m| m.event(unload_type, Arc::new(())));

        {
            let mut subs = self.inner.subscriptions.lock().unwrap();
            for list in subs.values_mut() {
                list.retain(|c| !Arc::ptr_eq(c, &container));
            }
        }

        container.take(); // destroy the module object

        {
            let mut modules = self.inner.modules.lock().unwrap();
            modules.order.retain(|n| n != name);
            modules.by_name.remove(name);
        }

        info!(module = name, "module unloaded");
        let event_type = self.event_type(EVENT_MODULE_UNLOADED);
        self.emit(Event::new(
            event_type,
            Arc::new(ModuleLifecycle { name: name.to_string() }),
        ));
        true
    }

    /// Acquires the container's (recursive) mutex and invokes `cb`.
    /// Returns `None` if `name` is not loaded.
    pub fn access_module<R>(&self, name: &str, cb: impl FnOnce(&mut dyn Module) -> R) -> Option<R> {
        let container = {
            let modules = self.inner.modules.lock().unwrap();
            modules.by_name.get(name).cloned()
        };
        container.and_then(|c| c.with(cb))
    }

    /// Adds a subscription for `module_name` to `event_type`. Refuses
    /// unknown modules and duplicate subscriptions, both logged rather
    /// than erroring (spec §4.1).
    pub fn sub_event(&self, module_name: &str, event_type: EventType) {
        let container = {
            let modules = self.inner.modules.lock().unwrap();
            modules.by_name.get(module_name).cloned()
        };
        let Some(container) = container else {
            warn!(module = module_name, "sub_event: unknown module, ignored");
            return;
        };

        let mut subs = self.inner.subscriptions.lock().unwrap();
        let list = subs.entry(event_type).or_default();
        if list.iter().any(|c| Arc::ptr_eq(c, &container)) {
            warn!(
                module = module_name,
                event_type, "sub_event: duplicate subscription, ignored"
            );
            return;
        }
        list.push(container);
    }

    /// Pushes `event` onto the FIFO queue. Never dispatches inline (spec
    /// §4.1 `emit`).
    pub fn emit(&self, event: Event) {
        self.inner.queue.lock().unwrap().push_back(event);
    }

    /// Convenience wrapper over `emit` that also resolves the event name.
    pub fn emit_named(&self, name: &str, payload: Payload) {
        let event_type = self.event_type(name);
        self.emit(Event::new(event_type, payload));
    }

    pub fn tmp_store_data(&self, key: &str, bytes: Vec<u8>) {
        self.inner
            .transient_store
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes);
    }

    /// Restoring empties the entry (spec §3 Transient Store).
    pub fn tmp_restore_data(&self, key: &str) -> Vec<u8> {
        self.inner
            .transient_store
            .lock()
            .unwrap()
            .remove(key)
            .unwrap_or_default()
    }

    /// Records a shutdown request; surfaces as `HostError::Shutdown` from
    /// the next `check_shutdown` call inside `handle_events`.
    pub fn shutdown(&self, exit_status: i32, reason: impl Into<String>) {
        *self.inner.shutdown.lock().unwrap() = Some((exit_status, reason.into()));
    }

    fn check_shutdown(&self) -> Result<()> {
        if let Some((exit_status, reason)) = self.inner.shutdown.lock().unwrap().clone() {
            return Err(HostError::Shutdown { exit_status, reason });
        }
        Ok(())
    }

    /// Drains the event queue to empty, then applies any unloads deferred
    /// during dispatch, repeating until both are empty (spec §4.2, §4.1).
    /// The subscriber list for each event's type is snapshotted before
    /// dispatch so a handler may safely unsubscribe or destroy other
    /// modules mid-drain.
    pub fn handle_events(&self) -> Result<()> {
        loop {
            self.drain_queue_once()?;
            let pending: Vec<String> = {
                let mut p = self.inner.pending_unload.lock().unwrap();
                std::mem::take(&mut *p).into_iter().collect()
            };
            if pending.is_empty() {
                return Ok(());
            }
            for name in pending {
                self.perform_unload(&name);
            }
        }
    }

    fn drain_queue_once(&self) -> Result<()> {
        loop {
            let event = self.inner.queue.lock().unwrap().pop_front();
            let Some(event) = event else {
                return Ok(());
            };
            self.check_shutdown()?;

            let snapshot: Vec<Arc<ModuleContainer>> = {
                let subs = self.inner.subscriptions.lock().unwrap();
                subs.get(&event.event_type).cloned().unwrap_or_default()
            };
            debug!(
                event_type = event.event_type,
                subscribers = snapshot.len(),
                "dispatching event"
            );
            for container in snapshot {
                let payload = event.payload.clone();
                let event_type = event.event_type;
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    container.with(|m| m.event(event_type, payload));
                }));
                if let Err(payload) = result {
                    let message = panic_message(&payload);
                    error!(
                        module = %container.name,
                        event_type, message = %message, "module panicked while handling event, delivery aborted"
                    );
                }
            }
        }
    }
}

/// Best-effort extraction of a panic payload's message, for logging
/// context alongside the module and event that triggered it.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
