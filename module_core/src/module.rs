// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The `Module` trait and the static registry of module constructors
//! (spec §3, §4.2, §9). Per the Module Host §4.2 process-model decision
//! in `SPEC_FULL.md`, builtin modules are linked into the binary and
//! looked up by name through [`Registry`] rather than `dlopen`ed —
//! `Registry` plays the role of the original's `createModule_<name>`
//! `extern "C"` factory table, resolved at compile time instead of at
//! runtime.

use crate::event::{EventType, Payload};
use crate::host::Host;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A user-provided extension unit (spec §3). Implementors receive a
/// handle to the [`Host`] at construction time and use it to emit
/// events, subscribe, or reach other modules via `access_module`.
pub trait Module: Send {
    /// Called once, immediately after construction and registration.
    fn init(&mut self) {}

    /// Delivers one event to this module. Invoked with this module's
    /// container mutex held, so re-entrant `access_module` calls onto
    /// this same module from within `event()` are safe.
    fn event(&mut self, event_type: EventType, payload: Payload);

    /// Optional typed interface exposed to other modules, analogous to
    /// the original's `get_interface()`. Callers downcast the returned
    /// `Any`.
    fn get_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        None
    }
}

/// Constructs a module instance bound to `host`, given the on-disk path
/// of its module directory (used to read `meta.txt` / `client_data`
/// adjacent files, e.g. by the loader or client_file modules). A boxed
/// closure rather than a bare `fn` pointer, so a constructor can close
/// over configuration gathered before the registry was built.
pub type ModuleConstructor = Arc<dyn Fn(Host, String) -> Box<dyn Module> + Send + Sync>;

/// The compile-time table of available builtin modules, keyed by name.
/// `buildat_server`'s `main` populates this once at startup with every
/// module it was linked against; the `loader` module consults it to
/// build module instances once the dependency resolver has produced a
/// load order.
#[derive(Default)]
pub struct Registry {
    constructors: HashMap<String, ModuleConstructor>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers a constructor under `name`. Called once per builtin
    /// module at process startup; a duplicate registration overwrites the
    /// previous entry, since this only ever happens in `main` wiring, not
    /// at runtime.
    pub fn register(
        &mut self,
        name: &str,
        ctor: impl Fn(Host, String) -> Box<dyn Module> + Send + Sync + 'static,
    ) {
        self.constructors.insert(name.to_string(), Arc::new(ctor));
    }

    pub fn get(&self, name: &str) -> Option<ModuleConstructor> {
        self.constructors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}
