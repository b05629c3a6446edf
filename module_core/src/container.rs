// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The runtime record owning one loaded module (spec §3 "Module
//! Container"). Serializes all calls into the module behind a re-entrant
//! mutex, so a module handler may call back into the host and, from
//! there, into itself (e.g. via `access_module(self_name, …)`) without
//! deadlocking — the one genuinely recursive-locking requirement in this
//! codebase, hence `parking_lot::ReentrantMutex` rather than
//! `std::sync::Mutex` (see `SPEC_FULL.md` §5).

use crate::module::Module;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;

pub struct ModuleContainer {
    pub name: String,
    pub path: String,
    /// `None` once the module has been destroyed during unload; the
    /// container itself lives on briefly afterward only so in-flight
    /// `Arc<ModuleContainer>` clones (e.g. a subscription-list snapshot
    /// taken just before unload) see a consistent "absent" result instead
    /// of a dangling pointer.
    slot: ReentrantMutex<RefCell<Option<Box<dyn Module>>>>,
}

impl ModuleContainer {
    pub fn new(name: String, path: String, module: Box<dyn Module>) -> Self {
        ModuleContainer {
            name,
            path,
            slot: ReentrantMutex::new(RefCell::new(Some(module))),
        }
    }

    /// Runs `f` with exclusive, possibly-recursive access to the module,
    /// if it is still present. Returns `None` if the module has already
    /// been destroyed (the `Absent` state between unload and the next
    /// load under the same name).
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Module) -> R) -> Option<R> {
        let guard = self.slot.lock();
        let mut slot = guard.borrow_mut();
        slot.as_deref_mut().map(f)
    }

    /// Takes the module out, leaving the container in the `Absent` state.
    /// Used by the unload protocol after `core:unload` has been delivered.
    pub fn take(&self) -> Option<Box<dyn Module>> {
        let guard = self.slot.lock();
        guard.borrow_mut().take()
    }

    pub fn is_present(&self) -> bool {
        let guard = self.slot.lock();
        guard.borrow().is_some()
    }
}
