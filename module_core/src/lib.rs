// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The module host and event bus: the hard core of the server (spec §1).
//! Owns module lifecycle, inter-module access with per-module mutual
//! exclusion, and a deferred-dispatch publish/subscribe event bus whose
//! subscriptions survive module reload. Kept free of networking and
//! filesystem concerns, which live in the builtin modules that consume
//! this crate.

mod container;
mod error;
mod event;
mod host;
mod module;

pub use error::{HostError, Result};
pub use event::{Event, EventType, EventTypeRegistry, Payload};
pub use host::{
    Host, ModuleLifecycle, ModuleModified, EVENT_CONTINUE, EVENT_MODULE_LOADED,
    EVENT_MODULE_MODIFIED, EVENT_MODULE_UNLOADED, EVENT_START, EVENT_UNLOAD,
};
pub use module::{Module, ModuleConstructor, Registry};
