// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Host-level error kinds (spec §7), distinct from [`common::Error`]: these
//! name failures of the module lifecycle and dependency resolution rather
//! than of wire/content encoding.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("module '{0}' is already loaded")]
    AlreadyExists(String),

    #[error("no such module '{0}'")]
    NotFound(String),

    #[error("dependency resolution failed: {0}")]
    Unresolvable(String),

    /// Internal signal that unwinds the main loop cleanly, matching the
    /// original's `shutdown(exit_status, reason)` exception. Propagated
    /// with `?` from `Host::handle_events` up to `main`.
    #[error("shutdown requested: {reason} (exit status {exit_status})")]
    Shutdown { exit_status: i32, reason: String },
}

pub type Result<T> = std::result::Result<T, HostError>;
