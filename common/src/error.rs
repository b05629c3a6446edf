// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Crate-wide error kinds, matching the taxonomy of error kinds (not error
//! types) that the original implementation distinguishes: `NotFound` and
//! `AlreadyExists` are surfaced as `bool`/`Option` return values at most call
//! sites rather than through this enum — it exists for the cases that do
//! need to carry a message (`Malformed`, `Unresolvable`, `Io`, `Shutdown`).

use thiserror::Error;

/// Errors produced by the shared protocol and metadata helpers.
///
/// Per-crate errors (`module_core::HostError`, the network module's IO
/// errors, ...) wrap or convert into this where they cross a crate
/// boundary that callers outside the core care about.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad JSON in `meta.txt`, a malformed wire frame, or an unknown
    /// incoming packet type id. Config-level instances are fatal; stream
    /// instances are recoverable (log + drop one frame).
    #[error("malformed: {0}")]
    Malformed(String),

    /// The dependency resolver could not promise a required module.
    #[error("unresolvable: {0}")]
    Unresolvable(String),

    /// Socket or filesystem error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Internal signal carrying an exit status and a human-readable
    /// reason, used to unwind the main loop cleanly.
    #[error("shutdown requested (status {exit_status}): {reason}")]
    Shutdown { exit_status: i32, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
