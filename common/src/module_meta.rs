// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Module metadata, as declared in each module directory's `meta.txt`
//! (see spec §6.3). Grounded on
//! `examples/original_source/src/interface/module_info.h` and the JSON
//! loading in `examples/original_source/builtin/loader/loader.cpp`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A single dependency declaration, forward or reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub module: String,
    #[serde(default)]
    pub optional: bool,
}

/// The declared metadata of a module, as read from `meta.txt`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(default)]
    pub cxxflags: String,
    #[serde(default)]
    pub ldflags: String,
    #[serde(default)]
    pub dependencies: Vec<ModuleDependency>,
    #[serde(default)]
    pub reverse_dependencies: Vec<ModuleDependency>,
}

impl ModuleMeta {
    /// Parses a `meta.txt` document. Malformed JSON is a fatal
    /// configuration error (spec §7, `Malformed` kind).
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Malformed(format!("invalid meta.txt: {e}")))
    }
}

/// A module's identity, on-disk location and declared metadata, as
/// assembled by the `loader` module before it is handed to the
/// dependency resolver.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub name: String,
    pub path: String,
    pub meta: ModuleMeta,
}
