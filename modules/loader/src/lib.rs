// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The builtin `loader` module: owns the policy around the dependency
//! resolver in [`algorithm`] (spec §4.3 supplement). Grounded on
//! `examples/original_source/builtin/loader/loader.cpp`'s `Module` and
//! `ResolveState::load_module`/`load_modules`: discovers every module
//! under `modules_path` and `builtin_modules_path`, resolves a load
//! order, and drives `Host::load_module` for each, publishing each
//! module's `client_data/` files to the Content Catalog along the way.

use algorithm::{resolve, Candidate, ResolveError};
use client_file::ClientFileInterface;
use common::module_meta::ModuleMeta;
use module_core::{
    EventType, Host, Module, ModuleConstructor, ModuleModified, Payload, Registry, EVENT_MODULE_MODIFIED,
    EVENT_START, EVENT_UNLOAD,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MODULE_NAME: &str = "loader";
/// A module directory under `modules_path` reserved for the loader's own
/// bookkeeping, excluded from discovery (original: `__loader`).
const RESERVED_DIR: &str = "__loader";

/// One discovered module directory: its declared metadata plus where it
/// actually lives on disk, joining [`Candidate`] (which the resolver
/// algorithm needs) with the path the loader needs to publish
/// `client_data/` and to pass to `Host::load_module`.
#[derive(Debug, Clone)]
struct DiscoveredModule {
    meta: ModuleMeta,
    path: PathBuf,
}

pub fn constructor(registry: Registry) -> ModuleConstructor {
    let registry = Arc::new(registry);
    Arc::new(move |host: Host, path: String| -> Box<dyn Module> {
        Box::new(LoaderModule::new(host, path, registry.clone()))
    })
}

struct LoaderModule {
    host: Host,
    registry: Arc<Registry>,
}

impl LoaderModule {
    fn new(host: Host, _path: String, registry: Arc<Registry>) -> Self {
        LoaderModule { host, registry }
    }

    fn load_modules(&self) {
        info!("loader: resolving module load order");
        let discovered = discover_all(self.host.get_modules_path(), self.host.get_builtin_modules_path());
        let required = required_modules(self.host.get_modules_path());

        let candidates: BTreeMap<String, Candidate> = discovered
            .iter()
            .map(|(name, m)| (name.clone(), Candidate { name: name.clone(), meta: m.meta.clone() }))
            .collect();

        let resolution = match resolve(&required, &candidates) {
            Ok(resolution) => resolution,
            Err(ResolveError::MissingDependency { module, missing }) => {
                let reason = format!("loader: module '{module}' is missing required dependency '{missing}'");
                warn!("{reason}");
                self.host.shutdown(1, reason);
                return;
            }
        };
        for skipped in &resolution.skipped_optional {
            warn!(
                module = %skipped.module,
                missing = %skipped.missing,
                "loader: optional dependency unavailable, continuing without it"
            );
        }
        let load_order = resolution.order;
        info!(order = ?load_order, "loader: module load order resolved");

        for name in load_order {
            let Some(discovered) = discovered.get(&name) else {
                self.host.shutdown(1, format!("loader: lost track of discovered module '{name}'"));
                return;
            };
            let Some(ctor) = self.registry.get(&name) else {
                let reason = format!("loader: no linked implementation for module '{name}'");
                warn!("{reason}");
                self.host.shutdown(1, reason);
                return;
            };
            let path = discovered.path.to_string_lossy().into_owned();
            if !self.host.load_module(&name, &path, ctor) {
                self.host.shutdown(1, format!("loader: error loading module '{name}'"));
                return;
            }
            publish_client_data(&self.host, &name, &discovered.path);
        }
    }

    fn on_module_modified(&self, modified: &ModuleModified) {
        if modified.name == MODULE_NAME {
            return;
        }
        debug!(module = %modified.name, "loader: reload requested");
        let Some(ctor) = self.registry.get(&modified.name) else {
            warn!(module = %modified.name, "loader: no linked implementation, cannot reload");
            return;
        };
        if !self.host.reload_module(&modified.name, &modified.path, ctor) {
            warn!(module = %modified.name, "loader: reload_module failed, module wasn't loaded");
        }
    }
}

impl Module for LoaderModule {
    fn init(&mut self) {
        debug!("loader: init");
        self.host.sub_event(MODULE_NAME, self.host.event_type(EVENT_START));
        self.host.sub_event(MODULE_NAME, self.host.event_type(EVENT_MODULE_MODIFIED));
    }

    fn event(&mut self, event_type: EventType, payload: Payload) {
        let host = self.host.clone();
        if event_type == host.event_type(EVENT_START) {
            self.load_modules();
        } else if event_type == host.event_type(EVENT_MODULE_MODIFIED) {
            if let Some(modified) = payload.downcast_ref::<ModuleModified>() {
                self.on_module_modified(modified);
            }
        } else if event_type == host.event_type(EVENT_UNLOAD) {
            debug!("loader: on_unload");
        }
    }
}

/// Every immediate subdirectory of `modules_path`, excluding
/// [`RESERVED_DIR`] — the set the resolver is asked to satisfy. Builtin
/// modules are never required directly; they are pulled in only as
/// dependencies of something under `modules_path`.
fn required_modules(modules_path: &str) -> BTreeSet<String> {
    list_subdirs(Path::new(modules_path))
        .into_iter()
        .filter(|name| name != RESERVED_DIR)
        .collect()
}

/// Scans both roots for `<name>/meta.txt`, `modules_path` entries taking
/// precedence over same-named `builtin_modules_path` entries, matching
/// the original's `m_module_load_paths` search order.
fn discover_all(modules_path: &str, builtin_modules_path: &str) -> BTreeMap<String, DiscoveredModule> {
    let mut found = BTreeMap::new();
    for root in [builtin_modules_path, modules_path] {
        for name in list_subdirs(Path::new(root)) {
            if name == RESERVED_DIR {
                continue;
            }
            let module_path = Path::new(root).join(&name);
            match read_meta(&module_path) {
                Ok(meta) => {
                    found.insert(name, DiscoveredModule { meta, path: module_path });
                }
                Err(e) => warn!(module = %name, path = %module_path.display(), error = %e, "loader: skipping, could not read meta.txt"),
            }
        }
    }
    found
}

fn list_subdirs(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect()
}

fn read_meta(module_path: &Path) -> std::io::Result<ModuleMeta> {
    let text = std::fs::read_to_string(module_path.join("meta.txt"))?;
    ModuleMeta::parse(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Publishes every file under `<module_path>/client_data/` to the
/// Content Catalog under `<module>/<relative-path>` (spec §4.3/§6.3).
/// A missing `client_data/` directory, or a missing `client_file`
/// module, is not an error — most modules have neither.
fn publish_client_data(host: &Host, module_name: &str, module_path: &Path) {
    let Some(catalog) = client_file_interface(host) else {
        return;
    };
    let client_data = module_path.join("client_data");
    for file in walk_files(&client_data) {
        let Ok(relative) = file.strip_prefix(&client_data) else { continue };
        let catalog_name = format!("{module_name}/{}", relative.to_string_lossy().replace('\\', "/"));
        if let Err(e) = catalog.add_file_path(&catalog_name, &file.to_string_lossy()) {
            warn!(file = %file.display(), error = %e, "loader: failed to publish client_data file");
        }
    }
}

fn client_file_interface(host: &Host) -> Option<Arc<ClientFileInterface>> {
    host.access_module("client_file", |m| m.get_interface())
        .flatten()?
        .downcast::<ClientFileInterface>()
        .ok()
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            out.extend(walk_files(&path));
        } else {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests;
