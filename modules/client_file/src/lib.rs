// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The builtin `client_file` module: a hash-addressed content catalog,
//! announced to every connected peer and served on request (spec §4.6).
//! Grounded on `examples/original_source/builtin/client_file/client_file.cpp`,
//! translated from its `cereal`-archived structs to `common::wire`'s
//! fixed-order little-endian encoding and from its dedicated
//! `FileWatchThread` to the `notify`-backed [`file_watch::FileWatch`].

mod file_watch;

use common::sha1::Sha1Hash;
use common::wire::{Reader, Writer};
use module_core::{EventType, Host, Module, ModuleConstructor, Payload};
use network::NetworkInterface;
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use file_watch::FileWatch;

pub const EVENT_FILES_TRANSMITTED: &str = "client_file:files_transmitted";

pub const PACKET_ANNOUNCE_FILE: &str = "core:announce_file";
pub const PACKET_TELL_AFTER_ALL_TRANSFERRED: &str = "core:tell_after_all_files_transferred";
pub const PACKET_REQUEST_FILE: &str = "core:request_file";
pub const PACKET_FILE_CONTENT: &str = "core:file_content";
pub const PACKET_ALL_FILES_TRANSFERRED: &str = "core:all_files_transferred";

const MODULE_NAME: &str = "client_file";
const RESTORE_KEY: &str = "client_file:restore_info";

/// Payload of `client_file:files_transmitted`.
pub struct FilesTransmitted {
    pub peer_id: u64,
}

#[derive(Clone)]
struct FileEntry {
    content: Vec<u8>,
    hash: Sha1Hash,
    /// The filesystem path this entry was last loaded from whole, if
    /// any. Cleared back to `None` on every watch-triggered update (spec
    /// §4.6: "modifications to `path` trigger `update_file_content(name,
    /// new_bytes)`"), matching the original, which reconstructs the
    /// catalog entry from scratch on every content change.
    path: Option<String>,
}

type Catalog = Arc<Mutex<HashMap<String, FileEntry>>>;

/// The typed interface exposed via `Module::get_interface`, letting the
/// `loader` module (and anything else) publish content without depending
/// on this crate's internals.
pub struct ClientFileInterface {
    host: Host,
    files: Catalog,
    watch: Arc<Mutex<Option<FileWatch>>>,
}

impl ClientFileInterface {
    pub fn add_file_content(&self, name: &str, content: Vec<u8>) {
        update_file_content(&self.host, &self.files, name, content);
    }

    pub fn add_file_path(&self, name: &str, path: &str) -> io::Result<()> {
        add_file_path(&self.host, &self.files, &self.watch, name, path)
    }

    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

pub fn constructor() -> ModuleConstructor {
    Arc::new(move |host: Host, _path: String| -> Box<dyn Module> { Box::new(ClientFileModule::new(host)) })
}

struct ClientFileModule {
    host: Host,
    files: Catalog,
    watch: Arc<Mutex<Option<FileWatch>>>,
    interface: Arc<ClientFileInterface>,
}

impl ClientFileModule {
    fn new(host: Host) -> Self {
        let files: Catalog = Arc::new(Mutex::new(HashMap::new()));
        let watch = match FileWatch::new() {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "client_file: could not start a file watch, path-backed files won't auto-update");
                None
            }
        };
        let watch = Arc::new(Mutex::new(watch));
        ClientFileModule {
            interface: Arc::new(ClientFileInterface {
                host: host.clone(),
                files: files.clone(),
                watch: watch.clone(),
            }),
            host,
            files,
            watch,
        }
    }

    fn on_unload(&self) {
        debug!("client_file: on_unload");
        let bytes = serialize_restore_info(&self.files.lock().unwrap());
        self.host.tmp_store_data(RESTORE_KEY, bytes);
    }
}

impl Module for ClientFileModule {
    fn init(&mut self) {
        debug!("client_file: init");
        self.host
            .sub_event(MODULE_NAME, self.host.event_type(network::EVENT_CLIENT_CONNECTED));
        self.host.sub_event(
            MODULE_NAME,
            self.host.event_type(&network::packet_received_event_name(PACKET_REQUEST_FILE)),
        );
        self.host.sub_event(
            MODULE_NAME,
            self.host
                .event_type(&network::packet_received_event_name(PACKET_ALL_FILES_TRANSFERRED)),
        );
        restore_files(&self.host, &self.files, &self.watch);
    }

    fn event(&mut self, event_type: EventType, payload: Payload) {
        let host = self.host.clone();
        if event_type == host.event_type(module_core::EVENT_UNLOAD) {
            self.on_unload();
        } else if event_type == host.event_type(network::EVENT_CLIENT_CONNECTED) {
            on_client_connected(&host, &self.files, &payload);
        } else if event_type == host.event_type(&network::packet_received_event_name(PACKET_REQUEST_FILE)) {
            on_request_file(&host, &self.files, &payload);
        } else if event_type == host.event_type(&network::packet_received_event_name(PACKET_ALL_FILES_TRANSFERRED)) {
            on_all_files_transferred(&host, &payload);
        }
    }

    fn get_interface(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        Some(self.interface.clone())
    }
}

fn network_interface(host: &Host) -> Option<Arc<NetworkInterface>> {
    host.access_module("network", |m| m.get_interface())
        .flatten()?
        .downcast::<NetworkInterface>()
        .ok()
}

fn encode_announce(name: &str, hash: &Sha1Hash) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_str(name);
    w.write_blob(hash.as_bytes());
    w.into_vec()
}

fn decode_name_and_hash(data: &[u8]) -> Option<(String, Sha1Hash)> {
    let mut r = Reader::new(data);
    let name = r.read_str().ok()?;
    let hash_bytes = r.read_blob().ok()?;
    let hash: [u8; 20] = hash_bytes.as_slice().try_into().ok()?;
    Some((name, Sha1Hash(hash)))
}

fn encode_file_content(name: &str, hash: &Sha1Hash, content: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_str(name);
    w.write_blob(hash.as_bytes());
    w.write_blob(content);
    w.into_vec()
}

/// Hashes `content`, upserts the entry, and broadcasts `announce_file` to
/// every currently connected peer if the hash actually changed (spec
/// §4.6 `add_file_content`/`update_file_content`). Always clears the
/// entry's `path`, since a content-only update has no file backing it.
fn update_file_content(host: &Host, files: &Catalog, name: &str, content: Vec<u8>) {
    let hash = Sha1Hash::calculate(&content);
    {
        let guard = files.lock().unwrap();
        if let Some(existing) = guard.get(name) {
            if existing.hash == hash {
                debug!(name, hash = %hash.hex(), "client_file: content unchanged, ignored");
                return;
            }
        }
    }
    info!(name, hash = %hash.hex(), "client_file: file updated");
    files.lock().unwrap().insert(name.to_string(), FileEntry { content, hash, path: None });
    broadcast_announce(host, name, &hash);
}

fn broadcast_announce(host: &Host, name: &str, hash: &Sha1Hash) {
    let Some(iface) = network_interface(host) else { return };
    let payload = encode_announce(name, hash);
    for peer_id in iface.connected_peers() {
        iface.send(peer_id, PACKET_ANNOUNCE_FILE, &payload);
    }
}

/// Reads `path` whole, hashes it, upserts the entry with its path
/// recorded, and installs a watch so later on-disk modifications feed
/// back through `update_file_content` (spec §4.6 `add_file_path`).
fn add_file_path(host: &Host, files: &Catalog, watch: &Arc<Mutex<Option<FileWatch>>>, name: &str, path: &str) -> io::Result<()> {
    let content = std::fs::read(path)?;
    let hash = Sha1Hash::calculate(&content);
    info!(name, path, hash = %hash.hex(), "client_file: file added");
    files.lock().unwrap().insert(
        name.to_string(),
        FileEntry { content, hash, path: Some(path.to_string()) },
    );
    broadcast_announce(host, name, &hash);

    let dir = Path::new(path).parent().unwrap_or_else(|| Path::new("."));
    let name_owned = name.to_string();
    let path_owned = path.to_string();
    let host_for_cb = host.clone();
    let files_for_cb = files.clone();
    let cb: file_watch::WatchCallback = Arc::new(move |changed: &Path| {
        if changed != Path::new(&path_owned) {
            return;
        }
        match std::fs::read(&path_owned) {
            Ok(content) if !content.is_empty() => {
                update_file_content(&host_for_cb, &files_for_cb, &name_owned, content);
            }
            Ok(_) => warn!(name = %name_owned, path = %path_owned, "client_file: updated file is empty, ignored"),
            Err(e) => warn!(name = %name_owned, path = %path_owned, error = %e, "client_file: couldn't read updated file"),
        }
    });

    let mut guard = watch.lock().unwrap();
    if let Some(watch) = guard.as_mut() {
        if let Err(e) = watch.add(dir, cb) {
            warn!(name, path, error = %e, "client_file: failed to install file watch");
        }
    }
    Ok(())
}

fn on_client_connected(host: &Host, files: &Catalog, payload: &Payload) {
    let Some(connected) = payload.downcast_ref::<network::PeerLifecycle>() else { return };
    let Some(iface) = network_interface(host) else { return };
    let peer_id = connected.peer_id;
    debug!(peer_id, "client_file: sending file hashes to new client");

    let snapshot: Vec<(String, Sha1Hash)> = {
        let files = files.lock().unwrap();
        files.iter().map(|(name, entry)| (name.clone(), entry.hash)).collect()
    };
    for (name, hash) in snapshot {
        iface.send(peer_id, PACKET_ANNOUNCE_FILE, &encode_announce(&name, &hash));
    }
    iface.send(peer_id, PACKET_TELL_AFTER_ALL_TRANSFERRED, &[]);
}

fn on_request_file(host: &Host, files: &Catalog, payload: &Payload) {
    let Some(packet) = payload.downcast_ref::<network::PacketReceived>() else { return };
    let Some((name, requested_hash)) = decode_name_and_hash(&packet.data) else {
        warn!("client_file: malformed request_file packet");
        return;
    };

    let entry = { files.lock().unwrap().get(&name).cloned() };
    let Some(entry) = entry else {
        warn!(name = %name, "client_file: requested file does not exist");
        return;
    };
    if entry.hash != requested_hash {
        warn!(
            name = %name,
            requested = %requested_hash.hex(),
            actual = %entry.hash.hex(),
            "client_file: requested file differs in hash"
        );
        return;
    }

    let Some(iface) = network_interface(host) else { return };
    iface.send(
        packet.peer_id,
        PACKET_FILE_CONTENT,
        &encode_file_content(&name, &entry.hash, &entry.content),
    );
}

fn on_all_files_transferred(host: &Host, payload: &Payload) {
    let Some(packet) = payload.downcast_ref::<network::PacketReceived>() else { return };
    host.emit_named(EVENT_FILES_TRANSMITTED, Arc::new(FilesTransmitted { peer_id: packet.peer_id }));
}

/// Serializes `(name, content-or-empty, path-or-empty)` for every entry
/// (spec §4.6), matching the original's `on_unload` restore-info dump:
/// path-backed entries are stored with empty content (re-read on
/// restore), content-only entries with their bytes inline.
fn serialize_restore_info(files: &HashMap<String, FileEntry>) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u32(files.len() as u32);
    for (name, entry) in files {
        w.write_str(name);
        match &entry.path {
            Some(path) => {
                w.write_blob(&[]);
                w.write_str(path);
            }
            None => {
                w.write_blob(&entry.content);
                w.write_str("");
            }
        }
    }
    w.into_vec()
}

fn restore_files(host: &Host, files: &Catalog, watch: &Arc<Mutex<Option<FileWatch>>>) {
    let bytes = host.tmp_restore_data(RESTORE_KEY);
    if bytes.is_empty() {
        return;
    }
    let mut r = Reader::new(&bytes);
    let count = match r.read_u32() {
        Ok(c) => c,
        Err(_) => {
            warn!("client_file: malformed restore info, discarding");
            return;
        }
    };
    for _ in 0..count {
        let name = match r.read_str() {
            Ok(s) => s,
            Err(_) => {
                warn!("client_file: truncated restore info, stopping");
                break;
            }
        };
        let content = match r.read_blob() {
            Ok(b) => b,
            Err(_) => {
                warn!(name = %name, "client_file: truncated restore info, stopping");
                break;
            }
        };
        let path = match r.read_str() {
            Ok(s) => s,
            Err(_) => {
                warn!(name = %name, "client_file: truncated restore info, stopping");
                break;
            }
        };

        info!(name = %name, "client_file: restoring");
        if !path.is_empty() {
            if let Err(e) = add_file_path(host, files, watch, &name, &path) {
                warn!(name = %name, path = %path, error = %e, "client_file: failed to restore from path");
            }
        } else {
            update_file_content(host, files, &name, content);
        }
    }
}
