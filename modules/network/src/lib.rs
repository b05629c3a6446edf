// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The builtin `network` module: accepts TCP peers, frames their byte
//! streams through a [`packet_stream::PacketStream`] each, and publishes
//! decoded packets as `network:packet_received/<name>` events (spec
//! §4.5). Grounded on
//! `examples/original_source/builtin/network/network.cpp`'s `Peer` /
//! `NetworkThread`, with the hand-rolled `select(2)` poll loop replaced
//! by a `tokio` accept task plus one combined read/write task per peer,
//! per `SPEC_FULL.md` §4.5's async mapping.

mod peer;

use module_core::{Host, Module, ModuleConstructor, Payload};
use packet_stream::PacketStream;
use peer::Peer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

pub const EVENT_CLIENT_CONNECTED: &str = "network:client_connected";
pub const EVENT_CLIENT_DISCONNECTED: &str = "network:client_disconnected";
pub fn packet_received_event_name(packet_name: &str) -> String {
    format!("network:packet_received/{packet_name}")
}

/// The Transient Store keys this module hands its open sockets off
/// under across a reload (spec §3, §4.5): the peer connections, and the
/// listening socket itself, so a reload never needs to re-bind the port
/// (and never races the old socket's close against the new one's bind).
const PEER_HANDOFF_KEY: &str = "network:peer_fds";
const LISTENER_HANDOFF_KEY: &str = "network:listener_fd";

/// Payload of `network:client_connected` / `network:client_disconnected`.
pub struct PeerLifecycle {
    pub peer_id: u64,
}

/// Payload of `network:packet_received/<name>`.
pub struct PacketReceived {
    pub peer_id: u64,
    pub data: Vec<u8>,
}

type PeerMap = Arc<Mutex<HashMap<u64, Arc<Peer>>>>;

/// The typed interface exposed via `Module::get_interface`, letting other
/// modules (chiefly `client_file`) send packets to a connected peer
/// without depending on this crate's internals.
pub struct NetworkInterface {
    peers: PeerMap,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
}

impl NetworkInterface {
    /// The address actually bound, once `init` has completed — distinct
    /// from the configured address when that address's port is `0`
    /// (as in tests).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Encodes `(name, payload)` through `peer_id`'s stream and queues
    /// the bytes for writing. Returns `false` if the peer is gone — a
    /// write failure (§7 IO kind) evicts the peer from its own task
    /// rather than here.
    pub fn send(&self, peer_id: u64, name: &str, payload: &[u8]) -> bool {
        let peer = { self.peers.lock().unwrap().get(&peer_id).cloned() };
        let Some(peer) = peer else {
            return false;
        };
        let bytes = peer.stream.lock().unwrap().encode(name, payload);
        peer.write_tx.send(bytes).is_ok()
    }

    pub fn connected_peers(&self) -> Vec<u64> {
        self.peers.lock().unwrap().keys().copied().collect()
    }
}

/// Constructs the `network` module, bound to `listen_addr`. Registered
/// once into a [`module_core::Registry`] by `buildat_server`'s `main`;
/// the same constructor serves both the first load and every later
/// reload, since peers in flight are recovered from the Transient Store
/// rather than needing a distinct code path.
pub fn constructor(listen_addr: SocketAddr) -> ModuleConstructor {
    Arc::new(move |host: Host, _path: String| -> Box<dyn Module> {
        Box::new(NetworkModule::new(host, listen_addr))
    })
}

struct NetworkModule {
    host: Host,
    listen_addr: SocketAddr,
    peers: PeerMap,
    next_peer_id: Arc<AtomicU64>,
    interface: Arc<NetworkInterface>,
    accept_control_tx: Option<mpsc::UnboundedSender<oneshot::Sender<Option<i32>>>>,
}

impl NetworkModule {
    fn new(host: Host, listen_addr: SocketAddr) -> Self {
        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        NetworkModule {
            host,
            listen_addr,
            interface: Arc::new(NetworkInterface {
                peers: peers.clone(),
                local_addr: Arc::new(Mutex::new(None)),
            }),
            peers,
            next_peer_id: Arc::new(AtomicU64::new(1)),
            accept_control_tx: None,
        }
    }
}

impl Module for NetworkModule {
    fn init(&mut self) {
        let listener = match take_handed_off_listener(&self.host) {
            Some(listener) => listener,
            None => match bind(self.listen_addr) {
                Some(listener) => listener,
                None => return,
            },
        };

        let bound_addr = match listener.local_addr() {
            Ok(a) => a,
            Err(e) => {
                warn!(error = %e, "network: failed to read bound address");
                self.listen_addr
            }
        };
        *self.interface.local_addr.lock().unwrap() = Some(bound_addr);

        for (id, stream) in take_handed_off_peers(&self.host) {
            self.next_peer_id.fetch_max(id + 1, Ordering::SeqCst);
            spawn_peer(stream, id, self.host.clone(), self.peers.clone(), false);
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let host = self.host.clone();
        let peers = self.peers.clone();
        let next_peer_id = self.next_peer_id.clone();
        info!(addr = %bound_addr, "network: listening");

        tokio::spawn(accept_loop(listener, host, peers, next_peer_id, control_rx));
        self.accept_control_tx = Some(control_tx);
    }

    fn event(&mut self, event_type: module_core::EventType, _payload: Payload) {
        let unload_type = self.host.event_type(module_core::EVENT_UNLOAD);
        if event_type == unload_type {
            if let Some(control_tx) = self.accept_control_tx.take() {
                hand_off_listener(&self.host, &control_tx);
            }
            hand_off_peers(&self.host, &self.peers);
        }
    }

    fn get_interface(&self) -> Option<Arc<dyn std::any::Any + Send + Sync>> {
        Some(self.interface.clone())
    }
}

/// Asks every peer task to release its socket without closing it (spec
/// §4.5's fd hand-off) and serializes the recovered descriptors into the
/// Transient Store. Bridges the synchronous `event()` callback to each
/// peer task's async teardown via a blocking receive on a one-shot reply
/// channel — bounded by how quickly each task can unsplit and hand over
/// its stream, which is immediate since neither half is awaiting
/// anything that outlives the peer's own connection.
fn hand_off_peers(host: &Host, peers: &PeerMap) {
    let snapshot: Vec<Arc<Peer>> = peers.lock().unwrap().values().cloned().collect();
    let mut out = Vec::new();
    for peer in snapshot {
        let (reply_tx, reply_rx) = oneshot::channel();
        if peer.handoff_tx.send(reply_tx).is_err() {
            continue; // the peer's task already exited on its own (disconnected)
        }
        let fd = tokio::task::block_in_place(|| reply_rx.blocking_recv());
        if let Ok(Some(fd)) = fd {
            out.extend_from_slice(&peer.id.to_le_bytes());
            out.extend_from_slice(&fd.to_le_bytes());
        }
    }
    host.tmp_store_data(PEER_HANDOFF_KEY, out);
}

/// Same bridge as `hand_off_peers`, for the single listening socket:
/// asks the accept loop to release its fd instead of closing it, so the
/// fresh instance can pick the very same port back up without a rebind.
fn hand_off_listener(host: &Host, control_tx: &mpsc::UnboundedSender<oneshot::Sender<Option<i32>>>) {
    let (reply_tx, reply_rx) = oneshot::channel();
    if control_tx.send(reply_tx).is_err() {
        return;
    }
    if let Ok(Some(fd)) = tokio::task::block_in_place(|| reply_rx.blocking_recv()) {
        host.tmp_store_data(LISTENER_HANDOFF_KEY, fd.to_le_bytes().to_vec());
    }
}

fn take_handed_off_listener(host: &Host) -> Option<TcpListener> {
    let bytes = host.tmp_restore_data(LISTENER_HANDOFF_KEY);
    let fd = i32::from_le_bytes(bytes.as_slice().try_into().ok()?);
    reclaim_listener(fd)
}

fn bind(addr: SocketAddr) -> Option<TcpListener> {
    let std_listener = match std::net::TcpListener::bind(addr) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, %addr, "network: failed to bind listening socket");
            return None;
        }
    };
    if let Err(e) = std_listener.set_nonblocking(true) {
        warn!(error = %e, "network: failed to set listener non-blocking");
        return None;
    }
    match TcpListener::from_std(std_listener) {
        Ok(l) => Some(l),
        Err(e) => {
            warn!(error = %e, "network: failed to adopt listener into the runtime");
            None
        }
    }
}

/// Reads back whatever `hand_off_peers` stored and reconstitutes each
/// entry into a live `tokio::net::TcpStream`, consuming the Transient
/// Store entry. Only meaningful on Unix, where the descriptor hand-off
/// actually preserves the open socket; elsewhere the stored entry (if
/// any) is discarded and those connections are simply gone, matching
/// `SPEC_FULL.md` §4.5's "via `IntoRawFd`/`FromRawFd` on Unix" scoping.
fn take_handed_off_peers(host: &Host) -> Vec<(u64, TcpStream)> {
    let bytes = host.tmp_restore_data(PEER_HANDOFF_KEY);
    let mut out = Vec::new();
    for chunk in bytes.chunks_exact(12) {
        let id = u64::from_le_bytes(chunk[0..8].try_into().unwrap());
        let fd = i32::from_le_bytes(chunk[8..12].try_into().unwrap());
        match reclaim_stream(fd) {
            Some(stream) => out.push((id, stream)),
            None => warn!(peer_id = id, "network: could not reclaim handed-off socket"),
        }
    }
    out
}

#[cfg(unix)]
fn reclaim_stream(fd: i32) -> Option<TcpStream> {
    use std::os::unix::io::FromRawFd;
    let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
    std_stream.set_nonblocking(true).ok()?;
    TcpStream::from_std(std_stream).ok()
}

#[cfg(not(unix))]
fn reclaim_stream(_fd: i32) -> Option<TcpStream> {
    None
}

#[cfg(unix)]
fn release_stream(stream: std::net::TcpStream) -> Option<i32> {
    use std::os::unix::io::IntoRawFd;
    Some(stream.into_raw_fd())
}

#[cfg(not(unix))]
fn release_stream(_stream: std::net::TcpStream) -> Option<i32> {
    None
}

#[cfg(unix)]
fn reclaim_listener(fd: i32) -> Option<TcpListener> {
    use std::os::unix::io::FromRawFd;
    let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
    std_listener.set_nonblocking(true).ok()?;
    TcpListener::from_std(std_listener).ok()
}

#[cfg(not(unix))]
fn reclaim_listener(_fd: i32) -> Option<TcpListener> {
    None
}

#[cfg(unix)]
fn release_listener(listener: std::net::TcpListener) -> Option<i32> {
    use std::os::unix::io::IntoRawFd;
    Some(listener.into_raw_fd())
}

#[cfg(not(unix))]
fn release_listener(_listener: std::net::TcpListener) -> Option<i32> {
    None
}

async fn accept_loop(
    mut listener: TcpListener,
    host: Host,
    peers: PeerMap,
    next_peer_id: Arc<AtomicU64>,
    mut control_rx: mpsc::UnboundedReceiver<oneshot::Sender<Option<i32>>>,
) {
    loop {
        tokio::select! {
            reply = control_rx.recv() => {
                let Some(reply_tx) = reply else { return };
                info!("network: accept loop handing off listening socket");
                let fd = match listener.into_std() {
                    Ok(std_listener) => release_listener(std_listener),
                    Err(e) => {
                        warn!(error = %e, "network: failed to recover listener for hand-off");
                        None
                    }
                };
                let _ = reply_tx.send(fd);
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        let id = next_peer_id.fetch_add(1, Ordering::SeqCst);
                        info!(peer_id = id, %addr, "network: peer connected");
                        spawn_peer(socket, id, host.clone(), peers.clone(), true);
                    }
                    Err(e) => warn!(error = %e, "network: accept failed"),
                }
            }
        }
    }
}

/// Spawns the single task that owns `id`'s connection for its lifetime:
/// reads incoming frames, writes queued outgoing ones, and — on request
/// — reunites the stream and hands its descriptor back for a reload.
/// `emit_connected` is `false` when the stream was just reclaimed across
/// a reload rather than freshly accepted, so `client_connected` fires
/// exactly once per real connection.
fn spawn_peer(socket: TcpStream, id: u64, host: Host, peers: PeerMap, emit_connected: bool) {
    let (write_tx, write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (handoff_tx, handoff_rx) = mpsc::unbounded_channel::<oneshot::Sender<Option<i32>>>();

    let peer = Arc::new(Peer {
        id,
        stream: Mutex::new(PacketStream::new()),
        write_tx,
        handoff_tx,
    });
    peers.lock().unwrap().insert(id, peer);

    if emit_connected {
        host.emit_named(EVENT_CLIENT_CONNECTED, Arc::new(PeerLifecycle { peer_id: id }));
    }

    tokio::spawn(peer_task(socket, id, host, peers, write_rx, handoff_rx));
}

async fn peer_task(
    socket: TcpStream,
    id: u64,
    host: Host,
    peers: PeerMap,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut handoff_rx: mpsc::UnboundedReceiver<oneshot::Sender<Option<i32>>>,
) {
    let (mut read_half, mut write_half) = tokio::io::split(socket);
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 8192];

    let handoff_reply = loop {
        tokio::select! {
            reply = handoff_rx.recv() => {
                match reply {
                    Some(reply_tx) => break Some(reply_tx),
                    None => { disconnect(id, &host, &peers); return; }
                }
            }
            read_result = read_half.read(&mut chunk) => {
                match read_result {
                    Ok(0) => { disconnect(id, &host, &peers); return; }
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        let decoded = {
                            let peer = { peers.lock().unwrap().get(&id).cloned() };
                            let Some(peer) = peer else { return };
                            peer.stream.lock().unwrap().feed(&mut buf)
                        };
                        for item in decoded {
                            match item {
                                packet_stream::Decoded::Packet { name, data } => {
                                    host.emit_named(
                                        &packet_received_event_name(&name),
                                        Arc::new(PacketReceived { peer_id: id, data }),
                                    );
                                }
                                packet_stream::Decoded::UnknownType { type_id } => {
                                    warn!(peer_id = id, type_id, "network: unknown packet type id");
                                }
                                packet_stream::Decoded::MalformedControlFrame => {
                                    warn!(peer_id = id, "network: malformed define_packet_type frame");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(peer_id = id, error = %e, "network: read failed");
                        disconnect(id, &host, &peers);
                        return;
                    }
                }
            }
            maybe_bytes = write_rx.recv() => {
                match maybe_bytes {
                    Some(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            disconnect(id, &host, &peers);
                            return;
                        }
                    }
                    None => { disconnect(id, &host, &peers); return; }
                }
            }
        }
    };

    // Removed from the map without emitting client_disconnected: this is
    // a hand-off, not a real disconnect, and the reload will re-insert
    // the same id if the fd comes back.
    peers.lock().unwrap().remove(&id);
    let stream = read_half.unsplit(write_half);
    let fd = match stream.into_std() {
        Ok(std_stream) => release_stream(std_stream),
        Err(e) => {
            warn!(peer_id = id, error = %e, "network: failed to recover stream for hand-off");
            None
        }
    };
    if let Some(reply_tx) = handoff_reply {
        let _ = reply_tx.send(fd);
    }
}

fn disconnect(id: u64, host: &Host, peers: &PeerMap) {
    peers.lock().unwrap().remove(&id);
    info!(peer_id = id, "network: peer disconnected");
    host.emit_named(EVENT_CLIENT_DISCONNECTED, Arc::new(PeerLifecycle { peer_id: id }));
}
