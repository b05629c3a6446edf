// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use packet_stream::PacketStream;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;

/// Per-peer state (spec §3 `Peer`): the framed stream shared by the
/// connection task and `NetworkInterface::send`, a channel feeding
/// outgoing bytes to that task, and a request channel used to ask the
/// task to release its socket for a reload hand-off.
pub struct Peer {
    pub id: u64,
    pub stream: Mutex<PacketStream>,
    pub write_tx: UnboundedSender<Vec<u8>>,
    pub handoff_tx: UnboundedSender<oneshot::Sender<Option<i32>>>,
}
