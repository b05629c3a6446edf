// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! The self-describing framed packet protocol carried over every peer
//! connection (spec §4.4). Each frame is a 6-byte little-endian header —
//! a `u16` packet type id and a `u32` payload length — followed by an
//! opaque payload. Packet *names* are strings; the numeric id that stands
//! in for a name on the wire is negotiated per connection and per
//! direction the first time that name is sent, via the built-in
//! `core:define_packet_type` control packet (id 0). Ids 0..100 are
//! reserved for control use; dynamic assignment starts at 100. Grounded
//! on `examples/original_source/src/impl/packet_stream.cpp`, translated
//! from its hand-rolled `ostringstream` byte-pushing to the
//! `common::wire` helpers, which encode the same byte layout.

use common::wire::{Reader, Writer};
use std::collections::HashMap;

/// The id of the one packet type every peer understands without ever
/// being told about it: the control packet used to tell it about every
/// other type.
pub const DEFINE_PACKET_TYPE_ID: u16 = 0;
pub const DEFINE_PACKET_TYPE_NAME: &str = "core:define_packet_type";

/// The first id handed out to a packet name that isn't a reserved control
/// type. Ids below this are reserved for protocol-level control packets.
pub const FIRST_DYNAMIC_TYPE_ID: u16 = 100;

const HEADER_LEN: usize = 6;

/// One fully-decoded item produced by [`PacketStream::feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete application packet, with its name resolved from the
    /// type id via this stream's incoming registry.
    Packet { name: String, data: Vec<u8> },
    /// A frame whose type id has no known mapping: the sender either
    /// forgot to define it, or we missed the definition frame (e.g. by
    /// joining mid-stream). Recoverable; the caller should log and
    /// otherwise ignore it. The stream continues processing subsequent
    /// frames normally.
    UnknownType { type_id: u16 },
    /// A `core:define_packet_type` control frame whose payload didn't
    /// parse. Recoverable in the same sense as `UnknownType`.
    MalformedControlFrame,
}

/// Assigns outgoing type ids to packet names as they're first sent on
/// this stream, in this direction.
struct OutgoingPacketTypeRegistry {
    name_to_id: HashMap<String, u16>,
    next_id: u16,
}

impl OutgoingPacketTypeRegistry {
    fn new() -> Self {
        let mut name_to_id = HashMap::new();
        name_to_id.insert(DEFINE_PACKET_TYPE_NAME.to_string(), DEFINE_PACKET_TYPE_ID);
        OutgoingPacketTypeRegistry {
            name_to_id,
            next_id: FIRST_DYNAMIC_TYPE_ID,
        }
    }

    /// Returns the id for `name`, assigning a fresh one if this is the
    /// first time it's been sent. The `bool` is `true` exactly when a
    /// fresh id was assigned, so the caller knows to announce it first.
    fn get_or_assign(&mut self, name: &str) -> (u16, bool) {
        if let Some(&id) = self.name_to_id.get(name) {
            return (id, false);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.name_to_id.insert(name.to_string(), id);
        (id, true)
    }
}

/// Maps incoming type ids back to names, as announced by the peer's
/// `core:define_packet_type` control frames.
struct IncomingPacketTypeRegistry {
    id_to_name: HashMap<u16, String>,
}

impl IncomingPacketTypeRegistry {
    fn new() -> Self {
        let mut id_to_name = HashMap::new();
        id_to_name.insert(DEFINE_PACKET_TYPE_ID, DEFINE_PACKET_TYPE_NAME.to_string());
        IncomingPacketTypeRegistry { id_to_name }
    }

    fn define(&mut self, id: u16, name: String) {
        self.id_to_name.insert(id, name);
    }

    fn name_for(&self, id: u16) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }
}

/// One direction-aware packet stream: encodes outgoing packets (assigning
/// and announcing fresh type ids as needed) and decodes a growing buffer
/// of incoming bytes into complete packets, tolerating partial frames
/// arriving across multiple reads.
pub struct PacketStream {
    outgoing: OutgoingPacketTypeRegistry,
    incoming: IncomingPacketTypeRegistry,
    highest_known_type: u16,
}

impl Default for PacketStream {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketStream {
    pub fn new() -> Self {
        PacketStream {
            outgoing: OutgoingPacketTypeRegistry::new(),
            incoming: IncomingPacketTypeRegistry::new(),
            highest_known_type: DEFINE_PACKET_TYPE_ID,
        }
    }

    /// The highest packet type id assigned or learned of so far, in
    /// either direction. Informational only; not used to bound decoding.
    pub fn highest_known_type(&self) -> u16 {
        self.highest_known_type
    }

    /// Encodes one application packet, returning the bytes to send. If
    /// `name` hasn't been sent on this stream before, a
    /// `core:define_packet_type` frame announcing its id is prepended.
    pub fn encode(&mut self, name: &str, payload: &[u8]) -> Vec<u8> {
        let (id, is_new) = self.outgoing.get_or_assign(name);
        let mut out = Vec::new();
        if is_new {
            let mut w = Writer::new();
            w.write_u16(id);
            w.write_str(name);
            out.extend(frame(DEFINE_PACKET_TYPE_ID, &w.into_vec()));
            self.highest_known_type = self.highest_known_type.max(id);
        }
        out.extend(frame(id, payload));
        out
    }

    /// Consumes as many complete frames as `buf` holds, draining them
    /// from the front of `buf` and returning the decoded results in
    /// order. Any trailing partial frame is left in `buf` for the next
    /// call once more bytes have arrived.
    pub fn feed(&mut self, buf: &mut Vec<u8>) -> Vec<Decoded> {
        let mut out = Vec::new();
        loop {
            if buf.len() < HEADER_LEN {
                break;
            }
            let (type_id, payload_len) = {
                let mut r = Reader::new(&buf[..HEADER_LEN]);
                (
                    r.read_u16().expect("header slice is exactly HEADER_LEN bytes"),
                    r.read_u32().expect("header slice is exactly HEADER_LEN bytes") as usize,
                )
            };
            let total = HEADER_LEN + payload_len;
            if buf.len() < total {
                break;
            }
            let payload = buf[HEADER_LEN..total].to_vec();
            buf.drain(0..total);

            if type_id == DEFINE_PACKET_TYPE_ID {
                let mut r = Reader::new(&payload);
                match (r.read_u16(), r.read_str()) {
                    (Ok(id), Ok(name)) => {
                        self.incoming.define(id, name);
                        self.highest_known_type = self.highest_known_type.max(id);
                    }
                    _ => out.push(Decoded::MalformedControlFrame),
                }
                continue;
            }

            match self.incoming.name_for(type_id) {
                Some(name) => out.push(Decoded::Packet {
                    name: name.to_string(),
                    data: payload,
                }),
                None => out.push(Decoded::UnknownType { type_id }),
            }
        }
        out
    }
}

fn frame(type_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u16(type_id);
    w.write_u32(payload.len() as u32);
    w.write_bytes(payload);
    w.into_vec()
}

#[cfg(test)]
mod tests;
